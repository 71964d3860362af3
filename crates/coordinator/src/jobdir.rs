//! Loading and validating one job directory: `base.c`, `target.o`, `compile.sh` (must be executable), and an
//! optional `function.txt` naming the function under test.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Errors loading a job directory.
#[derive(Debug, thiserror::Error)]
pub enum JobDirectoryError {
    #[error("i/o error reading {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("{0} is not executable (chmod +x it)")]
    NotExecutable(PathBuf),
}

fn read(path: &Path) -> Result<Vec<u8>, JobDirectoryError> {
    fs::read(path).map_err(|source| JobDirectoryError::Io { path: path.to_path_buf(), source })
}

fn read_to_string(path: &Path) -> Result<String, JobDirectoryError> {
    fs::read_to_string(path).map_err(|source| JobDirectoryError::Io { path: path.to_path_buf(), source })
}

/// The loaded, validated contents of one job directory.
#[derive(Debug, Clone)]
pub struct JobDirectory {
    /// The directory this was loaded from.
    pub dir: PathBuf,
    /// `function.txt`'s contents, trimmed, if present.
    pub fn_name: Option<String>,
    /// `base.c`'s contents.
    pub base_source: String,
    /// `target.o`'s bytes.
    pub target_o_bin: Vec<u8>,
    /// `compile.sh`'s contents.
    pub compile_script: String,
}

impl JobDirectory {
    /// Load and validate a job directory. `compile.sh` must carry the
    /// executable bit; the caller is responsible for running it only
    /// through an already-sandboxed compiler handle.
    pub fn load(dir: &Path) -> Result<Self, JobDirectoryError> {
        let base_source = read_to_string(&dir.join("base.c"))?;
        let target_o_bin = read(&dir.join("target.o"))?;

        let compile_path = dir.join("compile.sh");
        let compile_script = read_to_string(&compile_path)?;
        let meta = fs::metadata(&compile_path)
            .map_err(|source| JobDirectoryError::Io { path: compile_path.clone(), source })?;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(JobDirectoryError::NotExecutable(compile_path));
        }

        let fn_name_path = dir.join("function.txt");
        let fn_name = if fn_name_path.exists() {
            Some(read_to_string(&fn_name_path)?.trim().to_string())
        } else {
            None
        };

        Ok(Self { dir: dir.to_path_buf(), fn_name, base_source, target_o_bin, compile_script })
    }

    /// A display name for this job: the function name if known, else the
    /// directory's file name.
    pub fn display_name(&self) -> String {
        self.fn_name.clone().unwrap_or_else(|| {
            self.dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.dir.display().to_string())
        })
    }
}

/// Disambiguate display names for a batch of loaded job directories: when
/// two jobs share the same function name, each gets its directory name
/// appended in parentheses.
pub fn unique_names(jobs: &[JobDirectory]) -> Vec<String> {
    let mut counts = std::collections::HashMap::new();
    for job in jobs {
        *counts.entry(job.display_name()).or_insert(0) += 1;
    }
    jobs.iter()
        .map(|job| {
            let name = job.display_name();
            if counts[&name] > 1 {
                format!("{} ({})", name, job.dir.display())
            } else {
                name
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;
    use std::io::Write as _;

    fn write_job(dir: &Path, fn_name: Option<&str>) {
        fs::write(dir.join("base.c"), "int f(void) { return 0; }").unwrap();
        fs::write(dir.join("target.o"), [0x7f, b'E', b'L', b'F']).unwrap();
        let mut f = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o755)
            .open(dir.join("compile.sh"))
            .unwrap();
        f.write_all(b"#!/bin/sh\n").unwrap();
        if let Some(name) = fn_name {
            fs::write(dir.join("function.txt"), name).unwrap();
        }
    }

    #[test]
    fn loads_a_well_formed_job_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_job(dir.path(), Some("func_80012345\n"));
        let job = JobDirectory::load(dir.path()).unwrap();
        assert_eq!(job.fn_name.as_deref(), Some("func_80012345"));
        assert_eq!(job.target_o_bin, vec![0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn rejects_non_executable_compile_script() {
        let dir = tempfile::tempdir().unwrap();
        write_job(dir.path(), None);
        fs::set_permissions(dir.path().join("compile.sh"), fs::Permissions::from_mode(0o644))
            .unwrap();
        let err = JobDirectory::load(dir.path()).unwrap_err();
        assert!(matches!(err, JobDirectoryError::NotExecutable(_)));
    }

    #[test]
    fn disambiguates_shared_function_names_by_directory() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        write_job(dir_a.path(), Some("func_80012345"));
        write_job(dir_b.path(), Some("func_80012345"));
        let jobs = vec![
            JobDirectory::load(dir_a.path()).unwrap(),
            JobDirectory::load(dir_b.path()).unwrap(),
        ];
        let names = unique_names(&jobs);
        assert_ne!(names[0], names[1]);
        assert!(names[0].contains("func_80012345"));
    }
}
