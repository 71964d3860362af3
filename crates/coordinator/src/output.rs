//! Writing an improving/tied candidate out to disk: `output-{score}-{ctr}/`
//! next to the job directory, containing `source.c`, `base.c`, `score.txt`,
//! and (when requested) `diff.txt`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Find the next unused `output-{score}-{ctr}` directory name under `dir`,
/// starting from `ctr = 0`, so concurrent writers for the same score never
/// clobber each other's output.
fn next_output_dir(dir: &Path, score: i64) -> PathBuf {
    let mut ctr = 0u64;
    loop {
        let candidate = dir.join(format!("output-{score}-{ctr}"));
        if !candidate.exists() {
            return candidate;
        }
        ctr += 1;
    }
}

/// Write one candidate's output. Returns the directory written to.
pub fn write_output(
    job_dir: &Path,
    score: i64,
    base_source: &str,
    candidate_source: &str,
    diff: Option<&str>,
) -> io::Result<PathBuf> {
    let out_dir = next_output_dir(job_dir, score);
    fs::create_dir_all(&out_dir)?;
    fs::write(out_dir.join("source.c"), candidate_source)?;
    fs::write(out_dir.join("base.c"), base_source)?;
    fs::write(out_dir.join("score.txt"), format!("{score}\n"))?;
    if let Some(diff) = diff {
        fs::write(out_dir.join("diff.txt"), diff)?;
    }
    Ok(out_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_expected_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = write_output(dir.path(), 5, "int f(void);", "int f(void) { return 0; }", Some("diff")).unwrap();
        assert_eq!(fs::read_to_string(out.join("source.c")).unwrap(), "int f(void) { return 0; }");
        assert_eq!(fs::read_to_string(out.join("score.txt")).unwrap(), "5\n");
        assert_eq!(fs::read_to_string(out.join("diff.txt")).unwrap(), "diff");
    }

    #[test]
    fn never_collides_on_repeated_score() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_output(dir.path(), 0, "base", "a", None).unwrap();
        let second = write_output(dir.path(), 0, "base", "b", None).unwrap();
        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first.join("source.c")).unwrap(), "a");
        assert_eq!(fs::read_to_string(second.join("source.c")).unwrap(), "b");
    }

    #[test]
    fn omits_diff_file_when_not_requested() {
        let dir = tempfile::tempdir().unwrap();
        let out = write_output(dir.path(), 1, "base", "a", None).unwrap();
        assert!(!out.join("diff.txt").exists());
    }
}
