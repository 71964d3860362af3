//! Real, subprocess-based default implementations of the `CompilerHandle`,
//! `ScorerHandle`, and `CandidateGenerator` seams.
//!
//! Each one shells out to an external program (the job's own `compile.sh`,
//! a configurable scorer binary, a configurable permuter binary) and is
//! itself a thin wrapper: the actual compilation, scoring, and permutation
//! logic lives entirely in whatever external program the caller points
//! these at. This mirrors `compiler.py`/`scorer.py`'s own role as thin
//! subprocess wrappers upstream.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::Command;

use tempfile::NamedTempFile;

use crate::permuter::{CandidateGenerator, CompilerHandle, ScorerHandle};
use crate::seed::SeedTuple;

fn write_temp(contents: &[u8], suffix: &str) -> Result<NamedTempFile, String> {
    let mut f = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .map_err(|e| format!("failed to create temp file: {e}"))?;
    f.write_all(contents).map_err(|e| format!("failed to write temp file: {e}"))?;
    Ok(f)
}

fn run(cmd: &mut Command) -> Result<std::process::Output, String> {
    cmd.output().map_err(|e| format!("failed to run {:?}: {e}", cmd.get_program()))
}

/// Compiles a candidate source by invoking the job's own `compile.sh`.
///
/// Shells out as `compile.sh <source.c> <fn_name> <out.o>`, matching the
/// `$1`/`$3` convention every job's script already follows.
pub struct ShellCompiler {
    pub compile_script: PathBuf,
    pub fn_name: String,
    pub show_errors: bool,
}

impl CompilerHandle for ShellCompiler {
    fn compile(&self, source: &str) -> Result<Vec<u8>, String> {
        let source_file = write_temp(source.as_bytes(), ".c")?;
        let out_file = write_temp(&[], ".o")?;

        let output = run(Command::new(&self.compile_script)
            .arg(source_file.path())
            .arg(&self.fn_name)
            .arg(out_file.path()))?;

        if !output.status.success() {
            if self.show_errors {
                eprint!("{}", String::from_utf8_lossy(&output.stderr));
            }
            return Err(String::from_utf8_lossy(&output.stderr).into_owned());
        }

        std::fs::read(out_file.path()).map_err(|e| format!("compiler produced no output: {e}"))
    }
}

/// Scores a candidate object file against a fixed target by invoking an
/// external scorer binary as `scorer <target.o> <candidate.o> [--stack-differences]`.
///
/// Expects two lines on stdout: a score (`"-1"` for [`crate::PENALTY_INF`])
/// and a hex hash of the resulting object code.
pub struct ShellScorer {
    pub scorer_bin: PathBuf,
    pub target_o: PathBuf,
    pub stack_differences: bool,
}

impl ScorerHandle for ShellScorer {
    fn score(&self, object: &[u8]) -> Result<(i64, String), String> {
        let candidate_file = write_temp(object, ".o")?;

        let mut cmd = Command::new(&self.scorer_bin);
        cmd.arg(&self.target_o).arg(candidate_file.path());
        if self.stack_differences {
            cmd.arg("--stack-differences");
        }
        let output = run(&mut cmd)?;
        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).into_owned());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines();
        let score: i64 = lines
            .next()
            .ok_or_else(|| "scorer produced no output".to_string())?
            .trim()
            .parse()
            .map_err(|e| format!("scorer produced a non-numeric score: {e}"))?;
        let score = if score < 0 { crate::PENALTY_INF } else { score };
        let hash = lines.next().unwrap_or("").trim().to_string();
        Ok((score, hash))
    }
}

/// Generates a candidate C source by invoking an external permuter binary as
/// `permuter_bin <base.c> <fn_name> <keep_flag> <rng_seed>`, reading the
/// resulting source from stdout.
///
/// This is the one seam that stays a pure subprocess shim rather than
/// something this crate ever implements directly: the permutation
/// algorithm itself is out of scope here.
pub struct ShellCandidateGenerator {
    pub permuter_bin: PathBuf,
    pub fn_name: String,
}

impl CandidateGenerator for ShellCandidateGenerator {
    fn generate(&self, base_source: &str, seed: SeedTuple) -> Result<String, String> {
        let base_file = write_temp(base_source.as_bytes(), ".c")?;
        let output = run(Command::new(&self.permuter_bin)
            .arg(base_file.path())
            .arg(&self.fn_name)
            .arg(seed.keep_flag.to_string())
            .arg(seed.rng_seed.to_string()))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).into_owned());
        }
        String::from_utf8(output.stdout).map_err(|e| format!("permuter produced invalid utf-8: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::OpenOptionsExt;
    use std::path::Path;

    fn write_executable(path: &Path, script: &str) {
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .mode(0o755)
            .open(path)
            .unwrap();
        f.write_all(script.as_bytes()).unwrap();
    }

    #[test]
    fn shell_compiler_runs_the_job_script_and_reads_the_object() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("compile.sh");
        write_executable(&script, "#!/bin/sh\nprintf '\\x7fELF' > \"$3\"\n");

        let compiler = ShellCompiler {
            compile_script: script,
            fn_name: "func_80012345".to_string(),
            show_errors: false,
        };
        let object = compiler.compile("int func_80012345(void) { return 0; }").unwrap();
        assert_eq!(object, vec![0x7f, b'E', b'L', b'F']);
    }

    #[test]
    fn shell_compiler_surfaces_stderr_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("compile.sh");
        write_executable(&script, "#!/bin/sh\necho 'syntax error' >&2\nexit 1\n");

        let compiler = ShellCompiler {
            compile_script: script,
            fn_name: "f".to_string(),
            show_errors: false,
        };
        let err = compiler.compile("broken").unwrap_err();
        assert!(err.contains("syntax error"));
    }

    #[test]
    fn shell_scorer_parses_score_and_hash() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("scorer.sh");
        write_executable(&bin, "#!/bin/sh\necho 42\necho deadbeef\n");
        let target = dir.path().join("target.o");
        std::fs::write(&target, [0u8]).unwrap();

        let scorer = ShellScorer { scorer_bin: bin, target_o: target, stack_differences: false };
        let (score, hash) = scorer.score(&[0x7f]).unwrap();
        assert_eq!(score, 42);
        assert_eq!(hash, "deadbeef");
    }

    #[test]
    fn shell_scorer_maps_negative_to_penalty_inf() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("scorer.sh");
        write_executable(&bin, "#!/bin/sh\necho -1\necho ''\n");
        let target = dir.path().join("target.o");
        std::fs::write(&target, [0u8]).unwrap();

        let scorer = ShellScorer { scorer_bin: bin, target_o: target, stack_differences: false };
        let (score, _) = scorer.score(&[]).unwrap();
        assert_eq!(score, crate::PENALTY_INF);
    }

    #[test]
    fn shell_candidate_generator_reads_stdout_as_source() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("permuter.sh");
        write_executable(&bin, "#!/bin/sh\ncat \"$1\"\n");

        let generator = ShellCandidateGenerator { permuter_bin: bin, fn_name: "f".to_string() };
        let source = generator.generate("int f(void) { return 0; }", SeedTuple::fresh(1)).unwrap();
        assert_eq!(source, "int f(void) { return 0; }");
    }
}
