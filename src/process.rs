use crate::error::ProcessError;
use std::ffi::OsStr;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Exit status and combined stdout/stderr text of a finished tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub output: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs `program` to completion and captures everything it printed.
///
/// Stdin is closed. The output handles are drained and released on every
/// path, so a chatty tool cannot block on a full pipe.
pub fn run<I, S>(program: &Path, args: I) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null());
    debug!(command = ?command, "running");

    let output = command.output().map_err(|source| ProcessError::Spawn {
        program: program.display().to_string(),
        source,
    })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(ProcessOutput {
        code: output.status.code(),
        output: text,
    })
}

/// Like [`run`], but a non-zero exit is turned into [`ProcessError::Failed`].
pub fn run_checked<I, S>(program: &Path, args: I) -> Result<ProcessOutput, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let result = run(program, args)?;
    if result.success() {
        Ok(result)
    } else {
        Err(ProcessError::Failed {
            program: program.display().to_string(),
            code: result.code,
            output: result.output,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams() {
        let out = run(Path::new("sh"), ["-c", "echo out; echo err >&2"]).unwrap();
        assert!(out.success());
        assert_eq!(out.output, "out\nerr\n");
    }

    #[test]
    fn non_zero_exit_is_a_failure() {
        let err = run_checked(Path::new("sh"), ["-c", "echo broken; exit 3"]).unwrap_err();
        match err {
            ProcessError::Failed { code, output, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(output, "broken\n");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run(Path::new("/definitely/not/here"), Vec::<&str>::new()).unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
