//! Local process invocation shared by the transports.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::error::ExecutionFailure;

/// Captured result of a finished process.
pub(super) struct Finished {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Finished {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Stdout of a successful run, otherwise the exit failure.
    pub fn into_stdout(self) -> Result<String, ExecutionFailure> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(ExecutionFailure::NonZeroExit {
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Run `program` to completion, killing it if it outlives `timeout`.
pub(super) async fn run(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<Finished, ExecutionFailure> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(ExecutionFailure::Spawn)?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ExecutionFailure::Timeout(timeout))?
        .map_err(ExecutionFailure::Spawn)?;

    Ok(Finished {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Human-readable command line for logs and errors.
pub(super) fn command_line(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_joins_args() {
        assert_eq!(
            command_line("daemon.exe", &["-s".into(), "start".into()]),
            "daemon.exe -s start"
        );
        assert_eq!(command_line("daemon.exe", &[]), "daemon.exe");
    }

    #[test]
    fn nonzero_exit_keeps_stderr() {
        let finished = Finished {
            code: 2,
            stdout: String::new(),
            stderr: "boom\n".into(),
        };
        match finished.into_stdout() {
            Err(ExecutionFailure::NonZeroExit { code, stderr }) => {
                assert_eq!(code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let result = run("/nonexistent/miner-daemon", &[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ExecutionFailure::Spawn(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let finished = run("echo", &["hello".into()], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(finished.success());
        assert_eq!(finished.stdout.trim(), "hello");
    }
}
