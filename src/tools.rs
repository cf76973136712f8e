// External tool invocation (gsutil, adb, xcrun, plutil, shell commands)
use crate::error::{BisectError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;

/// Captured result of one tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code; `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Error describing a failed invocation of `tool`.
    pub fn failure(&self, tool: &str, what: &str) -> BisectError {
        BisectError::tool(
            tool,
            format!(
                "{} error, code:{}\nstdout:\n{}\nstderr:\n{}",
                what,
                self.status.map(|c| c.to_string()).unwrap_or_else(|| "signal".into()),
                self.stdout,
                self.stderr
            ),
        )
    }
}

/// Runs external programs; faked in tests.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Runs `program` with `args`, capturing output. A `timeout` that
    /// elapses kills the process and yields `LaunchTimeout`.
    async fn run(&self, program: &str, args: &[String], timeout: Option<Duration>) -> Result<ToolOutput>;
}

/// Spawns real subprocesses with tokio.
#[derive(Debug, Clone, Default)]
pub struct LiveToolRunner;

#[async_trait]
impl ToolRunner for LiveToolRunner {
    async fn run(&self, program: &str, args: &[String], timeout: Option<Duration>) -> Result<ToolOutput> {
        log::debug!("Running {} {:?}", program, args);

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    BisectError::tool(program, "not found in PATH".to_string())
                }
                _ => BisectError::Io(e),
            })?;

        let output = match timeout {
            // Dropping the wait_with_output future drops the child, which kills it.
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| BisectError::LaunchTimeout(limit))??,
            None => child.wait_with_output().await?,
        };

        let result = ToolOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        log::debug!("{} exited with {:?}", program, result.status);
        Ok(result)
    }
}

/// Shell used for desktop command templates.
pub fn shell_command(command: &str) -> (String, Vec<String>) {
    if cfg!(windows) {
        ("cmd".to_string(), vec!["/C".to_string(), command.to_string()])
    } else {
        ("sh".to_string(), vec!["-c".to_string(), command.to_string()])
    }
}

/// Finds `name` in PATH.
pub fn find_in_path(name: &str) -> Option<std::path::PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
