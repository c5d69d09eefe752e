//! Thin `tokio::process::Command` extension for backends that shell out
//! (`ipset`, `pfctl`). Never builds shell strings — every argument is
//! passed to `Command::arg` individually, and interface names are
//! validated by `name_safety::is_safe_iface` before they ever reach here.

use std::future::Future;

use tokio::process::Command;

use crate::error::Error;

pub trait ShellCommandExt {
    fn run(&mut self) -> impl Future<Output = Result<(), Error>> + Send;
    fn run_stdout(&mut self) -> impl Future<Output = Result<String, Error>> + Send;
}

impl ShellCommandExt for Command {
    async fn run(&mut self) -> Result<(), Error> {
        let output = self.output().await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(cmd = ?self, status = ?output.status.code(), %stderr, "command failed");
            Err(Error::BackendFailure(stderr.trim().to_string()))
        }
    }

    async fn run_stdout(&mut self) -> Result<String, Error> {
        let output = self.output().await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(cmd = ?self, status = ?output.status.code(), %stderr, "command failed");
            Err(Error::BackendFailure(stderr.trim().to_string()))
        }
    }
}
