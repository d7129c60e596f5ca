//! Remote command execution and remote filesystem access.
//!
//! Everything the manager does to a host goes through two traits:
//! [`RemoteExecutor`] runs a process on the host and captures its output,
//! [`RemoteFilesystem`] manipulates directories on it. Each transport
//! (administrative shares, ssh) implements both.
//!
//! Executors never retry. A failed call is reported as an
//! [`ExecutionError`] and the caller decides what it means.

pub mod paths;
mod process;
mod ssh;
#[cfg(test)]
pub(crate) mod testing;
mod unc;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::config::{ManagerConfig, TransportKind};
use crate::error::{ExecutionError, ExecutionFailure, Result};
use crate::types::MachineName;

pub use ssh::SshTransport;
pub use unc::UncTransport;

/// Runs processes on remote hosts.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `executable` with `args` on `host` and return its stdout.
    ///
    /// Fails on an unreachable host, a non-zero exit or a timeout.
    async fn run(
        &self,
        host: &MachineName,
        executable: &str,
        args: &[String],
    ) -> std::result::Result<String, ExecutionError>;

    /// Check that `host` answers within `timeout`.
    ///
    /// Fails with [`Error::Connectivity`](crate::Error::Connectivity).
    async fn probe(&self, host: &MachineName, timeout: Duration) -> Result<()>;

    /// Whether a miner service is already installed on `host`.
    async fn has_mining_service(
        &self,
        host: &MachineName,
    ) -> std::result::Result<bool, ExecutionError>;
}

/// Directory operations on a remote host, addressed by host-local path.
///
/// Failures are [`Error::Path`](crate::Error::Path).
#[async_trait]
pub trait RemoteFilesystem: Send + Sync {
    async fn exists(&self, host: &MachineName, path: &str) -> Result<bool>;

    async fn create_dir_all(&self, host: &MachineName, path: &str) -> Result<()>;

    async fn remove_dir_all(&self, host: &MachineName, path: &str) -> Result<()>;
}

/// Run a command and deserialize its JSON output into `T`.
///
/// Empty output is read as JSON `null`, so `T = Option<_>` distinguishes a
/// worker that answered with nothing from one that failed.
pub async fn execute<T: DeserializeOwned>(
    executor: &dyn RemoteExecutor,
    host: &MachineName,
    executable: &str,
    args: &[String],
) -> std::result::Result<T, ExecutionError> {
    let stdout = executor.run(host, executable, args).await?;
    let text = match stdout.trim() {
        "" => "null",
        trimmed => trimmed,
    };

    serde_json::from_str(text).map_err(|e| {
        ExecutionError::new(
            host.as_str(),
            process::command_line(executable, args),
            ExecutionFailure::MalformedOutput(e.to_string()),
        )
    })
}

/// The executor and filesystem of one transport, shared by workflows and
/// the fleet.
#[derive(Clone)]
pub struct Remote {
    pub executor: Arc<dyn RemoteExecutor>,
    pub filesystem: Arc<dyn RemoteFilesystem>,
}

impl Remote {
    /// Build the transport selected in `config`.
    pub fn from_config(config: &ManagerConfig) -> Self {
        match config.transport {
            TransportKind::Unc => {
                let transport = Arc::new(UncTransport::new(config.command_timeout));
                Self {
                    executor: transport.clone(),
                    filesystem: transport,
                }
            }
            TransportKind::Ssh => {
                let transport = Arc::new(SshTransport::new(
                    config.ssh_user.clone(),
                    config.command_timeout,
                ));
                Self {
                    executor: transport.clone(),
                    filesystem: transport,
                }
            }
        }
    }
}
