//! OpenSSH transport for Linux workers.
//!
//! Every operation is a single non-interactive `ssh` invocation. Arguments
//! are quoted for the remote shell since ssh joins them into one command
//! string.

use std::time::Duration;

use async_trait::async_trait;

use super::process::{self, command_line};
use super::{RemoteExecutor, RemoteFilesystem};
use crate::error::{Error, ExecutionError, Result};
use crate::protocol::SERVICE_NAME_PREFIX;
use crate::tracing::prelude::*;
use crate::types::MachineName;

pub struct SshTransport {
    user: Option<String>,
    command_timeout: Duration,
}

impl SshTransport {
    pub fn new(user: Option<String>, command_timeout: Duration) -> Self {
        Self {
            user,
            command_timeout,
        }
    }

    fn destination(&self, host: &MachineName) -> String {
        // Host names are upper-cased for identity; DNS does not care, but
        // ssh known_hosts entries are usually lower-case.
        let host = host.as_str().to_lowercase();
        match &self.user {
            Some(user) => format!("{user}@{host}"),
            None => host,
        }
    }

    fn ssh_args(&self, host: &MachineName, connect_timeout: Duration, remote: &[String]) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", connect_timeout.as_secs().max(1)),
            self.destination(host),
        ];
        args.extend(remote.iter().map(|arg| shell_quote(arg)));
        args
    }

    async fn ssh(
        &self,
        host: &MachineName,
        remote: &[String],
        timeout: Duration,
    ) -> std::result::Result<process::Finished, ExecutionError> {
        let args = self.ssh_args(host, timeout, remote);
        trace!(command = %command_line("ssh", &args), "Running remote command");

        process::run("ssh", &args, timeout)
            .await
            .map_err(|cause| ExecutionError::new(host.as_str(), remote.join(" "), cause))
    }
}

/// Single-quote `arg` unless it only contains shell-safe characters.
fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:@%+,".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[async_trait]
impl RemoteExecutor for SshTransport {
    async fn run(
        &self,
        host: &MachineName,
        executable: &str,
        args: &[String],
    ) -> std::result::Result<String, ExecutionError> {
        let mut remote = Vec::with_capacity(args.len() + 1);
        remote.push(executable.to_string());
        remote.extend_from_slice(args);

        self.ssh(host, &remote, self.command_timeout)
            .await?
            .into_stdout()
            .map_err(|cause| ExecutionError::new(host.as_str(), command_line(executable, args), cause))
    }

    async fn probe(&self, host: &MachineName, timeout: Duration) -> Result<()> {
        let finished = self
            .ssh(host, &["true".to_string()], timeout)
            .await
            .map_err(|e| Error::Connectivity {
                host: host.to_string(),
                reason: e.cause.to_string(),
            })?;

        if finished.success() {
            Ok(())
        } else {
            Err(Error::Connectivity {
                host: host.to_string(),
                reason: finished.stderr.trim().to_string(),
            })
        }
    }

    async fn has_mining_service(
        &self,
        host: &MachineName,
    ) -> std::result::Result<bool, ExecutionError> {
        let pattern = format!("{}*", SERVICE_NAME_PREFIX.to_lowercase());
        let remote: Vec<String> = ["systemctl", "list-units", "--all", "--no-legend", "--plain"]
            .into_iter()
            .map(String::from)
            .chain(std::iter::once(pattern))
            .collect();

        let stdout = self
            .ssh(host, &remote, self.command_timeout)
            .await?
            .into_stdout()
            .map_err(|cause| ExecutionError::new(host.as_str(), remote.join(" "), cause))?;

        Ok(stdout.lines().any(|line| !line.trim().is_empty()))
    }
}

#[async_trait]
impl RemoteFilesystem for SshTransport {
    async fn exists(&self, host: &MachineName, path: &str) -> Result<bool> {
        let remote = ["test".to_string(), "-e".to_string(), path.to_string()];
        let finished = self
            .ssh(host, &remote, self.command_timeout)
            .await
            .map_err(|e| Error::path(path, e.cause))?;

        // test(1) exits 1 for "no such path"; anything else is ssh failing.
        match finished.code {
            0 => Ok(true),
            1 => Ok(false),
            _ => Err(Error::path(path, finished.stderr.trim())),
        }
    }

    async fn create_dir_all(&self, host: &MachineName, path: &str) -> Result<()> {
        let remote = ["mkdir".to_string(), "-p".to_string(), path.to_string()];
        self.checked(host, path, &remote).await
    }

    async fn remove_dir_all(&self, host: &MachineName, path: &str) -> Result<()> {
        let remote = ["rm".to_string(), "-rf".to_string(), path.to_string()];
        self.checked(host, path, &remote).await
    }
}

impl SshTransport {
    async fn checked(&self, host: &MachineName, path: &str, remote: &[String]) -> Result<()> {
        let finished = self
            .ssh(host, remote, self.command_timeout)
            .await
            .map_err(|e| Error::path(path, e.cause))?;

        if finished.success() {
            Ok(())
        } else {
            Err(Error::path(path, finished.stderr.trim()))
        }
    }
}
