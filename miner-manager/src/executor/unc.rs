//! Windows administrative-share transport.
//!
//! The worker daemon is launched through its `\\HOST\c$\...` path and the
//! deployment folder is manipulated through the same share.

use std::time::Duration;

use async_trait::async_trait;

use super::paths;
use super::process::{self, command_line};
use super::{RemoteExecutor, RemoteFilesystem};
use crate::error::{Error, ExecutionError, Result};
use crate::protocol::SERVICE_NAME_PREFIX;
use crate::tracing::prelude::*;
use crate::types::MachineName;

pub struct UncTransport {
    command_timeout: Duration,
}

impl UncTransport {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

fn ping_args(host: &MachineName, timeout: Duration) -> Vec<String> {
    if cfg!(windows) {
        vec![
            "-n".into(),
            "1".into(),
            "-w".into(),
            timeout.as_millis().to_string(),
            host.to_string(),
        ]
    } else {
        vec![
            "-c".into(),
            "1".into(),
            "-W".into(),
            timeout.as_secs().max(1).to_string(),
            host.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteExecutor for UncTransport {
    async fn run(
        &self,
        host: &MachineName,
        executable: &str,
        args: &[String],
    ) -> std::result::Result<String, ExecutionError> {
        let program = paths::unc(host.as_str(), executable);
        trace!(command = %command_line(&program, args), "Running remote command");

        process::run(&program, args, self.command_timeout)
            .await
            .and_then(process::Finished::into_stdout)
            .map_err(|cause| ExecutionError::new(host.as_str(), command_line(executable, args), cause))
    }

    async fn probe(&self, host: &MachineName, timeout: Duration) -> Result<()> {
        // Leave ping its own timeout plus slack before giving up on it.
        let finished = process::run("ping", &ping_args(host, timeout), timeout * 2)
            .await
            .map_err(|e| Error::Connectivity {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        if finished.success() {
            Ok(())
        } else {
            Err(Error::Connectivity {
                host: host.to_string(),
                reason: "no reply to ping".into(),
            })
        }
    }

    async fn has_mining_service(
        &self,
        host: &MachineName,
    ) -> std::result::Result<bool, ExecutionError> {
        let args = vec![
            format!("\\\\{host}"),
            "query".into(),
            "state=".into(),
            "all".into(),
        ];
        let stdout = process::run("sc.exe", &args, self.command_timeout)
            .await
            .and_then(process::Finished::into_stdout)
            .map_err(|cause| ExecutionError::new(host.as_str(), command_line("sc.exe", &args), cause))?;

        let prefix = SERVICE_NAME_PREFIX.to_lowercase();
        Ok(stdout
            .lines()
            .filter_map(|line| line.trim().strip_prefix("SERVICE_NAME:"))
            .any(|name| name.trim().to_lowercase().starts_with(&prefix)))
    }
}

#[async_trait]
impl RemoteFilesystem for UncTransport {
    async fn exists(&self, host: &MachineName, path: &str) -> Result<bool> {
        let unc = paths::unc(host.as_str(), path);
        tokio::fs::try_exists(&unc)
            .await
            .map_err(|e| Error::path(&unc, e))
    }

    async fn create_dir_all(&self, host: &MachineName, path: &str) -> Result<()> {
        let unc = paths::unc(host.as_str(), path);
        tokio::fs::create_dir_all(&unc)
            .await
            .map_err(|e| Error::path(&unc, e))
    }

    async fn remove_dir_all(&self, host: &MachineName, path: &str) -> Result<()> {
        let unc = paths::unc(host.as_str(), path);
        tokio::fs::remove_dir_all(&unc)
            .await
            .map_err(|e| Error::path(&unc, e))
    }
}
