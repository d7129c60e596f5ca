//! Manager configuration.
//!
//! Defaults suit a Windows mining farm reached over administrative shares.
//! Each field can be overridden through a `MINER_MANAGER_*` environment
//! variable.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use strum::{Display, EnumString};

use crate::error::{Error, Result};

/// How commands and files reach a remote host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransportKind {
    /// Windows administrative shares (`\\HOST\c$\...`).
    #[default]
    Unc,
    /// `ssh` to the host.
    Ssh,
}

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Fleet refresh period.
    pub poll_interval: Duration,

    /// Liveness probe timeout used before deployment.
    pub probe_timeout: Duration,

    /// Upper bound on any single remote command.
    pub command_timeout: Duration,

    /// How long a miner must stay unavailable before a warning is logged.
    pub outage_debounce: Duration,

    /// Host-local folder new miners are deployed into.
    pub deployment_folder: String,

    pub transport: TransportKind,

    /// Login for the ssh transport. `None` uses the ssh client's default.
    pub ssh_user: Option<String>,

    /// Directory holding one extracted package per version.
    pub package_root: PathBuf,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            outage_debounce: Duration::from_secs(30),
            deployment_folder: "c:\\xdagger".to_string(),
            transport: TransportKind::Unc,
            ssh_user: None,
            package_root: PathBuf::from("packages"),
        }
    }
}

impl ManagerConfig {
    /// Defaults overridden by `MINER_MANAGER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each key.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse::<u64>(&lookup, "MINER_MANAGER_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = parse::<u64>(&lookup, "MINER_MANAGER_PROBE_TIMEOUT_SECS")? {
            config.probe_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "MINER_MANAGER_COMMAND_TIMEOUT_SECS")? {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse::<u64>(&lookup, "MINER_MANAGER_OUTAGE_SECS")? {
            config.outage_debounce = Duration::from_secs(secs);
        }
        if let Some(folder) = lookup("MINER_MANAGER_DEPLOY_FOLDER") {
            config.deployment_folder = folder;
        }
        if let Some(transport) = parse::<TransportKind>(&lookup, "MINER_MANAGER_TRANSPORT")? {
            config.transport = transport;
        }
        if let Some(user) = lookup("MINER_MANAGER_SSH_USER") {
            config.ssh_user = Some(user);
        }
        if let Some(root) = lookup("MINER_MANAGER_PACKAGE_ROOT") {
            config.package_root = PathBuf::from(root);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(Error::Config("poll interval must be non-zero".into()));
        }
        if self.command_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.deployment_folder.trim().is_empty() {
            return Err(Error::Config("deployment folder is empty".into()));
        }
        Ok(())
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{key}: cannot parse {raw:?}"))),
    }
}
