//! Error types shared across the crate.

use std::time::Duration;

use crate::deploy::Step;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by workflow steps, fleet operations and configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The host did not answer the liveness probe.
    #[error("cannot reach {host}: {reason}")]
    Connectivity { host: String, reason: String },

    /// A remote filesystem operation failed (including permission denial).
    #[error("remote path {path}: {reason}")]
    Path { path: String, reason: String },

    /// The worker ran but failed or returned unusable output.
    #[error(transparent)]
    RemoteCommand(#[from] ExecutionError),

    /// Caller-supplied configuration was rejected before any remote call.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The package provider could not fetch, extract or place a package.
    #[error("package {version}: {reason}")]
    Package { version: String, reason: String },

    /// Device discovery succeeded but reported no usable hardware.
    #[error("no mining devices found on {0}")]
    NoDevices(String),

    /// A miner with the same identity is already registered.
    #[error("miner {0} is already registered")]
    DuplicateMiner(String),

    /// No miner with the given identity is registered.
    #[error("miner {0} is not registered")]
    NotFound(String),

    /// A workflow step was invoked out of order.
    #[error("deployment is at step {current}, cannot run {requested}")]
    OutOfOrder { current: Step, requested: Step },

    /// Manager configuration could not be loaded.
    #[error("configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn path(path: impl Into<String>, reason: impl ToString) -> Self {
        Error::Path {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// A failed remote invocation.
///
/// Callers must read this as "state unknown" and never move a status
/// toward success because of it.
#[derive(Debug, thiserror::Error)]
#[error("`{command}` on {host} failed: {cause}")]
pub struct ExecutionError {
    pub host: String,
    pub command: String,
    pub cause: ExecutionFailure,
}

impl ExecutionError {
    pub fn new(host: impl Into<String>, command: impl Into<String>, cause: ExecutionFailure) -> Self {
        Self {
            host: host.into(),
            command: command.into(),
            cause,
        }
    }
}

/// Why a remote invocation failed.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionFailure {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("could not launch process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("exit code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The worker answered but reported that the operation did not succeed.
    #[error("worker reported failure")]
    Rejected,
}
