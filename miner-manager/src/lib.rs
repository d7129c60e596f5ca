//! Remote miner fleet manager.
//!
//! Deploys a miner package to remote hosts, configures the mining device and
//! coin parameters, drives the miner service on each host and keeps a
//! fleet-wide view of every worker's live status.
//!
//! The pieces fit together as follows:
//!
//! - [`executor`] runs commands and filesystem operations on a remote host.
//! - [`protocol`] speaks the worker daemon's command-line protocol on top of
//!   an executor.
//! - [`miner`] holds the per-worker state machine.
//! - [`deploy`] turns a bare machine name into a configured, running miner.
//! - [`fleet`] owns all registered miners and polls them periodically.

pub mod config;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod fleet;
pub mod miner;
pub mod package;
pub mod protocol;
pub mod tracing;
pub mod types;
pub mod wallet;

pub use config::ManagerConfig;
pub use error::{Error, ExecutionError, Result};
