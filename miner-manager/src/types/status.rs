//! Ordered deployment and service statuses.
//!
//! Both enums carry an explicit rank so comparisons such as "at least
//! downloaded" or "running" never depend on discriminant values.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

/// How far deployment of a miner has progressed on its host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum DeploymentStatus {
    #[default]
    Unknown,
    NotExist,
    Downloaded,
    PrerequisitesInstalled,
    Ready,
}

impl DeploymentStatus {
    /// Position in the setup order. Higher means more setup completed.
    pub const fn rank(self) -> u8 {
        match self {
            DeploymentStatus::Unknown => 0,
            DeploymentStatus::NotExist => 1,
            DeploymentStatus::Downloaded => 2,
            DeploymentStatus::PrerequisitesInstalled => 3,
            DeploymentStatus::Ready => 4,
        }
    }
}

impl Ord for DeploymentStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for DeploymentStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// State of the miner service on its host.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
pub enum ServiceStatus {
    #[default]
    Unknown,
    NotInstalled,
    Stopped,
    Initializing,
    Disconnected,
    Connected,
    Mining,
}

impl ServiceStatus {
    pub const fn rank(self) -> u8 {
        match self {
            ServiceStatus::Unknown => 0,
            ServiceStatus::NotInstalled => 1,
            ServiceStatus::Stopped => 2,
            ServiceStatus::Initializing => 3,
            ServiceStatus::Disconnected => 4,
            ServiceStatus::Connected => 5,
            ServiceStatus::Mining => 6,
        }
    }

    /// Status code used by the worker's report command.
    pub const fn code(self) -> i32 {
        self.rank() as i32 * 10
    }

    /// Map a worker status code. Unrecognized codes are `Unknown`.
    pub fn from_code(code: i32) -> Self {
        match code {
            10 => ServiceStatus::NotInstalled,
            20 => ServiceStatus::Stopped,
            30 => ServiceStatus::Initializing,
            40 => ServiceStatus::Disconnected,
            50 => ServiceStatus::Connected,
            60 => ServiceStatus::Mining,
            _ => ServiceStatus::Unknown,
        }
    }

    /// Anything past `Stopped` counts as running.
    pub fn is_running(self) -> bool {
        self > ServiceStatus::Stopped
    }
}

impl Ord for ServiceStatus {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for ServiceStatus {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
