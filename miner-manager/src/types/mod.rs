//! Core value types shared across the crate.

mod device;
mod identity;
mod status;

pub use device::DeviceRef;
pub use identity::{MachineName, MinerIdentity};
pub use status::{DeploymentStatus, ServiceStatus};

/// Hash rate as reported by the worker, in the worker's units (Mh/s).
pub type HashRate = f64;
