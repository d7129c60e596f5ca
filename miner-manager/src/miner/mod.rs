//! Per-worker state.
//!
//! A [`MinerEntity`] tracks one deployed miner instance: where it lives,
//! how far its deployment got, what its service is doing and how fast it
//! hashes. Every real change is published as a [`StatusChanged`] message.
//! [`MachineRegistry`] caches what is known about each host across
//! deployments.

mod entity;
mod machine;

pub use entity::{MinerEntity, MinerSnapshot, RefreshOutcome, StatusChanged};
pub use machine::{MachineRegistry, MinerMachine};
