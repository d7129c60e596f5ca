use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{DeviceRef, MachineName};

/// A host that runs one or more miner instances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinerMachine {
    pub name: MachineName,
    /// Devices reported by the worker. Empty until discovered.
    pub devices: Vec<DeviceRef>,
}

impl MinerMachine {
    pub fn new(name: MachineName) -> Self {
        Self {
            name,
            devices: Vec::new(),
        }
    }
}

/// Machines seen by this manager, shared by every deployment.
///
/// Device discovery is slow, so the first deployment to a machine caches
/// its device list here and later deployments reuse it.
#[derive(Debug, Default)]
pub struct MachineRegistry {
    machines: Mutex<HashMap<MachineName, MinerMachine>>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached devices of `name`, or `None` if never discovered.
    pub fn cached_devices(&self, name: &MachineName) -> Option<Vec<DeviceRef>> {
        self.machines
            .lock()
            .get(name)
            .filter(|machine| !machine.devices.is_empty())
            .map(|machine| machine.devices.clone())
    }

    pub fn cache_devices(&self, name: &MachineName, devices: Vec<DeviceRef>) {
        self.machines
            .lock()
            .entry(name.clone())
            .or_insert_with(|| MinerMachine::new(name.clone()))
            .devices = devices;
    }

    /// Record that `name` exists without discovering anything about it.
    pub fn register(&self, name: &MachineName) {
        self.machines
            .lock()
            .entry(name.clone())
            .or_insert_with(|| MinerMachine::new(name.clone()));
    }

    pub fn machines(&self) -> Vec<MinerMachine> {
        let mut machines: Vec<_> = self.machines.lock().values().cloned().collect();
        machines.sort_by(|a, b| a.name.cmp(&b.name));
        machines
    }
}
