use std::fmt;

use serde::{Deserialize, Serialize};

/// Normalized host name: trimmed and upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MachineName(String);

impl MachineName {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MachineName {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

/// Identity of one miner instance.
///
/// A machine can host several miner instances, told apart by the instance
/// name the worker assigns during configuration. The instance name can be
/// set once; everything else is fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinerIdentity {
    machine: MachineName,
    instance: Option<String>,
}

impl MinerIdentity {
    pub fn new(machine: impl Into<MachineName>) -> Self {
        Self {
            machine: machine.into(),
            instance: None,
        }
    }

    pub fn with_instance(machine: impl Into<MachineName>, instance: impl Into<String>) -> Self {
        let mut id = Self::new(machine);
        id.assign_instance(instance);
        id
    }

    pub fn machine(&self) -> &MachineName {
        &self.machine
    }

    pub fn instance(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    /// Assign the instance name.
    ///
    /// Returns `false` and leaves the identity untouched if an instance name
    /// was already assigned. Blank names are ignored.
    pub fn assign_instance(&mut self, instance: impl Into<String>) -> bool {
        if self.instance.is_some() {
            return false;
        }
        let instance = instance.into();
        let instance = instance.trim();
        if instance.is_empty() {
            return false;
        }
        self.instance = Some(instance.to_string());
        true
    }

    /// `MACHINE` or `MACHINE_instance`.
    pub fn display_name(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}_{}", self.machine, instance),
            None => self.machine.to_string(),
        }
    }
}

impl fmt::Display for MinerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}
