//! Deployment workflow: provision, configure and install one miner.
//!
//! A [`Deployment`] walks a fixed sequence of [`Step`]s. Each call to
//! [`Deployment::advance`] runs exactly one step. A failed step leaves the
//! workflow on that step with the partially built miner intact, so the
//! caller can fix the cause and retry, or [`abort`](Deployment::abort).
//!
//! Decisions that need a human (overwriting an existing deployment,
//! installing next to an existing service) go through [`Confirm`].

mod workflow;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use strum::{Display, EnumIter};

use crate::config::ManagerConfig;
use crate::executor::Remote;
use crate::miner::{MachineRegistry, MinerEntity, MinerSnapshot};
use crate::package::PackageProvider;
use crate::types::MachineName;
use crate::wallet::CoinConfig;

pub use workflow::Deployment;

/// Workflow steps, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter)]
pub enum Step {
    Identify,
    ValidateReachability,
    ValidatePath,
    AcquirePackage,
    DiscoverDevices,
    Configure,
    Install,
    Finish,
}

impl Step {
    /// The step after this one, `None` after [`Step::Finish`].
    pub fn next(self) -> Option<Step> {
        use Step::*;
        match self {
            Identify => Some(ValidateReachability),
            ValidateReachability => Some(ValidatePath),
            ValidatePath => Some(AcquirePackage),
            AcquirePackage => Some(DiscoverDevices),
            DiscoverDevices => Some(Configure),
            Configure => Some(Install),
            Install => Some(Finish),
            Finish => None,
        }
    }
}

/// Questions the workflow asks before touching an existing installation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Prompt {
    /// Miner binaries already exist in `folder` on `machine`. Accepting
    /// deploys a second instance into a fresh sibling folder.
    CreateNewInstance { machine: MachineName, folder: String },

    /// A miner service is already installed on `machine`.
    ExistingService { machine: MachineName },
}

impl fmt::Display for Prompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prompt::CreateNewInstance { machine, folder } => write!(
                f,
                "{machine} already has a miner in {folder}. Create a new miner instance?"
            ),
            Prompt::ExistingService { machine } => write!(
                f,
                "{machine} already runs a miner service. Install another one?"
            ),
        }
    }
}

/// Answers [`Prompt`]s on behalf of the user.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &Prompt) -> bool;
}

/// Gives the same answer to every prompt.
#[derive(Clone, Copy, Debug)]
pub struct AutoConfirm(pub bool);

#[async_trait]
impl Confirm for AutoConfirm {
    async fn confirm(&self, _prompt: &Prompt) -> bool {
        self.0
    }
}

/// What the caller wants the miner to do: which device, which coin.
#[derive(Clone, Debug, PartialEq)]
pub struct MinerConfiguration {
    pub device_id: String,
    pub coin: CoinConfig,
}

/// Result of one successful [`Deployment::advance`].
#[derive(Debug)]
pub enum Progress {
    /// The step ran; the workflow moved on to the next one.
    Completed(Step),

    /// The user declined `Prompt`. The workflow stays on the current step
    /// and nothing further was done on the host.
    Declined(Prompt),

    /// The last step ran. The miner is ready to be added to a fleet.
    Finished(MinerEntity),
}

/// Progress notifications for presentation layers.
#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowEvent {
    StepStarted(Step),
    StepFinished { step: Step, ok: bool },
    MinerCreated(MinerSnapshot),
}

/// Collaborators shared by deployments.
#[derive(Clone)]
pub struct DeploymentContext {
    pub remote: Remote,
    pub packages: Arc<dyn PackageProvider>,
    pub confirm: Arc<dyn Confirm>,
    pub machines: Arc<MachineRegistry>,
    pub probe_timeout: Duration,
}

impl DeploymentContext {
    pub fn new(
        config: &ManagerConfig,
        remote: Remote,
        packages: Arc<dyn PackageProvider>,
        confirm: Arc<dyn Confirm>,
        machines: Arc<MachineRegistry>,
    ) -> Self {
        Self {
            remote,
            packages,
            confirm,
            machines,
            probe_timeout: config.probe_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn steps_chain_in_declaration_order() {
        let steps: Vec<Step> = Step::iter().collect();
        for pair in steps.windows(2) {
            assert_eq!(pair[0].next(), Some(pair[1]));
            assert!(pair[0] < pair[1]);
        }
        assert_eq!(Step::Finish.next(), None);
    }

    #[test]
    fn prompt_text_names_machine() {
        let prompt = Prompt::ExistingService {
            machine: MachineName::new("rig01"),
        };
        assert!(prompt.to_string().contains("RIG01"));
    }
}
