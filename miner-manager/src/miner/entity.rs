//! Miner entity and its status state machine.
//!
//! Status fields only change through the setters below. A setter that
//! writes the current value is a no-op: no dirty mark, no notification.
//! Service status and hash rate are kept consistent: the hash rate is zero
//! whenever the service is not `Mining`.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::executor::{RemoteExecutor, RemoteFilesystem};
use crate::protocol::{self, ServiceVerb, WorkerClient};
use crate::tracing::prelude::*;
use crate::types::{DeploymentStatus, DeviceRef, HashRate, MinerIdentity, ServiceStatus};
use crate::wallet::CoinConfig;

/// Buffered notifications per subscriber before the oldest are dropped.
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Published whenever a miner's deployment status, service status or hash
/// rate actually changes. Carries the values after the change.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusChanged {
    pub miner: MinerIdentity,
    pub deployment_status: DeploymentStatus,
    pub service_status: ServiceStatus,
    pub hash_rate: HashRate,
}

/// Result of [`MinerEntity::refresh_status`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RefreshOutcome {
    /// The worker reported a status, which was applied.
    Updated,

    /// The worker answered without a status. Nothing was applied;
    /// `changed` tells whether the entity has unpublished changes.
    Silent { changed: bool },

    /// The worker could not be queried. Nothing was applied.
    Unavailable,
}

impl RefreshOutcome {
    /// Whether the fleet view should be republished.
    pub fn changed(self) -> bool {
        match self {
            RefreshOutcome::Updated => true,
            RefreshOutcome::Silent { changed } => changed,
            RefreshOutcome::Unavailable => false,
        }
    }
}

/// Serializable copy of a miner's state, for events and presentation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MinerSnapshot {
    pub name: String,
    pub identity: MinerIdentity,
    pub deployment_folder: String,
    pub version: String,
    pub deployment_status: DeploymentStatus,
    pub service_status: ServiceStatus,
    pub hash_rate: HashRate,
    pub device: Option<DeviceRef>,
    pub coin: Option<CoinConfig>,
}

/// One miner instance on one machine.
#[derive(Debug)]
pub struct MinerEntity {
    identity: MinerIdentity,
    deployment_folder: String,
    version: String,
    deployment_status: DeploymentStatus,
    service_status: ServiceStatus,
    hash_rate: HashRate,
    device: Option<DeviceRef>,
    coin: Option<CoinConfig>,
    /// Set on every applied report or status change, cleared once the
    /// fleet has published the change.
    dirty: bool,
    /// Set once a fleet owns the miner. The identity is frozen from then on.
    registered: bool,
    status_tx: broadcast::Sender<StatusChanged>,
}

impl MinerEntity {
    /// A miner on `machine` deployed under `deployment_folder`, with
    /// nothing known about its status yet.
    pub fn new(machine: &str, deployment_folder: &str) -> Self {
        Self::with_identity(MinerIdentity::new(machine), deployment_folder)
    }

    pub fn with_identity(identity: MinerIdentity, deployment_folder: &str) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            identity,
            deployment_folder: deployment_folder.trim().to_lowercase(),
            version: String::new(),
            deployment_status: DeploymentStatus::Unknown,
            service_status: ServiceStatus::Unknown,
            hash_rate: 0.0,
            device: None,
            coin: None,
            dirty: false,
            registered: false,
            status_tx,
        }
    }

    pub fn identity(&self) -> &MinerIdentity {
        &self.identity
    }

    pub fn name(&self) -> String {
        self.identity.display_name()
    }

    pub fn deployment_folder(&self) -> &str {
        &self.deployment_folder
    }

    /// Move the deployment to another folder. Only meaningful before
    /// anything has been copied to the host.
    pub(crate) fn set_deployment_folder(&mut self, folder: &str) {
        self.deployment_folder = folder.trim().to_lowercase();
    }

    /// Host-local directory holding the miner binaries.
    pub fn binary_dir(&self) -> String {
        protocol::binary_dir(&self.deployment_folder)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn set_version(&mut self, version: &str) {
        self.version = version.trim().to_string();
    }

    pub fn deployment_status(&self) -> DeploymentStatus {
        self.deployment_status
    }

    pub fn service_status(&self) -> ServiceStatus {
        self.service_status
    }

    pub fn hash_rate(&self) -> HashRate {
        self.hash_rate
    }

    pub fn device(&self) -> Option<&DeviceRef> {
        self.device.as_ref()
    }

    pub fn coin(&self) -> Option<&CoinConfig> {
        self.coin.as_ref()
    }

    /// Record the configuration the worker accepted.
    pub fn set_configuration(&mut self, device: DeviceRef, coin: CoinConfig) {
        self.device = Some(device);
        self.coin = Some(coin);
    }

    /// Assign the worker-chosen instance name. Ignored if one is already
    /// set or the miner belongs to a fleet.
    pub(crate) fn assign_instance(&mut self, instance: &str) -> bool {
        if self.registered {
            return false;
        }
        self.identity.assign_instance(instance)
    }

    pub(crate) fn mark_registered(&mut self) {
        self.registered = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    pub fn is_running(&self) -> bool {
        self.service_status.is_running()
    }

    /// Whether a manual start makes sense.
    pub fn can_start(&self) -> bool {
        self.deployment_status == DeploymentStatus::Ready && !self.is_running()
    }

    /// Whether a manual stop makes sense.
    pub fn can_stop(&self) -> bool {
        self.deployment_status == DeploymentStatus::Ready && self.is_running()
    }

    /// Receive a [`StatusChanged`] for every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.status_tx.subscribe()
    }

    pub fn snapshot(&self) -> MinerSnapshot {
        MinerSnapshot {
            name: self.name(),
            identity: self.identity.clone(),
            deployment_folder: self.deployment_folder.clone(),
            version: self.version.clone(),
            deployment_status: self.deployment_status,
            service_status: self.service_status,
            hash_rate: self.hash_rate,
            device: self.device.clone(),
            coin: self.coin.clone(),
        }
    }

    pub fn set_deployment_status(&mut self, status: DeploymentStatus) {
        self.apply(Some(status), None, None);
    }

    /// Set the service status. Leaving `Mining` zeroes the hash rate.
    pub fn set_service_status(&mut self, status: ServiceStatus) {
        let hash_rate = (status != ServiceStatus::Mining).then_some(0.0);
        self.apply(None, Some(status), hash_rate);
    }

    fn effective_hash_rate(&self, service: ServiceStatus, reported: HashRate) -> HashRate {
        if service == ServiceStatus::Mining && reported.is_finite() && reported > 0.0 {
            reported
        } else {
            0.0
        }
    }

    /// Assign the given fields and publish once if any of them changed.
    /// The hash rate has no other writer.
    fn apply(
        &mut self,
        deployment: Option<DeploymentStatus>,
        service: Option<ServiceStatus>,
        hash_rate: Option<HashRate>,
    ) {
        let mut changed = false;

        if let Some(deployment) = deployment.filter(|d| *d != self.deployment_status) {
            self.deployment_status = deployment;
            changed = true;
        }
        if let Some(service) = service.filter(|s| *s != self.service_status) {
            self.service_status = service;
            changed = true;
        }
        if let Some(hash_rate) = hash_rate.filter(|r| *r != self.hash_rate) {
            self.hash_rate = hash_rate;
            changed = true;
        }

        if changed {
            self.dirty = true;
            debug!(
                miner = %self.identity,
                deployment = %self.deployment_status,
                service = %self.service_status,
                hash_rate = self.hash_rate,
                "Miner status changed"
            );
            // No subscribers is fine.
            let _ = self.status_tx.send(StatusChanged {
                miner: self.identity.clone(),
                deployment_status: self.deployment_status,
                service_status: self.service_status,
                hash_rate: self.hash_rate,
            });
        }
    }

    fn worker<'a>(&'a self, executor: &'a dyn RemoteExecutor) -> WorkerClient<'a> {
        WorkerClient::new(executor, self.identity.machine(), &self.deployment_folder)
    }

    /// Poll the worker for its current status.
    ///
    /// A failed poll leaves the status untouched: an unreachable worker
    /// is "unknown", never "stopped".
    pub async fn refresh_status(&mut self, executor: &dyn RemoteExecutor) -> RefreshOutcome {
        let report = self.worker(executor).report().await;

        match report {
            Ok(Some(report)) => {
                let service = report.service_status();
                let hash_rate = self.effective_hash_rate(service, report.hash_rate);
                self.apply(None, Some(service), Some(hash_rate));
                self.dirty = true;
                RefreshOutcome::Updated
            }
            Ok(None) => {
                trace!(miner = %self.identity, "Worker reported no status");
                RefreshOutcome::Silent {
                    changed: self.dirty,
                }
            }
            Err(e) => {
                debug!(miner = %self.identity, error = %e, "Status poll failed");
                self.dirty = false;
                RefreshOutcome::Unavailable
            }
        }
    }

    /// Delete the miner binaries from the host.
    ///
    /// Nothing is deleted if the package never reached the host. A failed
    /// deletion is returned as-is and the deployment status is kept.
    pub async fn delete_binaries(&mut self, filesystem: &dyn RemoteFilesystem) -> Result<()> {
        if self.deployment_status < DeploymentStatus::Downloaded {
            self.set_deployment_status(DeploymentStatus::NotExist);
            return Ok(());
        }

        let binary_dir = self.binary_dir();
        filesystem
            .remove_dir_all(self.identity.machine(), &binary_dir)
            .await?;

        info!(miner = %self.identity, path = %binary_dir, "Deleted miner binaries");
        self.set_deployment_status(DeploymentStatus::NotExist);
        Ok(())
    }

    /// Start the miner service. The worker takes a while to reach a pool,
    /// so a successful start only moves the status to `Disconnected`.
    pub async fn start_service(&mut self, executor: &dyn RemoteExecutor) -> Result<()> {
        self.worker(executor).service(ServiceVerb::Start).await?;
        self.set_service_status(ServiceStatus::Disconnected);
        Ok(())
    }

    pub async fn stop_service(&mut self, executor: &dyn RemoteExecutor) -> Result<()> {
        self.worker(executor).service(ServiceVerb::Stop).await?;
        self.set_service_status(ServiceStatus::Stopped);
        Ok(())
    }

    pub async fn install_service(&mut self, executor: &dyn RemoteExecutor) -> Result<()> {
        self.worker(executor).service(ServiceVerb::Install).await?;
        self.set_deployment_status(DeploymentStatus::Ready);
        Ok(())
    }

    /// Remove the miner service. The binaries stay on the host.
    pub async fn uninstall_service(&mut self, executor: &dyn RemoteExecutor) -> Result<()> {
        self.worker(executor).service(ServiceVerb::Uninstall).await?;
        self.set_deployment_status(DeploymentStatus::Downloaded);
        self.set_service_status(ServiceStatus::Stopped);
        Ok(())
    }
}
