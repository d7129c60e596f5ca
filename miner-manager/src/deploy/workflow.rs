use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{DeploymentContext, MinerConfiguration, Progress, Prompt, Step, WorkflowEvent};
use crate::error::{Error, Result};
use crate::executor::RemoteFilesystem;
use crate::miner::MinerEntity;
use crate::package::PackageTarget;
use crate::protocol::{self, ConfigureRequest, WorkerClient};
use crate::tracing::prelude::*;
use crate::types::{DeploymentStatus, DeviceRef, MachineName, ServiceStatus};

/// One miner deployment in progress.
pub struct Deployment {
    ctx: DeploymentContext,
    step: Step,
    finished: bool,
    /// Taken while a step runs and handed out by the last step.
    miner: Option<MinerEntity>,
    version: Option<String>,
    configuration: Option<MinerConfiguration>,
    start_after_install: bool,
    devices: Vec<DeviceRef>,
    events: Option<mpsc::UnboundedSender<WorkflowEvent>>,
}

impl Deployment {
    pub fn new(ctx: DeploymentContext, machine: &str, deployment_folder: &str) -> Self {
        Self {
            ctx,
            step: Step::Identify,
            finished: false,
            miner: Some(MinerEntity::new(machine, deployment_folder)),
            version: None,
            configuration: None,
            start_after_install: false,
            devices: Vec::new(),
            events: None,
        }
    }

    /// Report step progress on `events`.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<WorkflowEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Deploy `version` instead of the provider's latest.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = Some(version.into());
    }

    /// Required before [`Step::Configure`] runs.
    pub fn set_configuration(&mut self, configuration: MinerConfiguration) {
        self.configuration = Some(configuration);
    }

    pub fn set_start_after_install(&mut self, start: bool) {
        self.start_after_install = start;
    }

    /// The step the next [`advance`](Self::advance) runs.
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The miner being built. `None` once the workflow finished.
    pub fn miner(&self) -> Option<&MinerEntity> {
        self.miner.as_ref()
    }

    /// Devices found by [`Step::DiscoverDevices`].
    pub fn devices(&self) -> &[DeviceRef] {
        &self.devices
    }

    /// Give up and take back the partially built miner.
    pub fn abort(self) -> Option<MinerEntity> {
        info!(step = %self.step, "Deployment aborted");
        self.miner
    }

    /// Run the current step.
    pub async fn advance(&mut self) -> Result<Progress> {
        self.run_step(self.step).await
    }

    /// Run `step`, which must be the current one.
    pub async fn run_step(&mut self, step: Step) -> Result<Progress> {
        if self.finished || step != self.step {
            return Err(Error::OutOfOrder {
                current: self.step,
                requested: step,
            });
        }
        let Some(mut miner) = self.miner.take() else {
            return Err(Error::OutOfOrder {
                current: self.step,
                requested: step,
            });
        };

        self.emit(WorkflowEvent::StepStarted(step));
        info!(miner = %miner.identity(), %step, "Running deployment step");

        if step == Step::Finish {
            let snapshot = miner.snapshot();
            info!(miner = %snapshot.name, "Miner created");
            self.emit(WorkflowEvent::MinerCreated(snapshot));
            self.emit(WorkflowEvent::StepFinished { step, ok: true });
            self.finished = true;
            return Ok(Progress::Finished(miner));
        }

        let result = self.execute(step, &mut miner).await;
        self.miner = Some(miner);

        let progress = match result {
            Ok(None) => {
                if let Some(next) = step.next() {
                    self.step = next;
                }
                Ok(Progress::Completed(step))
            }
            Ok(Some(prompt)) => {
                info!(%step, %prompt, "Deployment declined");
                Ok(Progress::Declined(prompt))
            }
            Err(e) => {
                warn!(%step, error = %e, "Deployment step failed");
                Err(e)
            }
        };

        self.emit(WorkflowEvent::StepFinished {
            step,
            ok: matches!(progress, Ok(Progress::Completed(_))),
        });
        progress
    }

    /// Run the current step on a separate task.
    pub fn spawn_advance(mut self) -> JoinHandle<(Self, Result<Progress>)> {
        tokio::spawn(async move {
            let result = self.advance().await;
            (self, result)
        })
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is watching.
            let _ = events.send(event);
        }
    }

    /// `Ok(Some(prompt))` when the user declined `prompt`.
    async fn execute(&mut self, step: Step, miner: &mut MinerEntity) -> Result<Option<Prompt>> {
        match step {
            Step::Identify => self.identify(miner).map(|()| None),
            Step::ValidateReachability => self.validate_reachability(miner).await.map(|()| None),
            Step::ValidatePath => self.validate_path(miner).await,
            Step::AcquirePackage => self.acquire_package(miner).await.map(|()| None),
            Step::DiscoverDevices => self.discover_devices(miner).await.map(|()| None),
            Step::Configure => self.configure(miner).await.map(|()| None),
            Step::Install => self.install(miner).await.map(|()| None),
            Step::Finish => Ok(None),
        }
    }

    fn identify(&self, miner: &mut MinerEntity) -> Result<()> {
        let machine = miner.identity().machine().clone();
        if machine.is_empty() {
            return Err(Error::Validation("machine name is required".into()));
        }
        if miner.deployment_folder().is_empty() {
            return Err(Error::Validation("deployment folder is required".into()));
        }

        self.ctx.machines.register(&machine);
        miner.set_deployment_status(DeploymentStatus::Unknown);
        miner.set_service_status(ServiceStatus::Unknown);
        Ok(())
    }

    async fn validate_reachability(&self, miner: &mut MinerEntity) -> Result<()> {
        let machine = miner.identity().machine();
        self.ctx
            .remote
            .executor
            .probe(machine, self.ctx.probe_timeout)
            .await?;
        debug!(%machine, "Machine is reachable");
        Ok(())
    }

    async fn validate_path(&self, miner: &mut MinerEntity) -> Result<Option<Prompt>> {
        let machine = miner.identity().machine().clone();
        let filesystem = self.ctx.remote.filesystem.as_ref();

        if filesystem.exists(&machine, &miner.binary_dir()).await? {
            let prompt = Prompt::CreateNewInstance {
                machine: machine.clone(),
                folder: miner.deployment_folder().to_string(),
            };
            if !self.ctx.confirm.confirm(&prompt).await {
                return Ok(Some(prompt));
            }
            let folder = free_folder(filesystem, &machine, miner.deployment_folder()).await?;
            info!(%machine, %folder, "Deploying new instance");
            miner.set_deployment_folder(&folder);
        }

        if !filesystem.exists(&machine, miner.deployment_folder()).await? {
            filesystem
                .create_dir_all(&machine, miner.deployment_folder())
                .await?;
        }

        if self.ctx.remote.executor.has_mining_service(&machine).await? {
            let prompt = Prompt::ExistingService {
                machine: machine.clone(),
            };
            if !self.ctx.confirm.confirm(&prompt).await {
                return Ok(Some(prompt));
            }
        }

        Ok(None)
    }

    async fn acquire_package(&self, miner: &mut MinerEntity) -> Result<()> {
        let machine = miner.identity().machine().clone();
        let version = match &self.version {
            Some(version) => version.clone(),
            None => self.ctx.packages.versions().await?.latest,
        };

        let mut package = self.ctx.packages.fetch(&version).await?;
        package.extract().await?;

        let binary_dir = miner.binary_dir();
        if self
            .ctx
            .remote
            .filesystem
            .exists(&machine, &binary_dir)
            .await?
        {
            info!(%machine, path = %binary_dir, "Binaries already present, not copying");
        } else {
            package
                .copy_to(&PackageTarget {
                    host: machine,
                    path: binary_dir,
                })
                .await?;
        }

        miner.set_version(&version);
        miner.set_deployment_status(DeploymentStatus::Downloaded);
        Ok(())
    }

    async fn discover_devices(&mut self, miner: &mut MinerEntity) -> Result<()> {
        let machine = miner.identity().machine().clone();

        let devices = match self.ctx.machines.cached_devices(&machine) {
            Some(devices) => {
                debug!(%machine, count = devices.len(), "Using cached devices");
                devices
            }
            None => {
                let executor = self.ctx.remote.executor.as_ref();
                let devices = WorkerClient::new(executor, &machine, miner.deployment_folder())
                    .list_devices()
                    .await?;
                if devices.is_empty() {
                    return Err(Error::NoDevices(machine.to_string()));
                }
                self.ctx.machines.cache_devices(&machine, devices.clone());
                devices
            }
        };

        for device in &devices {
            debug!(%machine, id = %device.device_id, name = %device.display_name, "Device");
        }
        self.devices = devices;
        Ok(())
    }

    async fn configure(&self, miner: &mut MinerEntity) -> Result<()> {
        let machine = miner.identity().machine().clone();
        let configuration = self
            .configuration
            .as_ref()
            .ok_or_else(|| Error::Validation("no miner configuration supplied".into()))?;
        let coin = configuration.coin.validated()?;
        let device = self
            .devices
            .iter()
            .find(|device| device.device_id == configuration.device_id)
            .cloned()
            .ok_or_else(|| {
                Error::Validation(format!(
                    "device {} was not found on {machine}",
                    configuration.device_id
                ))
            })?;

        let request = ConfigureRequest::for_coin(&device.device_id, &coin, miner.identity().instance());
        let executor = self.ctx.remote.executor.as_ref();
        let output = WorkerClient::new(executor, &machine, miner.deployment_folder())
            .configure(&request)
            .await?;

        if let Some(instance) = output.instance_id {
            miner.assign_instance(&instance.to_string());
        }
        miner.set_configuration(device, coin);
        Ok(())
    }

    async fn install(&self, miner: &mut MinerEntity) -> Result<()> {
        let executor = self.ctx.remote.executor.as_ref();
        miner.install_service(executor).await?;

        if self.start_after_install {
            match miner.start_service(executor).await {
                Ok(()) => info!(miner = %miner.identity(), "Miner started"),
                Err(e) => {
                    warn!(miner = %miner.identity(), error = %e, "Miner installed but did not start");
                    miner.set_service_status(ServiceStatus::Stopped);
                }
            }
        }
        Ok(())
    }
}

/// First `<folder>_<n>` without miner binaries in it.
async fn free_folder(
    filesystem: &dyn RemoteFilesystem,
    machine: &MachineName,
    folder: &str,
) -> Result<String> {
    let mut n = 1u32;
    loop {
        let candidate = format!("{folder}_{n}");
        if !filesystem
            .exists(machine, &protocol::binary_dir(&candidate))
            .await?
        {
            return Ok(candidate);
        }
        n += 1;
    }
}
