//! The fleet of managed miners and its status poll loop.
//!
//! [`FleetManager`] owns every registered [`MinerEntity`]. The poll loop
//! ([`FleetManager::run`]) refreshes them on a fixed interval; a tick that
//! arrives while the previous sweep is still running is dropped, so a slow
//! host delays the fleet view but never stacks up work.
//!
//! Presentation layers subscribe to [`FleetEvent`]s and re-read
//! [`snapshots`](FleetManager::snapshots) when notified.

mod outage;
mod summary;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::executor::Remote;
use crate::miner::{MinerEntity, MinerSnapshot, RefreshOutcome};
use crate::tracing::prelude::*;
use crate::types::{DeploymentStatus, MinerIdentity};

pub use outage::{OutageAlarm, OutageStatus};
pub use summary::FleetSummary;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A registered miner. Locked by the poll loop while it is refreshed and
/// by manual operations while they run.
pub type SharedMiner = Arc<tokio::sync::Mutex<MinerEntity>>;

#[derive(Clone, Debug, PartialEq)]
pub enum FleetEvent {
    /// At least one miner changed since the last notification.
    ClientStatusChanged,
    MinerAdded(MinerSnapshot),
    MinerRemoved(MinerIdentity),
}

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub polled: usize,
    pub updated: usize,
    pub unavailable: usize,
    /// Whether a [`FleetEvent::ClientStatusChanged`] was published.
    pub changed: bool,
}

#[derive(Clone)]
struct Entry {
    identity: MinerIdentity,
    miner: SharedMiner,
    outage: Arc<Mutex<OutageAlarm>>,
}

/// Clears the sweep flag when the sweep ends, however it ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct FleetManager {
    remote: Remote,
    entries: Mutex<Vec<Entry>>,
    sweeping: AtomicBool,
    outage_debounce: Duration,
    events: broadcast::Sender<FleetEvent>,
}

impl FleetManager {
    pub fn new(remote: Remote, config: &ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            remote,
            entries: Mutex::new(Vec::new()),
            sweeping: AtomicBool::new(false),
            outage_debounce: config.outage_debounce,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.events.subscribe()
    }

    /// Register a miner. Fails if one with the same identity exists.
    ///
    /// The miner's identity cannot change once registered.
    pub fn add(&self, mut miner: MinerEntity) -> Result<SharedMiner> {
        miner.mark_registered();
        let identity = miner.identity().clone();
        let snapshot = miner.snapshot();
        let shared = Arc::new(tokio::sync::Mutex::new(miner));

        {
            let mut entries = self.entries.lock();
            if entries.iter().any(|entry| entry.identity == identity) {
                return Err(Error::DuplicateMiner(identity.to_string()));
            }
            entries.push(Entry {
                identity: identity.clone(),
                miner: shared.clone(),
                outage: Arc::new(Mutex::new(OutageAlarm::new(self.outage_debounce))),
            });
        }

        info!(miner = %identity, "Miner added");
        self.publish(FleetEvent::MinerAdded(snapshot));
        Ok(shared)
    }

    /// Unregister a miner and hand it back.
    pub fn remove(&self, identity: &MinerIdentity) -> Result<SharedMiner> {
        let removed = {
            let mut entries = self.entries.lock();
            let index = entries
                .iter()
                .position(|entry| &entry.identity == identity)
                .ok_or_else(|| Error::NotFound(identity.to_string()))?;
            entries.remove(index)
        };

        info!(miner = %identity, "Miner removed");
        self.publish(FleetEvent::MinerRemoved(identity.clone()));
        Ok(removed.miner)
    }

    pub fn get(&self, identity: &MinerIdentity) -> Option<SharedMiner> {
        self.entries
            .lock()
            .iter()
            .find(|entry| &entry.identity == identity)
            .map(|entry| entry.miner.clone())
    }

    /// Identities in registration order.
    pub fn list(&self) -> Vec<MinerIdentity> {
        self.entries
            .lock()
            .iter()
            .map(|entry| entry.identity.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Miners currently considered down by their outage alarm.
    pub fn unreachable(&self) -> Vec<MinerIdentity> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.outage.lock().is_down())
            .map(|entry| entry.identity.clone())
            .collect()
    }

    /// Current state of every miner, in registration order.
    pub async fn snapshots(&self) -> Vec<MinerSnapshot> {
        let miners: Vec<SharedMiner> = self
            .entries
            .lock()
            .iter()
            .map(|entry| entry.miner.clone())
            .collect();

        futures::future::join_all(
            miners
                .iter()
                .map(|miner| async move { miner.lock().await.snapshot() }),
        )
        .await
    }

    pub async fn summary(&self) -> FleetSummary {
        FleetSummary::from_snapshots(&self.snapshots().await)
    }

    /// Refresh every miner once, unless a sweep is already running, in
    /// which case `None` is returned immediately.
    pub async fn try_sweep(&self) -> Option<SweepReport> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Previous sweep still running, skipping");
            return None;
        }
        let _guard = SweepGuard(&self.sweeping);

        Some(self.sweep().await)
    }

    async fn sweep(&self) -> SweepReport {
        let entries = self.entries.lock().clone();
        let executor = self.remote.executor.as_ref();
        let mut report = SweepReport::default();
        let mut changed = Vec::new();

        for entry in &entries {
            let outcome = entry.miner.lock().await.refresh_status(executor).await;

            report.polled += 1;
            match outcome {
                RefreshOutcome::Updated => report.updated += 1,
                RefreshOutcome::Unavailable => report.unavailable += 1,
                RefreshOutcome::Silent { .. } => {}
            }
            self.track_outage(entry, outcome);

            if outcome.changed() {
                changed.push(entry.miner.clone());
            }
        }

        if !changed.is_empty() {
            self.publish(FleetEvent::ClientStatusChanged);
            for miner in changed {
                miner.lock().await.clear_dirty();
            }
            report.changed = true;
        }

        trace!(
            polled = report.polled,
            updated = report.updated,
            unavailable = report.unavailable,
            "Sweep finished"
        );
        report
    }

    fn track_outage(&self, entry: &Entry, outcome: RefreshOutcome) {
        let status = entry
            .outage
            .lock()
            .check(outcome == RefreshOutcome::Unavailable);

        match status {
            OutageStatus::Began => warn!(
                miner = %entry.identity,
                for_secs = self.outage_debounce.as_secs(),
                "Miner is not answering status polls"
            ),
            OutageStatus::Ended { lasted } => info!(
                miner = %entry.identity,
                down_secs = lasted.as_secs(),
                "Miner is answering again"
            ),
            OutageStatus::Reachable | OutageStatus::Suspect | OutageStatus::Ongoing => {}
        }
    }

    /// Poll the fleet every `interval` until `cancellation` fires.
    ///
    /// A sweep still in flight at cancellation is aborted before this
    /// returns, so no poll or event follows the return.
    pub async fn run(self: Arc<Self>, interval: Duration, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut sweeps = JoinSet::new();
        info!(interval_ms = interval.as_millis() as u64, "Fleet polling started");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    while sweeps.try_join_next().is_some() {}
                    let fleet = self.clone();
                    sweeps.spawn(async move {
                        fleet.try_sweep().await;
                    });
                }
            }
        }

        sweeps.shutdown().await;
        info!("Fleet polling stopped");
    }

    fn miner(&self, identity: &MinerIdentity) -> Result<SharedMiner> {
        self.get(identity)
            .ok_or_else(|| Error::NotFound(identity.to_string()))
    }

    /// Start the miner's service.
    pub async fn start(&self, identity: &MinerIdentity) -> Result<()> {
        let miner = self.miner(identity)?;
        let mut miner = miner.lock().await;
        if !miner.can_start() {
            return Err(Error::Validation(format!(
                "{identity} cannot be started while {} / {}",
                miner.deployment_status(),
                miner.service_status()
            )));
        }

        miner.start_service(self.remote.executor.as_ref()).await?;
        info!(miner = %identity, "Miner started");
        self.publish(FleetEvent::ClientStatusChanged);
        Ok(())
    }

    /// Stop the miner's service.
    pub async fn stop(&self, identity: &MinerIdentity) -> Result<()> {
        let miner = self.miner(identity)?;
        let mut miner = miner.lock().await;
        if !miner.can_stop() {
            return Err(Error::Validation(format!(
                "{identity} cannot be stopped while {} / {}",
                miner.deployment_status(),
                miner.service_status()
            )));
        }

        miner.stop_service(self.remote.executor.as_ref()).await?;
        info!(miner = %identity, "Miner stopped");
        self.publish(FleetEvent::ClientStatusChanged);
        Ok(())
    }

    /// Uninstall the service, delete the binaries and unregister the miner.
    ///
    /// Miners that never reached `Ready` have no service, so only their
    /// binaries are deleted. If the binaries cannot be deleted the error is
    /// returned and the miner stays registered.
    pub async fn uninstall(&self, identity: &MinerIdentity) -> Result<()> {
        let shared = self.miner(identity)?;
        {
            let mut miner = shared.lock().await;
            if miner.deployment_status() == DeploymentStatus::Ready {
                miner
                    .uninstall_service(self.remote.executor.as_ref())
                    .await?;
                self.publish(FleetEvent::ClientStatusChanged);
            }
            miner
                .delete_binaries(self.remote.filesystem.as_ref())
                .await?;
        }

        self.remove(identity)?;
        info!(miner = %identity, "Miner uninstalled");
        Ok(())
    }

    fn publish(&self, event: FleetEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::executor::testing::ScriptedRemote;
    use crate::types::ServiceStatus;

    const MINING_42: &str = r#"{"status": 60, "hashRate": 42.0}"#;

    fn fleet(remote: &Arc<ScriptedRemote>) -> Arc<FleetManager> {
        let config = ManagerConfig {
            outage_debounce: Duration::from_secs(30),
            ..ManagerConfig::default()
        };
        Arc::new(FleetManager::new(
            Remote {
                executor: remote.clone(),
                filesystem: remote.clone(),
            },
            &config,
        ))
    }

    fn ready_miner(machine: &str) -> MinerEntity {
        let mut miner = MinerEntity::new(machine, "c:\\xdagger");
        miner.set_deployment_status(DeploymentStatus::Ready);
        miner.set_service_status(ServiceStatus::Stopped);
        miner.clear_dirty();
        miner
    }

    fn drain(rx: &mut broadcast::Receiver<FleetEvent>) -> Vec<FleetEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return events,
                Err(e) => panic!("unexpected {e:?}"),
            }
        }
    }

    #[tokio::test]
    async fn add_rejects_duplicate_identity() {
        let remote = Arc::new(ScriptedRemote::new());
        let fleet = fleet(&remote);
        let mut rx = fleet.subscribe();

        fleet.add(ready_miner("rig01")).unwrap();
        let err = fleet.add(ready_miner("RIG01")).unwrap_err();

        assert!(matches!(err, Error::DuplicateMiner(ref name) if name == "RIG01"));
        assert_eq!(fleet.len(), 1);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], FleetEvent::MinerAdded(ref s) if s.name == "RIG01"));
    }

    #[tokio::test]
    async fn instances_on_one_machine_are_distinct() {
        let remote = Arc::new(ScriptedRemote::new());
        let fleet = fleet(&remote);
        let mut second = ready_miner("rig01");
        second.assign_instance("2");

        fleet.add(ready_miner("rig01")).unwrap();
        fleet.add(second).unwrap();

        assert_eq!(
            fleet.list(),
            vec![
                MinerIdentity::new("RIG01"),
                MinerIdentity::with_instance("RIG01", "2")
            ]
        );
    }

    #[tokio::test]
    async fn registered_identity_cannot_change() {
        let remote = Arc::new(ScriptedRemote::new());
        let fleet = fleet(&remote);
        let shared = fleet.add(ready_miner("rig01")).unwrap();

        assert!(!shared.lock().await.assign_instance("3"));

        let mut third = ready_miner("rig01");
        third.assign_instance("3");
        fleet.add(third).unwrap();

        let names: Vec<String> = fleet
            .snapshots()
            .await
            .into_iter()
            .map(|snapshot| snapshot.name)
            .collect();
        let keys: Vec<String> = fleet.list().iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["RIG01", "RIG01_3"]);
        assert_eq!(names, keys);
        assert!(matches!(
            fleet.add(ready_miner("rig01")),
            Err(Error::DuplicateMiner(_))
        ));
    }

    #[tokio::test]
    async fn remove_unknown_is_not_found() {
        let remote = Arc::new(ScriptedRemote::new());
        let fleet = fleet(&remote);
        fleet.add(ready_miner("rig01")).unwrap();

        assert!(matches!(
            fleet.remove(&MinerIdentity::new("rig02")),
            Err(Error::NotFound(_))
        ));

        let mut rx = fleet.subscribe();
        fleet.remove(&MinerIdentity::new("rig01")).unwrap();
        assert!(fleet.is_empty());
        assert_eq!(
            drain(&mut rx),
            vec![FleetEvent::MinerRemoved(MinerIdentity::new("RIG01"))]
        );
    }

    #[tokio::test]
    async fn sweep_publishes_once_and_clears_dirty() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-r", MINING_42);
        let fleet = fleet(&remote);
        let rig01 = fleet.add(ready_miner("rig01")).unwrap();
        fleet.add(ready_miner("rig02")).unwrap();
        let mut rx = fleet.subscribe();

        let report = fleet.try_sweep().await.unwrap();

        assert_eq!(report.polled, 2);
        assert_eq!(report.updated, 2);
        assert!(report.changed);
        assert_eq!(drain(&mut rx), vec![FleetEvent::ClientStatusChanged]);
        assert!(!rig01.lock().await.is_dirty());

        let summary = fleet.summary().await;
        assert_eq!(summary.mining, 2);
        assert_eq!(summary.hash_rate, 84.0);
    }

    #[tokio::test]
    async fn failed_polls_do_not_publish() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.set_unreachable(true);
        let fleet = fleet(&remote);
        let rig01 = fleet.add(ready_miner("rig01")).unwrap();
        let mut rx = fleet.subscribe();

        let report = fleet.try_sweep().await.unwrap();

        assert_eq!(report.unavailable, 1);
        assert!(!report.changed);
        assert!(drain(&mut rx).is_empty());
        assert_eq!(rig01.lock().await.service_status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn one_failing_miner_does_not_stop_the_sweep() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.fail("-r").always("-r", MINING_42);
        let fleet = fleet(&remote);
        fleet.add(ready_miner("rig01")).unwrap();
        let rig02 = fleet.add(ready_miner("rig02")).unwrap();

        let report = fleet.try_sweep().await.unwrap();

        assert_eq!(report.unavailable, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(rig02.lock().await.service_status(), ServiceStatus::Mining);
    }

    #[tokio::test]
    async fn concurrent_sweeps_run_one_at_a_time() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-r", MINING_42);
        let fleet = fleet(&remote);
        fleet.add(ready_miner("rig01")).unwrap();

        remote.hold_reports();
        let first = tokio::spawn({
            let fleet = fleet.clone();
            async move { fleet.try_sweep().await }
        });
        while remote.count("-r") == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(fleet.try_sweep().await, None);
        assert_eq!(fleet.try_sweep().await, None);

        remote.release_reports();
        assert!(first.await.unwrap().is_some());
        assert_eq!(remote.count("-r"), 1);

        assert!(fleet.try_sweep().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_failure_marks_miner_unreachable() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-r", MINING_42);
        remote.set_unreachable(true);
        let fleet = fleet(&remote);
        fleet.add(ready_miner("rig01")).unwrap();

        fleet.try_sweep().await;
        assert!(fleet.unreachable().is_empty());

        tokio::time::advance(Duration::from_secs(30)).await;
        fleet.try_sweep().await;
        assert_eq!(fleet.unreachable(), vec![MinerIdentity::new("RIG01")]);

        remote.set_unreachable(false);
        fleet.try_sweep().await;
        assert!(fleet.unreachable().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_until_cancelled() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-r", MINING_42);
        let fleet = fleet(&remote);
        fleet.add(ready_miner("rig01")).unwrap();
        let cancellation = CancellationToken::new();

        let task = tokio::spawn(
            fleet
                .clone()
                .run(Duration::from_secs(1), cancellation.clone()),
        );
        tokio::time::sleep(Duration::from_millis(3500)).await;
        cancellation.cancel();
        task.await.unwrap();

        let polls = remote.count("-r");
        assert!((3..=4).contains(&polls), "{polls} polls");
        let miner = fleet.get(&MinerIdentity::new("rig01")).unwrap();
        assert_eq!(miner.lock().await.service_status(), ServiceStatus::Mining);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_is_published_after_run_returns() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-r", MINING_42);
        let fleet = fleet(&remote);
        fleet.add(ready_miner("rig01")).unwrap();
        let mut rx = fleet.subscribe();
        let cancellation = CancellationToken::new();

        remote.hold_reports();
        let task = tokio::spawn(
            fleet
                .clone()
                .run(Duration::from_secs(1), cancellation.clone()),
        );
        while remote.count("-r") == 0 {
            tokio::task::yield_now().await;
        }

        cancellation.cancel();
        task.await.unwrap();
        remote.release_reports();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(drain(&mut rx).is_empty());
        assert_eq!(remote.count("-r"), 1);
        let miner = fleet.get(&MinerIdentity::new("rig01")).unwrap();
        assert_eq!(miner.lock().await.service_status(), ServiceStatus::Stopped);
        assert!(fleet.try_sweep().await.is_some());
    }

    #[tokio::test]
    async fn manual_start_and_stop() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-s", r#"{"ok": true}"#);
        let fleet = fleet(&remote);
        let id = MinerIdentity::new("rig01");
        let miner = fleet.add(ready_miner("rig01")).unwrap();
        let mut rx = fleet.subscribe();

        assert!(matches!(fleet.stop(&id).await, Err(Error::Validation(_))));

        fleet.start(&id).await.unwrap();
        assert_eq!(miner.lock().await.service_status(), ServiceStatus::Disconnected);

        fleet.stop(&id).await.unwrap();
        assert_eq!(miner.lock().await.service_status(), ServiceStatus::Stopped);

        assert_eq!(
            drain(&mut rx),
            vec![FleetEvent::ClientStatusChanged, FleetEvent::ClientStatusChanged]
        );
        assert_eq!(remote.count("-s"), 2);
    }

    #[tokio::test]
    async fn start_of_unknown_miner_is_not_found() {
        let remote = Arc::new(ScriptedRemote::new());
        let fleet = fleet(&remote);
        assert!(matches!(
            fleet.start(&MinerIdentity::new("rig09")).await,
            Err(Error::NotFound(_))
        ));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn uninstall_removes_binaries_and_miner() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-s", r#"{"ok": true}"#);
        remote.add_path("c:\\xdagger\\XDaggerMinerWin");
        let fleet = fleet(&remote);
        let id = MinerIdentity::new("rig01");
        let miner = fleet.add(ready_miner("rig01")).unwrap();

        fleet.uninstall(&id).await.unwrap();

        assert!(fleet.is_empty());
        assert!(!remote.has_path("c:\\xdagger\\XDaggerMinerWin"));
        let miner = miner.lock().await;
        assert_eq!(miner.deployment_status(), DeploymentStatus::NotExist);
        assert_eq!(miner.service_status(), ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn uninstall_before_ready_only_deletes_binaries() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-s", r#"{"ok": false}"#);
        remote.add_path("c:\\xdagger\\XDaggerMinerWin");
        let fleet = fleet(&remote);
        let id = MinerIdentity::new("rig01");
        let mut miner = MinerEntity::new("rig01", "c:\\xdagger");
        miner.set_deployment_status(DeploymentStatus::Downloaded);
        fleet.add(miner).unwrap();

        fleet.uninstall(&id).await.unwrap();

        assert_eq!(remote.count("-s"), 0);
        assert!(fleet.is_empty());
        assert!(!remote.has_path("c:\\xdagger\\XDaggerMinerWin"));
    }

    #[tokio::test]
    async fn uninstall_keeps_miner_when_deletion_fails() {
        let remote = Arc::new(ScriptedRemote::new());
        remote.always("-s", r#"{"ok": true}"#);
        remote.set_fail_removal(true);
        let fleet = fleet(&remote);
        let id = MinerIdentity::new("rig01");
        let miner = fleet.add(ready_miner("rig01")).unwrap();

        let err = fleet.uninstall(&id).await.unwrap_err();

        assert!(matches!(err, Error::Path { .. }));
        assert_eq!(fleet.len(), 1);
        assert_eq!(
            miner.lock().await.deployment_status(),
            DeploymentStatus::Downloaded
        );
    }
}
