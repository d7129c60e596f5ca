use std::fmt;

use serde::Serialize;

use crate::miner::MinerSnapshot;
use crate::types::{HashRate, ServiceStatus};

/// Fleet-wide counts, computed on demand from snapshots.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct FleetSummary {
    pub total: usize,
    /// Service status above `Stopped`.
    pub running: usize,
    pub stopped: usize,
    pub mining: usize,
    pub hash_rate: HashRate,
}

impl FleetSummary {
    pub fn from_snapshots(snapshots: &[MinerSnapshot]) -> Self {
        let total = snapshots.len();
        let running = snapshots
            .iter()
            .filter(|s| s.service_status.is_running())
            .count();
        let mining = snapshots
            .iter()
            .filter(|s| s.service_status == ServiceStatus::Mining)
            .count();
        let hash_rate = snapshots.iter().map(|s| s.hash_rate).sum();

        Self {
            total,
            running,
            stopped: total - running,
            mining,
            hash_rate,
        }
    }
}

impl fmt::Display for FleetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} miners, {} running, {} stopped, {} mining at {:.2} H/s",
            self.total, self.running, self.stopped, self.mining, self.hash_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::MinerEntity;

    fn snapshot(machine: &str, status: ServiceStatus, hash_rate: HashRate) -> MinerSnapshot {
        let mut snapshot = MinerEntity::new(machine, "c:\\xdagger").snapshot();
        snapshot.service_status = status;
        snapshot.hash_rate = hash_rate;
        snapshot
    }

    #[test]
    fn empty_fleet() {
        assert_eq!(FleetSummary::from_snapshots(&[]), FleetSummary::default());
    }

    #[test]
    fn counts_by_service_status() {
        let summary = FleetSummary::from_snapshots(&[
            snapshot("rig01", ServiceStatus::Mining, 40.0),
            snapshot("rig02", ServiceStatus::Mining, 2.5),
            snapshot("rig03", ServiceStatus::Disconnected, 0.0),
            snapshot("rig04", ServiceStatus::Stopped, 0.0),
            snapshot("rig05", ServiceStatus::Unknown, 0.0),
        ]);

        assert_eq!(summary.total, 5);
        assert_eq!(summary.running, 3);
        assert_eq!(summary.stopped, 2);
        assert_eq!(summary.mining, 2);
        assert_eq!(summary.hash_rate, 42.5);
        assert!(summary.to_string().starts_with("5 miners, 3 running"));
    }
}
