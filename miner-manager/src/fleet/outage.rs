//! Debounced detection of miners that stopped answering.
//!
//! A single failed poll says little: the host may be rebooting or the
//! network briefly congested. An outage is only declared once polls have
//! failed continuously for the debounce period.
//!
//! ```text
//!            failed poll             failing >= debounce
//!  Reachable ──────────► Suspect ───────────────────────► Down
//!      ▲                    │                               │
//!      │  answered          │                               │
//!      ├────────────────────┘                               │
//!      │                         answered                   │
//!      └────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Transition reported by [`OutageAlarm::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutageStatus {
    /// Polls succeed.
    Reachable,

    /// Polls fail, but not for long enough to call it an outage.
    Suspect,

    /// The debounce period just elapsed. Returned once per outage.
    Began,

    /// Outage already reported, polls still fail.
    Ongoing,

    /// The miner answered again after a reported outage. Returned once.
    Ended { lasted: Duration },
}

#[derive(Debug)]
enum State {
    Reachable,
    Suspect(Instant),
    Down(Instant),
}

/// Tracks poll failures of one miner.
#[derive(Debug)]
pub struct OutageAlarm {
    debounce: Duration,
    state: State,
}

impl OutageAlarm {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: State::Reachable,
        }
    }

    /// Feed the result of one poll.
    pub fn check(&mut self, failed: bool) -> OutageStatus {
        match (&self.state, failed) {
            (State::Reachable, false) => OutageStatus::Reachable,

            (State::Reachable, true) => {
                self.state = State::Suspect(Instant::now());
                OutageStatus::Suspect
            }

            (State::Suspect(_), false) => {
                self.state = State::Reachable;
                OutageStatus::Reachable
            }

            (State::Suspect(since), true) => {
                if since.elapsed() >= self.debounce {
                    self.state = State::Down(*since);
                    OutageStatus::Began
                } else {
                    OutageStatus::Suspect
                }
            }

            (State::Down(since), false) => {
                let lasted = since.elapsed();
                self.state = State::Reachable;
                OutageStatus::Ended { lasted }
            }

            (State::Down(_), true) => OutageStatus::Ongoing,
        }
    }

    /// Whether an outage has been declared and not yet ended.
    pub fn is_down(&self) -> bool {
        matches!(self.state, State::Down(_))
    }
}
