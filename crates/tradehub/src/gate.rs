//! Whether new requests are accepted right now.
//!
//! `Manual` leaves the switch to the operator. `Threshold` closes once the
//! queue is full enough and reopens once it drains. `Interval` alternates
//! fixed open and closed windows.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::info;

use crate::config::{QueueOpening, QueueSettings};

#[derive(Debug)]
struct GateState {
    open: bool,
    /// Start of the current interval window.
    since: Instant,
}

#[derive(Debug)]
pub struct QueueGate {
    mode: QueueOpening,
    unlock_at: usize,
    lock_at: usize,
    open_for: Duration,
    closed_for: Duration,
    state: Mutex<GateState>,
}

impl QueueGate {
    pub fn new(settings: &QueueSettings) -> Self {
        Self {
            mode: settings.opening,
            unlock_at: settings.threshold_unlock,
            lock_at: settings.threshold_lock,
            open_for: Duration::from_secs(settings.interval_open_for_secs),
            closed_for: Duration::from_secs(settings.interval_close_for_secs),
            state: Mutex::new(GateState {
                open: settings.can_queue,
                since: Instant::now(),
            }),
        }
    }

    pub fn mode(&self) -> QueueOpening {
        self.mode
    }

    /// Operator switch. In `Interval` mode this also restarts the window.
    pub fn set_open(&self, open: bool) {
        let mut state = self.state.lock();
        state.open = open;
        state.since = Instant::now();
        info!(open, "queue gate toggled");
    }

    /// Evaluate the gate against the current queue length and report
    /// whether a new request may be admitted.
    pub fn admits(&self, queued: usize) -> bool {
        self.admits_at(queued, Instant::now())
    }

    fn admits_at(&self, queued: usize, now: Instant) -> bool {
        let mut state = self.state.lock();
        match self.mode {
            QueueOpening::Manual => {}
            QueueOpening::Threshold => {
                if state.open && queued >= self.lock_at {
                    state.open = false;
                    info!(queued, "queue closed at threshold");
                } else if !state.open && queued <= self.unlock_at {
                    state.open = true;
                    info!(queued, "queue reopened");
                }
            }
            QueueOpening::Interval => {
                // Catch up on every window boundary that passed.
                loop {
                    let window = if state.open { self.open_for } else { self.closed_for };
                    if window.is_zero() || now.duration_since(state.since) < window {
                        break;
                    }
                    state.since += window;
                    state.open = !state.open;
                    info!(open = state.open, "queue interval elapsed");
                }
            }
        }
        state.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(opening: QueueOpening) -> QueueSettings {
        QueueSettings {
            opening,
            threshold_unlock: 2,
            threshold_lock: 5,
            interval_open_for_secs: 60,
            interval_close_for_secs: 120,
            ..QueueSettings::default()
        }
    }

    #[test]
    fn test_manual_follows_switch_only() {
        let gate = QueueGate::new(&settings(QueueOpening::Manual));
        assert!(gate.admits(1000));
        gate.set_open(false);
        assert!(!gate.admits(0));
    }

    #[test]
    fn test_threshold_has_hysteresis() {
        let gate = QueueGate::new(&settings(QueueOpening::Threshold));
        assert!(gate.admits(4));
        assert!(!gate.admits(5));
        assert!(!gate.admits(3));
        assert!(gate.admits(2));
        assert!(gate.admits(4));
    }

    #[test]
    fn test_interval_alternates_windows() {
        let gate = QueueGate::new(&settings(QueueOpening::Interval));
        let start = gate.state.lock().since;
        assert!(gate.admits_at(0, start + Duration::from_secs(59)));
        assert!(!gate.admits_at(0, start + Duration::from_secs(61)));
        assert!(!gate.admits_at(0, start + Duration::from_secs(179)));
        assert!(gate.admits_at(0, start + Duration::from_secs(181)));
        // Skips a whole cycle in one evaluation.
        assert!(!gate.admits_at(0, start + Duration::from_secs(181 + 180 + 60)));
    }
}
