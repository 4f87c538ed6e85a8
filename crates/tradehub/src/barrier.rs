//! Cross-worker rendezvous for synchronized distribution trades.
//!
//! Workers that opted in confirm their link codes together: each one calls
//! [`SynchronizationBarrier::signal_and_wait`] right before confirming, and
//! nobody proceeds until the barrier opens. With `LocalSync` the barrier
//! opens when the last participant arrives; with `RemoteSync` it only opens
//! on [`SynchronizationBarrier::release`].
//!
//! Each opening bumps a generation published through a `watch` channel.
//! A waiter that times out or is cancelled withdraws its arrival, so a stale
//! arrival can never open a later generation early.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BotSyncOption;

#[derive(Debug, Default)]
struct BarrierState {
    participants: usize,
    arrived: usize,
    generation: u64,
}

#[derive(Debug)]
pub struct SynchronizationBarrier {
    option: BotSyncOption,
    release_delay: Duration,
    state: Mutex<BarrierState>,
    opened: watch::Sender<u64>,
}

impl SynchronizationBarrier {
    pub fn new(option: BotSyncOption, release_delay: Duration) -> Self {
        let (opened, _) = watch::channel(0);
        Self {
            option,
            release_delay,
            state: Mutex::new(BarrierState::default()),
            opened,
        }
    }

    pub fn option(&self) -> BotSyncOption {
        self.option
    }

    pub fn add_participant(&self) -> usize {
        let mut state = self.state.lock();
        state.participants += 1;
        state.participants
    }

    /// Leave the barrier. If everyone left behind has already arrived, they
    /// are released.
    pub fn remove_participant(&self) -> usize {
        let mut state = self.state.lock();
        state.participants = state.participants.saturating_sub(1);
        if self.option == BotSyncOption::LocalSync
            && state.arrived > 0
            && state.arrived >= state.participants
        {
            self.open_locked(&mut state);
        }
        state.participants
    }

    pub fn participant_count(&self) -> usize {
        self.state.lock().participants
    }

    /// Arrivals currently waiting on this generation.
    pub fn waiting(&self) -> usize {
        self.state.lock().arrived
    }

    /// Open the current generation from outside. Only meaningful for
    /// `RemoteSync`; returns how many waiters were released.
    pub fn release(&self) -> usize {
        let mut state = self.state.lock();
        let released = state.arrived;
        if released > 0 {
            self.open_locked(&mut state);
        }
        released
    }

    /// Arrive and wait for the barrier to open. `false` on timeout or
    /// cancellation, in which case the arrival is withdrawn.
    pub async fn signal_and_wait(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        if self.option == BotSyncOption::NoSync {
            return true;
        }

        let mut opened = self.opened.subscribe();
        let (generation, last) = {
            let mut state = self.state.lock();
            if state.participants == 0 {
                return true;
            }
            state.arrived += 1;
            let last = self.option == BotSyncOption::LocalSync && state.arrived >= state.participants;
            debug!(arrived = state.arrived, participants = state.participants, "barrier arrival");
            (state.generation, last)
        };

        if last {
            if !self.release_delay.is_zero() {
                tokio::time::sleep(self.release_delay).await;
            }
            let mut state = self.state.lock();
            if state.generation == generation {
                self.open_locked(&mut state);
            }
            return true;
        }

        let outcome = tokio::select! {
            changed = opened.wait_for(|g| *g > generation) => changed.is_ok(),
            _ = tokio::time::sleep(timeout) => false,
            _ = cancel.cancelled() => false,
        };
        if outcome {
            return true;
        }

        let mut state = self.state.lock();
        if state.generation != generation {
            // Opened while we were giving up.
            return true;
        }
        state.arrived = state.arrived.saturating_sub(1);
        false
    }

    fn open_locked(&self, state: &mut BarrierState) {
        state.generation += 1;
        let released = state.arrived;
        state.arrived = 0;
        self.opened.send_replace(state.generation);
        info!(generation = state.generation, released, "barrier opened");
    }
}

/// One worker's membership in a [`SynchronizationBarrier`].
///
/// Joins and leaves as the worker's current entry changes, and leaves on
/// drop.
#[derive(Debug)]
pub struct BarrierSeat {
    barrier: Arc<SynchronizationBarrier>,
    timeout: Duration,
    joined: bool,
    failed: u32,
}

impl BarrierSeat {
    pub fn new(barrier: Arc<SynchronizationBarrier>, timeout: Duration) -> Self {
        Self {
            barrier,
            timeout,
            joined: false,
            failed: 0,
        }
    }

    pub fn is_joined(&self) -> bool {
        self.joined
    }

    /// Join or leave so that membership matches `should_wait`.
    pub fn update(&mut self, should_wait: bool, worker: &str) {
        if self.joined == should_wait {
            return;
        }
        self.joined = should_wait;
        if should_wait {
            let count = self.barrier.add_participant();
            info!(worker, count, "joined barrier");
        } else {
            let count = self.barrier.remove_participant();
            info!(worker, count, "left barrier");
        }
    }

    /// Wait at the barrier if this seat is joined. Timeouts are logged and
    /// otherwise ignored; the trade continues unsynchronized.
    pub async fn wait(&mut self, worker: &str, cancel: &CancellationToken) -> bool {
        if !self.joined || self.barrier.option() == BotSyncOption::NoSync {
            return true;
        }
        // One retry at double length after a single slow round.
        let timeout = if self.failed == 1 { self.timeout * 2 } else { self.timeout };
        if self.barrier.signal_and_wait(timeout, cancel).await {
            self.failed = 0;
            return true;
        }
        self.failed += 1;
        warn!(worker, timeout_secs = timeout.as_secs_f64(), "barrier timed out, continuing");
        false
    }
}

impl Drop for BarrierSeat {
    fn drop(&mut self) {
        if self.joined {
            self.barrier.remove_participant();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn barrier(option: BotSyncOption) -> Arc<SynchronizationBarrier> {
        Arc::new(SynchronizationBarrier::new(option, Duration::ZERO))
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_sync_releases_on_last_arrival() {
        let b = barrier(BotSyncOption::LocalSync);
        b.add_participant();
        b.add_participant();
        let cancel = CancellationToken::new();

        let first = {
            let b = b.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { b.signal_and_wait(Duration::from_secs(90), &cancel).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.waiting(), 1);

        assert!(b.signal_and_wait(Duration::from_secs(90), &cancel).await);
        assert!(first.await.unwrap());
        assert_eq!(b.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_withdraws_arrival() {
        let b = barrier(BotSyncOption::LocalSync);
        b.add_participant();
        b.add_participant();
        let cancel = CancellationToken::new();

        assert!(!b.signal_and_wait(Duration::from_secs(5), &cancel).await);
        assert_eq!(b.waiting(), 0);

        // The stale arrival must not let a single new arrival through.
        let lone = {
            let b = b.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { b.signal_and_wait(Duration::from_secs(5), &cancel).await })
        };
        assert!(!lone.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_sync_waits_for_release() {
        let b = barrier(BotSyncOption::RemoteSync);
        b.add_participant();
        let cancel = CancellationToken::new();
        let waiter = {
            let b = b.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { b.signal_and_wait(Duration::from_secs(90), &cancel).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(b.waiting(), 1);
        assert_eq!(b.release(), 1);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_participant_releases_the_rest() {
        let b = barrier(BotSyncOption::LocalSync);
        b.add_participant();
        b.add_participant();
        let cancel = CancellationToken::new();
        let waiter = {
            let b = b.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { b.signal_and_wait(Duration::from_secs(90), &cancel).await })
        };
        tokio::task::yield_now().await;
        b.remove_participant();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_stops_waiting() {
        let b = barrier(BotSyncOption::LocalSync);
        b.add_participant();
        b.add_participant();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!b.signal_and_wait(Duration::from_secs(90), &cancel).await);
        assert_eq!(b.waiting(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seat_doubles_timeout_after_one_failure() {
        let b = barrier(BotSyncOption::LocalSync);
        let _other = b.add_participant();
        let mut seat = BarrierSeat::new(b.clone(), Duration::from_secs(10));
        seat.update(true, "w1");
        assert_eq!(b.participant_count(), 2);
        let cancel = CancellationToken::new();

        let start = tokio::time::Instant::now();
        assert!(!seat.wait("w1", &cancel).await);
        assert_eq!(start.elapsed(), Duration::from_secs(10));

        let start = tokio::time::Instant::now();
        assert!(!seat.wait("w1", &cancel).await);
        assert_eq!(start.elapsed(), Duration::from_secs(20));

        drop(seat);
        assert_eq!(b.participant_count(), 1);
    }

    #[tokio::test]
    async fn test_no_sync_never_blocks() {
        let b = barrier(BotSyncOption::NoSync);
        b.add_participant();
        b.add_participant();
        assert!(b.signal_and_wait(Duration::from_secs(90), &CancellationToken::new()).await);
    }
}
