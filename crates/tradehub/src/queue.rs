//! The queue store: every pending trade, one ordered lane per routine.
//!
//! All membership changes go through a single `parking_lot::Mutex`, so
//! scan-then-insert and scan-then-claim are atomic with respect to each
//! other. That is what keeps "one entry per requester per routine" and
//! "one claim per entry" true with many workers polling at once. Nothing
//! awaits while the lock is held.
//!
//! Lanes are sorted by [`PriorityTier`] (lower first). Within a tier the
//! [`FairnessPolicy`] decides where an entry lands at insert time; after that
//! an entry only moves when it is re-queued for its single retry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use smallvec::smallvec;
use tracing::{debug, info};

use crate::code::LinkCode;
use crate::config::{FlexYieldMode, HubConfig};
use crate::distribution::DistributionPool;
use crate::error::AdmissionError;
use crate::fairness::{FairnessPolicy, Insertion};
use crate::traits::{LogSink, NotificationSink};
use crate::types::{
    EntryId, PriorityClass, PriorityTier, RequesterId, RoutineType, TradeEntry, TradeKind,
};

/// Lane order used by [`FlexYieldMode::LessCheatyFirst`].
const LESS_CHEATY_ORDER: [RoutineType; 4] = [
    RoutineType::SeedCheck,
    RoutineType::Clone,
    RoutineType::Dump,
    RoutineType::LinkTrade,
];

/// An entry handed to exactly one worker.
#[derive(Debug, Clone)]
pub struct Claim {
    pub entry: TradeEntry,
    pub tier: PriorityTier,
}

/// Where a requester stands in a lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueuePosition {
    /// 1-based, counting only entries still waiting.
    pub position: usize,
    /// A worker is trading with this entry right now.
    pub processing: bool,
}

/// One row of a queue listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSnapshotEntry {
    pub requester_id: RequesterId,
    pub requester_name: String,
    pub position: usize,
    pub kind: TradeKind,
    pub processing: bool,
}

#[derive(Debug)]
struct Slot {
    entry: TradeEntry,
    tier: PriorityTier,
    processing: bool,
}

impl Slot {
    fn is_free_waiting(&self) -> bool {
        !self.processing && !self.entry.priority.is_privileged()
    }
}

#[derive(Debug, Default)]
struct QueueState {
    lanes: [Vec<Slot>; 4],
}

impl QueueState {
    fn lane(&self, routine: RoutineType) -> Option<&Vec<Slot>> {
        lane_index(routine).map(|i| &self.lanes[i])
    }

    fn lane_mut(&mut self, routine: RoutineType) -> Option<&mut Vec<Slot>> {
        lane_index(routine).map(|i| &mut self.lanes[i])
    }

    fn total(&self) -> usize {
        self.lanes.iter().map(Vec::len).sum()
    }
}

fn lane_index(routine: RoutineType) -> Option<usize> {
    RoutineType::LANES.iter().position(|lane| *lane == routine)
}

/// Index of the slot a new entry should be inserted before.
fn insertion_index(lane: &[Slot], tier: PriorityTier, insertion: Insertion) -> usize {
    let band_start = lane.partition_point(|slot| slot.tier < tier);
    let band_end = lane.partition_point(|slot| slot.tier <= tier);
    match insertion {
        Insertion::Tail => band_end,
        Insertion::Front => band_start,
        Insertion::AfterFree(ahead) => {
            let mut seen = 0;
            let mut index = band_start;
            while index < band_end {
                if lane[index].is_free_waiting() {
                    if seen == ahead {
                        break;
                    }
                    seen += 1;
                }
                index += 1;
            }
            index
        }
    }
}

/// Waiting position of the slot at `index`, 1-based.
fn waiting_position(lane: &[Slot], index: usize) -> usize {
    1 + lane[..index].iter().filter(|slot| !slot.processing).count()
}

pub struct QueueStore {
    config: Arc<HubConfig>,
    policy: FairnessPolicy,
    state: Mutex<QueueState>,
    next_id: AtomicU64,
    distribution: Arc<DistributionPool>,
    distribution_notifier: Arc<dyn NotificationSink>,
}

impl QueueStore {
    pub fn new(config: Arc<HubConfig>) -> Self {
        Self::with_distribution_notifier(config, Arc::new(LogSink))
    }

    /// A store whose distribution claims report to `notifier` instead of the
    /// log.
    pub fn with_distribution_notifier(config: Arc<HubConfig>, notifier: Arc<dyn NotificationSink>) -> Self {
        let policy = FairnessPolicy::new(config.favored.clone(), config.queue.clone());
        Self {
            config,
            policy,
            state: Mutex::new(QueueState::default()),
            next_id: AtomicU64::new(1),
            distribution: Arc::new(DistributionPool::default()),
            distribution_notifier: notifier,
        }
    }

    pub fn policy(&self) -> &FairnessPolicy {
        &self.policy
    }

    pub fn distribution(&self) -> &DistributionPool {
        &self.distribution
    }

    /// Shared handle to the pool, for sessions that look up swap requests.
    pub fn distribution_pool(&self) -> Arc<DistributionPool> {
        self.distribution.clone()
    }

    /// Allocate the next entry id.
    pub fn next_entry_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Insert `entry` into its routine lane within `tier`.
    ///
    /// Returns the 1-based waiting position. Rejections leave the store
    /// untouched.
    pub fn try_enqueue(&self, entry: TradeEntry, tier: PriorityTier) -> Result<usize, AdmissionError> {
        let routine = entry.routine();
        let max = self.config.queue.max_queue_count;

        let mut state = self.state.lock();
        if state.total() >= max {
            return Err(AdmissionError::CapacityExceeded { max });
        }
        let Some(lane) = state.lane_mut(routine) else {
            return Err(AdmissionError::Illegal {
                diagnostics: format!("{routine:?} has no queue"),
            });
        };
        if lane.iter().any(|slot| slot.entry.requester_id == entry.requester_id) {
            return Err(AdmissionError::AlreadyQueued {
                requester: entry.requester_id,
            });
        }

        let band_start = lane.partition_point(|slot| slot.tier < tier);
        let band_end = lane.partition_point(|slot| slot.tier <= tier);
        let non_privileged = lane[band_start..band_end]
            .iter()
            .filter(|slot| slot.is_free_waiting())
            .count();
        let insertion = self.policy.insertion(entry.priority, non_privileged);
        let index = insertion_index(lane, tier, insertion);

        debug!(
            entry_id = %entry.id,
            requester = %entry.requester_id,
            ?routine,
            ?insertion,
            index,
            "entry enqueued"
        );
        lane.insert(
            index,
            Slot {
                entry,
                tier,
                processing: false,
            },
        );
        Ok(waiting_position(lane, index))
    }

    /// Re-insert a claimed entry after a retryable failure, flagged as a
    /// retry, at the tail of `tier`. Returns false if the entry is no longer
    /// held by the store (the requester left while it was processing).
    pub fn requeue(&self, mut entry: TradeEntry, tier: PriorityTier) -> bool {
        let routine = entry.routine();
        let mut state = self.state.lock();
        let Some(lane) = state.lane_mut(routine) else {
            return false;
        };
        let Some(index) = lane.iter().position(|slot| slot.entry.id == entry.id) else {
            return false;
        };
        lane.remove(index);

        entry.is_retry = true;
        let index = insertion_index(lane, tier, Insertion::Tail);
        info!(entry_id = %entry.id, ?routine, ?tier, "entry re-queued for retry");
        lane.insert(
            index,
            Slot {
                entry,
                tier,
                processing: false,
            },
        );
        true
    }

    /// Claim the highest-ranked waiting entry of `routine`.
    pub fn try_dequeue(&self, routine: RoutineType) -> Option<Claim> {
        let mut state = self.state.lock();
        claim_first(state.lane_mut(routine)?)
    }

    /// Claim for a flex worker: pick a lane, then claim its head.
    pub fn try_dequeue_flex(&self, mode: FlexYieldMode) -> Option<Claim> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let lane = match mode {
            FlexYieldMode::LessCheatyFirst => LESS_CHEATY_ORDER.into_iter().find(|routine| {
                state
                    .lane(*routine)
                    .is_some_and(|lane| lane.iter().any(|slot| !slot.processing))
            })?,
            FlexYieldMode::Weighted => {
                let mut best: Option<(RoutineType, i64)> = None;
                for routine in LESS_CHEATY_ORDER {
                    let Some((count, head)) = state.lane(routine).and_then(|lane| waiting_stats(lane)) else {
                        continue;
                    };
                    let waited = (now - head).num_seconds();
                    let weight = self.policy.weight(count, waited, routine);
                    if best.map_or(true, |(_, top)| weight > top) {
                        best = Some((routine, weight));
                    }
                }
                best?.0
            }
        };
        claim_first(state.lane_mut(lane)?)
    }

    /// Build a distribution claim from the unattended pool, if enabled.
    pub fn try_dequeue_distribution(&self) -> Option<Claim> {
        let settings = &self.config.distribution;
        if !settings.distribute_while_idle {
            return None;
        }
        let payload = self.distribution.next(settings.shuffled)?;
        let code = if settings.random_code {
            self.config.trade.random_code()
        } else {
            LinkCode::try_from(settings.trade_code).ok()?
        };
        let entry = TradeEntry {
            id: self.next_entry_id(),
            requester_id: RequesterId::new("distribution"),
            requester_name: "Distribution".to_string(),
            payloads: smallvec![payload],
            kind: TradeKind::Random,
            code,
            priority: PriorityClass::Normal,
            enqueued_at: Utc::now(),
            is_retry: false,
            is_synchronized: settings.synchronize_bots != crate::config::BotSyncOption::NoSync,
            notifier: self.distribution_notifier.clone(),
        };
        Some(Claim {
            entry,
            tier: PriorityTier::FREE,
        })
    }

    /// Manual removal by the requester. Refused while processing unless
    /// `can_dequeue_if_processing` is set.
    pub fn remove(&self, requester: &RequesterId, routine: RoutineType) -> bool {
        let mut state = self.state.lock();
        let Some(lane) = state.lane_mut(routine) else {
            return false;
        };
        let Some(index) = lane.iter().position(|slot| &slot.entry.requester_id == requester) else {
            return false;
        };
        if lane[index].processing && !self.config.queue.can_dequeue_if_processing {
            return false;
        }
        lane.remove(index);
        true
    }

    /// Drop a finished entry. Returns false for entries the store never held
    /// (distribution claims) or that were already removed.
    pub fn complete(&self, id: EntryId) -> bool {
        let mut state = self.state.lock();
        for lane in state.lanes.iter_mut() {
            if let Some(index) = lane.iter().position(|slot| slot.entry.id == id) {
                lane.remove(index);
                return true;
            }
        }
        false
    }

    pub fn check_position(&self, requester: &RequesterId, routine: RoutineType) -> Option<QueuePosition> {
        let state = self.state.lock();
        let lane = state.lane(routine)?;
        let index = lane.iter().position(|slot| &slot.entry.requester_id == requester)?;
        Some(QueuePosition {
            position: waiting_position(lane, index),
            processing: lane[index].processing,
        })
    }

    /// Ordered listing of a lane.
    pub fn snapshot(&self, routine: RoutineType) -> Vec<QueueSnapshotEntry> {
        let state = self.state.lock();
        let Some(lane) = state.lane(routine) else {
            return Vec::new();
        };
        lane.iter()
            .enumerate()
            .map(|(index, slot)| QueueSnapshotEntry {
                requester_id: slot.entry.requester_id.clone(),
                requester_name: slot.entry.requester_name.clone(),
                position: waiting_position(lane, index),
                kind: slot.entry.kind,
                processing: slot.processing,
            })
            .collect()
    }

    /// Entries in a lane, processing or not.
    pub fn len(&self, routine: RoutineType) -> usize {
        self.state.lock().lane(routine).map_or(0, Vec::len)
    }

    pub fn total_len(&self) -> usize {
        self.state.lock().total()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    /// Reporting weight of a lane right now.
    pub fn lane_weight(&self, routine: RoutineType) -> i64 {
        let state = self.state.lock();
        match state.lane(routine).and_then(|lane| waiting_stats(lane)) {
            Some((count, head)) => {
                let waited = (Utc::now() - head).num_seconds();
                self.policy.weight(count, waited, routine)
            }
            None => 0,
        }
    }

    /// Drop every entry, processing or not.
    pub fn clear_all(&self) {
        let mut state = self.state.lock();
        for lane in state.lanes.iter_mut() {
            lane.clear();
        }
    }
}

/// Waiting count and enqueue time of the first waiting entry.
fn waiting_stats(lane: &[Slot]) -> Option<(usize, DateTime<Utc>)> {
    let mut waiting = lane.iter().filter(|slot| !slot.processing);
    let head = waiting.next()?.entry.enqueued_at;
    Some((1 + waiting.count(), head))
}

fn claim_first(lane: &mut [Slot]) -> Option<Claim> {
    let slot = lane.iter_mut().find(|slot| !slot.processing)?;
    slot.processing = true;
    Some(Claim {
        entry: slot.entry.clone(),
        tier: slot.tier,
    })
}
