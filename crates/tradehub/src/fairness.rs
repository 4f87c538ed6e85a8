//! Insertion ranking and queue weighting.
//!
//! Everything here is a pure function of the configuration and the numbers
//! passed in; the queue calls it while holding its lock.

use crate::config::{FavoredMode, FavoredSettings, FlexBiasMode, QueueSettings};
use crate::types::{PriorityClass, RoutineType};

/// Where a new entry goes within its priority band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    /// After everything already in the band.
    Tail,
    /// Position 1 of the band.
    Front,
    /// After the first `n` non-privileged entries of the band (and after any
    /// privileged entries that directly follow them).
    AfterFree(usize),
}

/// Fairness rules for one hub.
#[derive(Debug, Clone)]
pub struct FairnessPolicy {
    favored: FavoredSettings,
    queue: QueueSettings,
}

impl FairnessPolicy {
    pub fn new(favored: FavoredSettings, queue: QueueSettings) -> Self {
        Self { favored, queue }
    }

    /// Rank a new entry of `class` given the number of non-privileged
    /// entries already waiting in its band.
    pub fn insertion(&self, class: PriorityClass, non_privileged: usize) -> Insertion {
        let favored = &self.favored;
        match class {
            PriorityClass::Normal => return Insertion::Tail,
            _ if favored.mode == FavoredMode::None => return Insertion::Tail,
            PriorityClass::Owner if favored.owner_jumps_queue => return Insertion::Front,
            _ => {}
        }

        if non_privileged == 0 {
            return Insertion::Tail;
        }

        let count = non_privileged as f64;
        let computed = match favored.mode {
            FavoredMode::Exponent => {
                count.powf(favored.exponent.max(FavoredSettings::MIN_EXPONENT))
            }
            FavoredMode::Multiply => {
                count * favored.multiply.max(FavoredSettings::MIN_MULTIPLY)
            }
            FavoredMode::None => count,
        };
        let mut ahead = (computed.floor() as usize).min(non_privileged);

        let bypassed = favored.allow_bypass && non_privileged > favored.bypass_threshold();
        if !bypassed {
            let floor = favored
                .minimum_free_ahead
                .max(FavoredSettings::MIN_FREE_AHEAD)
                .min(non_privileged);
            ahead = ahead.max(floor);
        }

        Insertion::AfterFree(ahead)
    }

    /// Reporting weight of a lane: count bias combined with how long its head
    /// has waited. Also used by flex workers to choose a lane.
    pub fn weight(&self, count: usize, seconds_waited: i64, routine: RoutineType) -> i64 {
        let count_bias = self.queue.count_bias(routine).saturating_mul(count as i64);
        let time_bias = self
            .queue
            .time_bias(routine)
            .saturating_mul(seconds_waited.max(0));
        match self.queue.time_bias_mode {
            FlexBiasMode::Multiply => count_bias.saturating_mul(time_bias),
            FlexBiasMode::Add => count_bias.saturating_add(time_bias),
        }
    }

    /// Estimated minutes before the entry at `position` (1-based) starts,
    /// given `bots` workers serving its lane. Position 1 is next up.
    pub fn estimate_minutes(&self, position: usize, bots: usize) -> f64 {
        let ahead = position.saturating_sub(1) as f64;
        self.queue.estimated_delay_factor * ahead / bots.max(1) as f64
    }
}
