//! Hub configuration.
//!
//! One [`HubConfig`] is built at startup and shared as `Arc<HubConfig>` by the
//! queue, the router and every worker. Every section deserializes with
//! defaults, so a partial JSON document is a valid configuration.
//! [`HubConfig::normalized`] applies the floors and clamps that keep the
//! fairness arithmetic well defined.

use serde::{Deserialize, Serialize};

use crate::code::LinkCode;
use crate::error::ConfigError;
use crate::types::{PriorityTier, RoutineType};

/// Root configuration object.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub queue: QueueSettings,
    pub favored: FavoredSettings,
    pub trade: TradeSettings,
    pub distribution: DistributionSettings,
    pub abuse: AbuseSettings,
    pub timings: TimingSettings,
    /// Press a harmless button now and then while idle so the console
    /// does not go to sleep.
    pub anti_idle: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue: QueueSettings::default(),
            favored: FavoredSettings::default(),
            trade: TradeSettings::default(),
            distribution: DistributionSettings::default(),
            abuse: AbuseSettings::default(),
            timings: TimingSettings::default(),
            anti_idle: true,
        }
    }
}

impl HubConfig {
    /// Parse a JSON document and normalize it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Clamp every tunable into its legal range.
    pub fn normalized(mut self) -> Self {
        let favored = &mut self.favored;
        favored.exponent = favored.exponent.max(FavoredSettings::MIN_EXPONENT);
        favored.multiply = favored.multiply.max(FavoredSettings::MIN_MULTIPLY);
        favored.minimum_free_ahead = favored
            .minimum_free_ahead
            .max(FavoredSettings::MIN_FREE_AHEAD);
        favored.bypass_factor = favored.bypass_factor.clamp(
            FavoredSettings::MIN_BYPASS_FACTOR,
            FavoredSettings::MAX_BYPASS_FACTOR,
        );

        let trade = &mut self.trade;
        trade.max_trade_code = trade.max_trade_code.min(LinkCode::MAX);
        trade.min_trade_code = trade.min_trade_code.min(trade.max_trade_code);
        trade.max_items_per_trade = trade.max_items_per_trade.max(1);

        self.queue.estimated_delay_factor = self.queue.estimated_delay_factor.max(0.0);
        self.timings.keepalive_every = self.timings.keepalive_every.max(1);
        self
    }
}

/// How time bias combines with count bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlexBiasMode {
    Add,
    Multiply,
}

/// How a flex worker picks which lane to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlexYieldMode {
    /// Fixed lane order, least abusable routines first.
    LessCheatyFirst,
    /// Heaviest lane by [`FairnessPolicy::weight`](crate::FairnessPolicy::weight).
    Weighted,
}

/// When the queue accepts new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueOpening {
    /// Only `can_queue` decides.
    Manual,
    /// Close at `threshold_lock` entries, reopen at `threshold_unlock`.
    Threshold,
    /// Alternate between open and closed windows.
    Interval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub can_queue: bool,
    /// Total entries across all lanes before admission is refused.
    pub max_queue_count: usize,
    pub can_dequeue_if_processing: bool,
    pub flex_mode: FlexYieldMode,
    pub opening: QueueOpening,
    pub threshold_unlock: usize,
    pub threshold_lock: usize,
    pub interval_open_for_secs: u64,
    pub interval_close_for_secs: u64,

    pub count_bias_trade: i64,
    pub count_bias_seed_check: i64,
    pub count_bias_clone: i64,
    pub count_bias_dump: i64,

    pub time_bias_mode: FlexBiasMode,
    pub time_bias_trade: i64,
    pub time_bias_seed_check: i64,
    pub time_bias_clone: i64,
    pub time_bias_dump: i64,

    /// Minutes per position, divided by the number of bots serving the lane.
    pub estimated_delay_factor: f64,

    /// Band a failed entry is re-queued into on its single retry.
    pub retry_tier: PriorityTier,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            can_queue: true,
            max_queue_count: 999,
            can_dequeue_if_processing: false,
            flex_mode: FlexYieldMode::Weighted,
            opening: QueueOpening::Manual,
            threshold_unlock: 0,
            threshold_lock: 30,
            interval_open_for_secs: 5 * 60,
            interval_close_for_secs: 15 * 60,
            count_bias_trade: 100,
            count_bias_seed_check: 100,
            count_bias_clone: 100,
            count_bias_dump: 100,
            time_bias_mode: FlexBiasMode::Multiply,
            time_bias_trade: 1,
            time_bias_seed_check: 1,
            time_bias_clone: 1,
            time_bias_dump: 1,
            estimated_delay_factor: 1.1,
            retry_tier: PriorityTier::TIER2,
        }
    }
}

impl QueueSettings {
    pub fn count_bias(&self, routine: RoutineType) -> i64 {
        match routine {
            RoutineType::SeedCheck => self.count_bias_seed_check,
            RoutineType::Clone => self.count_bias_clone,
            RoutineType::Dump => self.count_bias_dump,
            _ => self.count_bias_trade,
        }
    }

    pub fn time_bias(&self, routine: RoutineType) -> i64 {
        match routine {
            RoutineType::SeedCheck => self.time_bias_seed_check,
            RoutineType::Clone => self.time_bias_clone,
            RoutineType::Dump => self.time_bias_dump,
            _ => self.time_bias_trade,
        }
    }
}

/// How privileged entries are placed among non-privileged ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FavoredMode {
    /// Privilege is ignored; everyone joins at the tail.
    None,
    /// Insert after `count^exponent` non-privileged entries.
    Exponent,
    /// Insert after `count * multiply` non-privileged entries.
    Multiply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FavoredSettings {
    pub mode: FavoredMode,
    pub exponent: f64,
    pub multiply: f64,
    /// Non-privileged entries that a privileged entry may not skip.
    pub minimum_free_ahead: usize,
    /// Scales `minimum_free_ahead` into the bypass threshold.
    pub bypass_factor: f64,
    /// When false the minimum is enforced regardless of queue depth.
    pub allow_bypass: bool,
    /// Owner entries go straight to the head of their band.
    pub owner_jumps_queue: bool,
}

impl FavoredSettings {
    pub const MIN_EXPONENT: f64 = 0.5;
    pub const MIN_MULTIPLY: f64 = 0.1;
    pub const MIN_FREE_AHEAD: usize = 2;
    pub const MIN_BYPASS_FACTOR: f64 = 1.0;
    pub const MAX_BYPASS_FACTOR: f64 = 3.0;

    /// Non-privileged depth above which the minimum stops being enforced.
    pub fn bypass_threshold(&self) -> usize {
        (self.minimum_free_ahead as f64 * self.bypass_factor).ceil() as usize
    }
}

impl Default for FavoredSettings {
    fn default() -> Self {
        Self {
            mode: FavoredMode::Exponent,
            exponent: 0.777,
            multiply: 0.5,
            minimum_free_ahead: 2,
            bypass_factor: 1.5,
            allow_bypass: true,
            owner_jumps_queue: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeSettings {
    /// Poll budget, in rounds of roughly one second, for a partner to show up.
    pub trade_wait_time: u32,
    /// Seconds spent pressing confirm before giving up on the partner.
    pub max_trade_confirm_time: u32,
    pub min_trade_code: u32,
    pub max_trade_code: u32,
    pub max_dumps_per_trade: u32,
    pub max_dump_trade_time_secs: u64,
    pub dump_trade_legality_check: bool,
    /// Batch limit; 1 disables batch trades.
    pub max_items_per_trade: usize,
    pub disallow_trade_evolve: bool,
    pub emit_counts_on_status_check: bool,
}

impl Default for TradeSettings {
    fn default() -> Self {
        Self {
            trade_wait_time: 30,
            max_trade_confirm_time: 25,
            min_trade_code: 0,
            max_trade_code: LinkCode::MAX,
            max_dumps_per_trade: 20,
            max_dump_trade_time_secs: 180,
            dump_trade_legality_check: true,
            max_items_per_trade: 1,
            disallow_trade_evolve: true,
            emit_counts_on_status_check: false,
        }
    }
}

impl TradeSettings {
    pub fn random_code(&self) -> LinkCode {
        LinkCode::random_in(self.min_trade_code, self.max_trade_code)
    }
}

/// Barrier behaviour for synchronized distribution bots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotSyncOption {
    NoSync,
    /// Released when every participant has arrived.
    LocalSync,
    /// Released by an external call to `release`.
    RemoteSync,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionSettings {
    pub distribute_while_idle: bool,
    pub shuffled: bool,
    /// Non-zero: partners offering this item id choose what they receive.
    /// The offered item's held-item field names the pool item they want.
    pub swap_item: u16,
    /// Cancel a swap request with no pool match instead of sending the
    /// regular pool item.
    pub swap_quit_if_no_match: bool,
    pub trade_code: u32,
    pub random_code: bool,
    /// Distribution bots stay in the meeting point between trades.
    pub remain_in_meeting_point: bool,
    pub synchronize_bots: BotSyncOption,
    pub synchronize_delay_barrier_ms: u64,
    pub synchronize_timeout_secs: f64,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            distribute_while_idle: true,
            shuffled: false,
            swap_item: 0,
            swap_quit_if_no_match: false,
            trade_code: 7196,
            random_code: false,
            remain_in_meeting_point: true,
            synchronize_bots: BotSyncOption::LocalSync,
            synchronize_delay_barrier_ms: 0,
            synchronize_timeout_secs: 90.0,
        }
    }
}

/// What to do when a partner turns up under several requester accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAbuseAction {
    Ignore,
    Quit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AbuseSettings {
    /// Minutes before the same partner may trade again. Zero disables.
    pub trade_cooldown_minutes: f64,
    /// Window, in minutes, for spotting one partner behind several requesters.
    pub trade_abuse_expiration_minutes: f64,
    pub multi_account_action: TradeAbuseAction,
    /// Partner identities refused outright.
    pub banned_ids: Vec<u64>,
}

impl Default for AbuseSettings {
    fn default() -> Self {
        Self {
            trade_cooldown_minutes: 0.0,
            trade_abuse_expiration_minutes: 120.0,
            multi_account_action: TradeAbuseAction::Quit,
            banned_ids: Vec::new(),
        }
    }
}

/// Delays and budgets for talking to the device. All values in milliseconds
/// unless named otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Reconnect attempts after a connection fault; negative retries forever.
    pub reconnect_attempts: i32,
    pub extra_reconnect_delay_ms: u64,
    pub base_reconnect_delay_ms: u64,
    pub extra_time_open_box_ms: u64,
    pub extra_time_join_meeting_ms: u64,
    pub extra_time_open_code_entry_ms: u64,
    /// Pause after each keypad press while entering the link code.
    pub keypress_ms: u64,
    pub poll_interval_ms: u64,
    /// Idle polls between keep-alive presses.
    pub keepalive_every: u32,
    pub offer_timeout_ms: u64,
    pub offer_poll_ms: u64,
    /// Time the exchange animation takes once the slot changes.
    pub trade_animation_ms: u64,
    /// Attempts to observe the meeting point after confirming the code.
    pub join_meeting_tries: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            reconnect_attempts: 30,
            extra_reconnect_delay_ms: 0,
            base_reconnect_delay_ms: 30_000,
            extra_time_open_box_ms: 1_000,
            extra_time_join_meeting_ms: 500,
            extra_time_open_code_entry_ms: 1_000,
            keypress_ms: 0,
            poll_interval_ms: 1_000,
            keepalive_every: 10,
            offer_timeout_ms: 25_000,
            offer_poll_ms: 1_000,
            trade_animation_ms: 25_000,
            join_meeting_tries: 100,
        }
    }
}
