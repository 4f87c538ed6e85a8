//! # Tradehub
//!
//! A fair, concurrent queue of trade requests served by a fleet of workers,
//! each driving one remote console through a multi-phase trade.
//!
//! ## Core Concepts
//!
//! - [`TradeHub`] admits requests and owns the worker fleet
//! - [`QueueStore`] holds pending entries, one ordered lane per routine
//! - [`FairnessPolicy`] decides where privileged requests land in a lane
//! - [`DispatchRouter`] hands idle workers their next entry
//! - [`WorkerSession`] runs one trade as a state machine over a
//!   [`RemoteConnection`] and a per-title [`ConsoleAdapter`]
//!
//! Chat platforms, legality checking and abuse tracking sit behind traits
//! ([`NotificationSink`], [`LegalityOracle`], [`AbuseRegistry`]).
//!
//! ## Architecture
//!
//! ```text
//! chat adapter
//!     │
//!     ▼ enqueue()
//! TradeHub ── gate ── oracle ──► QueueStore (lanes: LinkTrade, SeedCheck, Clone, Dump)
//!                                    ▲
//!                                    │ try_dequeue / flex / distribution
//!                                    │
//! Worker 1 ── DispatchRouter ────────┤
//! Worker 2 ── DispatchRouter ────────┤
//! Worker N ── DispatchRouter ────────┘
//!     │
//!     ▼ run(entry)
//! WorkerSession ── ConsoleAdapter ── RemoteConnection ──► console
//!     │
//!     ├─► SynchronizationBarrier (synchronized distribution only)
//!     └─► NotificationSink (requester updates)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One entry per requester per routine** - enforced atomically with insertion
//! 2. **One claim per entry** - the processing flag flips under the queue lock
//! 3. **Processing entries stay members** - they block duplicates until completed
//! 4. **Normal entries are FIFO** - privilege only moves the privileged entry
//! 5. **At most one retry** - and only for failures on our side
//!
//! ## Failure Model
//!
//! - Protocol failures (partner left, bad offer) end the session only
//! - Connection faults end the session and send the worker through a bounded
//!   reconnect; exhausting it stops that worker
//! - Admission errors are synchronous and never mutate the queue

// Core modules
mod code;
mod config;
mod error;
mod outcome;
mod types;

// Queueing
mod counts;
mod distribution;
mod fairness;
mod gate;
mod queue;

// Workers
mod barrier;
mod dispatch;
mod hub;
mod session;
mod worker;

// Collaborator seams
pub mod abuse;
pub mod keypad;
pub mod traits;


// Re-export value types
pub use code::LinkCode;
pub use outcome::TradeResult;
pub use types::{
    EntryId, ItemInfo, PartnerIdentity, PartnerInfo, Payload, Payloads, PriorityClass,
    PriorityTier, RequesterId, RoutineType, TradeEntry, TradeKind, TradeRequest,
};

// Re-export configuration
pub use config::{
    AbuseSettings, BotSyncOption, DistributionSettings, FavoredMode, FavoredSettings,
    FlexBiasMode, FlexYieldMode, HubConfig, QueueOpening, QueueSettings, TimingSettings,
    TradeAbuseAction, TradeSettings,
};

// Re-export error types
pub use error::{AdmissionError, ConfigError, DeviceError, WorkerError};

// Re-export queue types
pub use counts::{CountsSnapshot, TradeCounts};
pub use distribution::DistributionPool;
pub use fairness::{FairnessPolicy, Insertion};
pub use gate::QueueGate;
pub use queue::{Claim, QueuePosition, QueueSnapshotEntry, QueueStore};

// Re-export worker types
pub use barrier::{BarrierSeat, SynchronizationBarrier};
pub use dispatch::{Dispatch, DispatchRouter};
pub use hub::{EnqueueReceipt, PositionReport, TradeHub, TradeHubBuilder};
pub use session::{SessionPhase, SessionServices, WorkerSession};
pub use worker::{Worker, WorkerHandle};

// Re-export collaborator traits
pub use abuse::InMemoryAbuseRegistry;
pub use traits::{
    AbuseRegistry, Button, ConsoleAdapter, LegalityOracle, LogSink, Notice, NotificationSink,
    OffsetTable, PartnerStanding, RemoteConnection, Stick, Verdict,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
