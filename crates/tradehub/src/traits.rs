//! Seams to the collaborators the core does not implement: the device link,
//! the per-title console automation, the legality oracle, the abuse registry
//! and the chat-side notification sink.

use async_trait::async_trait;

use crate::error::DeviceError;
use crate::types::{
    ItemInfo, PartnerIdentity, PartnerInfo, Payload, RequesterId, TradeEntry, TradeKind,
};
use crate::TradeResult;

/// Controller buttons the session presses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    X,
    Y,
    Plus,
    Minus,
    Home,
    DUp,
    DDown,
    DLeft,
    DRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stick {
    Left,
    Right,
}

/// Raw automation surface of one remote console.
///
/// Every call is a suspension point. A session never issues two calls at
/// once on the same connection.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Press and release a button.
    async fn press(&self, button: Button) -> Result<(), DeviceError>;

    /// Hold a button for `hold_ms` before releasing it.
    async fn hold(&self, button: Button, hold_ms: u64) -> Result<(), DeviceError>;

    /// Move a stick; `(0, 0)` recentres it.
    async fn set_stick(&self, stick: Stick, x: i16, y: i16) -> Result<(), DeviceError>;

    /// Read `len` bytes at an absolute address.
    async fn peek(&self, offset: u64, len: usize) -> Result<Vec<u8>, DeviceError>;

    /// Write bytes at an absolute address.
    async fn poke(&self, offset: u64, data: &[u8]) -> Result<(), DeviceError>;

    /// Drop and re-establish the link.
    async fn reconnect(&self) -> Result<(), DeviceError>;
}

/// Addresses a session reads on every trade. Resolved once per worker
/// lifetime (and again after a title restart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OffsetTable {
    /// First slot of the first box: what we send, and what we receive.
    pub box_start: u64,
    /// Non-zero while inside the shared meeting point.
    pub in_meeting_point: u64,
    /// Non-zero while a partner is talking to us.
    pub partner_talking: u64,
    /// Non-zero while the partner's data has loaded.
    pub partner_loaded: u64,
    /// Non-zero while the console is under a connection penalty.
    pub soft_ban: u64,
}

/// Per-title automation strategy driving the menus over a [`RemoteConnection`].
///
/// Everything generic (polling, timeouts, code entry, fairness of retries)
/// lives in the session; an adapter only knows how its title's menus and
/// memory look.
#[async_trait]
pub trait ConsoleAdapter: Send + Sync {
    /// Short label for logs.
    fn title(&self) -> &str;

    /// Size of one stored item slot in bytes.
    fn slot_size(&self) -> usize;

    /// Turn slot bytes into the fields the session compares.
    fn describe(&self, slot: &[u8]) -> ItemInfo;

    /// Bytes to write into the box slot for `payload`.
    fn encode_for_slot(&self, payload: &Payload) -> Vec<u8> {
        payload.as_bytes().to_vec()
    }

    async fn resolve_offsets(&self, conn: &dyn RemoteConnection) -> Result<OffsetTable, DeviceError>;

    /// Address of the partner's offered slot. Only meaningful once a partner
    /// has opened the exchange.
    async fn resolve_offer_slot(&self, conn: &dyn RemoteConnection) -> Result<u64, DeviceError>;

    /// Navigate to the code keypad for a session of `kind`.
    async fn open_code_entry(&self, conn: &dyn RemoteConnection, kind: TradeKind) -> Result<(), DeviceError>;

    /// Confirm the typed code and start joining the meeting point.
    async fn confirm_code(&self, conn: &dyn RemoteConnection) -> Result<(), DeviceError>;

    /// Ask for an exchange once inside the meeting point.
    async fn request_exchange(&self, conn: &dyn RemoteConnection) -> Result<(), DeviceError>;

    async fn read_partner(&self, conn: &dyn RemoteConnection) -> Result<PartnerInfo, DeviceError>;

    /// Back out of the exchange menus into the meeting point. `false` when
    /// the console is stuck.
    async fn exit_to_meeting_point(&self, conn: &dyn RemoteConnection, offsets: &OffsetTable) -> Result<bool, DeviceError>;

    /// Leave the meeting point back to the overworld.
    async fn leave_meeting_point(&self, conn: &dyn RemoteConnection, offsets: &OffsetTable) -> Result<bool, DeviceError>;

    /// Close and reopen the title.
    async fn restart_title(&self, conn: &dyn RemoteConnection) -> Result<(), DeviceError>;

    async fn clear_soft_ban(&self, conn: &dyn RemoteConnection, offsets: &OffsetTable) -> Result<(), DeviceError>;
}

/// Outcome of a legality check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub diagnostics: String,
}

impl Verdict {
    pub fn valid() -> Self {
        Self { valid: true, diagnostics: String::new() }
    }

    pub fn invalid(diagnostics: impl Into<String>) -> Self {
        Self { valid: false, diagnostics: diagnostics.into() }
    }
}

/// External legality oracle.
pub trait LegalityOracle: Send + Sync {
    fn validate(&self, payload: &Payload) -> Verdict;

    /// Whether trading `sending` for `offered` would evolve the offered item.
    fn will_trade_evolve(&self, _offered: &ItemInfo, _sending: &ItemInfo) -> bool {
        false
    }
}

/// Free-form or item-carrying notice for the requester.
#[derive(Debug, Clone)]
pub enum Notice {
    Text(String),
    Item { payload: Payload, message: String },
}

/// Chat-side reporting. Fire-and-forget: implementations must return
/// promptly and swallow their own delivery failures.
pub trait NotificationSink: Send + Sync {
    fn on_initialize(&self, entry: &TradeEntry);
    fn on_searching(&self, entry: &TradeEntry, status: &str);
    fn on_canceled(&self, entry: &TradeEntry, reason: TradeResult);
    fn on_finished(&self, entry: &TradeEntry, received: &Payload);
    fn on_notify(&self, entry: &TradeEntry, notice: Notice);
}

/// Sink that only logs. Used for distribution trades nobody is waiting on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn on_initialize(&self, entry: &TradeEntry) {
        tracing::debug!(entry_id = %entry.id, code = %entry.code, "trade initializing");
    }

    fn on_searching(&self, entry: &TradeEntry, status: &str) {
        tracing::debug!(entry_id = %entry.id, status, "searching");
    }

    fn on_canceled(&self, entry: &TradeEntry, reason: TradeResult) {
        tracing::debug!(entry_id = %entry.id, %reason, "trade canceled");
    }

    fn on_finished(&self, entry: &TradeEntry, _received: &Payload) {
        tracing::debug!(entry_id = %entry.id, "trade finished");
    }

    fn on_notify(&self, entry: &TradeEntry, notice: Notice) {
        tracing::debug!(entry_id = %entry.id, ?notice, "notice");
    }
}

/// Standing of a trade partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartnerStanding {
    Clean,
    Banned,
    /// Traded with us again before the cooldown elapsed.
    RecentDuplicate,
    /// Same partner seen recently under a different requester account.
    MultipleAccounts,
}

/// Abuse tracking across sessions.
pub trait AbuseRegistry: Send + Sync {
    fn check_partner(&self, partner: PartnerIdentity, requester: &RequesterId) -> PartnerStanding;

    /// Remember a completed trade for cooldown and multi-account checks.
    fn record_trade(&self, partner: PartnerIdentity, requester: &RequesterId);
}
