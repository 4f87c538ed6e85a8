//! Value types shared by the queue, the router and the trade sessions.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::code::LinkCode;
use crate::traits::NotificationSink;

/// Unique, monotonically increasing entry identifier. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque platform user id. Key for queue membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(String);

impl RequesterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequesterId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RequesterId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the requester asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeKind {
    /// A specific item prepared for this requester.
    Specific,
    /// Unattended distribution trade.
    Random,
    /// Export whatever the partner shows.
    Dump,
    SeedCheck,
    Clone,
}

impl TradeKind {
    /// The routine whose lane holds entries of this kind.
    pub fn routine(self) -> RoutineType {
        match self {
            TradeKind::Specific | TradeKind::Random => RoutineType::LinkTrade,
            TradeKind::Dump => RoutineType::Dump,
            TradeKind::SeedCheck => RoutineType::SeedCheck,
            TradeKind::Clone => RoutineType::Clone,
        }
    }
}

/// Task a worker is assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutineType {
    Idle,
    LinkTrade,
    SeedCheck,
    Clone,
    Dump,
    /// Serves every queue, picking a lane per claim.
    Flex,
}

impl RoutineType {
    /// Routines that own a queue lane.
    pub const LANES: [RoutineType; 4] = [
        RoutineType::LinkTrade,
        RoutineType::SeedCheck,
        RoutineType::Clone,
        RoutineType::Dump,
    ];

    pub fn has_lane(self) -> bool {
        Self::LANES.contains(&self)
    }

    /// Whether a worker on `self` serves entries from `lane`.
    pub fn serves(self, lane: RoutineType) -> bool {
        match self {
            RoutineType::Idle => false,
            RoutineType::Flex => lane.has_lane(),
            other => other == lane,
        }
    }
}

/// Privilege of the caller at enqueue time. Immutable afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriorityClass {
    #[default]
    Normal,
    Favored,
    Owner,
}

impl PriorityClass {
    pub fn is_privileged(self) -> bool {
        !matches!(self, PriorityClass::Normal)
    }
}

/// Priority band inside a lane. Lower values are served first; fairness
/// ordering applies within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PriorityTier(pub u32);

impl PriorityTier {
    pub const TIER1: PriorityTier = PriorityTier(1);
    pub const TIER2: PriorityTier = PriorityTier(2);
    pub const TIER3: PriorityTier = PriorityTier(3);
    /// Band for ordinary requests and the distribution pool.
    pub const FREE: PriorityTier = PriorityTier(u32::MAX);
}

impl Default for PriorityTier {
    fn default() -> Self {
        Self::FREE
    }
}

/// Opaque item bytes, exactly as written into a device slot.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({} bytes)", self.0.len())
    }
}

/// Items carried by one request. Nearly always a single item.
pub type Payloads = SmallVec<[Payload; 1]>;

/// What a chat adapter submits to [`TradeHub::enqueue`](crate::TradeHub::enqueue).
#[derive(Clone)]
pub struct TradeRequest {
    pub requester_id: RequesterId,
    pub requester_name: String,
    pub payloads: Payloads,
    pub kind: TradeKind,
    /// Raw code as typed; validated at admission.
    pub code: i64,
    pub priority: PriorityClass,
    /// Opt this trade into the synchronization barrier.
    pub synchronized: bool,
    pub notifier: Arc<dyn NotificationSink>,
}

/// One queued request.
#[derive(Clone)]
pub struct TradeEntry {
    pub id: EntryId,
    pub requester_id: RequesterId,
    pub requester_name: String,
    pub payloads: Payloads,
    pub kind: TradeKind,
    pub code: LinkCode,
    pub priority: PriorityClass,
    pub enqueued_at: DateTime<Utc>,
    /// Set at most once, when the entry is re-queued after a failure.
    pub is_retry: bool,
    pub is_synchronized: bool,
    pub notifier: Arc<dyn NotificationSink>,
}

impl TradeEntry {
    pub fn routine(&self) -> RoutineType {
        self.kind.routine()
    }

    /// First item to send; empty for dump requests that send nothing.
    pub fn primary(&self) -> Option<&Payload> {
        self.payloads.first()
    }
}

impl fmt::Debug for TradeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeEntry")
            .field("id", &self.id)
            .field("requester_id", &self.requester_id)
            .field("kind", &self.kind)
            .field("code", &self.code)
            .field("priority", &self.priority)
            .field("items", &self.payloads.len())
            .field("is_retry", &self.is_retry)
            .finish()
    }
}

/// Decoded view of a device slot, produced by the console adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ItemInfo {
    /// Zero means the slot is empty.
    pub item_id: u16,
    pub form: u8,
    pub held_item: u16,
    pub checksum: u16,
    pub checksum_valid: bool,
    /// Hash over the identifying details, independent of encryption.
    pub content_hash: u64,
}

impl ItemInfo {
    pub fn is_empty(&self) -> bool {
        self.item_id == 0
    }

    /// Both content hash and checksum match: the slot still holds what we sent.
    pub fn same_contents(&self, other: &ItemInfo) -> bool {
        self.content_hash == other.content_hash && self.checksum == other.checksum
    }
}

/// Trade partner as read from the device once they open the exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerInfo {
    pub name: String,
    pub trainer_id: u32,
    pub display_tid: u32,
    pub display_sid: u32,
}

impl PartnerInfo {
    /// Stable identity used for abuse tracking: trainer id in the high half,
    /// FNV-1a of the name in the low half.
    pub fn identity(&self) -> PartnerIdentity {
        PartnerIdentity((u64::from(self.trainer_id) << 32) | u64::from(fnv1a(self.name.as_bytes())))
    }
}

/// Derived partner identity hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartnerIdentity(pub u64);

impl fmt::Display for PartnerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_routing() {
        assert_eq!(TradeKind::Specific.routine(), RoutineType::LinkTrade);
        assert_eq!(TradeKind::Random.routine(), RoutineType::LinkTrade);
        assert_eq!(TradeKind::Dump.routine(), RoutineType::Dump);
        assert_eq!(TradeKind::SeedCheck.routine(), RoutineType::SeedCheck);
        assert_eq!(TradeKind::Clone.routine(), RoutineType::Clone);
    }

    #[test]
    fn test_flex_serves_every_lane_but_idle_serves_none() {
        for lane in RoutineType::LANES {
            assert!(RoutineType::Flex.serves(lane));
            assert!(!RoutineType::Idle.serves(lane));
        }
        assert!(RoutineType::Dump.serves(RoutineType::Dump));
        assert!(!RoutineType::Dump.serves(RoutineType::Clone));
    }

    #[test]
    fn test_lower_tier_sorts_first() {
        assert!(PriorityTier::TIER1 < PriorityTier::TIER2);
        assert!(PriorityTier::TIER3 < PriorityTier::FREE);
    }

    #[test]
    fn test_partner_identity_is_deterministic() {
        let partner = PartnerInfo {
            name: "ASH".into(),
            trainer_id: 0x1234,
            display_tid: 123456,
            display_sid: 7890,
        };
        let id = partner.identity();
        assert_eq!(id, partner.identity());
        assert_eq!(id.0 >> 32, 0x1234);

        let renamed = PartnerInfo { name: "GARY".into(), ..partner };
        assert_ne!(renamed.identity(), id);
    }

    #[test]
    fn test_same_contents_needs_hash_and_checksum() {
        let a = ItemInfo { item_id: 25, checksum: 7, content_hash: 99, checksum_valid: true, ..Default::default() };
        assert!(a.same_contents(&a));
        assert!(!a.same_contents(&ItemInfo { checksum: 8, ..a }));
        assert!(!a.same_contents(&ItemInfo { content_hash: 98, ..a }));
    }
}
