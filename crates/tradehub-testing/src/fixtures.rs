//! Ready-made values for tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tradehub::{
    AbuseRegistry, DistributionPool, EntryId, HubConfig, InMemoryAbuseRegistry, LegalityOracle, LinkCode,
    NotificationSink, PartnerInfo, Payload, PriorityClass, RequesterId, SessionServices,
    SynchronizationBarrier, TradeCounts, TradeEntry, TradeKind, TradeRequest,
};

use crate::console::{checksum, DATA, SLOT_SIZE};

/// A well-formed simulated item. `salt` varies the data bytes so two items
/// with the same id still differ.
pub fn item(id: u16, salt: u8) -> Payload {
    held_item(id, 0, salt)
}

/// Like [`item`], holding `held`. Distribution swap requests name the
/// wanted pool item this way.
pub fn held_item(id: u16, held: u16, salt: u8) -> Payload {
    let mut bytes = [0u8; SLOT_SIZE];
    bytes[..2].copy_from_slice(&id.to_le_bytes());
    bytes[3..5].copy_from_slice(&held.to_le_bytes());
    for (i, byte) in bytes[DATA..].iter_mut().enumerate() {
        *byte = salt.wrapping_add(i as u8).wrapping_mul(31);
    }
    let sum = checksum(&bytes[DATA..]);
    bytes[5..7].copy_from_slice(&sum.to_le_bytes());
    Payload::new(bytes)
}

/// `payload` with its checksum broken.
pub fn corrupt(payload: &Payload) -> Payload {
    let mut bytes = payload.as_bytes().to_vec();
    if let Some(byte) = bytes.get_mut(5) {
        *byte ^= 0xFF;
    }
    Payload::new(bytes)
}

pub fn partner(name: &str, trainer_id: u32) -> PartnerInfo {
    PartnerInfo {
        name: name.to_string(),
        trainer_id,
        display_tid: trainer_id % 1_000_000,
        display_sid: trainer_id / 1_000_000,
    }
}

/// Defaults with the distribution pool switched off, so idle workers stay
/// idle.
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.distribution.distribute_while_idle = false;
    config.normalized()
}

/// A normal-priority request for a single item with link code 1234-5678.
pub fn request(requester: &str, payload: Payload, sink: Arc<dyn NotificationSink>) -> TradeRequest {
    TradeRequest {
        requester_id: RequesterId::new(requester),
        requester_name: requester.to_string(),
        payloads: [payload].into_iter().collect(),
        kind: TradeKind::Specific,
        code: 12_345_678,
        priority: PriorityClass::Normal,
        synchronized: false,
        notifier: sink,
    }
}

/// An already-admitted entry, for driving a session directly.
pub fn trade_entry(
    id: u64,
    requester: &str,
    kind: TradeKind,
    payloads: Vec<Payload>,
    sink: Arc<dyn NotificationSink>,
) -> TradeEntry {
    TradeEntry {
        id: EntryId(id),
        requester_id: RequesterId::new(requester),
        requester_name: requester.to_string(),
        payloads: payloads.into_iter().collect(),
        kind,
        code: LinkCode::random_in(12_345_678, 12_345_678),
        priority: PriorityClass::Normal,
        enqueued_at: Utc::now(),
        is_retry: false,
        is_synchronized: false,
        notifier: sink,
    }
}

/// Session collaborators around `config`, with an in-memory abuse registry
/// built from its abuse settings unless one is given.
pub fn session_services(
    config: HubConfig,
    oracle: Arc<dyn LegalityOracle>,
    abuse: Option<Arc<dyn AbuseRegistry>>,
) -> SessionServices {
    let config = Arc::new(config.normalized());
    let abuse = abuse.unwrap_or_else(|| Arc::new(InMemoryAbuseRegistry::new(&config.abuse)));
    let barrier = Arc::new(SynchronizationBarrier::new(
        config.distribution.synchronize_bots,
        Duration::from_millis(config.distribution.synchronize_delay_barrier_ms),
    ));
    SessionServices {
        config,
        oracle,
        abuse,
        counts: Arc::new(TradeCounts::default()),
        barrier,
        pool: Arc::new(DistributionPool::default()),
    }
}
