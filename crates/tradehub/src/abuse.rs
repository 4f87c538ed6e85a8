//! In-memory [`AbuseRegistry`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::config::AbuseSettings;
use crate::traits::{AbuseRegistry, PartnerStanding};
use crate::types::{PartnerIdentity, RequesterId};

/// Recorded trades between sweeps of expired sightings.
const PRUNE_EVERY: u64 = 64;

#[derive(Debug, Clone)]
struct Sighting {
    requester: RequesterId,
    at: Instant,
}

/// Tracks the last requester each partner traded for.
///
/// A partner is:
/// - `Banned` when its identity is on the ban list,
/// - `MultipleAccounts` when it traded for a different requester within
///   `trade_abuse_expiration_minutes`,
/// - `RecentDuplicate` when it comes back within `trade_cooldown_minutes`.
#[derive(Debug)]
pub struct InMemoryAbuseRegistry {
    banned: RwLock<HashSet<u64>>,
    seen: DashMap<PartnerIdentity, Sighting>,
    recorded: AtomicU64,
    cooldown: Duration,
    expiration: Duration,
}

fn minutes(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value * 60.0)
    } else {
        Duration::ZERO
    }
}

impl InMemoryAbuseRegistry {
    pub fn new(settings: &AbuseSettings) -> Self {
        Self {
            banned: RwLock::new(settings.banned_ids.iter().copied().collect()),
            seen: DashMap::new(),
            recorded: AtomicU64::new(0),
            cooldown: minutes(settings.trade_cooldown_minutes),
            expiration: minutes(settings.trade_abuse_expiration_minutes),
        }
    }

    pub fn ban(&self, partner: PartnerIdentity) {
        self.banned.write().insert(partner.0);
    }

    pub fn unban(&self, partner: PartnerIdentity) -> bool {
        self.banned.write().remove(&partner.0)
    }

    /// Forget sightings older than both windows.
    pub fn prune(&self) {
        let keep = self.cooldown.max(self.expiration);
        let now = Instant::now();
        self.seen.retain(|_, sighting| now.duration_since(sighting.at) < keep);
    }

    /// Partners currently remembered.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }
}

impl AbuseRegistry for InMemoryAbuseRegistry {
    fn check_partner(&self, partner: PartnerIdentity, requester: &RequesterId) -> PartnerStanding {
        if self.banned.read().contains(&partner.0) {
            return PartnerStanding::Banned;
        }
        let Some(sighting) = self.seen.get(&partner) else {
            return PartnerStanding::Clean;
        };
        let elapsed = sighting.at.elapsed();
        if &sighting.requester != requester && elapsed < self.expiration {
            PartnerStanding::MultipleAccounts
        } else if elapsed < self.cooldown {
            PartnerStanding::RecentDuplicate
        } else {
            PartnerStanding::Clean
        }
    }

    fn record_trade(&self, partner: PartnerIdentity, requester: &RequesterId) {
        self.seen.insert(
            partner,
            Sighting {
                requester: requester.clone(),
                at: Instant::now(),
            },
        );
        if self.recorded.fetch_add(1, Ordering::Relaxed) % PRUNE_EVERY == PRUNE_EVERY - 1 {
            self.prune();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(cooldown: f64, expiration: f64, banned: Vec<u64>) -> InMemoryAbuseRegistry {
        InMemoryAbuseRegistry::new(&AbuseSettings {
            trade_cooldown_minutes: cooldown,
            trade_abuse_expiration_minutes: expiration,
            banned_ids: banned,
            ..AbuseSettings::default()
        })
    }

    #[test]
    fn test_banned_partner() {
        let reg = registry(0.0, 120.0, vec![42]);
        assert_eq!(reg.check_partner(PartnerIdentity(42), &"u".into()), PartnerStanding::Banned);
        assert!(reg.unban(PartnerIdentity(42)));
        assert_eq!(reg.check_partner(PartnerIdentity(42), &"u".into()), PartnerStanding::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_accounts_within_expiration() {
        let reg = registry(0.0, 1.0, vec![]);
        let partner = PartnerIdentity(7);
        reg.record_trade(partner, &"alice".into());
        assert_eq!(reg.check_partner(partner, &"alice".into()), PartnerStanding::Clean);
        assert_eq!(reg.check_partner(partner, &"bob".into()), PartnerStanding::MultipleAccounts);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(reg.check_partner(partner, &"bob".into()), PartnerStanding::Clean);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_applies_to_same_requester() {
        let reg = registry(5.0, 0.0, vec![]);
        let partner = PartnerIdentity(9);
        reg.record_trade(partner, &"alice".into());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(reg.check_partner(partner, &"alice".into()), PartnerStanding::RecentDuplicate);
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(reg.check_partner(partner, &"alice".into()), PartnerStanding::Clean);

        reg.prune();
        assert!(reg.seen.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_sweeps_expired_sightings() {
        let reg = registry(0.0, 1.0, vec![]);
        reg.record_trade(PartnerIdentity(0), &"alice".into());
        tokio::time::advance(Duration::from_secs(61)).await;

        for id in 1..PRUNE_EVERY - 1 {
            reg.record_trade(PartnerIdentity(id), &"alice".into());
        }
        assert_eq!(reg.tracked() as u64, PRUNE_EVERY - 1);

        // This recording completes a sweep interval.
        reg.record_trade(PartnerIdentity(PRUNE_EVERY), &"alice".into());
        assert_eq!(reg.tracked() as u64, PRUNE_EVERY - 1);
        assert_eq!(reg.check_partner(PartnerIdentity(0), &"bob".into()), PartnerStanding::Clean);
    }
}
