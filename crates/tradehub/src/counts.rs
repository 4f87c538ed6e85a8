//! Completed-trade counters, shared by every worker of a hub.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::types::TradeKind;

#[derive(Debug, Default)]
pub struct TradeCounts {
    distribution: AtomicU64,
    trades: AtomicU64,
    seed_checks: AtomicU64,
    clones: AtomicU64,
    dumps: AtomicU64,
}

/// Point-in-time copy of [`TradeCounts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountsSnapshot {
    pub distribution: u64,
    pub trades: u64,
    pub seed_checks: u64,
    pub clones: u64,
    pub dumps: u64,
}

impl TradeCounts {
    pub fn record(&self, kind: TradeKind) {
        let counter = match kind {
            TradeKind::Random => &self.distribution,
            TradeKind::Specific => &self.trades,
            TradeKind::SeedCheck => &self.seed_checks,
            TradeKind::Clone => &self.clones,
            TradeKind::Dump => &self.dumps,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountsSnapshot {
        CountsSnapshot {
            distribution: self.distribution.load(Ordering::Relaxed),
            trades: self.trades.load(Ordering::Relaxed),
            seed_checks: self.seed_checks.load(Ordering::Relaxed),
            clones: self.clones.load(Ordering::Relaxed),
            dumps: self.dumps.load(Ordering::Relaxed),
        }
    }

    /// Status-check lines for every counter above zero.
    pub fn non_zero_counts(&self) -> Vec<String> {
        let snapshot = self.snapshot();
        [
            ("Seed check trades", snapshot.seed_checks),
            ("Clone trades", snapshot.clones),
            ("Dump trades", snapshot.dumps),
            ("Link trades", snapshot.trades),
            ("Distribution trades", snapshot.distribution),
        ]
        .into_iter()
        .filter(|(_, count)| *count != 0)
        .map(|(label, count)| format!("{label}: {count}"))
        .collect()
    }
}
