use std::collections::HashSet;

use tradehub::{ItemInfo, LegalityOracle, Payload, Verdict};

use crate::console::describe_slot;

/// Legality oracle keyed on simulated item ids.
#[derive(Debug, Clone, Default)]
pub struct ScriptedOracle {
    rejected: HashSet<u16>,
    evolves: bool,
}

impl ScriptedOracle {
    /// Everything is legal and nothing evolves.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Refuse items with any of these ids.
    pub fn rejecting(ids: impl IntoIterator<Item = u16>) -> Self {
        Self {
            rejected: ids.into_iter().collect(),
            evolves: false,
        }
    }

    /// Every offered item would evolve on trade.
    pub fn evolving() -> Self {
        Self {
            rejected: HashSet::new(),
            evolves: true,
        }
    }
}

impl LegalityOracle for ScriptedOracle {
    fn validate(&self, payload: &Payload) -> Verdict {
        let info = describe_slot(payload.as_bytes());
        if !info.checksum_valid {
            return Verdict::invalid("checksum mismatch");
        }
        if self.rejected.contains(&info.item_id) {
            return Verdict::invalid(format!("item {} is not allowed", info.item_id));
        }
        Verdict::valid()
    }

    fn will_trade_evolve(&self, _offered: &ItemInfo, _sending: &ItemInfo) -> bool {
        self.evolves
    }
}
