//! # Tradehub Testing
//!
//! Deterministic stand-ins for everything the hub talks to, so sessions and
//! workers can be exercised end to end without a console.
//!
//! - [`SimulatedConsole`] plays both the [`RemoteConnection`] and the
//!   [`ConsoleAdapter`], with trade partners driven by [`PartnerScript`]s
//! - [`RecordingSink`] keeps every notification a requester would have seen
//! - [`ScriptedOracle`] answers legality and evolution questions by item id
//!
//! ## Example
//!
//! ```rust,ignore
//! let console = Arc::new(SimulatedConsole::new());
//! console.script(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
//!
//! let hub = TradeHubBuilder::new(test_config(), Arc::new(ScriptedOracle::permissive())).build();
//! hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
//!
//! let sink = Arc::new(RecordingSink::new());
//! hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
//! sink.wait_for_terminal(1).await;
//! assert_eq!(sink.finished().len(), 1);
//! ```
//!
//! [`RemoteConnection`]: tradehub::RemoteConnection
//! [`ConsoleAdapter`]: tradehub::ConsoleAdapter

mod console;
mod fixtures;
mod oracle;
mod sink;

pub use console::{describe_slot, PartnerScript, SimulatedConsole, SLOT_SIZE};
pub use fixtures::{corrupt, held_item, item, partner, request, session_services, test_config, trade_entry};
pub use oracle::ScriptedOracle;
pub use sink::{RecordingSink, SinkEvent};
