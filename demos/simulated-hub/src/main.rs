//! # Simulated Hub
//!
//! Runs a hub with two workers on simulated consoles and pushes a handful of
//! requests through it, printing what each requester would be told.
//!
//! ```text
//! RUST_LOG=tradehub=debug cargo run -p simulated-hub-demo
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tradehub::{
    HubConfig, Notice, NotificationSink, Payload, PriorityClass, RoutineType, TradeEntry,
    TradeHubBuilder, TradeKind, TradeResult,
};
use tradehub_testing::{
    item, partner, request, PartnerScript, RecordingSink, ScriptedOracle, SimulatedConsole,
};

// ============================================================================
// Configuration
// ============================================================================

/// Short device delays so the demo finishes in seconds rather than minutes.
const CONFIG: &str = r#"{
    "distribution": { "distribute_while_idle": false },
    "favored": { "mode": "Exponent", "exponent": 0.777 },
    "timings": {
        "extra_time_open_box_ms": 0,
        "extra_time_join_meeting_ms": 0,
        "extra_time_open_code_entry_ms": 0,
        "poll_interval_ms": 200,
        "offer_timeout_ms": 3000,
        "offer_poll_ms": 200,
        "trade_animation_ms": 500
    },
    "trade": { "trade_wait_time": 5, "max_trade_confirm_time": 5 }
}"#;

// ============================================================================
// Requester-facing output
// ============================================================================

/// Prints every notice the way a chat adapter would relay it.
struct PrintingSink {
    record: RecordingSink,
}

impl NotificationSink for PrintingSink {
    fn on_initialize(&self, entry: &TradeEntry) {
        println!("[{}] starting your trade", entry.requester_name);
        self.record.on_initialize(entry);
    }

    fn on_searching(&self, entry: &TradeEntry, status: &str) {
        println!("[{}] {status}", entry.requester_name);
        self.record.on_searching(entry, status);
    }

    fn on_canceled(&self, entry: &TradeEntry, reason: TradeResult) {
        println!("[{}] trade canceled: {reason}", entry.requester_name);
        self.record.on_canceled(entry, reason);
    }

    fn on_finished(&self, entry: &TradeEntry, received: &Payload) {
        println!("[{}] trade finished, received {} bytes", entry.requester_name, received.len());
        self.record.on_finished(entry, received);
    }

    fn on_notify(&self, entry: &TradeEntry, notice: Notice) {
        match &notice {
            Notice::Text(text) => println!("[{}] {text}", entry.requester_name),
            Notice::Item { message, .. } => println!("[{}] (file) {message}", entry.requester_name),
        }
        self.record.on_notify(entry, notice);
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = HubConfig::from_json_str(CONFIG)?;
    let hub = TradeHubBuilder::new(config, Arc::new(ScriptedOracle::rejecting([666]))).build();

    // Two consoles, each with a queue of partners who will show up.
    let left = Arc::new(SimulatedConsole::new());
    left.script(PartnerScript::trades(partner("ASH", 101), vec![item(25, 1)]));
    left.script(PartnerScript::NoShow);
    left.script(PartnerScript::trades(partner("MISTY", 102), vec![item(120, 2)]));

    let right = Arc::new(SimulatedConsole::new());
    right.script(PartnerScript::trades(partner("BROCK", 103), vec![item(74, 3)]));
    right.script(PartnerScript::trades(partner("GARY", 104), vec![item(133, 4), item(134, 5)]));

    let sink = Arc::new(PrintingSink {
        record: RecordingSink::new(),
    });

    let mut admitted = 0;
    for (name, priority) in [
        ("alice", PriorityClass::Normal),
        ("bob", PriorityClass::Normal),
        ("carol", PriorityClass::Normal),
        ("dave", PriorityClass::Favored),
    ] {
        let mut req = request(name, item(150, admitted as u8), sink.clone());
        req.priority = priority;
        let receipt = hub.enqueue(req)?;
        admitted += 1;
        info!(requester = name, position = receipt.position, eta = receipt.eta_minutes, "queued");
    }

    let mut dump = request("erin", item(150, 9), sink.clone());
    dump.kind = TradeKind::Dump;
    dump.payloads.clear();
    hub.enqueue(dump)?;
    admitted += 1;

    // Rejected at the door: never reaches a worker.
    if let Err(err) = hub.enqueue(request("mallory", item(666, 1), sink.clone())) {
        info!(requester = "mallory", error = %err, "rejected");
    }

    for row in hub.queue_snapshot(RoutineType::LinkTrade) {
        println!("  #{} {} ({:?})", row.position, row.requester_name, row.kind);
    }

    hub.spawn_worker("left", left.clone(), left.clone(), RoutineType::LinkTrade);
    hub.spawn_worker("right", right.clone(), right.clone(), RoutineType::Flex);

    sink.record.wait_for_terminal(admitted).await;

    let counts = hub.counts();
    println!(
        "done: {} link trades, {} dumps, {} canceled",
        counts.trades,
        counts.dumps,
        sink.record.canceled().len()
    );

    for (name, result) in hub.shutdown().await {
        if let Err(err) = result {
            println!("worker {name} failed: {err}");
        }
    }
    Ok(())
}
