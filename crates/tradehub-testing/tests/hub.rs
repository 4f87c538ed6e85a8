//! The hub with real workers on simulated consoles.

use std::sync::Arc;
use std::time::Duration;

use tradehub::{
    AdmissionError, HubConfig, PriorityClass, RequesterId, RoutineType, TradeHub,
    TradeHubBuilder, TradeKind, TradeResult, WorkerError,
};
use tradehub_testing::{
    item, partner, request, test_config, PartnerScript, RecordingSink, ScriptedOracle,
    SimulatedConsole,
};

fn hub(config: HubConfig) -> TradeHub {
    TradeHubBuilder::new(config, Arc::new(ScriptedOracle::rejecting([666]))).build()
}

fn console_with(script: PartnerScript) -> Arc<SimulatedConsole> {
    let console = Arc::new(SimulatedConsole::new());
    console.script(script);
    console
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(5)).await;
}

const REQUEUE_TEXT: &str = "Oops! Something went wrong. I'll re-queue you for another attempt.";

// ============================================================================
// Admission
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_admission_rejections_leave_queue_untouched() {
    let hub = hub(test_config());
    let sink = Arc::new(RecordingSink::new());

    let mut bad_code = request("alice", item(150, 1), sink.clone());
    bad_code.code = 100_000_000;
    assert!(matches!(
        hub.enqueue(bad_code),
        Err(AdmissionError::InvalidCode { code: 100_000_000 })
    ));

    let mut negative = request("alice", item(150, 1), sink.clone());
    negative.code = -1;
    assert!(matches!(hub.enqueue(negative), Err(AdmissionError::InvalidCode { .. })));

    let mut empty = request("alice", item(150, 1), sink.clone());
    empty.payloads.clear();
    assert!(matches!(hub.enqueue(empty), Err(AdmissionError::BadBatch { count: 0, max: 1 })));

    let mut oversized = request("alice", item(150, 1), sink.clone());
    oversized.payloads.push(item(151, 2));
    assert!(matches!(hub.enqueue(oversized), Err(AdmissionError::BadBatch { count: 2, max: 1 })));

    assert!(matches!(
        hub.enqueue(request("alice", item(666, 1), sink.clone())),
        Err(AdmissionError::Illegal { .. })
    ));

    assert!(hub.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_one_entry_per_requester_per_routine() {
    let hub = hub(test_config());
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 1), sink.clone())).unwrap();
    assert!(matches!(
        hub.enqueue(request("alice", item(151, 1), sink.clone())),
        Err(AdmissionError::AlreadyQueued { .. })
    ));

    // A different routine is a different lane.
    let mut clone = request("alice", item(150, 1), sink.clone());
    clone.kind = TradeKind::Clone;
    let receipt = hub.enqueue(clone).unwrap();
    assert_eq!(receipt.position, 1);
    assert_eq!(hub.queue().total_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_closed_gate_refuses_then_reopens() {
    let hub = hub(test_config());
    let sink = Arc::new(RecordingSink::new());

    hub.set_queue_open(false);
    assert!(matches!(
        hub.enqueue(request("alice", item(150, 1), sink.clone())),
        Err(AdmissionError::QueueClosed)
    ));
    hub.set_queue_open(true);
    assert!(hub.enqueue(request("alice", item(150, 1), sink)).is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_capacity_counts_every_lane() {
    let mut config = test_config();
    config.queue.max_queue_count = 2;
    let hub = hub(config);
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 1), sink.clone())).unwrap();
    let mut seed = request("bob", item(150, 1), sink.clone());
    seed.kind = TradeKind::SeedCheck;
    hub.enqueue(seed).unwrap();

    assert!(matches!(
        hub.enqueue(request("carol", item(150, 1), sink)),
        Err(AdmissionError::CapacityExceeded { max: 2 })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_favored_request_lands_behind_minimum_free() {
    let hub = hub(test_config());
    let sink = Arc::new(RecordingSink::new());
    for name in ["n1", "n2", "n3", "n4", "n5"] {
        hub.enqueue(request(name, item(150, 1), sink.clone())).unwrap();
    }

    let mut owner = request("owner", item(150, 1), sink.clone());
    owner.priority = PriorityClass::Owner;
    let receipt = hub.enqueue(owner).unwrap();

    // floor(5^0.777) = 3 normals stay ahead.
    assert_eq!(receipt.position, 4);
    let order: Vec<String> = hub
        .queue_snapshot(RoutineType::LinkTrade)
        .into_iter()
        .map(|row| row.requester_id.to_string())
        .collect();
    assert_eq!(order, vec!["n1", "n2", "n3", "owner", "n4", "n5"]);
}

#[tokio::test(start_paused = true)]
async fn test_withdrawn_request_is_gone() {
    let hub = hub(test_config());
    let sink = Arc::new(RecordingSink::new());
    hub.enqueue(request("alice", item(150, 1), sink)).unwrap();

    let alice = RequesterId::new("alice");
    assert!(hub.check_position(&alice, RoutineType::LinkTrade).is_some());
    assert!(hub.dequeue(&alice, RoutineType::LinkTrade));
    assert!(hub.check_position(&alice, RoutineType::LinkTrade).is_none());
    assert!(!hub.dequeue(&alice, RoutineType::LinkTrade));
}

// ============================================================================
// Workers
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_worker_completes_queued_trade() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    let sink = Arc::new(RecordingSink::new());

    let receipt = hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    assert_eq!(receipt.position, 1);
    assert_eq!(receipt.eta_minutes, 0.0);

    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;
    settle().await;

    assert_eq!(sink.finished().len(), 1);
    assert!(hub.queue().is_empty());
    assert_eq!(hub.counts().trades, 1);

    let results = hub.shutdown().await;
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_ok());
    assert_eq!(hub.worker_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_partner_failure_is_final() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::NoShow);
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;
    settle().await;

    assert_eq!(sink.canceled().len(), 1);
    assert_eq!(sink.canceled()[0].1, TradeResult::NoTrainerFound);
    assert!(sink
        .texts()
        .contains(&"Oops! Something went wrong. Canceling the trade: no trade partner showed up.".to_string()));
    assert!(hub.queue().is_empty());
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropped_link_retries_once_after_reconnect() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    console.drop_on_exchange(1);
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;

    assert!(sink.texts().iter().any(|t| t == REQUEUE_TEXT));
    assert_eq!(sink.finished().len(), 1);
    assert!(sink.canceled().is_empty());
    assert_eq!(console.reconnects(), 1);
    // Offsets are looked up again once the link is back.
    assert_eq!(console.offset_lookups(), 2);
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_second_retryable_failure_cancels() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    console.drop_on_exchange(2);
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;
    settle().await;

    let canceled = sink.canceled();
    assert_eq!(canceled.len(), 1);
    assert_eq!(canceled[0].1, TradeResult::ExceptionConnection);
    assert_eq!(sink.texts().iter().filter(|t| *t == REQUEUE_TEXT).count(), 1);
    assert!(sink.finished().is_empty());
    assert!(hub.queue().is_empty());
    assert_eq!(console.reconnects(), 2);
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_distribution_trade_is_never_requeued() -> anyhow::Result<()> {
    let mut config = test_config();
    config.distribution.distribute_while_idle = true;
    let sink = Arc::new(RecordingSink::new());
    let hub = TradeHubBuilder::new(config, Arc::new(ScriptedOracle::permissive()))
        .with_distribution_notifier(sink.clone())
        .build();
    hub.distribution().replace(vec![item(150, 9)]);

    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    console.drop_on_exchange(1);
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;

    let canceled = sink.canceled();
    assert_eq!(canceled[0].1, TradeResult::ExceptionConnection);
    assert!(!sink.texts().iter().any(|t| t == REQUEUE_TEXT));
    assert!(hub.queue().is_empty());
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_link_lost_after_completed_trade_is_not_requeued() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    console.drop_on_exit(1);
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;
    settle().await;

    assert_eq!(sink.finished().len(), 1);
    assert!(sink.canceled().is_empty());
    assert!(!sink.texts().iter().any(|t| t == REQUEUE_TEXT));
    assert!(hub.queue().is_empty());
    assert_eq!(hub.counts().trades, 1);
    // The worker reconnected and came back outside the meeting point.
    assert_eq!(console.reconnects(), 1);
    assert!(!console.in_meeting_point());
    let results = hub.shutdown().await;
    assert!(results[0].1.is_ok());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_reconnects_stop_the_worker() -> anyhow::Result<()> {
    let mut config = test_config();
    config.timings.reconnect_attempts = 2;
    let hub = hub(config);
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    console.drop_on_exchange(1);
    console.fail_reconnects(10);
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    tokio::time::sleep(Duration::from_secs(300)).await;

    // The entry waits for another worker as a retry.
    let position = hub
        .check_position(&RequesterId::new("alice"), RoutineType::LinkTrade)
        .expect("entry re-queued");
    assert!(!position.processing);
    assert_eq!(hub.bots_for(RoutineType::LinkTrade), 0);

    let results = hub.shutdown().await;
    assert!(matches!(
        results[0].1,
        Err(WorkerError::ReconnectExhausted { attempts: 2 })
    ));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_idle_worker_picks_up_after_routine_change() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    let worker = hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::Idle);
    settle().await;

    let alice = RequesterId::new("alice");
    let waiting = hub.check_position(&alice, RoutineType::LinkTrade).expect("still queued");
    assert!(!waiting.processing);
    assert_eq!(hub.bots_for(RoutineType::LinkTrade), 0);

    assert!(hub.set_routine(worker, RoutineType::LinkTrade));
    sink.wait_for_terminal(1).await;
    assert_eq!(sink.finished().len(), 1);
    assert_eq!(hub.bots_for(RoutineType::LinkTrade), 1);
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_flex_worker_serves_other_lanes() -> anyhow::Result<()> {
    let hub = hub(test_config());
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    let sink = Arc::new(RecordingSink::new());

    let mut clone = request("alice", item(150, 9), sink.clone());
    clone.kind = TradeKind::Clone;
    hub.enqueue(clone)?;
    hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::Flex);
    sink.wait_for_terminal(1).await;
    settle().await;

    assert_eq!(hub.counts().clones, 1);
    assert!(hub.queue().is_empty());
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_status_check_carries_counts_when_enabled() -> anyhow::Result<()> {
    let mut config = test_config();
    config.trade.emit_counts_on_status_check = true;
    let hub = hub(config);
    let console = console_with(PartnerScript::trades(partner("ASH", 1), vec![item(25, 1)]));
    let sink = Arc::new(RecordingSink::new());

    hub.enqueue(request("alice", item(150, 9), sink.clone()))?;
    let worker = hub.spawn_worker("sim-1", console.clone(), console.clone(), RoutineType::LinkTrade);
    sink.wait_for_terminal(1).await;
    settle().await;
    hub.stop_worker(worker);

    hub.enqueue(request("bob", item(150, 9), sink.clone()))?;
    let report = hub
        .check_position(&RequesterId::new("bob"), RoutineType::LinkTrade)
        .expect("bob queued");
    assert_eq!(report.position, 1);
    assert_eq!(report.counts, vec!["Link trades: 1".to_string()]);
    hub.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_idle_workers() {
    let hub = hub(test_config());
    for n in 0..3 {
        let console = Arc::new(SimulatedConsole::new());
        hub.spawn_worker(format!("sim-{n}"), console.clone(), console.clone(), RoutineType::LinkTrade);
    }
    settle().await;
    assert_eq!(hub.worker_count(), 3);
    assert_eq!(hub.bots_for(RoutineType::LinkTrade), 3);

    let results = hub.shutdown().await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(_, result)| result.is_ok()));
    assert_eq!(hub.bots_for(RoutineType::LinkTrade), 0);
}
