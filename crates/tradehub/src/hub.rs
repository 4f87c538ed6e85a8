//! The hub: admission, queue inspection and the worker fleet behind one
//! handle.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::abuse::InMemoryAbuseRegistry;
use crate::barrier::SynchronizationBarrier;
use crate::code::LinkCode;
use crate::config::HubConfig;
use crate::counts::{CountsSnapshot, TradeCounts};
use crate::dispatch::DispatchRouter;
use crate::distribution::DistributionPool;
use crate::error::{AdmissionError, WorkerError};
use crate::gate::QueueGate;
use crate::queue::{QueueSnapshotEntry, QueueStore};
use crate::session::{SessionServices, WorkerSession};
use crate::traits::{AbuseRegistry, ConsoleAdapter, LegalityOracle, NotificationSink, RemoteConnection};
use crate::types::{EntryId, PriorityTier, RequesterId, RoutineType, TradeEntry, TradeKind, TradeRequest};
use crate::worker::{Worker, WorkerHandle};

/// Returned to the requester on successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnqueueReceipt {
    pub entry_id: EntryId,
    pub position: usize,
    pub eta_minutes: f64,
}

/// Answer to a position check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    pub position: usize,
    pub processing: bool,
    pub eta_minutes: f64,
    /// Completion counters, when status checks are configured to carry them.
    pub counts: Vec<String>,
}

/// Builder for [`TradeHub`].
///
/// ```rust,ignore
/// let hub = TradeHubBuilder::new(config, Arc::new(MyOracle))
///     .with_abuse_registry(Arc::new(MyRegistry))
///     .build();
/// ```
pub struct TradeHubBuilder {
    config: HubConfig,
    oracle: Arc<dyn LegalityOracle>,
    abuse: Option<Arc<dyn AbuseRegistry>>,
    distribution_notifier: Option<Arc<dyn NotificationSink>>,
    cancel: Option<CancellationToken>,
}

impl TradeHubBuilder {
    pub fn new(config: HubConfig, oracle: Arc<dyn LegalityOracle>) -> Self {
        Self {
            config,
            oracle,
            abuse: None,
            distribution_notifier: None,
            cancel: None,
        }
    }

    /// Replace the default in-memory abuse registry.
    pub fn with_abuse_registry(mut self, abuse: Arc<dyn AbuseRegistry>) -> Self {
        self.abuse = Some(abuse);
        self
    }

    /// Report unattended distribution trades to `notifier` rather than the
    /// log.
    pub fn with_distribution_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.distribution_notifier = Some(notifier);
        self
    }

    /// Tie worker shutdown to an outer cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn build(self) -> TradeHub {
        let config = Arc::new(self.config.normalized());
        let queue = Arc::new(match self.distribution_notifier {
            Some(notifier) => QueueStore::with_distribution_notifier(config.clone(), notifier),
            None => QueueStore::new(config.clone()),
        });
        let router = DispatchRouter::new(queue.clone(), config.clone());
        let gate = QueueGate::new(&config.queue);
        let abuse = self
            .abuse
            .unwrap_or_else(|| Arc::new(InMemoryAbuseRegistry::new(&config.abuse)));
        let barrier = Arc::new(SynchronizationBarrier::new(
            config.distribution.synchronize_bots,
            Duration::from_millis(config.distribution.synchronize_delay_barrier_ms),
        ));
        let services = SessionServices {
            config: config.clone(),
            oracle: self.oracle,
            abuse,
            counts: Arc::new(TradeCounts::default()),
            barrier,
            pool: queue.distribution_pool(),
        };
        TradeHub {
            config,
            queue,
            router,
            gate,
            services,
            roster: Arc::new(DashMap::new()),
            workers: Mutex::new(Vec::new()),
            cancel: self.cancel.unwrap_or_default(),
        }
    }
}

pub struct TradeHub {
    config: Arc<HubConfig>,
    queue: Arc<QueueStore>,
    router: DispatchRouter,
    gate: QueueGate,
    services: SessionServices,
    roster: Arc<DashMap<Uuid, RoutineType>>,
    workers: Mutex<Vec<WorkerHandle>>,
    cancel: CancellationToken,
}

impl TradeHub {
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn router(&self) -> &DispatchRouter {
        &self.router
    }

    pub fn distribution(&self) -> &DistributionPool {
        self.queue.distribution()
    }

    pub fn barrier(&self) -> &SynchronizationBarrier {
        &self.services.barrier
    }

    /// Validate and admit a request.
    ///
    /// # Errors
    ///
    /// Every rejection leaves the queue exactly as it was:
    /// - [`AdmissionError::QueueClosed`] when the gate is shut
    /// - [`AdmissionError::BadBatch`] for an empty or oversized batch
    /// - [`AdmissionError::InvalidCode`] for a code outside `00000000..=99999999`
    /// - [`AdmissionError::Illegal`] when the legality oracle refuses a payload
    /// - [`AdmissionError::AlreadyQueued`] / [`AdmissionError::CapacityExceeded`]
    ///   from the queue itself
    pub fn enqueue(&self, request: TradeRequest) -> Result<EnqueueReceipt, AdmissionError> {
        if !self.gate.admits(self.queue.total_len()) {
            return Err(AdmissionError::QueueClosed);
        }

        let max = self.config.trade.max_items_per_trade;
        let count = request.payloads.len();
        let min = if request.kind == TradeKind::Dump { 0 } else { 1 };
        if count < min || count > max {
            return Err(AdmissionError::BadBatch { count, max });
        }

        let code = LinkCode::try_from(request.code)?;

        if request.kind == TradeKind::Specific {
            for payload in &request.payloads {
                let verdict = self.services.oracle.validate(payload);
                if !verdict.valid {
                    return Err(AdmissionError::Illegal {
                        diagnostics: verdict.diagnostics,
                    });
                }
            }
        }

        let entry = TradeEntry {
            id: self.queue.next_entry_id(),
            requester_id: request.requester_id,
            requester_name: request.requester_name,
            payloads: request.payloads,
            kind: request.kind,
            code,
            priority: request.priority,
            enqueued_at: Utc::now(),
            is_retry: false,
            is_synchronized: request.synchronized,
            notifier: request.notifier,
        };
        let entry_id = entry.id;
        let routine = entry.routine();
        let requester = entry.requester_id.clone();
        let priority = entry.priority;

        let position = self.queue.try_enqueue(entry, PriorityTier::FREE)?;
        let eta_minutes = self.queue.policy().estimate_minutes(position, self.bots_for(routine));
        info!(
            entry_id = %entry_id,
            %requester,
            ?routine,
            ?priority,
            position,
            "request admitted"
        );
        Ok(EnqueueReceipt {
            entry_id,
            position,
            eta_minutes,
        })
    }

    pub fn check_position(&self, requester: &RequesterId, routine: RoutineType) -> Option<PositionReport> {
        let found = self.queue.check_position(requester, routine)?;
        let counts = if self.config.trade.emit_counts_on_status_check {
            self.services.counts.non_zero_counts()
        } else {
            Vec::new()
        };
        Some(PositionReport {
            position: found.position,
            processing: found.processing,
            eta_minutes: self.queue.policy().estimate_minutes(found.position, self.bots_for(routine)),
            counts,
        })
    }

    /// Requester-initiated removal.
    pub fn dequeue(&self, requester: &RequesterId, routine: RoutineType) -> bool {
        let removed = self.queue.remove(requester, routine);
        if removed {
            info!(%requester, ?routine, "request withdrawn");
        }
        removed
    }

    pub fn queue_snapshot(&self, routine: RoutineType) -> Vec<QueueSnapshotEntry> {
        self.queue.snapshot(routine)
    }

    pub fn counts(&self) -> CountsSnapshot {
        self.services.counts.snapshot()
    }

    /// Workers currently serving `lane`.
    pub fn bots_for(&self, lane: RoutineType) -> usize {
        self.roster.iter().filter(|worker| worker.value().serves(lane)).count()
    }

    /// Operator switch for `Manual` queue opening.
    pub fn set_queue_open(&self, open: bool) {
        self.gate.set_open(open);
    }

    /// Open the synchronization barrier for `RemoteSync` distribution.
    pub fn release_barrier(&self) -> usize {
        self.services.barrier.release()
    }

    /// Start a worker driving `conn` through `console`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_worker(
        &self,
        name: impl Into<String>,
        conn: Arc<dyn RemoteConnection>,
        console: Arc<dyn ConsoleAdapter>,
        routine: RoutineType,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let name = name.into();
        let (routine_tx, routine_rx) = watch::channel(routine);
        let cancel = self.cancel.child_token();
        self.roster.insert(id, routine);

        let session = WorkerSession::new(name.clone(), conn.clone(), console, self.services.clone());
        let worker = Worker::new(
            id,
            session,
            conn,
            self.router.clone(),
            self.queue.clone(),
            self.config.clone(),
            routine_rx,
            cancel.clone(),
            self.roster.clone(),
        );
        let join = tokio::spawn(worker.run());
        info!(worker = %name, %id, ?routine, "worker spawned");
        self.workers
            .lock()
            .push(WorkerHandle::new(id, name, routine_tx, cancel, join));
        id
    }

    /// Reassign a running worker. `false` if no such worker.
    pub fn set_routine(&self, worker: Uuid, routine: RoutineType) -> bool {
        let workers = self.workers.lock();
        match workers.iter().find(|handle| handle.id() == worker) {
            Some(handle) => {
                handle.set_routine(routine);
                true
            }
            None => false,
        }
    }

    pub fn stop_worker(&self, worker: Uuid) -> bool {
        let workers = self.workers.lock();
        match workers.iter().find(|handle| handle.id() == worker) {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Cancel every worker and wait for all of them to exit.
    pub async fn shutdown(&self) -> Vec<(String, Result<(), WorkerError>)> {
        self.cancel.cancel();
        let handles: Vec<WorkerHandle> = std::mem::take(&mut *self.workers.lock());
        info!(workers = handles.len(), "shutting down");
        let joins = handles.into_iter().map(|handle| async move {
            let name = handle.name().to_string();
            let result = handle.join().await;
            if let Err(err) = &result {
                warn!(worker = %name, error = %err, "worker ended with error");
            }
            (name, result)
        });
        join_all(joins).await
    }
}
