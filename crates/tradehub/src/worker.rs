//! The long-running loop behind each console.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::dispatch::{Dispatch, DispatchRouter};
use crate::error::{DeviceError, WorkerError};
use crate::outcome::TradeResult;
use crate::queue::{Claim, QueueStore};
use crate::session::WorkerSession;
use crate::traits::{Button, Notice, RemoteConnection, Stick};
use crate::types::{PriorityTier, RoutineType, TradeEntry, TradeKind};

/// Control surface for a running worker.
pub struct WorkerHandle {
    id: Uuid,
    name: String,
    routine: watch::Sender<RoutineType>,
    cancel: CancellationToken,
    join: JoinHandle<Result<(), WorkerError>>,
}

impl WorkerHandle {
    pub(crate) fn new(
        id: Uuid,
        name: String,
        routine: watch::Sender<RoutineType>,
        cancel: CancellationToken,
        join: JoinHandle<Result<(), WorkerError>>,
    ) -> Self {
        Self { id, name, routine, cancel, join }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn routine(&self) -> RoutineType {
        *self.routine.borrow()
    }

    /// Reassign the worker. Takes effect once its current trade ends.
    pub fn set_routine(&self, routine: RoutineType) {
        self.routine.send_replace(routine);
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker to exit.
    pub async fn join(self) -> Result<(), WorkerError> {
        match self.join.await {
            Ok(result) => result,
            Err(err) => Err(WorkerError::Device(DeviceError::Unexpected(format!("worker task failed: {err}")))),
        }
    }
}

pub struct Worker {
    id: Uuid,
    session: WorkerSession,
    conn: Arc<dyn RemoteConnection>,
    router: DispatchRouter,
    queue: Arc<QueueStore>,
    config: Arc<HubConfig>,
    routine: watch::Receiver<RoutineType>,
    cancel: CancellationToken,
    roster: Arc<DashMap<Uuid, RoutineType>>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        session: WorkerSession,
        conn: Arc<dyn RemoteConnection>,
        router: DispatchRouter,
        queue: Arc<QueueStore>,
        config: Arc<HubConfig>,
        routine: watch::Receiver<RoutineType>,
        cancel: CancellationToken,
        roster: Arc<DashMap<Uuid, RoutineType>>,
    ) -> Self {
        Self { id, session, conn, router, queue, config, routine, cancel, roster }
    }

    pub async fn run(mut self) -> Result<(), WorkerError> {
        info!(worker = %self.session.name(), id = %self.id, "worker starting");
        let result = self.run_inner().await;
        self.session.leave_barrier();
        self.roster.remove(&self.id);
        match &result {
            Ok(()) => info!(worker = %self.session.name(), "worker stopped"),
            Err(err) => error!(worker = %self.session.name(), error = %err, "worker stopped"),
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), WorkerError> {
        let mut prepared = false;
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            let step = if prepared {
                self.trade_loop().await
            } else {
                match self.startup().await {
                    Ok(()) => {
                        prepared = true;
                        continue;
                    }
                    Err(err) => Err(err),
                }
            };
            match step {
                Ok(()) => return Ok(()),
                Err(err) if err.is_connection() => {
                    warn!(worker = %self.session.name(), error = %err, "connection lost");
                    self.reconnect().await?;
                    // Offsets may have moved if the title restarted meanwhile.
                    prepared = false;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn startup(&mut self) -> Result<(), DeviceError> {
        self.conn.set_stick(Stick::Left, 0, 0).await?;
        self.session.prepare().await
    }

    /// Claim and run trades until cancelled. Returns `Err` on a connection
    /// fault so the caller can reconnect.
    async fn trade_loop(&mut self) -> Result<(), DeviceError> {
        loop {
            let routine = *self.routine.borrow();
            self.roster.insert(self.id, routine);

            let conn = self.conn.clone();
            let dispatch = self
                .router
                .wait_for_work(self.session.name(), &mut self.routine, &self.cancel, || {
                    let conn = conn.clone();
                    async move {
                        conn.press(Button::B).await?;
                        tokio::time::sleep(Duration::from_millis(1_000)).await;
                        Ok(())
                    }
                })
                .await?;

            match dispatch {
                Dispatch::Canceled => return Ok(()),
                Dispatch::RoutineChanged(next) => {
                    info!(worker = %self.session.name(), from = ?routine, to = ?next, "routine changed");
                }
                Dispatch::Work(claim) => self.perform(claim).await?,
            }
        }
    }

    async fn perform(&mut self, claim: Claim) -> Result<(), DeviceError> {
        let Claim { entry, tier } = claim;
        info!(
            worker = %self.session.name(),
            entry_id = %entry.id,
            kind = ?entry.kind,
            "starting next trade"
        );
        tokio::time::sleep(Duration::from_millis(500)).await;

        match self.session.run(&entry, &self.cancel).await {
            Ok(TradeResult::Success) => {
                self.queue.complete(entry.id);
                // The trade stands even if the link dropped while backing out.
                self.session.take_link_fault().map_or(Ok(()), Err)
            }
            Ok(result) => {
                self.handle_aborted(entry, tier, result);
                Ok(())
            }
            Err(err) => {
                self.handle_aborted(entry, tier, TradeResult::ExceptionConnection);
                Err(err)
            }
        }
    }

    /// One retry for failures on our side; everything else is final.
    fn handle_aborted(&self, entry: TradeEntry, tier: PriorityTier, result: TradeResult) {
        let name = self.session.name();
        if result.should_attempt_retry() && entry.kind != TradeKind::Random && !entry.is_retry {
            let retry_tier = tier.min(self.config.queue.retry_tier);
            if self.queue.requeue(entry.clone(), retry_tier) {
                info!(worker = %name, entry_id = %entry.id, %result, "trade re-queued for retry");
                entry.notifier.on_notify(
                    &entry,
                    Notice::Text("Oops! Something went wrong. I'll re-queue you for another attempt.".to_string()),
                );
                return;
            }
        }

        warn!(worker = %name, entry_id = %entry.id, %result, "trade canceled");
        entry.notifier.on_notify(
            &entry,
            Notice::Text(format!("Oops! Something went wrong. Canceling the trade: {result}.")),
        );
        entry.notifier.on_canceled(&entry, result);
        self.queue.complete(entry.id);
    }

    /// Bounded reconnect. A negative attempt budget retries forever.
    async fn reconnect(&mut self) -> Result<(), WorkerError> {
        let timings = &self.config.timings;
        let delay = Duration::from_millis(timings.base_reconnect_delay_ms + timings.extra_reconnect_delay_ms);
        let budget = u32::try_from(timings.reconnect_attempts).ok();
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }
            if budget.is_some_and(|budget| attempt >= budget) {
                return Err(WorkerError::ReconnectExhausted { attempts: attempt });
            }
            attempt += 1;
            match self.conn.reconnect().await {
                Ok(()) => {
                    info!(worker = %self.session.name(), attempt, "reconnected");
                    return Ok(());
                }
                Err(err) => {
                    warn!(worker = %self.session.name(), attempt, error = %err, "reconnect failed");
                }
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
