//! Routing idle workers to their next piece of work.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::HubConfig;
use crate::error::DeviceError;
use crate::queue::{Claim, QueueStore};
use crate::types::RoutineType;

/// What an idle wait ended with.
#[derive(Debug)]
pub enum Dispatch {
    Work(Claim),
    /// The worker was reassigned; pick up the new routine.
    RoutineChanged(RoutineType),
    Canceled,
}

#[derive(Clone)]
pub struct DispatchRouter {
    queue: Arc<QueueStore>,
    config: Arc<HubConfig>,
}

impl DispatchRouter {
    pub fn new(queue: Arc<QueueStore>, config: Arc<HubConfig>) -> Self {
        Self { queue, config }
    }

    /// Claim the next entry for a worker running `routine`, without waiting.
    ///
    /// Link-trade and flex workers fall back to the distribution pool when
    /// their queues are empty.
    pub fn next_work(&self, routine: RoutineType) -> Option<Claim> {
        let claimed = match routine {
            RoutineType::Idle => return None,
            RoutineType::Flex => self.queue.try_dequeue_flex(self.config.queue.flex_mode),
            lane => self.queue.try_dequeue(lane),
        };
        claimed.or_else(|| match routine {
            RoutineType::LinkTrade | RoutineType::Flex => self.queue.try_dequeue_distribution(),
            _ => None,
        })
    }

    /// Poll for work until something is claimed, the routine changes or the
    /// worker is cancelled.
    ///
    /// While nothing is available `keepalive` runs every `keepalive_every`
    /// polls (when `anti_idle` is on) so the console does not drop its link.
    /// A failing keep-alive is returned to the caller.
    pub async fn wait_for_work<F, Fut>(
        &self,
        worker: &str,
        routine: &mut watch::Receiver<RoutineType>,
        cancel: &CancellationToken,
        mut keepalive: F,
    ) -> Result<Dispatch, DeviceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), DeviceError>>,
    {
        let timings = &self.config.timings;
        let poll = Duration::from_millis(timings.poll_interval_ms.max(1));
        let keepalive_every = timings.keepalive_every.max(1);
        let mut polls: u32 = 0;
        let mut announced = false;

        loop {
            if cancel.is_cancelled() {
                return Ok(Dispatch::Canceled);
            }
            let current = *routine.borrow_and_update();
            if let Some(claim) = self.next_work(current) {
                debug!(worker, entry_id = %claim.entry.id, "work claimed");
                return Ok(Dispatch::Work(claim));
            }

            if !announced {
                info!(worker, routine = ?current, "nothing to do, idling");
                announced = true;
            }
            polls = polls.wrapping_add(1);
            if self.config.anti_idle && current != RoutineType::Idle && polls % keepalive_every == 0 {
                keepalive().await?;
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(Dispatch::Canceled),
                changed = routine.changed() => match changed {
                    Ok(()) => return Ok(Dispatch::RoutineChanged(*routine.borrow_and_update())),
                    Err(_) => return Ok(Dispatch::Canceled),
                },
                _ = tokio::time::sleep(poll) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::LinkCode;
    use crate::traits::LogSink;
    use crate::types::{Payload, PriorityClass, PriorityTier, RequesterId, TradeEntry, TradeKind};
    use chrono::Utc;
    use smallvec::smallvec;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn router(config: HubConfig) -> (DispatchRouter, Arc<QueueStore>) {
        let config = Arc::new(config);
        let queue = Arc::new(QueueStore::new(config.clone()));
        (DispatchRouter::new(queue.clone(), config), queue)
    }

    fn enqueue(queue: &QueueStore, requester: &str, kind: TradeKind) {
        let entry = TradeEntry {
            id: queue.next_entry_id(),
            requester_id: RequesterId::new(requester),
            requester_name: requester.to_string(),
            payloads: smallvec![Payload::new([1u8])],
            kind,
            code: LinkCode::try_from(1234u32).unwrap(),
            priority: PriorityClass::Normal,
            enqueued_at: Utc::now(),
            is_retry: false,
            is_synchronized: false,
            notifier: Arc::new(LogSink),
        };
        queue.try_enqueue(entry, PriorityTier::FREE).unwrap();
    }

    #[test]
    fn test_routine_lane_before_distribution() {
        let (router, queue) = router(HubConfig::default());
        queue.distribution().replace(vec![Payload::new([9u8])]);
        enqueue(&queue, "u1", TradeKind::Specific);

        let first = router.next_work(RoutineType::LinkTrade).unwrap();
        assert_eq!(first.entry.kind, TradeKind::Specific);
        let second = router.next_work(RoutineType::LinkTrade).unwrap();
        assert_eq!(second.entry.kind, TradeKind::Random);
    }

    #[test]
    fn test_dump_workers_never_distribute() {
        let (router, queue) = router(HubConfig::default());
        queue.distribution().replace(vec![Payload::new([9u8])]);
        assert!(router.next_work(RoutineType::Dump).is_none());
        assert!(router.next_work(RoutineType::Idle).is_none());
        assert!(router.next_work(RoutineType::Flex).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_wait_sends_keepalive_and_picks_up_work() {
        let (router, queue) = router(HubConfig::default());
        let (_tx, mut rx) = watch::channel(RoutineType::Dump);
        let cancel = CancellationToken::new();
        let presses = Arc::new(AtomicU32::new(0));

        let waiter = {
            let router = router.clone();
            let cancel = cancel.clone();
            let presses = presses.clone();
            tokio::spawn(async move {
                router
                    .wait_for_work("w1", &mut rx, &cancel, || {
                        presses.fetch_add(1, Ordering::SeqCst);
                        async { Ok(()) }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        enqueue(&queue, "dumper", TradeKind::Dump);

        match waiter.await.unwrap().unwrap() {
            Dispatch::Work(claim) => assert_eq!(claim.entry.kind, TradeKind::Dump),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(presses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_routine_change_and_cancel_end_the_wait() {
        let (router, _queue) = router(HubConfig::default());
        let (tx, mut rx) = watch::channel(RoutineType::Dump);
        let cancel = CancellationToken::new();

        let waiter = {
            let router = router.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let outcome = router.wait_for_work("w1", &mut rx, &cancel, || async { Ok(()) }).await;
                (outcome, rx)
            })
        };
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        tx.send_replace(RoutineType::Clone);
        let (outcome, mut rx) = waiter.await.unwrap();
        assert!(matches!(outcome.unwrap(), Dispatch::RoutineChanged(RoutineType::Clone)));

        cancel.cancel();
        let outcome = router
            .wait_for_work("w1", &mut rx, &cancel, || async { Ok(()) })
            .await
            .unwrap();
        assert!(matches!(outcome, Dispatch::Canceled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_failure_propagates() {
        let (router, _queue) = router(HubConfig::default());
        let (_tx, mut rx) = watch::channel(RoutineType::LinkTrade);
        let err = router
            .wait_for_work("w1", &mut rx, &CancellationToken::new(), || async {
                Err(DeviceError::Timeout(Duration::from_secs(1)))
            })
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }
}
