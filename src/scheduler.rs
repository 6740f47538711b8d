//! Priority queues feeding the worker pool.
//!
//! Admitted calls wait here in one queue per priority class, ordered by
//! receive time with an arrival sequence number breaking ties. Workers take
//! from the most urgent non-empty class; a [`FairnessTracker`] periodically
//! hands the longest-waiting lower-class call to a worker instead so no class
//! starves. Expired and abandoned calls are finished here and never reach a
//! handler.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::Mutex,
};

use thiserror::Error;
use tokio::{
    sync::{Notify, oneshot},
    time::Instant,
};
use tracing::debug;

use crate::{
    call::{Call, CallState, Priority},
    fairness::{FairnessConfig, FairnessTracker},
    sync::lock,
};

/// Error returned by [`Scheduler::enqueue`].
#[non_exhaustive]
#[derive(Error)]
pub enum ScheduleError<Req, Resp> {
    /// The scheduler is closed. The call is handed back so the caller can
    /// reject it.
    #[error("scheduler is shut down")]
    ShutDown(Call<Req, Resp>),
}

impl<Req, Resp> ScheduleError<Req, Resp> {
    /// Recover the call that could not be scheduled.
    #[must_use]
    pub fn into_call(self) -> Call<Req, Resp> {
        match self {
            Self::ShutDown(call) => call,
        }
    }
}

impl<Req, Resp> fmt::Debug for ScheduleError<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShutDown(call) => f.debug_tuple("ShutDown").field(&call.id()).finish(),
        }
    }
}

type QueueKey = (Instant, u64);

struct State<Req, Resp> {
    queues: BTreeMap<Priority, BTreeMap<QueueKey, Call<Req, Resp>>>,
    fairness: FairnessTracker,
    idle: VecDeque<oneshot::Sender<Call<Req, Resp>>>,
    closed: bool,
    seq: u64,
    len: usize,
}

impl<Req, Resp> State<Req, Resp> {
    fn push(&mut self, call: Call<Req, Resp>) {
        let key = (call.received_at(), self.seq);
        self.seq += 1;
        self.queues
            .entry(call.priority())
            .or_default()
            .insert(key, call);
        self.len += 1;
    }

    /// Remove the next call according to priority and fairness.
    ///
    /// Queues are removed as soon as they empty, so every key in `queues`
    /// names a class with waiting calls.
    fn pop(&mut self) -> Option<Call<Req, Resp>> {
        let top = *self.queues.keys().next_back()?;
        let lower_waiting = self.queues.len() > 1;
        let class = if lower_waiting && self.fairness.should_yield_to_low_priority() {
            self.fairness.reset();
            self.queues
                .range(..top)
                .filter_map(|(class, queue)| queue.first_key_value().map(|(key, _)| (*key, *class)))
                .min()
                .map_or(top, |(_, class)| class)
        } else {
            if lower_waiting {
                self.fairness.record_high_priority();
            } else {
                self.fairness.reset();
            }
            top
        };
        let queue = self.queues.get_mut(&class)?;
        let (_, call) = queue.pop_first()?;
        if queue.is_empty() {
            self.queues.remove(&class);
        }
        self.len -= 1;
        Some(call)
    }
}

/// Multi-class queue shared by the reader tasks (which enqueue) and the
/// worker pool (which dequeues).
pub struct Scheduler<Req, Resp> {
    state: Mutex<State<Req, Resp>>,
    ready: Notify,
    fast_path: bool,
}

impl<Req, Resp> Scheduler<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Create an open scheduler.
    ///
    /// With `fast_path` set, a call arriving while every queue is empty and a
    /// worker is parked goes straight to that worker.
    #[must_use]
    pub fn new(fairness: FairnessConfig, fast_path: bool) -> Self {
        Self {
            state: Mutex::new(State {
                queues: BTreeMap::new(),
                fairness: FairnessTracker::new(fairness),
                idle: VecDeque::new(),
                closed: false,
                seq: 0,
                len: 0,
            }),
            ready: Notify::new(),
            fast_path,
        }
    }

    /// Queue an admitted call for execution. Never waits.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::ShutDown`] with the call once
    /// [`Scheduler::close`] has been called.
    pub fn enqueue(&self, call: Call<Req, Resp>) -> Result<(), ScheduleError<Req, Resp>> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(ScheduleError::ShutDown(call));
        }
        let mut call = call;
        if self.fast_path && state.len == 0 {
            while let Some(worker) = state.idle.pop_front() {
                match worker.send(call) {
                    Ok(()) => return Ok(()),
                    Err(returned) => call = returned,
                }
            }
        }
        state.push(call);
        crate::metrics::set_queued(state.len);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Wait for the next call to execute.
    ///
    /// Calls whose deadline has passed are answered with a timeout error and
    /// cleaned up; calls abandoned by their connection are cleaned up
    /// silently. Neither is returned. After [`Scheduler::close`] the
    /// remaining calls are drained and then `None` is returned.
    pub async fn dequeue(&self) -> Option<Call<Req, Resp>> {
        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (next, waiter) = {
                let mut state = lock(&self.state);
                let next = state.pop();
                if next.is_some() {
                    crate::metrics::set_queued(state.len);
                    (next, None)
                } else if state.closed {
                    return None;
                } else if self.fast_path {
                    let (tx, rx) = oneshot::channel();
                    state.idle.push_back(tx);
                    (None, Some(rx))
                } else {
                    (None, None)
                }
            };

            let mut call = match (next, waiter) {
                (Some(call), _) => call,
                (None, Some(mut rx)) => {
                    tokio::select! {
                        biased;
                        res = &mut rx => match res {
                            Ok(call) => call,
                            Err(_) => continue,
                        },
                        () = &mut notified => {
                            rx.close();
                            match rx.try_recv() {
                                Ok(call) => call,
                                Err(_) => continue,
                            }
                        }
                    }
                }
                (None, None) => {
                    notified.await;
                    continue;
                }
            };

            if call.state() == CallState::Abandoned {
                debug!(call = %call.summary(), "skipping call abandoned by its connection");
                call.cleanup();
                continue;
            }
            if call.is_expired(Instant::now()) {
                let outcome = call.abandon_expired().await;
                debug!(call = %call.summary(), ?outcome, "call expired while queued");
                call.cleanup();
                continue;
            }
            return Some(call);
        }
    }

    /// Stop accepting calls and wake every parked worker.
    ///
    /// Calls already queued stay available to [`Scheduler::dequeue`].
    pub fn close(&self) {
        let mut state = lock(&self.state);
        if state.closed {
            return;
        }
        state.closed = true;
        state.idle.clear();
        let queued = state.len;
        drop(state);
        self.ready.notify_waiters();
        debug!(queued, "scheduler closed");
    }
}

impl<Req, Resp> Scheduler<Req, Resp> {
    /// Number of queued calls.
    #[must_use]
    pub fn len(&self) -> usize { lock(&self.state).len }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    #[must_use]
    pub fn is_closed(&self) -> bool { lock(&self.state).closed }
}

impl<Req, Resp> fmt::Debug for Scheduler<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("Scheduler")
            .field("len", &state.len)
            .field("classes", &state.queues.len())
            .field("closed", &state.closed)
            .field("fast_path", &self.fast_path)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};
    use tokio::time::{self, Duration};

    use super::*;
    use crate::{
        call::CallId,
        connection::Connection,
        response::{ErrorKind, Response},
        test_helpers::{RecordingSink, call, connection},
    };

    struct Harness {
        sink: Arc<RecordingSink<String>>,
        conn: Arc<Connection<String>>,
    }

    #[fixture]
    fn harness() -> Harness {
        let sink = RecordingSink::new();
        let conn = connection(&sink);
        Harness { sink, conn }
    }

    fn queued(h: &Harness, id: u64, priority: Priority) -> Call<String, String> {
        let call = call(&h.conn, id).priority(priority).build();
        call.shared()
            .transition(CallState::Admitted)
            .expect("fresh call admits");
        call
    }

    async fn drain(scheduler: &Scheduler<String, String>) -> Vec<u64> {
        scheduler.close();
        let mut order = Vec::new();
        while let Some(call) = scheduler.dequeue().await {
            order.push(call.id().as_u64());
        }
        order
    }

    #[rstest]
    #[tokio::test]
    async fn same_class_is_first_received_first_served(harness: Harness) {
        time::pause();
        let scheduler = Scheduler::new(FairnessConfig::strict(), false);
        for id in 1..=3 {
            scheduler
                .enqueue(queued(&harness, id, Priority::NORMAL))
                .expect("open scheduler");
            time::advance(Duration::from_millis(1)).await;
        }
        assert_eq!(drain(&scheduler).await, vec![1, 2, 3]);
    }

    #[rstest]
    #[tokio::test]
    async fn equal_receive_times_keep_arrival_order(harness: Harness) {
        time::pause();
        let scheduler = Scheduler::new(FairnessConfig::strict(), false);
        for id in [5, 3, 9] {
            scheduler
                .enqueue(queued(&harness, id, Priority::NORMAL))
                .expect("open scheduler");
        }
        assert_eq!(drain(&scheduler).await, vec![5, 3, 9]);
    }

    #[rstest]
    #[tokio::test]
    async fn strict_priority_drains_urgent_class_first(harness: Harness) {
        let scheduler = Scheduler::new(FairnessConfig::strict(), false);
        for (id, priority) in [(1, Priority::NORMAL), (2, Priority::HIGH), (3, Priority::ADMIN)] {
            scheduler
                .enqueue(queued(&harness, id, priority))
                .expect("open scheduler");
        }
        assert_eq!(drain(&scheduler).await, vec![2, 3, 1]);
    }

    #[rstest]
    #[tokio::test]
    async fn fairness_serves_low_class_after_threshold(harness: Harness) {
        time::pause();
        let scheduler = Scheduler::new(
            FairnessConfig {
                max_high_before_low: 3,
                time_slice: None,
            },
            false,
        );
        for id in 1..=8 {
            scheduler
                .enqueue(queued(&harness, id, Priority::HIGH))
                .expect("open scheduler");
        }
        for id in 101..=103 {
            scheduler
                .enqueue(queued(&harness, id, Priority::NORMAL))
                .expect("open scheduler");
        }
        assert_eq!(
            drain(&scheduler).await,
            vec![1, 2, 3, 101, 4, 5, 6, 102, 7, 8, 103]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn fairness_picks_longest_waiting_lower_call(harness: Harness) {
        time::pause();
        let scheduler = Scheduler::new(
            FairnessConfig {
                max_high_before_low: 1,
                time_slice: None,
            },
            false,
        );
        scheduler
            .enqueue(queued(&harness, 10, Priority::REPLICATION))
            .expect("open scheduler");
        time::advance(Duration::from_millis(1)).await;
        scheduler
            .enqueue(queued(&harness, 20, Priority::NORMAL))
            .expect("open scheduler");
        scheduler
            .enqueue(queued(&harness, 30, Priority::HIGH))
            .expect("open scheduler");
        scheduler
            .enqueue(queued(&harness, 31, Priority::HIGH))
            .expect("open scheduler");
        assert_eq!(drain(&scheduler).await, vec![30, 10, 31, 20]);
    }

    #[rstest]
    #[tokio::test]
    async fn expired_call_is_answered_and_never_dequeued(harness: Harness) {
        time::pause();
        let scheduler = Scheduler::new(FairnessConfig::default(), false);
        let expiring = call(&harness.conn, 1)
            .timeout(Some(Duration::from_millis(50)))
            .build();
        expiring
            .shared()
            .transition(CallState::Admitted)
            .expect("fresh call admits");
        scheduler.enqueue(expiring).expect("open scheduler");
        scheduler
            .enqueue(queued(&harness, 2, Priority::NORMAL))
            .expect("open scheduler");
        time::advance(Duration::from_millis(100)).await;

        let next = scheduler.dequeue().await.expect("live call remains");
        assert_eq!(next.id(), CallId::new(2));

        let sent = harness.sink.take();
        assert_eq!(sent.len(), 1);
        let (id, response) = &sent[0];
        assert_eq!(*id, CallId::new(1));
        assert!(matches!(
            response,
            Response::Failure(e) if e.kind == ErrorKind::DeadlineExceeded
        ));
        assert_eq!(harness.conn.in_flight(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn abandoned_calls_are_skipped_silently(harness: Harness) {
        let scheduler = Scheduler::new(FairnessConfig::default(), false);
        scheduler
            .enqueue(queued(&harness, 1, Priority::NORMAL))
            .expect("open scheduler");
        assert_eq!(harness.conn.close(), 1);
        scheduler.close();
        assert!(scheduler.dequeue().await.is_none());
        assert!(harness.sink.is_empty());
        assert_eq!(harness.conn.in_flight(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn closed_scheduler_returns_call(harness: Harness) {
        let scheduler = Scheduler::new(FairnessConfig::default(), false);
        scheduler.close();
        let err = scheduler
            .enqueue(queued(&harness, 7, Priority::NORMAL))
            .expect_err("closed scheduler refuses work");
        assert_eq!(err.into_call().id(), CallId::new(7));
        assert!(scheduler.is_closed());
    }

    #[tokio::test]
    async fn close_wakes_parked_worker() {
        let scheduler = Arc::new(Scheduler::<String, String>::new(
            FairnessConfig::default(),
            false,
        ));
        let worker = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.dequeue().await.is_none() }
        });
        tokio::task::yield_now().await;
        scheduler.close();
        assert!(worker.await.expect("worker task"));
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test]
    async fn parked_worker_receives_new_call(harness: Harness, #[case] fast_path: bool) {
        let scheduler = Arc::new(Scheduler::new(FairnessConfig::default(), fast_path));
        let worker = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.dequeue().await.map(|call| call.id()) }
        });
        tokio::task::yield_now().await;
        scheduler
            .enqueue(queued(&harness, 42, Priority::NORMAL))
            .expect("open scheduler");
        assert_eq!(worker.await.expect("worker task"), Some(CallId::new(42)));
        assert!(scheduler.is_empty());
    }
}
