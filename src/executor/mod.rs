//! The assembled call pipeline.
//!
//! [`CallExecutor`] owns an admission controller, a scheduler and a pool of
//! worker tasks. Reader tasks hand decoded calls to [`CallExecutor::submit`];
//! workers take them from the scheduler, run the [`Handler`], send the
//! response and clean up.

mod worker;

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::{
    admission::{Admission, AdmissionController, AdmissionError},
    call::Call,
    config::{ExecutorConfig, RejectionPolicy},
    dispatch::Handler,
    error::SubmitError,
    response::{ErrorKind, ErrorResponse},
    scheduler::Scheduler,
};

/// Worker pool plus the admission and scheduling state in front of it.
///
/// Dropping the executor closes the scheduler; workers finish the calls
/// already queued and exit. Use [`CallExecutor::shutdown`] to wait for
/// them.
pub struct CallExecutor<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    config: ExecutorConfig,
    admission: Arc<AdmissionController>,
    scheduler: Arc<Scheduler<Req, Resp>>,
    tracker: TaskTracker,
}

impl<Req, Resp> CallExecutor<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    /// Spawn `config.workers()` workers running `handler` with a private
    /// admission budget.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<H>(config: ExecutorConfig, handler: H) -> Self
    where
        H: Handler<Req, Resp>,
    {
        let admission = Arc::new(AdmissionController::new(config.queue_capacity_bytes()));
        Self::with_admission(config, handler, admission)
    }

    /// Like [`CallExecutor::start`] but charging calls against a shared
    /// `admission` controller, whose capacity takes precedence over the one
    /// in `config`.
    pub fn with_admission<H>(
        config: ExecutorConfig,
        handler: H,
        admission: Arc<AdmissionController>,
    ) -> Self
    where
        H: Handler<Req, Resp>,
    {
        let scheduler = Arc::new(Scheduler::new(config.fairness(), config.fast_path()));
        let handler = Arc::new(handler);
        let tracker = TaskTracker::new();
        for index in 0..config.workers() {
            tracker.spawn(worker::worker_loop(
                index,
                Arc::clone(&scheduler),
                Arc::clone(&handler),
            ));
        }
        info!(
            workers = config.workers(),
            capacity = admission.capacity(),
            fast_path = config.fast_path(),
            "call executor started"
        );
        Self {
            config,
            admission,
            scheduler,
            tracker,
        }
    }

    /// Admit and queue a decoded call.
    ///
    /// Never waits for queue space. Calls that cannot be queued are answered
    /// (or dropped, per the configured [`RejectionPolicy`]) and cleaned up
    /// before this returns.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Expired`] if the deadline had already passed.
    /// - [`SubmitError::Rejected`] if admission control refused the call.
    /// - [`SubmitError::ShuttingDown`] after [`CallExecutor::shutdown`].
    pub async fn submit(&self, mut call: Call<Req, Resp>) -> Result<(), SubmitError> {
        let call_id = call.id();
        if call.is_expired(Instant::now()) {
            let outcome = call.abandon_expired().await;
            debug!(call = %call.summary(), ?outcome, "call expired before admission");
            call.cleanup();
            return Err(SubmitError::Expired(call_id));
        }

        match self.admission.try_admit(&mut call) {
            Admission::Admitted => {}
            Admission::Rejected(source @ AdmissionError::OverCapacity { .. }) => {
                let respond = self.config.rejection_policy() == RejectionPolicy::Respond;
                let error = ErrorResponse::new(ErrorKind::Overloaded, source.to_string());
                let outcome = call.reject(error, respond).await;
                debug!(call = %call.summary(), ?outcome, "call rejected by admission control");
                call.cleanup();
                return Err(SubmitError::Rejected { call_id, source });
            }
            Admission::Rejected(source) => {
                debug!(call = %call.summary(), error = %source, "call not admissible");
                call.cleanup();
                return Err(SubmitError::Rejected { call_id, source });
            }
        }

        if let Err(e) = self.scheduler.enqueue(call) {
            let mut call = e.into_call();
            let error = ErrorResponse::new(ErrorKind::ShuttingDown, "server is shutting down");
            let outcome = call.reject(error, true).await;
            debug!(call = %call.summary(), ?outcome, "call refused during shutdown");
            call.cleanup();
            return Err(SubmitError::ShuttingDown(call_id));
        }
        Ok(())
    }

    /// Stop accepting calls, let the workers drain the queue and wait for
    /// them to exit.
    pub async fn shutdown(&self) {
        self.scheduler.close();
        self.tracker.close();
        self.tracker.wait().await;
        info!(
            outstanding = self.admission.outstanding(),
            "call executor stopped"
        );
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig { &self.config }

    /// The admission controller calls are charged against.
    #[must_use]
    pub fn admission(&self) -> &Arc<AdmissionController> { &self.admission }

    /// Number of calls waiting for a worker.
    #[must_use]
    pub fn queued(&self) -> usize { self.scheduler.len() }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool { self.scheduler.is_closed() }
}

impl<Req, Resp> Drop for CallExecutor<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
{
    fn drop(&mut self) {
        self.scheduler.close();
        self.tracker.close();
    }
}
