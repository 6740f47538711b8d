//! Worker task draining the scheduler.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tracing::{debug, error};

use crate::{
    dispatch::{Handler, dispatch},
    panic::format_panic,
    scheduler::Scheduler,
};

/// Run calls from `scheduler` until it is closed and drained.
///
/// Handler panics are turned into error responses by [`dispatch`]; a panic
/// anywhere else in the pipeline is caught here so the worker survives. The
/// call is cleaned up on every path.
pub(super) async fn worker_loop<Req, Resp, H>(
    index: usize,
    scheduler: Arc<Scheduler<Req, Resp>>,
    handler: Arc<H>,
) where
    Req: Send + Sync + 'static,
    Resp: Send + 'static,
    H: Handler<Req, Resp>,
{
    while let Some(mut call) = scheduler.dequeue().await {
        let result = AssertUnwindSafe(dispatch(&mut call, handler.as_ref()))
            .catch_unwind()
            .await;
        match result {
            Ok(outcome) => debug!(worker = index, call = %call.summary(), ?outcome, "call finished"),
            Err(panic) => {
                crate::metrics::inc_worker_panics();
                error!(
                    worker = index,
                    call = %call.summary(),
                    panic = %format_panic(panic),
                    "worker panicked while dispatching call"
                );
            }
        }
        call.cleanup();
    }
    debug!(worker = index, "worker stopped");
}
