//! Scriptable [`Handler`] implementations.

use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use callframe::{
    call::{Call, CallId, SideChannel},
    dispatch::{Handler, HandlerError, Reply},
};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Duration, Instant},
};

/// Replies with the call's parameter, draining any request cells.
#[derive(Clone, Copy, Debug, Default)]
pub struct Echo;

#[async_trait]
impl Handler<String, String> for Echo {
    async fn handle(
        &self,
        call: &Call<String, String>,
        cells: Option<SideChannel>,
    ) -> Result<Reply<String>, HandlerError> {
        if let Some(cells) = cells {
            let bytes: usize = cells.map(|cell| cell.len()).sum();
            call.increment_response_cell_size(bytes as u64);
        }
        Ok(Reply::new(call.param().cloned().unwrap_or_default()))
    }
}

/// Fails every call with an I/O error as the cause.
#[derive(Clone, Copy, Debug, Default)]
pub struct Failing;

#[async_trait]
impl Handler<String, String> for Failing {
    async fn handle(
        &self,
        _call: &Call<String, String>,
        _cells: Option<SideChannel>,
    ) -> Result<Reply<String>, HandlerError> {
        Err(HandlerError::from_cause(io::Error::new(
            io::ErrorKind::NotFound,
            "region not online",
        )))
    }
}

/// Panics on every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct Panicking;

#[async_trait]
impl Handler<String, String> for Panicking {
    async fn handle(
        &self,
        call: &Call<String, String>,
        _cells: Option<SideChannel>,
    ) -> Result<Reply<String>, HandlerError> {
        panic!("handler exploded on call {}", call.id());
    }
}

/// Works in fixed steps, polling the call's remaining time between steps.
///
/// Replies `steps=N` after `steps` steps, or fails once the deadline leaves
/// no time for another step.
#[derive(Clone, Copy, Debug)]
pub struct Cooperative {
    pub step: Duration,
    pub steps: u32,
}

#[async_trait]
impl Handler<String, String> for Cooperative {
    async fn handle(
        &self,
        call: &Call<String, String>,
        _cells: Option<SideChannel>,
    ) -> Result<Reply<String>, HandlerError> {
        for done in 0..self.steps {
            if call
                .remaining(Instant::now())
                .is_some_and(|left| left < self.step)
            {
                return Err(HandlerError::new(format!(
                    "deadline reached after {done} steps"
                )));
            }
            time::sleep(self.step).await;
        }
        Ok(Reply::new(format!("steps={}", self.steps)))
    }
}

/// Echo handler that records the order calls reach it and holds every call
/// until its [`Gate`] opens.
pub struct GatedEcho {
    open: watch::Receiver<bool>,
    started: mpsc::UnboundedSender<CallId>,
    seen: Arc<Mutex<Vec<CallId>>>,
}

/// Test-side control of a [`GatedEcho`].
pub struct Gate {
    open: watch::Sender<bool>,
    started: mpsc::UnboundedReceiver<CallId>,
    seen: Arc<Mutex<Vec<CallId>>>,
}

/// Create a closed gate and the handler it controls.
#[must_use]
pub fn gated() -> (GatedEcho, Gate) {
    let (open_tx, open_rx) = watch::channel(false);
    let (started_tx, started_rx) = mpsc::unbounded_channel();
    let seen = Arc::new(Mutex::new(Vec::new()));
    (
        GatedEcho {
            open: open_rx,
            started: started_tx,
            seen: Arc::clone(&seen),
        },
        Gate {
            open: open_tx,
            started: started_rx,
            seen,
        },
    )
}

impl Gate {
    /// Let every held and future call through.
    pub fn open(&self) { self.open.send_replace(true); }

    /// Wait until the handler has started another call.
    pub async fn started(&mut self) -> Option<CallId> { self.started.recv().await }

    /// Ids of the calls that reached the handler, in order.
    #[must_use]
    pub fn seen(&self) -> Vec<u64> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|id| id.as_u64())
            .collect()
    }
}

#[async_trait]
impl Handler<String, String> for GatedEcho {
    async fn handle(
        &self,
        call: &Call<String, String>,
        _cells: Option<SideChannel>,
    ) -> Result<Reply<String>, HandlerError> {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call.id());
        let _ = self.started.send(call.id());
        let mut open = self.open.clone();
        loop {
            let is_open = *open.borrow_and_update();
            if is_open {
                break;
            }
            open.changed()
                .await
                .map_err(|_| HandlerError::new("gate dropped"))?;
        }
        Ok(Reply::new(call.param().cloned().unwrap_or_default()))
    }
}
