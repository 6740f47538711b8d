//! Load demo for `callframe`.
//!
//! Submits a synthetic stream of calls from one in-process connection to a
//! [`CallExecutor`] and reports how many were answered, rejected or timed
//! out.

mod cli;

use std::{
    error::Error,
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use callframe::{
    call::{Attributes, Call, CallId, CallTarget, Priority, RequestHeader, SideChannel},
    config::{ExecutorConfig, RejectionPolicy},
    connection::{Connection, ConnectionId},
    dispatch::{Handler, HandlerError, Reply},
    executor::CallExecutor,
    response::{ErrorKind, Response, ResponseSink},
};
use clap::Parser;
use tokio::time::{Duration, sleep};
use tracing::{debug, info};

/// Handler that waits a fixed time and replies with the parameter length.
struct Sleepy {
    latency: Duration,
}

#[async_trait]
impl Handler<Vec<u8>, usize> for Sleepy {
    async fn handle(
        &self,
        call: &Call<Vec<u8>, usize>,
        _cells: Option<SideChannel>,
    ) -> Result<Reply<usize>, HandlerError> {
        sleep(self.latency).await;
        let len = call.param().map_or(0, Vec::len);
        call.increment_response_cell_size(8);
        Ok(Reply::new(len))
    }
}

/// Sink counting responses by outcome.
#[derive(Default)]
struct Tally {
    ok: AtomicU64,
    overloaded: AtomicU64,
    expired: AtomicU64,
    failed: AtomicU64,
}

#[async_trait]
impl ResponseSink<usize> for Tally {
    async fn send(&self, _call_id: CallId, response: Response<usize>) -> io::Result<()> {
        let counter = match response.error_kind() {
            None => &self.ok,
            Some(ErrorKind::Overloaded) => &self.overloaded,
            Some(ErrorKind::DeadlineExceeded) => &self.expired,
            Some(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    install_metrics(&cli)?;

    let policy = if cli.silent_rejections {
        RejectionPolicy::Silent
    } else {
        RejectionPolicy::Respond
    };
    let config = ExecutorConfig::builder()
        .workers(cli.workers)
        .queue_capacity_bytes(cli.capacity_bytes)
        .max_high_before_low(cli.max_high_before_low)
        .fast_path(cli.fast_path)
        .rejection_policy(policy)
        .build()?;
    let executor = CallExecutor::start(
        config,
        Sleepy {
            latency: Duration::from_millis(cli.latency_ms),
        },
    );

    let tally = Arc::new(Tally::default());
    let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let conn = Connection::new(
        ConnectionId::new(1),
        peer,
        Attributes::empty(),
        Arc::clone(&tally),
    );
    let timeout = (cli.timeout_ms > 0).then(|| Duration::from_millis(cli.timeout_ms));

    let mut refused = 0_u64;
    for id in 0..cli.calls {
        let priority = if cli.high_every > 0 && id % cli.high_every == 0 {
            Priority::HIGH
        } else {
            Priority::NORMAL
        };
        let call = Call::builder(
            Arc::clone(&conn),
            RequestHeader::new(id, "Echo"),
            CallTarget::new("DemoService", "Echo"),
        )
        .param(vec![0; 16])
        .priority(priority)
        .size(cli.call_size)
        .timeout(timeout)
        .build();
        if let Err(e) = executor.submit(call).await {
            debug!(error = %e, "call not queued");
            refused += 1;
        }
        if id % 64 == 63 {
            tokio::task::yield_now().await;
        }
    }

    executor.shutdown().await;
    conn.close();
    info!(
        submitted = cli.calls,
        refused,
        ok = tally.ok.load(Ordering::Relaxed),
        overloaded = tally.overloaded.load(Ordering::Relaxed),
        expired = tally.expired.load(Ordering::Relaxed),
        failed = tally.failed.load(Ordering::Relaxed),
        "demo finished"
    );
    Ok(())
}

#[cfg(feature = "metrics")]
fn install_metrics(cli: &cli::Cli) -> Result<(), Box<dyn Error>> {
    if let Some(addr) = cli.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "serving prometheus metrics");
    }
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(cli: &cli::Cli) -> Result<(), Box<dyn Error>> {
    if cli.metrics_addr.is_some() {
        tracing::warn!("built without the metrics feature; --metrics-addr ignored");
    }
    Ok(())
}
