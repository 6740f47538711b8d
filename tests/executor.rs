#![cfg(not(loom))]
//! End-to-end tests driving calls through a [`CallExecutor`].

use std::{
    error::Error,
    iter,
    sync::Arc,
};

use bytes::Bytes;
use callframe::{
    AdmissionError,
    CallExecutor,
    CallId,
    ErrorKind,
    ExecutorConfig,
    Priority,
    RejectionPolicy,
    Response,
    SubmitError,
    call::SideChannel,
    connection::Connection,
};
use callframe_testing::{
    Cooperative,
    Echo,
    Failing,
    Gate,
    GatedEcho,
    Panicking,
    RecordingSink,
    call,
    connection,
    gated,
};
use rstest::{fixture, rstest};
use tokio::time::{self, Duration};

type TestResult<T = ()> = Result<T, Box<dyn Error + Send + Sync>>;

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

fn single_worker() -> ExecutorConfig {
    ExecutorConfig::builder()
        .workers(1)
        .queue_capacity_bytes(1000)
        .build()
        .expect("valid configuration")
}

/// Start a one-worker executor and park its worker on call 0.
async fn blocked_executor(
    harness: &Harness,
    config: ExecutorConfig,
) -> TestResult<(CallExecutor<String, String>, Gate)> {
    let (handler, mut gate): (GatedEcho, Gate) = gated();
    let executor = CallExecutor::start(config, handler);
    executor
        .submit(call(&harness.conn, 0).priority(Priority::HIGH).build())
        .await?;
    assert_eq!(gate.started().await, Some(CallId::new(0)));
    Ok((executor, gate))
}

#[rstest]
#[tokio::test]
async fn over_budget_call_is_rejected_until_bytes_are_released(harness: Harness) -> TestResult {
    let (handler, mut gate) = gated();
    let executor = CallExecutor::start(single_worker(), handler);

    executor
        .submit(call(&harness.conn, 1).size(600).build())
        .await?;
    assert_eq!(gate.started().await, Some(CallId::new(1)));
    assert_eq!(executor.admission().outstanding(), 600);

    let err = executor
        .submit(call(&harness.conn, 2).size(500).build())
        .await
        .expect_err("1100 bytes exceed the budget");
    assert!(matches!(
        err,
        SubmitError::Rejected {
            source: AdmissionError::OverCapacity { requested: 500, .. },
            ..
        }
    ));
    let rejected = harness.sink.take();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].0, CallId::new(2));
    assert_eq!(rejected[0].1.error_kind(), Some(ErrorKind::Overloaded));
    assert!(rejected[0].1.error_kind().is_some_and(ErrorKind::is_rejection));

    gate.open();
    executor.shutdown().await;
    assert_eq!(executor.admission().outstanding(), 0);
    assert_eq!(harness.sink.call_ids(), vec![CallId::new(1)]);

    let (handler, reopened) = gated();
    reopened.open();
    let executor = CallExecutor::with_admission(
        single_worker(),
        handler,
        Arc::clone(executor.admission()),
    );
    executor
        .submit(call(&harness.conn, 3).size(500).build())
        .await?;
    executor.shutdown().await;
    assert_eq!(harness.sink.call_ids(), vec![CallId::new(1), CallId::new(3)]);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn silent_policy_drops_rejected_call(harness: Harness) -> TestResult {
    let config = ExecutorConfig::builder()
        .workers(1)
        .queue_capacity_bytes(100)
        .rejection_policy(RejectionPolicy::Silent)
        .build()?;
    let executor = CallExecutor::start(config, Echo);
    let err = executor
        .submit(call(&harness.conn, 1).size(101).build())
        .await
        .expect_err("over budget");
    assert_eq!(err.call_id(), CallId::new(1));
    executor.shutdown().await;
    assert!(harness.sink.is_empty());
    assert_eq!(harness.conn.in_flight(), 0);
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn call_expiring_in_queue_is_never_executed(harness: Harness) -> TestResult {
    let (executor, gate) = blocked_executor(&harness, single_worker()).await?;

    executor
        .submit(
            call(&harness.conn, 1)
                .timeout(Some(Duration::from_millis(50)))
                .build(),
        )
        .await?;
    time::advance(Duration::from_millis(100)).await;
    gate.open();
    executor.shutdown().await;

    assert_eq!(gate.seen(), vec![0]);
    let sent = harness.sink.take();
    let expired = sent
        .iter()
        .find(|(id, _)| *id == CallId::new(1))
        .expect("expired call answered");
    assert_eq!(expired.1.error_kind(), Some(ErrorKind::DeadlineExceeded));
    assert_eq!(harness.conn.in_flight(), 0);
    Ok(())
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn call_expired_at_submit_is_answered_immediately(harness: Harness) -> TestResult {
    let executor = CallExecutor::start(single_worker(), Echo);
    let expired = call(&harness.conn, 4)
        .timeout(Some(Duration::from_millis(10)))
        .build();
    time::advance(Duration::from_millis(20)).await;
    let err = executor.submit(expired).await.expect_err("already expired");
    assert_eq!(err, SubmitError::Expired(CallId::new(4)));
    let sent = harness.sink.take();
    assert_eq!(sent[0].1.error_kind(), Some(ErrorKind::DeadlineExceeded));
    executor.shutdown().await;
    Ok(())
}

#[rstest]
#[tokio::test]
async fn handler_error_keeps_cause_and_releases_cells(harness: Harness) -> TestResult {
    let marker = Arc::new(());
    let cells = {
        let marker = Arc::clone(&marker);
        SideChannel::new(iter::once(Bytes::from_static(b"cell")).map(move |cell| {
            let _held = &marker;
            cell
        }))
    };
    let executor = CallExecutor::start(single_worker(), Failing);
    executor
        .submit(call(&harness.conn, 1).size(100).cells(cells).build())
        .await?;
    executor.shutdown().await;

    let sent = harness.sink.take();
    let Response::Failure(error) = &sent[0].1 else {
        panic!("expected an error response");
    };
    assert_eq!(error.kind, ErrorKind::HandlerFailure);
    assert!(!error.kind.is_rejection());
    assert!(error.message.contains("region not online"));
    let cause = error.cause.as_ref().expect("cause preserved");
    assert!(cause.to_string().contains("region not online"));
    assert_eq!(Arc::strong_count(&marker), 1);
    assert_eq!(executor.admission().outstanding(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn panicking_handler_becomes_error_response(harness: Harness) -> TestResult {
    let executor = CallExecutor::start(single_worker(), Panicking);
    executor.submit(call(&harness.conn, 1).build()).await?;
    executor.submit(call(&harness.conn, 2).build()).await?;
    executor.shutdown().await;

    let sent = harness.sink.take();
    assert_eq!(sent.len(), 2, "worker survives the first panic");
    for (_, response) in &sent {
        let Response::Failure(error) = response else {
            panic!("expected an error response");
        };
        assert_eq!(error.kind, ErrorKind::HandlerFailure);
        assert!(error.message.contains("handler exploded"), "{}", error.message);
        assert!(error.cause.is_some());
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn fairness_lets_normal_calls_through(harness: Harness) -> TestResult {
    let config = ExecutorConfig::builder()
        .workers(1)
        .max_high_before_low(3)
        .build()?;
    let (executor, gate) = blocked_executor(&harness, config).await?;

    for id in 1..=8 {
        executor
            .submit(call(&harness.conn, id).priority(Priority::HIGH).build())
            .await?;
    }
    for id in 101..=103 {
        executor
            .submit(call(&harness.conn, id).priority(Priority::NORMAL).build())
            .await?;
    }
    assert_eq!(executor.queued(), 11);
    gate.open();
    executor.shutdown().await;

    assert_eq!(
        gate.seen(),
        vec![0, 1, 2, 3, 101, 4, 5, 6, 102, 7, 8, 103]
    );
    assert_eq!(harness.sink.len(), 12);
    Ok(())
}

#[rstest]
#[case::bounded(Some(Duration::from_millis(50)), None)]
#[case::unbounded(None, Some("steps=8"))]
#[tokio::test(start_paused = true)]
async fn handler_polls_remaining_time_and_stops_early(
    harness: Harness,
    #[case] timeout: Option<Duration>,
    #[case] expected: Option<&str>,
) -> TestResult {
    let handler = Cooperative {
        step: Duration::from_millis(20),
        steps: 8,
    };
    let executor = CallExecutor::start(single_worker(), handler);
    let started = time::Instant::now();
    executor
        .submit(call(&harness.conn, 1).timeout(timeout).build())
        .await?;
    executor.shutdown().await;

    let sent = harness.sink.take();
    assert_eq!(sent.len(), 1);
    match (expected, &sent[0].1) {
        (Some(text), Response::Success { result, .. }) => {
            assert_eq!(result, text);
            assert!(started.elapsed() >= Duration::from_millis(160));
        }
        (None, Response::Failure(error)) => {
            assert_eq!(error.kind, ErrorKind::HandlerFailure);
            assert!(error.message.contains("deadline reached after 2 steps"), "{}", error.message);
            assert!(started.elapsed() < Duration::from_millis(100));
        }
        (_, other) => panic!("unexpected response {other:?}"),
    }
    Ok(())
}

#[rstest]
#[tokio::test]
async fn closed_connection_calls_are_dropped_without_response(harness: Harness) -> TestResult {
    let (executor, gate) = blocked_executor(&harness, single_worker()).await?;
    executor.submit(call(&harness.conn, 1).build()).await?;
    executor.submit(call(&harness.conn, 2).build()).await?;

    assert_eq!(harness.conn.close(), 2);
    gate.open();
    executor.shutdown().await;

    assert_eq!(gate.seen(), vec![0]);
    assert!(harness.sink.is_empty(), "closed connection receives nothing");
    assert_eq!(harness.conn.in_flight(), 0);
    assert_eq!(executor.admission().outstanding(), 0);
    Ok(())
}

#[rstest]
#[tokio::test]
async fn shutdown_drains_queue_then_refuses_new_calls(harness: Harness) -> TestResult {
    let (executor, gate) = blocked_executor(&harness, single_worker()).await?;
    executor.submit(call(&harness.conn, 1).build()).await?;
    gate.open();
    executor.shutdown().await;
    assert!(executor.is_shutting_down());
    assert_eq!(gate.seen(), vec![0, 1]);

    let err = executor
        .submit(call(&harness.conn, 2).build())
        .await
        .expect_err("executor is shut down");
    assert_eq!(err, SubmitError::ShuttingDown(CallId::new(2)));
    let sent = harness.sink.take();
    let last = sent.last().expect("refusal answered");
    assert_eq!(last.0, CallId::new(2));
    assert_eq!(last.1.error_kind(), Some(ErrorKind::ShuttingDown));
    assert!(last.1.error_kind().is_some_and(ErrorKind::is_rejection));
    assert_eq!(executor.admission().outstanding(), 0);
    Ok(())
}

#[rstest]
#[case(false)]
#[case(true)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_submitted_call_is_answered_once(
    harness: Harness,
    #[case] fast_path: bool,
) -> TestResult {
    let config = ExecutorConfig::builder()
        .workers(4)
        .fast_path(fast_path)
        .build()?;
    let executor = CallExecutor::start(config, Echo);
    for id in 0..200 {
        let priority = if id % 5 == 0 { Priority::HIGH } else { Priority::NORMAL };
        executor
            .submit(call(&harness.conn, id).priority(priority).size(64).build())
            .await?;
    }
    executor.shutdown().await;

    let mut ids: Vec<u64> = harness
        .sink
        .call_ids()
        .into_iter()
        .map(|id| id.as_u64())
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..200).collect::<Vec<_>>());
    assert_eq!(executor.admission().outstanding(), 0);
    assert_eq!(harness.conn.in_flight(), 0);
    Ok(())
}
