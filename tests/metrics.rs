#![cfg(all(feature = "metrics", not(loom)))]
//! Tests for `callframe` metrics.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.

use std::{num::NonZeroU64, sync::Arc};

use callframe::{
    AdmissionController,
    CallState,
    ErrorKind,
    metrics::{
        CALLS_TOTAL,
        CONNECTIONS_ACTIVE,
        ERRORS_TOTAL,
        OUTSTANDING_BYTES,
        RESPONSE_BYTES_TOTAL,
    },
    response::Response,
};
use callframe_testing::{
    RecordingSink,
    call,
    connection,
    counter_value,
    debugging_recorder_setup,
    gauge_value,
};
use rstest::rstest;

fn budget() -> Arc<AdmissionController> {
    Arc::new(AdmissionController::new(
        NonZeroU64::new(1000).expect("non-zero"),
    ))
}

#[test]
fn reservations_update_outstanding_gauge() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let held = metrics::with_local_recorder(&recorder, || {
        let budget = budget();
        let held = budget.try_reserve(300).expect("fits");
        drop(budget.try_reserve(200).expect("fits"));
        held
    });
    assert_eq!(gauge_value(&snapshotter, OUTSTANDING_BYTES), Some(300.0));
    assert_eq!(held.bytes(), 300);
}

#[test]
fn released_reservations_return_gauge_to_zero() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let budget = budget();
        let first = budget.try_reserve(600).expect("fits");
        let second = budget.try_reserve(400).expect("fits");
        drop(first);
        drop(second);
    });
    assert_eq!(gauge_value(&snapshotter, OUTSTANDING_BYTES), Some(0.0));
}

#[test]
fn cleanup_counts_final_state() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let sink = RecordingSink::<String>::new();
        let conn = connection(&sink);
        drop(call(&conn, 1).build());
    });
    assert_eq!(
        counter_value(
            &snapshotter,
            CALLS_TOTAL,
            &[("outcome", CallState::Abandoned.to_string().as_str())]
        ),
        Some(1)
    );
}

#[test]
fn connection_gauge_counts_open_connections() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let sink = RecordingSink::<String>::new();
    let conns = metrics::with_local_recorder(&recorder, || {
        vec![connection(&sink), connection(&sink)]
    });
    assert_eq!(gauge_value(&snapshotter, CONNECTIONS_ACTIVE), Some(2.0));
    drop(conns);
}

#[test]
fn dropped_connection_decrements_gauge() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let sink = RecordingSink::<String>::new();
        drop(connection(&sink));
    });
    assert_eq!(gauge_value(&snapshotter, CONNECTIONS_ACTIVE), Some(0.0));
}

#[test]
fn double_response_is_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        let sink = RecordingSink::<String>::new();
        let conn = connection(&sink);
        let call = call(&conn, 1).build();
        call.set_response(Response::success("a".to_owned()))
            .expect("first response");
        assert!(call.set_response(Response::success("b".to_owned())).is_err());
    });
    assert_eq!(
        counter_value(&snapshotter, ERRORS_TOTAL, &[("kind", "double_response")]),
        Some(1)
    );
}

#[rstest]
#[case(ErrorKind::Overloaded, 1)]
#[case(ErrorKind::DeadlineExceeded, 2)]
#[case(ErrorKind::HandlerFailure, 3)]
fn error_kinds_are_labelled(#[case] kind: ErrorKind, #[case] expected: u64) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        (0..expected).for_each(|_| callframe::metrics::inc_errors(kind));
    });
    assert_eq!(
        counter_value(&snapshotter, ERRORS_TOTAL, &[("kind", kind.as_str())]),
        Some(expected)
    );
}

#[test]
fn response_bytes_accumulate() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    metrics::with_local_recorder(&recorder, || {
        callframe::metrics::add_response_bytes(100);
        callframe::metrics::add_response_bytes(28);
    });
    assert_eq!(
        counter_value(&snapshotter, RESPONSE_BYTES_TOTAL, &[]),
        Some(128)
    );
}
