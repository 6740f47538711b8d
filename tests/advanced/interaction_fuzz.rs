#![cfg(all(feature = "advanced-tests", not(loom)))]
//! Property-based tests for scheduler ordering.
//!
//! Random mixes of priorities are queued and drained to check that the
//! dispatch order matches the documented policy.

use callframe::{CallState, FairnessConfig, Priority, Scheduler};
use callframe_testing::{RecordingSink, TestCall, call, connection};
use proptest::prelude::*;
use rstest::rstest;
use tokio::time::Instant;

async fn run_calls(levels: &[u32], fairness: FairnessConfig) -> Vec<u64> {
    let sink = RecordingSink::<String>::new();
    let conn = connection(&sink);
    let scheduler = Scheduler::<String, String>::new(fairness, false);
    let received = Instant::now();
    for (id, level) in (0u64..).zip(levels) {
        let queued: TestCall = call(&conn, id)
            .priority(Priority::from(*level))
            .received_at(received)
            .build();
        queued
            .shared()
            .transition(CallState::Admitted)
            .expect("fresh call admits");
        scheduler.enqueue(queued).expect("scheduler is open");
    }
    scheduler.close();
    let mut order = Vec::new();
    while let Some(call) = scheduler.dequeue().await {
        order.push(call.id().as_u64());
    }
    order
}

/// Strict ordering: most urgent class first, arrival order within a class.
fn expected_strict(levels: &[u32]) -> Vec<u64> {
    let mut ids: Vec<(u32, u64)> = (0u64..).zip(levels).map(|(id, l)| (*l, id)).collect();
    ids.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    ids.into_iter().map(|(_, id)| id).collect()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(future)
}

proptest! {
    #[test]
    fn strict_order_is_priority_then_arrival(
        levels in proptest::collection::vec(0u32..4, 0..40)
    ) {
        let out = block_on(run_calls(&levels, FairnessConfig::strict()));
        prop_assert_eq!(out, expected_strict(&levels));
    }

    #[test]
    fn fair_order_still_runs_every_call_once(
        levels in proptest::collection::vec(0u32..4, 0..40),
        burst in 1usize..6
    ) {
        let fairness = FairnessConfig {
            max_high_before_low: burst,
            time_slice: None,
        };
        let mut out = block_on(run_calls(&levels, fairness));
        out.sort_unstable();
        let all: Vec<u64> = (0u64..).take(levels.len()).collect();
        prop_assert_eq!(out, all);
    }

    #[test]
    fn fairness_bounds_consecutive_urgent_calls(
        levels in proptest::collection::vec(prop_oneof![Just(0u32), Just(5u32)], 0..40),
        burst in 1usize..6
    ) {
        let fairness = FairnessConfig {
            max_high_before_low: burst,
            time_slice: None,
        };
        let out = block_on(run_calls(&levels, fairness));
        let mut run = 0;
        let mut low_left = levels.iter().filter(|l| **l == 0).count();
        for id in out {
            let index = usize::try_from(id).expect("small id");
            if levels[index] == 5 {
                run += 1;
                if low_left > 0 {
                    prop_assert!(run <= burst, "{run} urgent calls in a row");
                }
            } else {
                run = 0;
                low_left -= 1;
            }
        }
    }
}

#[rstest]
#[case::empty(Vec::new())]
#[case::single_class(vec![1, 1, 1, 1])]
#[case::descending(vec![3, 2, 1, 0])]
#[case::ascending(vec![0, 1, 2, 3])]
#[tokio::test]
async fn boundary_cases(#[case] levels: Vec<u32>) {
    let out = run_calls(&levels, FairnessConfig::strict()).await;
    assert_eq!(out, expected_strict(&levels));
}
