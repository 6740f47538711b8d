#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for the call latch and byte budget using loom.
//!
//! These tests exercise the lock-free shared state without Tokio. `loom`
//! explores interleavings to ensure a call is answered at most once, that
//! lifecycle transitions never skip a state and that concurrent reservations
//! never overshoot the capacity.

use std::{num::NonZeroU64, sync::Arc};

use callframe::{AdmissionController, CallState, call::CallShared};
use loom::{model, thread};

#[test]
fn response_latch_has_single_winner() {
    model(|| {
        let shared = Arc::new(CallShared::default());
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || shared.claim_response())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().expect("claim thread panicked"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        assert!(shared.is_responded());
    });
}

#[test]
fn abandonment_races_execution() {
    model(|| {
        let shared = Arc::new(CallShared::default());
        shared
            .transition(CallState::Admitted)
            .expect("pending call admits");

        let worker = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.transition(CallState::Executing).is_ok())
        };
        let closer = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || shared.transition(CallState::Abandoned).is_ok())
        };
        let executed = worker.join().expect("worker thread panicked");
        let abandoned = closer.join().expect("closer thread panicked");

        match shared.state() {
            CallState::Executing => assert!(executed && !abandoned),
            CallState::Abandoned => assert!(abandoned),
            other => panic!("unexpected state {other}"),
        }
    });
}

#[test]
fn concurrent_reservations_respect_capacity() {
    model(|| {
        let budget = Arc::new(AdmissionController::new(
            NonZeroU64::new(100).expect("non-zero"),
        ));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let budget = Arc::clone(&budget);
                thread::spawn(move || budget.try_reserve(60).ok())
            })
            .collect();
        let held: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().expect("reserve thread panicked"))
            .collect();

        assert_eq!(held.len(), 1, "only one 60-byte reservation fits");
        assert_eq!(budget.outstanding(), 60);
        drop(held);
        assert_eq!(budget.outstanding(), 0);
    });
}
