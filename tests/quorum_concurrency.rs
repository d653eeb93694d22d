//! Quorum state under concurrent replica events

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use shardkv::{AckState, Method, QuorumOutcome};

#[derive(Clone, Copy)]
enum Event {
    Success(i64),
    Failure,
    Missed,
}

/// Deliver every event from its own thread; returns all outcomes fired.
fn race(method: Method, ack: usize, events: &[Event]) -> (Arc<AckState>, Vec<QuorumOutcome>) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    let state = Arc::new(
        AckState::new(method, ack, events.len(), move |outcome| {
            sink.lock().unwrap().push(outcome.clone());
        })
        .unwrap(),
    );

    let barrier = Arc::new(std::sync::Barrier::new(events.len()));
    let handles: Vec<_> = events
        .iter()
        .copied()
        .map(|event| {
            let state = state.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                match event {
                    Event::Success(ts) => state.on_success(ts, 200, format!("v{}", ts)),
                    Event::Failure => state.on_failure(),
                    Event::Missed => state.on_missed(),
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let fired = fired.lock().unwrap().clone();
    (state, fired)
}

#[test]
fn test_fires_exactly_once_under_contention() {
    for round in 0..200 {
        let events: Vec<Event> = (0..8)
            .map(|i| match (i + round) % 3 {
                0 => Event::Success(i as i64),
                1 => Event::Failure,
                _ => Event::Missed,
            })
            .collect();
        let successes = events
            .iter()
            .filter(|e| matches!(e, Event::Success(_)))
            .count();

        for ack in 1..=8 {
            let (state, fired) = race(Method::Put, ack, &events);
            assert_eq!(fired.len(), 1, "round {} ack {}", round, ack);
            assert_eq!(fired[0].success, successes >= ack);
            assert_eq!(state.answered(), 8);
            assert_eq!(state.acknowledged(), successes);
            assert_eq!(state.outcome(), Some(&fired[0]));
        }
    }
}

#[test]
fn test_read_returns_highest_timestamp() {
    for round in 0..200i64 {
        let events: Vec<Event> = (0..8)
            .map(|i| Event::Success((i * 7 + round) % 11))
            .collect();
        let newest = (0..8).map(|i| (i * 7 + round) % 11).max().unwrap();

        let (_, fired) = race(Method::Get, 8, &events);
        assert_eq!(fired.len(), 1);
        let best = fired[0].best.clone().unwrap();
        assert_eq!(best.timestamp, newest);
        assert_eq!(best.payload, format!("v{}", newest).into_bytes());
    }
}

#[test]
fn test_no_success_after_unreachable_quorum() {
    let (_, fired) = race(
        Method::Delete,
        3,
        &[Event::Failure, Event::Missed, Event::Success(1), Event::Success(2)],
    );
    assert_eq!(fired.len(), 1);
    assert!(!fired[0].success);
}

#[test]
fn test_extra_events_never_refire() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let state = Arc::new(
        AckState::new(Method::Put, 1, 4, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap(),
    );

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let state = state.clone();
            thread::spawn(move || state.on_success(i, 201, Vec::<u8>::new()))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.answered(), 4);
    assert_eq!(state.acknowledged(), 4);
}
