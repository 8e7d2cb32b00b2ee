use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};

use wakecue::arbiter::{
    ArbiterEvent, AudioSessionRequest, Phase, RejectReason, SessionDecision, SessionSource,
};
use wakecue::config::ArbiterConfig;

use crate::helpers::{drain_events, no_cooldown, scripted_arbiter, wait_for_phase};

#[test]
fn concurrent_requests_admit_exactly_one_session() {
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    let barrier = Arc::new(Barrier::new(8));
    let winners = Arc::new(AtomicUsize::new(0));
    let busy = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..8 {
        let arbiter = arbiter.clone();
        let barrier = Arc::clone(&barrier);
        let winners = Arc::clone(&winners);
        let busy = Arc::clone(&busy);
        handles.push(std::thread::spawn(move || {
            let req = AudioSessionRequest::text(
                format!("alarm-{i}"),
                SessionSource::Scheduled,
                "wake up",
            );
            barrier.wait();
            match arbiter.request_session_at(req, 1_000) {
                SessionDecision::Accepted => {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
                SessionDecision::Busy => {
                    busy.fetch_add(1, Ordering::SeqCst);
                }
                other => panic!("unexpected decision {other:?}"),
            }
        }));
    }

    for handle in handles {
        handle.join().expect("join");
    }

    assert_eq!(
        winners.load(Ordering::SeqCst),
        1,
        "exactly one contended request should be admitted"
    );
    assert_eq!(busy.load(Ordering::SeqCst), 7);

    wait_for_phase(&arbiter, Phase::Playing);
    assert_eq!(backend.started(), 1);
    assert_eq!(backend.live_handles(), 1);
}

#[test]
fn concurrent_stops_release_the_handle_once() {
    let (arbiter, backend, _rt) = scripted_arbiter(no_cooldown());
    assert!(arbiter.request_session(AudioSessionRequest::text(
        "alarm-1",
        SessionSource::Scheduled,
        "wake up",
    )));
    wait_for_phase(&arbiter, Phase::Playing);

    let barrier = Arc::new(Barrier::new(6));
    let mut handles = Vec::new();
    for i in 0..6 {
        let arbiter = arbiter.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            if i % 2 == 0 {
                arbiter.stop_session("alarm-1", SessionSource::Scheduled);
            } else {
                arbiter.force_stop_all(SessionSource::ForceStop);
            }
        }));
    }
    for handle in handles {
        handle.join().expect("join");
    }

    assert_eq!(arbiter.phase(), Phase::Idle);
    assert_eq!(arbiter.current_session_id(), None);
    assert_eq!(backend.stopped(), 1);
    assert_eq!(backend.released(), 1);
    assert_eq!(backend.live_handles(), 0);
}

#[test]
fn cooldown_applies_across_sources() {
    let config = ArbiterConfig {
        cooldown_ms: 3_000,
        ..ArbiterConfig::default()
    };
    let (arbiter, _backend, _rt) = scripted_arbiter(config);
    let mut events = arbiter.subscribe();

    let first = AudioSessionRequest::text("alarm-1", SessionSource::Scheduled, "wake up");
    assert_eq!(arbiter.request_session_at(first, 10_000), SessionDecision::Accepted);
    wait_for_phase(&arbiter, Phase::Playing);
    arbiter.stop_session("alarm-1", SessionSource::Scheduled);

    let step = AudioSessionRequest::text("step-1", SessionSource::RoutineStep, "stretch");
    assert_eq!(
        arbiter.request_session_at(step.clone(), 11_000),
        SessionDecision::Cooldown
    );
    assert_eq!(arbiter.request_session_at(step, 13_000), SessionDecision::Accepted);

    let rejected: Vec<_> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ArbiterEvent::Rejected { reason, .. } => Some(reason),
            ArbiterEvent::PhaseChanged { .. } => None,
        })
        .collect();
    assert_eq!(rejected, vec![RejectReason::Cooldown]);
}
