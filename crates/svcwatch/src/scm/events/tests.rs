// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::*;
use crate::core::rt::InlineDispatcher;
use crate::scm::backend::{
    RegisterStatus, ERROR_SERVICE_MARKED_FOR_DELETE, ERROR_SERVICE_NOTIFY_CLIENT_LAGGING,
};
use crate::scm::sim::SimScm;
use crate::scm::status::{ServiceState, ServiceStatus};
use std::sync::Mutex as TestMutex;

fn engine(
    sim: &SimScm,
    handle: RawServiceHandle,
    scope: NotifyScope,
    mask: NotifyMask,
) -> ServiceEvents {
    // Inline dispatch makes delivery synchronous with SimScm::fire.
    ServiceEvents::with_dispatcher(
        Arc::new(sim.clone()),
        handle,
        scope,
        mask,
        Arc::new(InlineDispatcher),
    )
}

fn status(state: ServiceState) -> ServiceStatus {
    ServiceStatus::with_state(state)
}

#[test]
fn test_first_subscribe_arms_once() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(1);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    assert_eq!(sim.registration_count(), 0);
    events.subscribe(|_| {}).expect("subscribe should arm");
    assert_eq!(sim.registration_count(), 1);

    events.subscribe(|_| {}).expect("subscribe should reuse");
    assert_eq!(sim.registration_count(), 1);
    assert_eq!(events.subscriber_count(), 2);
}

#[test]
fn test_explicit_start_is_idempotent() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(2);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    events.start().expect("start should arm");
    events.start().expect("start should be idempotent");
    assert_eq!(sim.registration_count(), 1);
    assert_eq!(events.subscriber_count(), 0);
}

#[test]
fn test_rearm_after_every_fire() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(3);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should arm");

    for round in 0..100u64 {
        // Alternate states so the suppression mask never blocks the fire.
        let state = if round % 2 == 0 {
            ServiceState::Running
        } else {
            ServiceState::Stopped
        };
        assert!(sim.fire(handle, state.notify_flag(), status(state)));

        let stats = events.stats();
        assert_eq!(stats.registrations, round + 2);
        assert_eq!(stats.fires, round + 1);
        assert_eq!(stats.buffers_allocated, stats.buffers_freed + 1);
    }

    assert_eq!(sim.registration_count(), 101);
    assert!(!events.is_halted());
    assert_eq!(seen.lock().expect("event log poisoned").len(), 100);
}

#[test]
fn test_events_delivered_in_fire_order() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(4);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should arm");

    sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running));
    sim.fire(handle, NotifyMask::PAUSED, status(ServiceState::Paused));
    sim.fire(handle, NotifyMask::STOPPED, status(ServiceState::Stopped));

    assert_eq!(
        *seen.lock().expect("event log poisoned"),
        vec![NotifyMask::RUNNING, NotifyMask::PAUSED, NotifyMask::STOPPED]
    );
}

#[test]
fn test_service_scope_suppresses_reported_flags() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(5);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    events.start().expect("start should arm");
    assert_eq!(sim.pending_mask(handle), Some(NotifyMask::ALL));

    sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running));
    assert_eq!(
        sim.pending_mask(handle),
        Some(NotifyMask::ALL & !NotifyMask::RUNNING)
    );

    // The next fire replaces the suppression set; RUNNING is requestable again.
    sim.fire(handle, NotifyMask::PAUSED, status(ServiceState::Paused));
    assert_eq!(
        sim.pending_mask(handle),
        Some(NotifyMask::ALL & !NotifyMask::PAUSED)
    );
}

#[test]
fn test_manager_scope_rearms_with_full_mask() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(6);
    let mask = NotifyMask::CREATED | NotifyMask::DELETED;
    let events = engine(&sim, handle, NotifyScope::Manager, mask);

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push((event.created.clone(), event.deleted.clone()));
        })
        .expect("subscribe should arm");

    assert!(sim.fire_with_names(
        handle,
        NotifyMask::CREATED,
        ServiceStatus::default(),
        &["fresh-svc"],
        &[],
    ));

    assert_eq!(sim.pending_mask(handle), Some(mask));
    assert_eq!(sim.outstanding_name_blocks(), 0);
    assert_eq!(
        *seen.lock().expect("event log poisoned"),
        vec![(vec!["fresh-svc".to_string()], Vec::new())]
    );
}

#[test]
fn test_unsubscribe_keeps_loop_running() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(7);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    let id = events.subscribe(|_| {}).expect("subscribe should arm");
    assert!(events.unsubscribe(id));
    assert!(!events.unsubscribe(id));
    assert_eq!(events.subscriber_count(), 0);

    // The loop outlives its subscribers; only dispose stops it.
    sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running));
    assert_eq!(sim.registration_count(), 2);
    assert!(sim.has_pending(handle));
}

#[test]
fn test_first_registration_failure_propagates_and_allows_retry() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(8);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    sim.fail_next_register(RegisterStatus::Failed(31));
    assert_eq!(
        events.subscribe(|_| {}).unwrap_err(),
        Error::Native { code: 31 }
    );
    assert!(!events.is_halted());

    // Transient failure leaves the engine idle; a retry may succeed.
    events.subscribe(|_| {}).expect("retry should arm");
    assert_eq!(sim.registration_count(), 1);
}

#[test]
fn test_fatal_first_registration_halts() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(9);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    sim.fail_next_register(RegisterStatus::MarkedForDeletion);
    assert_eq!(
        events.subscribe(|_| {}).unwrap_err(),
        Error::MarkedForDeletion
    );
    assert!(events.is_halted());

    // A halted engine accepts handlers but never arms again.
    events.subscribe(|_| {}).expect("subscribe should attach");
    assert_eq!(sim.registration_count(), 0);

    let stats = events.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_freed);
}

#[test]
fn test_rearm_failure_halts_silently_after_delivery() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(10);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should arm");

    sim.fail_next_register(RegisterStatus::ClientLagging);
    sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running));

    // The event that preceded the failed re-arm is still delivered.
    assert_eq!(
        *seen.lock().expect("event log poisoned"),
        vec![NotifyMask::RUNNING]
    );
    assert!(events.is_halted());
    assert_eq!(sim.registration_count(), 1);
    assert!(!sim.has_pending(handle));

    let stats = events.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_freed);
}

#[test]
fn test_callback_reported_error_halts_without_delivery() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(11);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should arm");

    assert!(sim.fire_error(handle, ERROR_SERVICE_MARKED_FOR_DELETE));

    assert!(events.is_halted());
    assert!(seen.lock().expect("event log poisoned").is_empty());

    let stats = events.stats();
    assert_eq!(stats.fires, 1);
    assert_eq!(stats.buffers_allocated, stats.buffers_freed);
}

#[test]
fn test_callback_reported_lagging_halts() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(17);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    events.start().expect("start should arm");
    assert!(sim.fire_error(handle, ERROR_SERVICE_NOTIFY_CLIENT_LAGGING));

    assert!(events.is_halted());
    assert!(!sim.has_pending(handle));
}

#[test]
fn test_dispose_stops_rearm_and_frees_late_block() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(12);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should arm");

    events.dispose();
    assert!(events.is_disposed());

    // The registration armed before dispose is still pending at the
    // manager; its late callback must release the block and not re-arm.
    assert!(sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running)));

    assert_eq!(sim.registration_count(), 1);
    assert!(!sim.has_pending(handle));
    assert!(seen.lock().expect("event log poisoned").is_empty());

    let stats = events.stats();
    assert_eq!(stats.buffers_allocated, stats.buffers_freed);
}

#[test]
fn test_subscribe_after_dispose_fails() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(13);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    events.dispose();
    assert_eq!(events.subscribe(|_| {}).unwrap_err(), Error::Disposed);
    assert_eq!(events.start().unwrap_err(), Error::Disposed);
}

#[test]
fn test_dispose_is_idempotent() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(14);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    events.start().expect("start should arm");
    events.dispose();
    events.dispose();
    assert!(events.is_disposed());
}

#[test]
fn test_panicking_subscriber_does_not_stop_delivery() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(15);
    let events = engine(&sim, handle, NotifyScope::Service, NotifyMask::ALL);

    events
        .subscribe(|_| panic!("bad subscriber"))
        .expect("subscribe should arm");

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should attach");

    sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running));

    assert_eq!(
        *seen.lock().expect("event log poisoned"),
        vec![NotifyMask::RUNNING]
    );
    assert!(sim.has_pending(handle));
}

#[test]
fn test_worker_dispatcher_delivers_off_callback_thread() {
    let sim = SimScm::new();
    let handle = RawServiceHandle::from_raw(16);
    let events = ServiceEvents::new(
        Arc::new(sim.clone()),
        handle,
        NotifyScope::Service,
        NotifyMask::ALL,
    );

    let seen = Arc::new(TestMutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    events
        .subscribe(move |event| {
            recorder
                .lock()
                .expect("event log poisoned")
                .push(event.triggered);
        })
        .expect("subscribe should arm");

    sim.fire(handle, NotifyMask::RUNNING, status(ServiceState::Running));

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    loop {
        if !seen.lock().expect("event log poisoned").is_empty() {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "event was never delivered"
        );
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
}
