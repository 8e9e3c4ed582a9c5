// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pull-style waits over the push-style event stream.
//!
//! Each wait attaches a temporary subscription that filters the shared
//! stream against the requested flag set, so any number of waiters run
//! concurrently and one fired event can satisfy several of them at once.
//! Completion is one-shot: an event arriving after the timeout already won
//! the race is a no-op, never a double completion.
//!
//! Timeout is an outcome (a [`WaitResult`] with `fired == false`), never an
//! error.

use futures::task::AtomicWaker;
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use super::events::{EngineInner, ServiceEvents};
use super::mask::NotifyMask;
use super::status::NotificationEvent;
use super::Result;
use crate::config;
use crate::core::rt::DeadlineTimer;

/// Outcome of a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitResult {
    /// True when a matching notification fired; false on timeout or when
    /// the engine was disposed while waiting.
    pub fired: bool,
    /// The matching flags, restricted to the requested set. Empty unless
    /// `fired`.
    pub triggered: NotifyMask,
}

impl WaitResult {
    pub(crate) const fn fired(triggered: NotifyMask) -> Self {
        Self {
            fired: true,
            triggered,
        }
    }

    pub(crate) const fn not_fired() -> Self {
        Self {
            fired: false,
            triggered: NotifyMask::NONE,
        }
    }
}

/// One-shot completion slot shared between a waiter, the event stream, the
/// deadline timer, and disposal.
pub(crate) struct WaitCell {
    done: AtomicBool,
    slot: Mutex<Option<WaitResult>>,
    cond: Condvar,
    waker: AtomicWaker,
}

impl WaitCell {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            done: AtomicBool::new(false),
            slot: Mutex::new(None),
            cond: Condvar::new(),
            waker: AtomicWaker::new(),
        })
    }

    /// Complete the cell. Returns false when it was already completed.
    pub(crate) fn complete(&self, result: WaitResult) -> bool {
        if self.done.swap(true, Ordering::AcqRel) {
            return false;
        }
        {
            let mut slot = self.slot.lock();
            *slot = Some(result);
        }
        self.cond.notify_all();
        self.waker.wake();
        true
    }

    fn try_result(&self) -> Option<WaitResult> {
        if !self.done.load(Ordering::Acquire) {
            return None;
        }
        *self.slot.lock()
    }

    /// Block until completed, or until `timeout` elapses.
    fn wait_sync(&self, timeout: Option<Duration>) -> WaitResult {
        let started = Instant::now();
        let deadline = timeout.map(|t| started + t);
        let warn_after = config::wait_warn_threshold();
        let mut warned = false;

        let mut slot = self.slot.lock();
        loop {
            if let Some(result) = *slot {
                return result;
            }

            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut slot, deadline).timed_out() && slot.is_none() {
                        drop(slot);
                        if !self.done.swap(true, Ordering::AcqRel) {
                            return WaitResult::not_fired();
                        }
                        // An event won the race; wait for its result.
                        slot = self.slot.lock();
                        loop {
                            if let Some(result) = *slot {
                                return result;
                            }
                            self.cond.wait(&mut slot);
                        }
                    }
                }
                None => match warn_after {
                    Some(warn) if !warned => {
                        if self.cond.wait_until(&mut slot, started + warn).timed_out()
                            && slot.is_none()
                        {
                            warned = true;
                            log::warn!(
                                "[waiter] wait pending for {:?}; the notification stream may have halted",
                                warn
                            );
                        }
                    }
                    _ => self.cond.wait(&mut slot),
                },
            }
        }
    }
}

/// Future resolving when a matching notification fires, the optional
/// deadline elapses, or the engine is disposed.
///
/// Dropping the future detaches its temporary subscription.
#[must_use = "futures do nothing unless polled"]
pub struct NotifyFuture {
    cell: Arc<WaitCell>,
    engine: Weak<EngineInner>,
    subscription: Option<u64>,
}

impl Future for NotifyFuture {
    type Output = WaitResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<WaitResult> {
        if let Some(result) = self.cell.try_result() {
            return Poll::Ready(result);
        }
        self.cell.waker.register(cx.waker());
        match self.cell.try_result() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

impl Drop for NotifyFuture {
    fn drop(&mut self) {
        if let (Some(id), Some(inner)) = (self.subscription.take(), self.engine.upgrade()) {
            inner.remove_subscriber(id);
        }
    }
}

pub(crate) struct WaitTicket {
    pub(crate) cell: Arc<WaitCell>,
    pub(crate) subscription: Option<u64>,
}

impl EngineInner {
    /// Arm the engine if needed and attach a temporary subscription that
    /// completes the returned cell on the first intersecting event.
    pub(crate) fn begin_wait(self: &Arc<Self>, requested: NotifyMask) -> Result<WaitTicket> {
        if self.is_disposed() {
            let cell = WaitCell::new();
            cell.complete(WaitResult::not_fired());
            return Ok(WaitTicket {
                cell,
                subscription: None,
            });
        }

        self.ensure_started()?;

        let cell = WaitCell::new();
        self.register_wait_cell(&cell);

        let completer = Arc::clone(&cell);
        let id = self.add_subscriber(Arc::new(move |event: &NotificationEvent| {
            let hit = event.triggered & requested;
            if !hit.is_empty() {
                completer.complete(WaitResult::fired(hit));
            }
        }));

        // Disposal may have raced the registration above.
        if self.is_disposed() {
            cell.complete(WaitResult::not_fired());
        }

        Ok(WaitTicket {
            cell,
            subscription: Some(id),
        })
    }
}

impl ServiceEvents {
    /// Block until a notification matching `requested` fires.
    ///
    /// Returns a not-fired result if the engine is disposed while waiting.
    /// If the notification stream halts fatally (see [`ServiceEvents`]
    /// module docs) no event will ever match and this call blocks
    /// indefinitely; a periodic warning is logged after
    /// [`crate::config::DEFAULT_WAIT_WARN`]. Use
    /// [`ServiceEvents::wait_for_timeout`] when that risk matters.
    pub fn wait_for(&self, requested: NotifyMask) -> Result<WaitResult> {
        self.wait_sync_inner(requested, None)
    }

    /// Block until a matching notification fires or `timeout` elapses.
    pub fn wait_for_timeout(
        &self,
        requested: NotifyMask,
        timeout: Duration,
    ) -> Result<WaitResult> {
        self.wait_sync_inner(requested, Some(timeout))
    }

    fn wait_sync_inner(
        &self,
        requested: NotifyMask,
        timeout: Option<Duration>,
    ) -> Result<WaitResult> {
        let ticket = self.inner().begin_wait(requested)?;
        let result = ticket.cell.wait_sync(timeout);
        if let Some(id) = ticket.subscription {
            self.inner().remove_subscriber(id);
        }
        Ok(result)
    }

    /// Future completing on the first notification matching `requested`.
    pub fn wait_for_async(&self, requested: NotifyMask) -> Result<NotifyFuture> {
        let ticket = self.inner().begin_wait(requested)?;
        Ok(NotifyFuture {
            cell: ticket.cell,
            engine: Arc::downgrade(self.inner()),
            subscription: ticket.subscription,
        })
    }

    /// Future completing on the first matching notification or, with a
    /// not-fired result, when `timeout` elapses.
    pub fn wait_for_async_timeout(
        &self,
        requested: NotifyMask,
        timeout: Duration,
    ) -> Result<NotifyFuture> {
        let ticket = self.inner().begin_wait(requested)?;

        let deadline_cell = Arc::downgrade(&ticket.cell);
        DeadlineTimer::global().schedule(
            Instant::now() + timeout,
            Box::new(move || {
                if let Some(cell) = deadline_cell.upgrade() {
                    if cell.complete(WaitResult::not_fired()) {
                        log::debug!("[waiter] async wait timed out");
                    }
                }
            }),
        );

        Ok(NotifyFuture {
            cell: ticket.cell,
            engine: Arc::downgrade(self.inner()),
            subscription: ticket.subscription,
        })
    }
}
