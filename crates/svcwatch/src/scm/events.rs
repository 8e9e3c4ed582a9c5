// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The re-arm engine: a continuous event stream over one-shot registrations.
//!
//! The native manager only offers "call me once on the next status change".
//! [`ServiceEvents`] turns that into a standing stream: it arms a
//! registration lazily when the first subscriber (or waiter) arrives,
//! decodes each callback into an owned [`NotificationEvent`], hands the
//! event to a dispatcher, and immediately re-arms.
//!
//! # State machine
//!
//! ```text
//! Idle --first subscribe/wait--> Armed --callback--> (decode, re-arm) --> Armed
//!                                  |                      |
//!                                  | dispose              | re-arm error /
//!                                  v                      v error in result slot
//!                               Disposed               Halted
//! ```
//!
//! `Halted` is terminal for the stream but not an error to subscribers:
//! handlers stay attached and simply never run again. `Disposed` fails all
//! pending waiters and refuses new subscriptions.
//!
//! # Locking
//!
//! The native callback runs on a thread the OS owns, concurrently with any
//! caller. One per-engine lock guards the phase, the armed buffer, and the
//! last-reported mask; the subscriber list has its own lock and is never
//! held across the engine lock.
//!
//! # Known leak
//!
//! A registration that never fires pins its block: the engine leaks one
//! block (and one weak engine reference) if it is dropped while armed,
//! because freeing would race the OS write. The real manager fires or
//! cancels on handle close, so this only shows up with abandoned handles.

use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, Weak};

use parking_lot::Mutex;

use super::backend::{NotifyScope, RawServiceHandle, ScmBackend};
use super::buffer::{NotifyBuffer, ServiceNotifyBlock};
use super::mask::NotifyMask;
use super::status::NotificationEvent;
use super::waiter::{WaitCell, WaitResult};
use super::{Error, Result};
use crate::core::rt::{Dispatcher, WorkerDispatcher};

/// Subscriber callback type for decoded notifications.
pub(crate) type NotifyHandler = dyn Fn(&NotificationEvent) + Send + Sync;

/// Token returned by [`ServiceEvents::subscribe`], used to detach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Engine counters, mainly for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Registrations accepted by the backend (initial arm + re-arms).
    pub registrations: u64,
    /// Native callbacks received.
    pub fires: u64,
    /// Notification blocks allocated.
    pub buffers_allocated: u64,
    /// Notification blocks released.
    pub buffers_freed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Armed,
    Halted,
    Disposed,
}

struct EngineState {
    phase: Phase,
    buffer: Option<NotifyBuffer>,
    last_reported: NotifyMask,
    stats: EngineStats,
}

struct SubscriberEntry {
    id: u64,
    handler: Arc<NotifyHandler>,
}

pub(crate) struct EngineInner {
    backend: Arc<dyn ScmBackend>,
    handle: RawServiceHandle,
    scope: NotifyScope,
    register_for: NotifyMask,
    dispatcher: Arc<dyn Dispatcher>,
    state: Mutex<EngineState>,
    subscribers: StdMutex<Vec<SubscriberEntry>>,
    wait_cells: StdMutex<Vec<Weak<WaitCell>>>,
    next_subscriber_id: AtomicU64,
}

/// Per-handle notification engine. See the module docs for the lifecycle.
pub struct ServiceEvents {
    inner: Arc<EngineInner>,
}

impl ServiceEvents {
    /// Create an engine with its own single-threaded dispatch worker.
    #[must_use]
    pub fn new(
        backend: Arc<dyn ScmBackend>,
        handle: RawServiceHandle,
        scope: NotifyScope,
        register_for: NotifyMask,
    ) -> Self {
        Self::with_dispatcher(
            backend,
            handle,
            scope,
            register_for,
            Arc::new(WorkerDispatcher::spawn()),
        )
    }

    /// Create an engine delivering events through `dispatcher`.
    ///
    /// Event ordering is only as strong as the dispatcher's ordering.
    #[must_use]
    pub fn with_dispatcher(
        backend: Arc<dyn ScmBackend>,
        handle: RawServiceHandle,
        scope: NotifyScope,
        register_for: NotifyMask,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                backend,
                handle,
                scope,
                register_for,
                dispatcher,
                state: Mutex::new(EngineState {
                    phase: Phase::Idle,
                    buffer: None,
                    last_reported: NotifyMask::NONE,
                    stats: EngineStats::default(),
                }),
                subscribers: StdMutex::new(Vec::new()),
                wait_cells: StdMutex::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    /// Arm the first registration if none was ever armed.
    ///
    /// Subscribing and waiting do this implicitly; it is exposed so the
    /// lazy side effect can be driven (and tested) on its own. Idempotent
    /// once the engine has ever been armed.
    pub fn start(&self) -> Result<()> {
        self.inner.ensure_started()
    }

    /// Attach `handler` to the event stream, arming the engine on first use.
    ///
    /// Handlers run on the engine's dispatcher, not on the native callback
    /// thread.
    pub fn subscribe<F>(&self, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&NotificationEvent) + Send + Sync + 'static,
    {
        self.inner.ensure_started()?;
        Ok(SubscriptionId(self.inner.add_subscriber(Arc::new(handler))))
    }

    /// Detach a handler. The re-arm loop keeps running; only
    /// [`ServiceEvents::dispose`] stops it.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.remove_subscriber(id.0)
    }

    /// Number of currently attached handlers (waiters included).
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    /// Stop re-arming and fail all pending waiters with a not-fired result.
    ///
    /// An in-flight callback still completes; its block is released under
    /// the engine lock when it arrives. The underlying handle is not
    /// closed - that stays with its owner.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// True once [`ServiceEvents::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// True when a fatal registration or callback error stopped the stream.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.inner.state.lock().phase == Phase::Halted
    }

    /// Snapshot of the engine counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.inner.state.lock().stats
    }

    pub(crate) fn inner(&self) -> &Arc<EngineInner> {
        &self.inner
    }
}

impl Drop for ServiceEvents {
    fn drop(&mut self) {
        self.inner.dispose();
    }
}

impl EngineInner {
    fn subscribers_lock(&self) -> StdMutexGuard<'_, Vec<SubscriberEntry>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::debug!("[engine] subscriber list poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn wait_cells_lock(&self) -> StdMutexGuard<'_, Vec<Weak<WaitCell>>> {
        match self.wait_cells.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::debug!("[engine] wait cell list poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub(crate) fn ensure_started(self: &Arc<Self>) -> Result<()> {
        let mut st = self.state.lock();
        match st.phase {
            Phase::Idle => match self.arm(&mut st, self.register_for) {
                Ok(()) => Ok(()),
                Err(err) => {
                    if matches!(err, Error::MarkedForDeletion | Error::ClientLagging) {
                        st.phase = Phase::Halted;
                    }
                    Err(err)
                }
            },
            Phase::Armed | Phase::Halted => Ok(()),
            Phase::Disposed => Err(Error::Disposed),
        }
    }

    /// Allocate a block and submit a registration. Caller holds the lock.
    fn arm(self: &Arc<Self>, st: &mut EngineState, mask: NotifyMask) -> Result<()> {
        let context = Weak::into_raw(Arc::downgrade(self)) as *mut c_void;
        let mut buffer = match NotifyBuffer::allocate(notify_trampoline, context) {
            Ok(buffer) => buffer,
            Err(err) => {
                // SAFETY: allocation failed, nothing else saw the weak.
                unsafe { drop(Weak::from_raw(context.cast_const().cast::<EngineInner>())) };
                return Err(err);
            }
        };
        st.stats.buffers_allocated += 1;

        match buffer
            .submit(self.backend.as_ref(), self.handle, mask)
            .into_result()
        {
            Ok(()) => {
                st.buffer = Some(buffer);
                st.phase = Phase::Armed;
                st.stats.registrations += 1;
                log::debug!(
                    "[engine] armed handle={:#x} mask={:#x}",
                    self.handle.as_raw(),
                    mask.bits()
                );
                Ok(())
            }
            Err(err) => {
                let context = buffer.take_context();
                if !context.is_null() {
                    // SAFETY: the registration was rejected, so the
                    // callback will never consume this weak.
                    unsafe { drop(Weak::from_raw(context.cast_const().cast::<EngineInner>())) };
                }
                drop(buffer);
                st.stats.buffers_freed += 1;
                Err(err)
            }
        }
    }

    fn on_native_fire(self: &Arc<Self>, block: *mut ServiceNotifyBlock) {
        let event = {
            let mut st = self.state.lock();
            st.stats.fires += 1;

            let Some(mut buffer) = st.buffer.take() else {
                log::warn!("[engine] callback fired with no armed buffer");
                return;
            };

            if buffer.block_ptr().as_ptr() != block {
                log::warn!("[engine] callback block does not match the armed buffer");
            }

            if st.phase == Phase::Disposed {
                drop(buffer);
                st.stats.buffers_freed += 1;
                log::debug!("[engine] callback after dispose, block released");
                return;
            }

            // SAFETY: the callback has fired; the OS is done with the block.
            let decoded = unsafe { buffer.decode(self.backend.as_ref()) };
            drop(buffer);
            st.stats.buffers_freed += 1;

            let event = match decoded {
                Ok(event) => event,
                Err(err) => {
                    st.phase = Phase::Halted;
                    log::warn!("[engine] notification reported {}, stream halted", err);
                    return;
                }
            };

            st.last_reported = event.triggered;

            // Service scope skips flags already reported by this fire; the
            // manager scope always re-requests the full mask.
            let rearm_mask = match self.scope {
                NotifyScope::Service => self.register_for & !st.last_reported,
                NotifyScope::Manager => self.register_for,
            };

            if let Err(err) = self.arm(&mut st, rearm_mask) {
                st.phase = Phase::Halted;
                log::warn!("[engine] re-arm failed ({}), stream halted", err);
            }

            event
        };

        self.dispatch(event);
    }

    fn dispatch(&self, event: NotificationEvent) {
        let handlers: Vec<Arc<NotifyHandler>> = self
            .subscribers_lock()
            .iter()
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        if handlers.is_empty() {
            return;
        }

        self.dispatcher.dispatch(Box::new(move || {
            for handler in &handlers {
                // One panicking subscriber must not starve the others.
                let delivery =
                    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&event)));
                if delivery.is_err() {
                    log::warn!("[engine] subscriber panicked during delivery");
                }
            }
        }));
    }

    pub(crate) fn add_subscriber(&self, handler: Arc<NotifyHandler>) -> u64 {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers_lock().push(SubscriberEntry { id, handler });
        id
    }

    pub(crate) fn remove_subscriber(&self, id: u64) -> bool {
        let mut subscribers = self.subscribers_lock();
        let before = subscribers.len();
        subscribers.retain(|entry| entry.id != id);
        subscribers.len() != before
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers_lock().len()
    }

    pub(crate) fn register_wait_cell(&self, cell: &Arc<WaitCell>) {
        let mut cells = self.wait_cells_lock();
        cells.retain(|weak| weak.strong_count() > 0);
        cells.push(Arc::downgrade(cell));
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.lock().phase == Phase::Disposed
    }

    pub(crate) fn dispose(&self) {
        {
            let mut st = self.state.lock();
            if st.phase == Phase::Disposed {
                return;
            }
            let armed = st.phase == Phase::Armed;
            st.phase = Phase::Disposed;
            if !armed {
                if let Some(buffer) = st.buffer.take() {
                    drop(buffer);
                    st.stats.buffers_freed += 1;
                }
            }
            log::debug!("[engine] disposed (pending_callback={})", armed);
        }

        let cells: Vec<Weak<WaitCell>> = std::mem::take(&mut *self.wait_cells_lock());
        for weak in cells {
            if let Some(cell) = weak.upgrade() {
                cell.complete(WaitResult::not_fired());
            }
        }
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if let Some(buffer) = st.buffer.take() {
            // The OS may still write into an armed block; leak, don't race.
            log::debug!("[engine] leaking armed notification block at engine drop");
            std::mem::forget(buffer);
        }
    }
}

unsafe extern "system" fn notify_trampoline(param: *mut c_void) {
    let block = param.cast::<ServiceNotifyBlock>();
    let context = (*block).context;
    if context.is_null() {
        return;
    }

    let weak = Weak::from_raw(context.cast_const().cast::<EngineInner>());
    match weak.upgrade() {
        Some(inner) => inner.on_native_fire(block),
        None => log::debug!("[engine] notification fired after engine release"),
    }
}

#[cfg(test)]
mod tests;
