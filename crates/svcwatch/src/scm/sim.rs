// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process service control manager stand-in.
//!
//! Honors the native one-shot contract exactly: at most one registration
//! per handle, result fields written into the registrant's own block, and
//! the callback invoked on a thread the registrant does not control. Test
//! code drives status changes explicitly through [`SimScm::fire`] and can
//! script registration failures, which makes the re-arm and buffer
//! discipline of the engine observable without an OS.

use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

use super::backend::{RawServiceHandle, RegisterStatus, ScmBackend};
use super::buffer::{multi_sz_units, ServiceNotifyBlock};
use super::mask::NotifyMask;
use super::status::ServiceStatus;
use crate::config;

/// Native error code returned for a second registration on a handle that
/// already has one pending.
pub const ERROR_INVALID_STATE: u32 = 5023;

struct Pending {
    mask: NotifyMask,
    block: usize,
}

#[derive(Default)]
struct SimState {
    pending: HashMap<usize, Pending>,
    accepted: u64,
    fail_next: Option<RegisterStatus>,
    name_blocks: usize,
}

/// Simulated manager; cheap to clone, clones share state.
#[derive(Clone, Default)]
pub struct SimScm {
    state: Arc<Mutex<SimState>>,
}

impl SimScm {
    /// Create a fresh simulator with no pending registrations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::debug!("[sim] state mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Force the next registration attempt to return `status`.
    pub fn fail_next_register(&self, status: RegisterStatus) {
        self.lock().fail_next = Some(status);
    }

    /// Total registrations accepted so far.
    #[must_use]
    pub fn registration_count(&self) -> u64 {
        self.lock().accepted
    }

    /// True when `handle` has a registration awaiting its callback.
    #[must_use]
    pub fn has_pending(&self, handle: RawServiceHandle) -> bool {
        self.lock().pending.contains_key(&handle.as_raw())
    }

    /// The mask the pending registration for `handle` asked for.
    #[must_use]
    pub fn pending_mask(&self, handle: RawServiceHandle) -> Option<NotifyMask> {
        self.lock().pending.get(&handle.as_raw()).map(|p| p.mask)
    }

    /// Name lists handed out but not yet released. Zero means no leak.
    #[must_use]
    pub fn outstanding_name_blocks(&self) -> usize {
        self.lock().name_blocks
    }

    /// Complete the pending registration for `handle` with a status change.
    ///
    /// Returns `false` when no registration is pending or when none of
    /// `triggered` intersects the registered mask (the registration is left
    /// armed in that case, as the real manager would).
    pub fn fire(
        &self,
        handle: RawServiceHandle,
        triggered: NotifyMask,
        status: ServiceStatus,
    ) -> bool {
        self.complete(handle, 0, triggered, status, &[], &[])
    }

    /// Like [`SimScm::fire`], with created/deleted service names attached
    /// (manager-scope notifications).
    pub fn fire_with_names(
        &self,
        handle: RawServiceHandle,
        triggered: NotifyMask,
        status: ServiceStatus,
        created: &[&str],
        deleted: &[&str],
    ) -> bool {
        self.complete(handle, 0, triggered, status, created, deleted)
    }

    /// Complete the pending registration with a failure code in the result
    /// slot, the way the manager reports e.g. deletion of the service.
    pub fn fire_error(&self, handle: RawServiceHandle, code: u32) -> bool {
        self.complete(
            handle,
            code,
            NotifyMask::NONE,
            ServiceStatus::default(),
            &[],
            &[],
        )
    }

    fn complete(
        &self,
        handle: RawServiceHandle,
        notification_status: u32,
        triggered: NotifyMask,
        status: ServiceStatus,
        created: &[&str],
        deleted: &[&str],
    ) -> bool {
        let (block, callback) = {
            let mut state = self.lock();
            let Some(pending) = state.pending.remove(&handle.as_raw()) else {
                return false;
            };

            let delivered = triggered & pending.mask;
            if notification_status == 0 && delivered.is_empty() {
                state.pending.insert(handle.as_raw(), pending);
                return false;
            }

            let names = if created.is_empty() && deleted.is_empty() {
                std::ptr::null_mut()
            } else {
                state.name_blocks += 1;
                encode_name_list(created, deleted)
            };

            let block = pending.block as *mut ServiceNotifyBlock;
            // SAFETY: the registrant guarantees the block outlives the
            // registration; we hold the only registration for it.
            let callback = unsafe {
                (*block).notification_status = notification_status;
                (*block).service_status = status.to_raw();
                (*block).notification_triggered = delivered.bits();
                (*block).service_names = names;
                (*block).notify_callback
            };
            (pending.block, callback)
        };

        let Some(callback) = callback else {
            return false;
        };

        // The real manager invokes the callback on a thread it owns.
        let worker = std::thread::Builder::new()
            .name(config::SIM_CALLBACK_THREAD_NAME.to_string())
            .spawn(move || {
                // SAFETY: callback and block come from an armed registration.
                unsafe {
                    callback(block as *mut c_void);
                }
            })
            .expect("failed to spawn simulated callback thread");
        let _ = worker.join();
        true
    }
}

impl ScmBackend for SimScm {
    fn register_one_shot(
        &self,
        handle: RawServiceHandle,
        mask: NotifyMask,
        block: NonNull<ServiceNotifyBlock>,
    ) -> RegisterStatus {
        let mut state = self.lock();

        if let Some(forced) = state.fail_next.take() {
            log::debug!("[sim] forcing registration outcome {:?}", forced);
            return forced;
        }

        if state.pending.contains_key(&handle.as_raw()) {
            return RegisterStatus::Failed(ERROR_INVALID_STATE);
        }

        state.pending.insert(
            handle.as_raw(),
            Pending {
                mask,
                block: block.as_ptr() as usize,
            },
        );
        state.accepted += 1;
        RegisterStatus::Registered
    }

    unsafe fn free_name_list(&self, names: *mut u16) {
        let units = multi_sz_units(names);
        drop(Vec::from_raw_parts(names, units, units));
        self.lock().name_blocks -= 1;
    }
}

fn encode_name_list(created: &[&str], deleted: &[&str]) -> *mut u16 {
    let mut units = Vec::new();
    for name in created {
        units.push(u16::from(b'/'));
        units.extend(name.encode_utf16());
        units.push(0);
    }
    for name in deleted {
        units.extend(name.encode_utf16());
        units.push(0);
    }
    units.push(0);
    Box::into_raw(units.into_boxed_slice()) as *mut u16
}
