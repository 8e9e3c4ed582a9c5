// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The native notification block and its ownership discipline.
//!
//! One [`NotifyBuffer`] backs exactly one in-flight registration. The OS
//! holds the block's address from submission until the callback returns,
//! so the block must never be freed while a registration is outstanding.
//! The engine enforces that ordering; this module guarantees the rest:
//! zeroed allocation, copy-out decoding into owned data, and exactly one
//! release per allocation (RAII).

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ffi::c_void;
use std::ptr::NonNull;

use super::backend::{
    NotifyCallback, RawServiceHandle, RegisterStatus, ScmBackend, ERROR_SERVICE_MARKED_FOR_DELETE,
};
use super::mask::NotifyMask;
use super::status::{NotificationEvent, RawServiceStatus, ServiceStatus};
use super::{Error, Result};

/// Version tag the native one-shot registration expects in the block.
pub const SERVICE_NOTIFY_BLOCK_VERSION: u32 = 2;

/// Native layout of a one-shot notification descriptor.
///
/// The first three fields are filled by the registrant; the rest are the
/// result slots the OS writes before invoking the callback.
#[repr(C)]
pub struct ServiceNotifyBlock {
    /// Must be [`SERVICE_NOTIFY_BLOCK_VERSION`].
    pub version: u32,
    /// Invoked by the OS with the block's own address.
    pub notify_callback: Option<NotifyCallback>,
    /// Registrant-owned context pointer, opaque to the OS.
    pub context: *mut c_void,
    /// Result slot: `0` on success, otherwise a native error code.
    pub notification_status: u32,
    /// Result slot: status snapshot at the time of the change.
    pub service_status: RawServiceStatus,
    /// Result slot: which notification flags fired.
    pub notification_triggered: u32,
    /// Result slot: double-NUL-terminated UTF-16 name list for manager-scope
    /// created/deleted notifications, backend-allocated, or null. Created
    /// names carry a `/` prefix to distinguish them from deleted names.
    pub service_names: *mut u16,
}

/// Exclusively-owned notification block.
///
/// Freed exactly once, when the owner drops it; the owner is responsible
/// for only dropping it once the OS can no longer write into it.
pub struct NotifyBuffer {
    block: NonNull<ServiceNotifyBlock>,
}

// The block is plain memory handed between the registering thread and the
// callback thread; access is serialized by the engine lock.
unsafe impl Send for NotifyBuffer {}

impl NotifyBuffer {
    /// Acquire a zeroed block wired to `callback` and `context`.
    pub(crate) fn allocate(callback: NotifyCallback, context: *mut c_void) -> Result<Self> {
        let layout = Layout::new::<ServiceNotifyBlock>();
        // SAFETY: the layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) }.cast::<ServiceNotifyBlock>();
        let Some(block) = NonNull::new(raw) else {
            return Err(Error::OutOfMemory);
        };

        // SAFETY: freshly allocated and exclusively owned.
        unsafe {
            let b = block.as_ptr();
            (*b).version = SERVICE_NOTIFY_BLOCK_VERSION;
            (*b).notify_callback = Some(callback);
            (*b).context = context;
        }

        Ok(Self { block })
    }

    /// Address handed to the native registration call.
    pub(crate) fn block_ptr(&self) -> NonNull<ServiceNotifyBlock> {
        self.block
    }

    /// Submit this block as a one-shot registration for `handle`.
    ///
    /// On success the OS owns the block until the callback fires; the
    /// caller must keep this buffer alive until then.
    pub(crate) fn submit(
        &self,
        backend: &dyn ScmBackend,
        handle: RawServiceHandle,
        mask: NotifyMask,
    ) -> RegisterStatus {
        backend.register_one_shot(handle, mask, self.block_ptr())
    }

    /// Detach and return the context pointer, leaving null behind.
    ///
    /// Used when a submission fails: the callback will never run, so the
    /// registrant must reclaim whatever the context points at.
    pub(crate) fn take_context(&mut self) -> *mut c_void {
        // SAFETY: the block is owned and no registration references it.
        unsafe {
            let b = self.block.as_ptr();
            let context = (*b).context;
            (*b).context = std::ptr::null_mut();
            context
        }
    }

    /// Materialize the fired notification into owned data and release the
    /// backend-owned name list.
    ///
    /// # Safety
    ///
    /// The callback for this block must have fired and returned control;
    /// the OS no longer writes into the block.
    pub(crate) unsafe fn decode(&mut self, backend: &dyn ScmBackend) -> Result<NotificationEvent> {
        let b = self.block.as_ptr();

        match (*b).notification_status {
            0 => {}
            ERROR_SERVICE_MARKED_FOR_DELETE => return Err(Error::MarkedForDeletion),
            code => return Err(Error::Native { code }),
        }

        let triggered = NotifyMask::from_bits((*b).notification_triggered);
        let status = ServiceStatus::from_raw(&(*b).service_status);

        let mut created = Vec::new();
        let mut deleted = Vec::new();
        let names = (*b).service_names;
        if !names.is_null() {
            for name in decode_multi_sz(names) {
                match name.strip_prefix('/') {
                    Some(rest) => created.push(rest.to_string()),
                    None => deleted.push(name),
                }
            }
            backend.free_name_list(names);
            (*b).service_names = std::ptr::null_mut();
        }

        Ok(NotificationEvent {
            triggered,
            status,
            created,
            deleted,
        })
    }
}

impl Drop for NotifyBuffer {
    fn drop(&mut self) {
        let layout = Layout::new::<ServiceNotifyBlock>();
        // SAFETY: allocated in `allocate` with the same layout, freed once.
        unsafe {
            dealloc(self.block.as_ptr().cast(), layout);
        }
    }
}

/// Total number of UTF-16 units in a double-NUL-terminated string list,
/// including the final terminator.
///
/// # Safety
///
/// `ptr` must point at a valid, non-empty double-NUL-terminated list.
pub(crate) unsafe fn multi_sz_units(ptr: *const u16) -> usize {
    let mut i = 0usize;
    loop {
        let start = i;
        while *ptr.add(i) != 0 {
            i += 1;
        }
        i += 1;
        if i == start + 1 {
            return i;
        }
    }
}

/// Copy a double-NUL-terminated UTF-16 string list into owned strings.
///
/// # Safety
///
/// Same requirements as [`multi_sz_units`].
pub(crate) unsafe fn decode_multi_sz(ptr: *const u16) -> Vec<String> {
    let mut names = Vec::new();
    let mut i = 0usize;
    loop {
        let start = i;
        while *ptr.add(i) != 0 {
            i += 1;
        }
        if i == start {
            return names;
        }
        let units = std::slice::from_raw_parts(ptr.add(start), i - start);
        names.push(String::from_utf16_lossy(units));
        i += 1;
    }
}
