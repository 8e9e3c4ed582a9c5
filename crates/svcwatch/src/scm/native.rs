// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Real manager backend for Windows.
//!
//! Thin mapping of [`ScmBackend`](super::backend::ScmBackend) onto
//! `NotifyServiceStatusChangeW`. The name list attached to manager-scope
//! notifications is allocated by the OS and released with `LocalFree`.
//!
//! The caller must keep the registering thread alive and not block it in
//! alertable waits it does not control; the OS delivers the callback on a
//! worker thread of its own.

use std::ffi::c_void;
use std::ptr::NonNull;

use super::backend::{
    RawServiceHandle, RegisterStatus, ScmBackend, ERROR_SERVICE_MARKED_FOR_DELETE,
    ERROR_SERVICE_NOTIFY_CLIENT_LAGGING,
};
use super::buffer::ServiceNotifyBlock;
use super::mask::NotifyMask;

const ERROR_SUCCESS: u32 = 0;

#[link(name = "advapi32")]
extern "system" {
    fn NotifyServiceStatusChangeW(
        hService: *mut c_void,
        dwNotifyMask: u32,
        pNotifyBuffer: *mut ServiceNotifyBlock,
    ) -> u32;
}

extern "system" {
    fn LocalFree(hMem: *mut c_void) -> *mut c_void;
}

/// Backend delegating to the native service control manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsScm;

impl WindowsScm {
    /// Create the backend. Stateless; the state lives in the OS.
    #[must_use]
    pub fn new() -> Self {
        WindowsScm
    }
}

impl ScmBackend for WindowsScm {
    fn register_one_shot(
        &self,
        handle: RawServiceHandle,
        mask: NotifyMask,
        block: NonNull<ServiceNotifyBlock>,
    ) -> RegisterStatus {
        // SAFETY: the caller guarantees the block stays valid until the
        // callback fires or this call reports failure.
        let code = unsafe {
            NotifyServiceStatusChangeW(
                handle.as_raw() as *mut c_void,
                mask.bits(),
                block.as_ptr(),
            )
        };

        match code {
            ERROR_SUCCESS => RegisterStatus::Registered,
            ERROR_SERVICE_MARKED_FOR_DELETE => RegisterStatus::MarkedForDeletion,
            ERROR_SERVICE_NOTIFY_CLIENT_LAGGING => RegisterStatus::ClientLagging,
            other => RegisterStatus::Failed(other),
        }
    }

    unsafe fn free_name_list(&self, names: *mut u16) {
        LocalFree(names.cast());
    }
}
