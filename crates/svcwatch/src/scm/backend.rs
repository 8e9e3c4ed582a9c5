// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The one-shot registration contract with the service control manager.
//!
//! The engine needs exactly one native capability: "call me once on the
//! next status change of this handle". [`ScmBackend`] captures that seam so
//! the engine runs unchanged against the real manager (`WindowsScm` on
//! Windows) or the in-process simulator ([`SimScm`](super::SimScm)).

use std::ffi::c_void;
use std::ptr::NonNull;

use super::buffer::ServiceNotifyBlock;
use super::mask::NotifyMask;

/// The service or manager handle a registration targets.
///
/// Opaque and never owned by this crate; opening and closing stays with the
/// caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawServiceHandle(usize);

impl RawServiceHandle {
    /// Wrap a raw handle value.
    #[must_use]
    pub const fn from_raw(raw: usize) -> Self {
        RawServiceHandle(raw)
    }

    /// The raw handle value.
    #[must_use]
    pub const fn as_raw(self) -> usize {
        self.0
    }
}

/// Whether a registration targets one service or the whole manager.
///
/// The scope decides re-arm behavior: service-scope registrations suppress
/// flags reported by the previous fire, manager-scope registrations always
/// re-arm with the full mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyScope {
    /// A single service handle.
    Service,
    /// A service control manager handle (created/deleted notifications).
    Manager,
}

/// Outcome of a one-shot registration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterStatus {
    /// The registration is armed; the callback will fire exactly once.
    Registered,
    /// The handle's service is marked for deletion; abandon the handle.
    MarkedForDeletion,
    /// The client lagged behind the manager; the handle's registrations
    /// cannot be trusted, obtain a fresh handle.
    ClientLagging,
    /// Any other native failure, carrying the OS error code.
    Failed(u32),
}

impl RegisterStatus {
    /// `Ok` when the registration armed, otherwise the matching error.
    pub fn into_result(self) -> super::Result<()> {
        match self {
            RegisterStatus::Registered => Ok(()),
            RegisterStatus::MarkedForDeletion => Err(super::Error::MarkedForDeletion),
            RegisterStatus::ClientLagging => Err(super::Error::ClientLagging),
            RegisterStatus::Failed(code) => Err(super::Error::Native { code }),
        }
    }
}

/// Signature of the native notification callback.
///
/// The single argument is the address of the [`ServiceNotifyBlock`] the
/// registration was submitted with, now filled in by the OS.
pub type NotifyCallback = unsafe extern "system" fn(*mut c_void);

/// Native error code: the service is marked for deletion.
pub(crate) const ERROR_SERVICE_MARKED_FOR_DELETE: u32 = 1072;

/// Native error code: the notification client is lagging.
pub(crate) const ERROR_SERVICE_NOTIFY_CLIENT_LAGGING: u32 = 1294;

/// One-shot status-change notification provider.
///
/// Implementations must tolerate calls from arbitrary threads; the engine
/// submits re-arms from whatever thread runs the previous callback.
pub trait ScmBackend: Send + Sync + 'static {
    /// Submit a one-shot registration for `handle`.
    ///
    /// `block` stays exclusively owned by the caller and must remain valid
    /// until the callback fires (on success) or immediately reverts to the
    /// caller (on failure). The OS writes the result fields into it and
    /// then invokes the callback stored in the block, passing the block's
    /// own address.
    fn register_one_shot(
        &self,
        handle: RawServiceHandle,
        mask: NotifyMask,
        block: NonNull<ServiceNotifyBlock>,
    ) -> RegisterStatus;

    /// Release a name list the backend attached to a fired block.
    ///
    /// # Safety
    ///
    /// `names` must be the `service_names` pointer of a block this backend
    /// filled, and must be released exactly once.
    unsafe fn free_name_list(&self, names: *mut u16);
}
