// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Owned service status snapshots and decoded notification events.
//!
//! The native callback hands back a packed status record inside memory the
//! OS may reclaim as soon as the callback returns. Everything here is the
//! owned, copied-out form; nothing borrows native memory.

use super::mask::NotifyMask;

/// Run state of a service, as reported in a status snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Not running.
    Stopped,
    /// Start in progress.
    StartPending,
    /// Stop in progress.
    StopPending,
    /// Running.
    Running,
    /// Continue in progress.
    ContinuePending,
    /// Pause in progress.
    PausePending,
    /// Paused.
    Paused,
    /// A state value this crate does not know about.
    Unknown(u32),
}

impl ServiceState {
    /// Decode the native numeric state.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => ServiceState::Stopped,
            2 => ServiceState::StartPending,
            3 => ServiceState::StopPending,
            4 => ServiceState::Running,
            5 => ServiceState::ContinuePending,
            6 => ServiceState::PausePending,
            7 => ServiceState::Paused,
            other => ServiceState::Unknown(other),
        }
    }

    /// Native numeric state value.
    #[must_use]
    pub const fn as_raw(&self) -> u32 {
        match self {
            ServiceState::Stopped => 1,
            ServiceState::StartPending => 2,
            ServiceState::StopPending => 3,
            ServiceState::Running => 4,
            ServiceState::ContinuePending => 5,
            ServiceState::PausePending => 6,
            ServiceState::Paused => 7,
            ServiceState::Unknown(other) => *other,
        }
    }

    /// The notification flag that reports a transition into this state.
    ///
    /// Returns [`NotifyMask::NONE`] for states without a notification bit.
    #[must_use]
    pub const fn notify_flag(&self) -> NotifyMask {
        match self {
            ServiceState::Stopped => NotifyMask::STOPPED,
            ServiceState::StartPending => NotifyMask::START_PENDING,
            ServiceState::StopPending => NotifyMask::STOP_PENDING,
            ServiceState::Running => NotifyMask::RUNNING,
            ServiceState::ContinuePending => NotifyMask::CONTINUE_PENDING,
            ServiceState::PausePending => NotifyMask::PAUSE_PENDING,
            ServiceState::Paused => NotifyMask::PAUSED,
            ServiceState::Unknown(_) => NotifyMask::NONE,
        }
    }
}

/// Native process-status record layout (nine 32-bit fields).
///
/// Embedded verbatim in the notification block the OS writes into.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawServiceStatus {
    pub service_type: u32,
    pub current_state: u32,
    pub controls_accepted: u32,
    pub win32_exit_code: u32,
    pub service_specific_exit_code: u32,
    pub check_point: u32,
    pub wait_hint: u32,
    pub process_id: u32,
    pub service_flags: u32,
}

/// Owned status snapshot carried by a [`NotificationEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Service type bits (own process, share process, driver, ...).
    pub service_type: u32,
    /// Current run state.
    pub current_state: ServiceState,
    /// Control codes the service accepts.
    pub controls_accepted: u32,
    /// Generic exit code, `0` while healthy.
    pub win32_exit_code: u32,
    /// Service-specific exit code, meaningful when `win32_exit_code` says so.
    pub service_specific_exit_code: u32,
    /// Progress checkpoint during pending transitions.
    pub check_point: u32,
    /// Expected wait hint for the pending transition, in milliseconds.
    pub wait_hint: u32,
    /// Hosting process id, `0` when not running.
    pub process_id: u32,
    /// Additional flags (e.g. runs-in-system-process).
    pub service_flags: u32,
}

impl ServiceStatus {
    /// A plausible snapshot for a service sitting in `state`.
    ///
    /// Convenience for tests and simulated backends; real snapshots come
    /// from [`ServiceStatus::from_raw`].
    #[must_use]
    pub const fn with_state(state: ServiceState) -> Self {
        Self {
            service_type: 0x10,
            current_state: state,
            controls_accepted: 0,
            win32_exit_code: 0,
            service_specific_exit_code: 0,
            check_point: 0,
            wait_hint: 0,
            process_id: 0,
            service_flags: 0,
        }
    }

    /// Copy a native record into the owned form.
    #[must_use]
    pub const fn from_raw(raw: &RawServiceStatus) -> Self {
        Self {
            service_type: raw.service_type,
            current_state: ServiceState::from_raw(raw.current_state),
            controls_accepted: raw.controls_accepted,
            win32_exit_code: raw.win32_exit_code,
            service_specific_exit_code: raw.service_specific_exit_code,
            check_point: raw.check_point,
            wait_hint: raw.wait_hint,
            process_id: raw.process_id,
            service_flags: raw.service_flags,
        }
    }

    /// Encode into the native record layout.
    #[must_use]
    pub const fn to_raw(&self) -> RawServiceStatus {
        RawServiceStatus {
            service_type: self.service_type,
            current_state: self.current_state.as_raw(),
            controls_accepted: self.controls_accepted,
            win32_exit_code: self.win32_exit_code,
            service_specific_exit_code: self.service_specific_exit_code,
            check_point: self.check_point,
            wait_hint: self.wait_hint,
            process_id: self.process_id,
            service_flags: self.service_flags,
        }
    }
}

impl Default for ServiceStatus {
    fn default() -> Self {
        Self::with_state(ServiceState::Stopped)
    }
}

/// One fired notification, fully materialized before the native block is
/// released.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// Which notification flags fired; may carry more than one bit.
    pub triggered: NotifyMask,
    /// Status snapshot at the time of the change.
    pub status: ServiceStatus,
    /// Names of created services (manager-scope registrations only).
    pub created: Vec<String>,
    /// Names of deleted services (manager-scope registrations only).
    pub deleted: Vec<String>,
}
