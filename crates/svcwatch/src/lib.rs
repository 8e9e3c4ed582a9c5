// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # svcwatch - continuous service status notifications
//!
//! The native service control manager only offers a one-shot primitive:
//! "invoke this callback once, on the next status change". svcwatch turns
//! that into a standing, continuously re-armed event stream with safe
//! buffer ownership across the FFI boundary, plus blocking and
//! future-based waits filtered by notification masks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use svcwatch::{NotifyMask, NotifyScope, RawServiceHandle, ServiceEvents, SimScm};
//!
//! fn main() -> svcwatch::Result<()> {
//!     // SimScm stands in for the OS manager; on Windows use WindowsScm
//!     // with a real service handle.
//!     let manager = SimScm::new();
//!     let handle = RawServiceHandle::from_raw(0x10);
//!
//!     let events = ServiceEvents::new(
//!         Arc::new(manager.clone()),
//!         handle,
//!         NotifyScope::Service,
//!         NotifyMask::RUNNING | NotifyMask::STOPPED,
//!     );
//!
//!     let result = events.wait_for_timeout(NotifyMask::RUNNING, Duration::from_secs(5))?;
//!     if result.fired {
//!         println!("service is running ({:?})", result.triggered);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                       Waiters                                |
//! |   wait_for / wait_for_timeout / wait_for_async[_timeout]     |
//! +--------------------------------------------------------------+
//! |                     ServiceEvents                            |
//! |   subscribe -> arm -> callback -> decode -> re-arm -> ...    |
//! +--------------------------------------------------------------+
//! |                  Notification block                          |
//! |   one exclusively-owned native descriptor per registration   |
//! +--------------------------------------------------------------+
//! |                     ScmBackend                               |
//! |   WindowsScm (real manager)  |  SimScm (in-process)          |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ServiceEvents`] | Re-arm engine for one service or manager handle |
//! | [`NotifyMask`] | Bitset of status-change kinds |
//! | [`NotificationEvent`] | Owned, decoded notification payload |
//! | [`ScmBackend`] | The one-shot registration seam |
//! | [`HandleCache`] | Weak manager-connection cache keyed by access rights |

pub mod config;
pub mod core;
pub mod scm;

pub use crate::core::rt::{Dispatcher, InlineDispatcher, WorkerDispatcher};
pub use scm::{
    AccessMask, EngineStats, Error, HandleCache, NotificationEvent, NotifyFuture, NotifyMask,
    NotifyScope, RawServiceHandle, RawServiceStatus, RegisterStatus, Result, ScmBackend,
    ServiceEvents, ServiceState, ServiceStatus, SimScm, SubscriptionId, WaitResult,
};

#[cfg(windows)]
pub use scm::WindowsScm;
