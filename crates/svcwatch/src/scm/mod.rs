// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Service notification API
//!
//! Continuous status-change notifications over the native manager's
//! one-shot registration primitive.
//!
//! ## Overview
//!
//! ```text
//! caller                         engine                        manager (OS)
//!   | subscribe / wait_for         |                                |
//!   |----------------------------->| arm: allocate block,           |
//!   |                              |      one-shot registration ---->|
//!   |                              |                                |
//!   |                              |<------ callback (OS thread) ---|
//!   |                              | decode -> owned event,          |
//!   |                              | free block, re-arm ------------>|
//!   |<--- event via dispatcher ----|                                |
//! ```
//!
//! - [`ServiceEvents`] - the re-arm engine, one per watched handle
//! - [`ServiceEvents::wait_for`] and friends - blocking/future waits
//! - [`ScmBackend`] - the registration seam ([`SimScm`] in-process,
//!   `WindowsScm` against the real manager on Windows)
//! - [`HandleCache`] - weak connection cache keyed by access rights

mod backend;
mod buffer;
mod cache;
mod events;
mod mask;
mod sim;
mod status;
mod waiter;

#[cfg(windows)]
mod native;

pub use backend::{NotifyCallback, NotifyScope, RawServiceHandle, RegisterStatus, ScmBackend};
pub use buffer::{ServiceNotifyBlock, SERVICE_NOTIFY_BLOCK_VERSION};
pub use cache::{AccessMask, HandleCache};
pub use events::{EngineStats, ServiceEvents, SubscriptionId};
pub use mask::NotifyMask;
pub use sim::SimScm;
pub use status::{NotificationEvent, RawServiceStatus, ServiceState, ServiceStatus};
pub use waiter::{NotifyFuture, WaitResult};

#[cfg(windows)]
pub use native::WindowsScm;

/// Errors returned by notification operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Registration errors (fatal to the handle)
    // ========================================================================
    /// The service is marked for deletion; close the handle and stop.
    MarkedForDeletion,
    /// This client lagged behind the manager; the handle's registrations
    /// cannot be trusted, obtain a fresh handle and a fresh engine.
    ClientLagging,
    /// Any other native failure, carrying the OS error code.
    Native {
        /// The OS error code.
        code: u32,
    },

    // ========================================================================
    // Lifecycle errors
    // ========================================================================
    /// The engine has been disposed; no further registrations are accepted.
    Disposed,

    // ========================================================================
    // Resource errors
    // ========================================================================
    /// Allocating a notification block failed.
    OutOfMemory,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MarkedForDeletion => write!(f, "service is marked for deletion"),
            Error::ClientLagging => {
                write!(f, "notification client is lagging; handle must be reopened")
            }
            Error::Native { code } => write!(f, "native error {}", code),
            Error::Disposed => write!(f, "engine is disposed"),
            Error::OutOfMemory => write!(f, "notification block allocation failed"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = std::result::Result<T, Error>;
