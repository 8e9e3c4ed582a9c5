// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Global configuration - constants and runtime overrides.
//!
//! Centralizes thread names and tunables so they are not hardcoded at the
//! call sites. Runtime overrides are read from `SVCWATCH_*` environment
//! variables once per query.

use std::time::Duration;

/// Name of the per-engine dispatch worker thread.
pub const DISPATCH_THREAD_NAME: &str = "svcwatch-dispatch";

/// Name of the process-wide deadline timer thread.
pub const TIMER_THREAD_NAME: &str = "svcwatch-timer";

/// Name of the simulated manager's callback thread.
pub const SIM_CALLBACK_THREAD_NAME: &str = "svcwatch-scm-callback";

/// Default threshold after which an unbounded blocking wait logs a warning.
///
/// An unbounded wait against an engine whose notification stream has halted
/// never completes; the warning is the only runtime hint of that condition.
pub const DEFAULT_WAIT_WARN: Duration = Duration::from_secs(30);

/// Environment variable overriding [`DEFAULT_WAIT_WARN`] in milliseconds.
/// `0` disables the warning entirely.
pub const ENV_WAIT_WARN_MS: &str = "SVCWATCH_WAIT_WARN_MS";

/// Threshold for the long-wait warning, `None` when disabled.
pub fn wait_warn_threshold() -> Option<Duration> {
    parse_wait_warn(std::env::var(ENV_WAIT_WARN_MS).ok().as_deref())
}

fn parse_wait_warn(raw: Option<&str>) -> Option<Duration> {
    match raw {
        None => Some(DEFAULT_WAIT_WARN),
        Some(value) => match value.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(ms) => Some(Duration::from_millis(ms)),
            Err(_) => {
                log::warn!(
                    "[config] ignoring invalid {}={:?}, using default {:?}",
                    ENV_WAIT_WARN_MS,
                    value,
                    DEFAULT_WAIT_WARN
                );
                Some(DEFAULT_WAIT_WARN)
            }
        },
    }
}
