// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide deadline timer.
//!
//! Resolves timed asynchronous waits without an async runtime: a single
//! background thread sleeps until the earliest scheduled deadline and runs
//! the due jobs. Jobs are expected to be cheap (flipping a completion flag
//! and waking a task); anything heavier belongs on a dispatcher.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use crate::config;

type TimerJob = Box<dyn FnOnce() + Send>;

struct Entry {
    due: Instant,
    job: TimerJob,
}

// BinaryHeap is a max-heap; reverse the comparison to pop earliest-first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.due.cmp(&self.due)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due
    }
}

impl Eq for Entry {}

struct TimerInner {
    queue: Mutex<BinaryHeap<Entry>>,
    cond: Condvar,
}

/// Shared deadline scheduler. Obtain via [`DeadlineTimer::global`].
pub struct DeadlineTimer {
    inner: Arc<TimerInner>,
}

static GLOBAL: OnceLock<DeadlineTimer> = OnceLock::new();

impl DeadlineTimer {
    /// The process-wide timer, spawning its thread on first use.
    pub fn global() -> &'static DeadlineTimer {
        GLOBAL.get_or_init(|| {
            let inner = Arc::new(TimerInner {
                queue: Mutex::new(BinaryHeap::new()),
                cond: Condvar::new(),
            });

            let worker = Arc::clone(&inner);
            std::thread::Builder::new()
                .name(config::TIMER_THREAD_NAME.to_string())
                .spawn(move || run(&worker))
                .expect("failed to spawn deadline timer thread");

            DeadlineTimer { inner }
        })
    }

    /// Run `job` at (or shortly after) `due`.
    pub fn schedule(&self, due: Instant, job: TimerJob) {
        let mut queue = self.inner.queue.lock();
        queue.push(Entry { due, job });
        self.inner.cond.notify_one();
    }
}

fn run(inner: &Arc<TimerInner>) {
    log::debug!("[timer] deadline thread started");
    let mut queue = inner.queue.lock();
    loop {
        let now = Instant::now();
        let mut due = Vec::new();
        while queue.peek().is_some_and(|e| e.due <= now) {
            if let Some(entry) = queue.pop() {
                due.push(entry);
            }
        }

        if !due.is_empty() {
            MutexGuard::unlocked(&mut queue, || {
                for entry in due {
                    (entry.job)();
                }
            });
            continue;
        }

        match queue.peek().map(|e| e.due) {
            Some(next) => {
                inner.cond.wait_until(&mut queue, next);
            }
            None => {
                inner.cond.wait(&mut queue);
            }
        }
    }
}
