// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Weakly-held cache of manager connections, keyed by access rights.
//!
//! Replaces the usual process-wide static "current manager handle" with
//! explicit, injectable state: the cache holds weak references only, so a
//! connection lives exactly as long as some caller keeps it, and a later
//! request with the same access rights reuses it instead of reopening.
//! Opening (and closing, through the returned value's own `Drop`) stays
//! with the caller - this crate never owns handles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Access rights requested when opening a manager connection.
///
/// Bit values match the native `SC_MANAGER_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessMask(u32);

impl AccessMask {
    /// Connect to the manager.
    pub const CONNECT: AccessMask = AccessMask(0x0001);

    /// Create services.
    pub const CREATE_SERVICE: AccessMask = AccessMask(0x0002);

    /// Enumerate services.
    pub const ENUMERATE_SERVICE: AccessMask = AccessMask(0x0004);

    /// Lock the service database.
    pub const LOCK: AccessMask = AccessMask(0x0008);

    /// Query the database lock status.
    pub const QUERY_LOCK_STATUS: AccessMask = AccessMask(0x0010);

    /// Modify the boot configuration.
    pub const MODIFY_BOOT_CONFIG: AccessMask = AccessMask(0x0020);

    /// Full manager access.
    pub const ALL_ACCESS: AccessMask = AccessMask(0x000F_003F);

    /// Create a mask from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        AccessMask(bits)
    }

    /// Raw bit value.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(&self, other: AccessMask) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for AccessMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        AccessMask(self.0 | rhs.0)
    }
}

/// Cache of weakly-held connections keyed by [`AccessMask`].
pub struct HandleCache<T> {
    entries: Mutex<HashMap<u32, Weak<T>>>,
}

impl<T> HandleCache<T> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Weak<T>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::debug!("[cache] entry map poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Return the live connection for `access`, opening one with `open` if
    /// none is cached.
    ///
    /// The lock is held across `open`, so concurrent requests for the same
    /// rights open at most once.
    pub fn get_or_open<E>(
        &self,
        access: AccessMask,
        open: impl FnOnce() -> std::result::Result<Arc<T>, E>,
    ) -> std::result::Result<Arc<T>, E> {
        let mut entries = self.lock();
        entries.retain(|_, weak| weak.strong_count() > 0);

        if let Some(existing) = entries.get(&access.bits()).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let opened = open()?;
        entries.insert(access.bits(), Arc::downgrade(&opened));
        Ok(opened)
    }

    /// The cached live connection for `access`, if any.
    #[must_use]
    pub fn cached(&self, access: AccessMask) -> Option<Arc<T>> {
        self.lock().get(&access.bits()).and_then(Weak::upgrade)
    }

    /// Number of live cached connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// True when no live connection is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for HandleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_get_or_open_reuses_live_connection() {
        let cache: HandleCache<u32> = HandleCache::new();
        let opens = AtomicUsize::new(0);

        let first = cache
            .get_or_open(AccessMask::CONNECT, || {
                opens.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Arc::new(7))
            })
            .expect("open should succeed");

        let second = cache
            .get_or_open(AccessMask::CONNECT, || {
                opens.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(Arc::new(8))
            })
            .expect("open should succeed");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_dropped_connection_reopens() {
        let cache: HandleCache<u32> = HandleCache::new();

        let first = cache
            .get_or_open(AccessMask::CONNECT, || Ok::<_, ()>(Arc::new(1)))
            .expect("open should succeed");
        drop(first);
        assert!(cache.cached(AccessMask::CONNECT).is_none());
        assert!(cache.is_empty());

        let second = cache
            .get_or_open(AccessMask::CONNECT, || Ok::<_, ()>(Arc::new(2)))
            .expect("open should succeed");
        assert_eq!(*second, 2);
    }

    #[test]
    fn test_distinct_access_rights_distinct_entries() {
        let cache: HandleCache<u32> = HandleCache::new();

        let connect = cache
            .get_or_open(AccessMask::CONNECT, || Ok::<_, ()>(Arc::new(1)))
            .expect("open should succeed");
        let all = cache
            .get_or_open(AccessMask::ALL_ACCESS, || Ok::<_, ()>(Arc::new(2)))
            .expect("open should succeed");

        assert!(!Arc::ptr_eq(&connect, &all));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_open_failure_not_cached() {
        let cache: HandleCache<u32> = HandleCache::new();

        let failed: std::result::Result<Arc<u32>, &str> =
            cache.get_or_open(AccessMask::CONNECT, || Err("denied"));
        assert!(failed.is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_access_mask_ops() {
        let mask = AccessMask::CONNECT | AccessMask::ENUMERATE_SERVICE;
        assert!(mask.contains(AccessMask::CONNECT));
        assert!(!mask.contains(AccessMask::LOCK));
        assert!(AccessMask::ALL_ACCESS.contains(mask));
    }
}
