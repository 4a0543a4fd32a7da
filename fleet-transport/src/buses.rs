//! Bus arbitration: one holder per physical bus, short-TTL scan caches.
//!
//! Every operation that drives the CAN bus or the USB DFU enumeration takes
//! the corresponding lock for its whole duration. Status paths observe the
//! held-flags instead of blocking so a UI poll can report `bus_busy`
//! immediately.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::types::{DfuDevice, DiscoveredDevice};

/// CAN scan results stay valid this long (per interface)
const CAN_CACHE_TTL: Duration = Duration::from_secs(2);
/// DFU listings go stale faster: enumeration changes on every reboot
const DFU_CACHE_TTL: Duration = Duration::from_secs(1);

struct CacheEntry<T> {
    at: Instant,
    value: T,
}

/// Guard for a bus; clears the observable held-flag on drop.
pub struct BusGuard<'a> {
    _guard: MutexGuard<'a, ()>,
    flag: &'a AtomicBool,
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Default)]
pub struct BusArbiter {
    can: AsyncMutex<()>,
    dfu: AsyncMutex<()>,
    can_held: AtomicBool,
    dfu_held: AtomicBool,
    can_cache: parking_lot::Mutex<HashMap<String, CacheEntry<Vec<DiscoveredDevice>>>>,
    dfu_cache: parking_lot::Mutex<Option<CacheEntry<Vec<DfuDevice>>>>,
}

impl BusArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_can(&self) -> BusGuard<'_> {
        let guard = self.can.lock().await;
        self.can_held.store(true, Ordering::Release);
        BusGuard {
            _guard: guard,
            flag: &self.can_held,
        }
    }

    pub async fn lock_dfu(&self) -> BusGuard<'_> {
        let guard = self.dfu.lock().await;
        self.dfu_held.store(true, Ordering::Release);
        BusGuard {
            _guard: guard,
            flag: &self.dfu_held,
        }
    }

    /// Whether some task currently holds the CAN lock (non-blocking probe)
    pub fn can_locked(&self) -> bool {
        self.can_held.load(Ordering::Acquire)
    }

    /// Whether some task currently holds the DFU lock (non-blocking probe)
    pub fn dfu_locked(&self) -> bool {
        self.dfu_held.load(Ordering::Acquire)
    }

    pub fn cached_can(&self, interface: &str) -> Option<Vec<DiscoveredDevice>> {
        let cache = self.can_cache.lock();
        cache
            .get(interface)
            .filter(|e| e.at.elapsed() < CAN_CACHE_TTL)
            .map(|e| e.value.clone())
    }

    pub fn store_can(&self, interface: &str, devices: Vec<DiscoveredDevice>) {
        self.can_cache.lock().insert(
            interface.to_string(),
            CacheEntry {
                at: Instant::now(),
                value: devices,
            },
        );
    }

    /// Drop the cached scan for one interface (after a state-changing
    /// operation on it).
    pub fn invalidate_can(&self, interface: &str) {
        self.can_cache.lock().remove(interface);
    }

    pub fn cached_dfu(&self) -> Option<Vec<DfuDevice>> {
        let cache = self.dfu_cache.lock();
        cache
            .as_ref()
            .filter(|e| e.at.elapsed() < DFU_CACHE_TTL)
            .map(|e| e.value.clone())
    }

    pub fn store_dfu(&self, devices: Vec<DfuDevice>) {
        *self.dfu_cache.lock() = Some(CacheEntry {
            at: Instant::now(),
            value: devices,
        });
    }

    pub fn invalidate_dfu(&self) {
        *self.dfu_cache.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn held_flag_tracks_guard_lifetime() {
        let buses = BusArbiter::new();
        assert!(!buses.can_locked());
        {
            let _g = buses.lock_can().await;
            assert!(buses.can_locked());
            assert!(!buses.dfu_locked());
        }
        assert!(!buses.can_locked());
    }

    #[tokio::test]
    async fn can_cache_is_per_interface() {
        let buses = BusArbiter::new();
        buses.store_can("can0", vec![]);
        assert!(buses.cached_can("can0").is_some());
        assert!(buses.cached_can("can1").is_none());
        buses.invalidate_can("can0");
        assert!(buses.cached_can("can0").is_none());
    }
}
