//! Shared captain registry.
//!
//! Slots live in an append-only arena guarded by an `RwLock`; the hot path
//! (snapshot, claim, release) only takes the read lock. Each slot's status is
//! an atomic, and a claim is a single compare-exchange from `Available` to
//! `Assigned`, so at most one ride can win a captain.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::clock::Clock;
use crate::error::DispatchError;
use crate::types::{Location, UserId};

use super::types::{AvailableCaptain, CaptainProfile, CaptainStatus, CaptainUpdate};

struct CaptainSlot {
    profile: Mutex<CaptainProfile>,
    status: AtomicU8,
    available_since_ms: AtomicI64,
}

impl CaptainSlot {
    fn profile(&self) -> MutexGuard<'_, CaptainProfile> {
        self.profile.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status(&self) -> CaptainStatus {
        CaptainStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    fn transition(&self, from: CaptainStatus, to: CaptainStatus) -> bool {
        self.status
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[derive(Default)]
struct Registry {
    slots: Vec<Arc<CaptainSlot>>,
    index: HashMap<UserId, usize>,
}

pub struct CaptainPool {
    registry: RwLock<Registry>,
    clock: Arc<dyn Clock>,
}

impl CaptainPool {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            clock,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, id: UserId) -> Option<Arc<CaptainSlot>> {
        let registry = self.read();
        registry.index.get(&id).map(|&i| Arc::clone(&registry.slots[i]))
    }

    pub fn len(&self) -> usize {
        self.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a captain or refresh its profile. An assigned captain keeps
    /// its assignment regardless of `available`.
    pub fn upsert(&self, profile: CaptainProfile, available: bool) -> Result<CaptainStatus, DispatchError> {
        profile.location.lat_lng()?;
        let id = profile.id;
        let existing = self.slot(id);
        let slot = match existing {
            Some(slot) => {
                *slot.profile() = profile;
                slot
            }
            None => {
                let mut registry = self.write();
                // Another writer may have inserted between the two locks.
                if let Some(&i) = registry.index.get(&id) {
                    let slot = Arc::clone(&registry.slots[i]);
                    *slot.profile() = profile;
                    slot
                } else {
                    let slot = Arc::new(CaptainSlot {
                        profile: Mutex::new(profile),
                        status: AtomicU8::new(CaptainStatus::OffDuty.as_u8()),
                        available_since_ms: AtomicI64::new(self.clock.now().timestamp_millis()),
                    });
                    let next = registry.slots.len();
                    registry.index.insert(id, next);
                    registry.slots.push(Arc::clone(&slot));
                    debug!(captain = %id, "captain registered");
                    slot
                }
            }
        };
        Ok(self.apply_availability(id, &slot, available))
    }

    /// Apply a feed update. Unknown captains must be registered first.
    pub fn set_availability(&self, update: CaptainUpdate) -> Result<CaptainStatus, DispatchError> {
        let slot = self
            .slot(update.captain)
            .ok_or_else(|| DispatchError::Validation(format!("unknown captain {}", update.captain)))?;
        if let Some(location) = update.location {
            location.lat_lng()?;
            slot.profile().location = location;
        }
        Ok(self.apply_availability(update.captain, &slot, update.available))
    }

    fn apply_availability(&self, id: UserId, slot: &CaptainSlot, available: bool) -> CaptainStatus {
        if available {
            if slot.transition(CaptainStatus::OffDuty, CaptainStatus::Available) {
                slot.available_since_ms
                    .store(self.clock.now().timestamp_millis(), Ordering::Release);
                debug!(captain = %id, "captain available");
            }
        } else if slot.transition(CaptainStatus::Available, CaptainStatus::OffDuty) {
            debug!(captain = %id, "captain off duty");
        }
        slot.status()
    }

    pub fn status(&self, id: UserId) -> Option<CaptainStatus> {
        self.slot(id).map(|slot| slot.status())
    }

    pub fn profile(&self, id: UserId) -> Option<CaptainProfile> {
        self.slot(id).map(|slot| slot.profile().clone())
    }

    /// Captains available right now. A captain in the snapshot may still be
    /// claimed by someone else before [`CaptainPool::claim`] is called.
    pub fn snapshot_available(&self) -> Vec<AvailableCaptain> {
        let registry = self.read();
        registry
            .slots
            .iter()
            .filter(|slot| slot.status() == CaptainStatus::Available)
            .map(|slot| {
                let profile = slot.profile();
                AvailableCaptain {
                    id: profile.id,
                    vehicle_class: profile.vehicle_class,
                    capabilities: profile.capabilities,
                    location: profile.location.clone(),
                    available_since: from_millis(slot.available_since_ms.load(Ordering::Acquire)),
                }
            })
            .collect()
    }

    /// Atomically move a captain from available to assigned. Returns `false`
    /// when the captain is unknown, off duty or already assigned.
    pub fn claim(&self, id: UserId) -> bool {
        let claimed = self
            .slot(id)
            .is_some_and(|slot| slot.transition(CaptainStatus::Available, CaptainStatus::Assigned));
        if claimed {
            debug!(captain = %id, "captain claimed");
        }
        claimed
    }

    /// Return an assigned captain to the available set, optionally at a new
    /// position (the drop point after a trip).
    pub fn release(&self, id: UserId, location: Option<Location>) -> bool {
        let Some(slot) = self.slot(id) else {
            return false;
        };
        if let Some(location) = location {
            slot.profile().location = location;
        }
        if slot.transition(CaptainStatus::Assigned, CaptainStatus::Available) {
            slot.available_since_ms
                .store(self.clock.now().timestamp_millis(), Ordering::Release);
            debug!(captain = %id, "captain released");
            true
        } else {
            false
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::matching::types::CaptainCapabilities;
    use crate::types::VehicleClass;
    use chrono::Duration;

    fn profile(id: u64) -> CaptainProfile {
        CaptainProfile {
            id: UserId(id),
            vehicle_class: VehicleClass::Mini,
            capabilities: CaptainCapabilities::all(),
            location: Location::new(52.52, 13.405),
        }
    }

    fn pool() -> (CaptainPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()));
        (CaptainPool::new(clock.clone()), clock)
    }

    #[test]
    fn claim_succeeds_once() {
        let (pool, _) = pool();
        pool.upsert(profile(1), true).expect("upsert");
        assert!(pool.claim(UserId(1)));
        assert!(!pool.claim(UserId(1)));
        assert_eq!(pool.status(UserId(1)), Some(CaptainStatus::Assigned));
        assert!(pool.snapshot_available().is_empty());
    }

    #[test]
    fn feed_cannot_free_an_assigned_captain() {
        let (pool, _) = pool();
        pool.upsert(profile(1), true).expect("upsert");
        assert!(pool.claim(UserId(1)));
        let status = pool
            .set_availability(CaptainUpdate {
                captain: UserId(1),
                available: true,
                location: None,
            })
            .expect("update");
        assert_eq!(status, CaptainStatus::Assigned);
        let status = pool.upsert(profile(1), false).expect("upsert");
        assert_eq!(status, CaptainStatus::Assigned);
    }

    #[test]
    fn release_restarts_the_availability_clock() {
        let (pool, clock) = pool();
        pool.upsert(profile(1), true).expect("upsert");
        let first = pool.snapshot_available()[0].available_since;
        assert!(pool.claim(UserId(1)));
        clock.advance(Duration::minutes(20));
        assert!(pool.release(UserId(1), Some(Location::new(52.53, 13.41))));
        let snapshot = pool.snapshot_available();
        assert_eq!(snapshot[0].available_since, first + Duration::minutes(20));
        assert_eq!(snapshot[0].location, Location::new(52.53, 13.41));
        assert!(!pool.release(UserId(1), None));
    }

    #[test]
    fn unknown_captain_update_is_rejected() {
        let (pool, _) = pool();
        let err = pool
            .set_availability(CaptainUpdate {
                captain: UserId(9),
                available: true,
                location: None,
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
        assert!(!pool.claim(UserId(9)));
    }

    #[test]
    fn each_new_captain_gets_its_own_slot() {
        let (pool, _) = pool();
        assert!(pool.is_empty());
        for id in 1..=4 {
            pool.upsert(profile(id), id % 2 == 0).expect("upsert");
        }
        pool.upsert(profile(3), true).expect("re-register");
        assert_eq!(pool.len(), 4);
        assert!(pool.claim(UserId(4)));
        assert_eq!(pool.status(UserId(4)), Some(CaptainStatus::Assigned));
        assert_eq!(pool.status(UserId(2)), Some(CaptainStatus::Available));
        assert_eq!(pool.status(UserId(1)), Some(CaptainStatus::OffDuty));
        assert_eq!(pool.status(UserId(3)), Some(CaptainStatus::Available));
    }

    #[test]
    fn concurrent_claims_have_exactly_one_winner() {
        let (pool, _) = pool();
        pool.upsert(profile(1), true).expect("upsert");
        let pool = Arc::new(pool);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.claim(UserId(1)))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }
}
