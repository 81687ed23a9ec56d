//! Subspace registry
//!
//! Owns every subspace for the life of the process. Id allocation and
//! insertion share one critical section; rate changes lock only the
//! subspace they touch.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use warpsync_core::{
    ClockTicks, Subspace, SubspaceId, WarpError, WarpResult, MAX_SUBSPACE_RATE,
};
use warpsync_time::Clock;

use crate::{SubspaceSnapshot, SubspaceStore};

/// Server-side subspace table
pub struct SubspaceRegistry {
    /// All subspaces, each behind its own lock
    subspaces: RwLock<BTreeMap<SubspaceId, Arc<Mutex<Subspace>>>>,
    /// Next free id; held for the whole of a creation
    next_id: Mutex<SubspaceId>,
    /// Serializes snapshot writes
    persist_lock: Mutex<()>,
    store: Arc<dyn SubspaceStore>,
    clock: Arc<dyn Clock>,
}

impl SubspaceRegistry {
    /// Load the persisted subspace, or synthesize subspace 0 if the record
    /// is missing or corrupt
    pub fn open(store: Arc<dyn SubspaceStore>, clock: Arc<dyn Clock>) -> Self {
        let (snapshot, fresh) = match store.load() {
            Ok(snapshot) => {
                info!(
                    subspace = %snapshot.id,
                    universe_time = snapshot.epoch.epoch_time,
                    rate = snapshot.epoch.rate,
                    "loaded saved subspace"
                );
                (snapshot, false)
            }
            Err(e) => {
                warn!(error = %e, "no usable subspace record, creating a new one");
                let snapshot = SubspaceSnapshot {
                    id: SubspaceId::ZERO,
                    epoch: Subspace::initial(clock.now()),
                };
                (snapshot, true)
            }
        };

        let mut subspaces = BTreeMap::new();
        subspaces.insert(snapshot.id, Arc::new(Mutex::new(snapshot.epoch)));

        let registry = SubspaceRegistry {
            subspaces: RwLock::new(subspaces),
            next_id: Mutex::new(snapshot.id.next()),
            persist_lock: Mutex::new(()),
            store,
            clock,
        };
        if fresh {
            registry.persist_latest();
        }
        registry
    }

    /// Allocate an id for a new subspace and insert it.
    /// The rate is clamped into bounds.
    /// Once ids are exhausted the last subspace is reused.
    pub fn create(&self, epoch_clock: ClockTicks, epoch_time: f64, rate: f32) -> SubspaceId {
        let mut next_id = self.next_id.lock();
        let id = *next_id;
        if self.contains(id) {
            warn!(subspace = %id, "subspace ids exhausted, reusing last subspace");
            return id;
        }
        let subspace = Subspace::new(epoch_clock, epoch_time, rate);
        self.subspaces
            .write()
            .insert(id, Arc::new(Mutex::new(subspace)));
        *next_id = id.next();
        debug!(subspace = %id, universe_time = epoch_time, rate = subspace.rate, "created subspace");
        self.persist_latest();
        id
    }

    fn entry(&self, id: SubspaceId) -> Option<Arc<Mutex<Subspace>>> {
        self.subspaces.read().get(&id).cloned()
    }

    pub fn get(&self, id: SubspaceId) -> Option<Subspace> {
        self.entry(id).map(|s| *s.lock())
    }

    pub fn contains(&self, id: SubspaceId) -> bool {
        self.subspaces.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.subspaces.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subspaces.read().is_empty()
    }

    /// Id the next creation will receive
    pub fn next_id(&self) -> SubspaceId {
        *self.next_id.lock()
    }

    /// Every subspace in id order
    pub fn all(&self) -> Vec<(SubspaceId, Subspace)> {
        self.subspaces
            .read()
            .iter()
            .map(|(id, s)| (*id, *s.lock()))
            .collect()
    }

    /// Projected universe time of a subspace
    pub fn universe_time_at(&self, id: SubspaceId, now: ClockTicks) -> WarpResult<f64> {
        self.entry(id)
            .map(|s| s.lock().universe_time_at(now))
            .ok_or(WarpError::UnknownSubspace(id))
    }

    /// Re-anchor at now and swap in a new rate. Unknown ids are a logged no-op.
    pub fn rerate(&self, id: SubspaceId, rate: f32) -> Option<Subspace> {
        let Some(entry) = self.entry(id) else {
            warn!(subspace = %id, "rerate of unknown subspace ignored");
            return None;
        };
        let updated = {
            let mut subspace = entry.lock();
            subspace.rerate(self.clock.now(), rate);
            *subspace
        };
        self.persist_latest();
        Some(updated)
    }

    /// Re-rate only if `rate` is more than `threshold` away from the
    /// current rate. Check and update happen under the subspace's lock.
    pub fn relock_if_drifted(
        &self,
        id: SubspaceId,
        rate: f32,
        threshold: f32,
    ) -> WarpResult<Option<Subspace>> {
        let entry = self.entry(id).ok_or(WarpError::UnknownSubspace(id))?;
        let updated = {
            let mut subspace = entry.lock();
            if !subspace.drifted_from(rate, threshold) {
                return Ok(None);
            }
            let old_rate = subspace.rate;
            subspace.rerate(self.clock.now(), rate);
            info!(subspace = %id, old_rate, new_rate = subspace.rate, "relocked subspace");
            *subspace
        };
        self.persist_latest();
        Ok(Some(updated))
    }

    /// Id whose projected universe time at `now` is greatest; ties go to
    /// the lowest id
    pub fn latest(&self, now: ClockTicks) -> SubspaceId {
        let subspaces = self.subspaces.read();
        let mut best: Option<(SubspaceId, f64)> = None;
        for (id, subspace) in subspaces.iter() {
            let time = subspace.lock().universe_time_at(now);
            match best {
                Some((_, best_time)) if time <= best_time => {}
                _ => best = Some((*id, time)),
            }
        }
        best.map(|(id, _)| id).unwrap_or(SubspaceId::ZERO)
    }

    /// Freeze a subspace at its current universe time by re-anchoring it
    /// to now, then persist
    pub fn hold(&self, id: SubspaceId) {
        if let Some(entry) = self.entry(id) {
            entry.lock().reanchor(self.clock.now());
            debug!(subspace = %id, "holding subspace while offline");
            self.persist_latest();
        }
    }

    /// Restart every timeline from its stored universe time at real-time
    /// rate, as if no wall time had passed since it was last anchored
    pub fn resume_all(&self) {
        let now = self.clock.now();
        for entry in self.subspaces.read().values() {
            let mut subspace = entry.lock();
            subspace.epoch_clock = now;
            subspace.rate = MAX_SUBSPACE_RATE;
        }
        debug!("resumed all subspaces from their held universe time");
        self.persist_latest();
    }

    /// Overwrite the durable record with the latest subspace.
    /// Failures are logged, never fatal.
    fn persist_latest(&self) {
        let _guard = self.persist_lock.lock();
        let id = self.latest(self.clock.now());
        let Some(epoch) = self.get(id) else {
            return;
        };
        if let Err(e) = self.store.save(&SubspaceSnapshot { id, epoch }) {
            warn!(subspace = %id, error = %e, "failed to persist latest subspace");
        }
    }
}
