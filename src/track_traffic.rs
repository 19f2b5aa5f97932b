//! Spatial bookkeeping of which vehicles' buffers share which waypoints.

use crate::{ActorId, WaypointId};
use parking_lot::Mutex;
use slotmap::SparseSecondaryMap;
use std::collections::{BTreeSet, HashMap};

/// A set of actor IDs with a stable iteration order.
pub type ActorIdSet = BTreeSet<ActorId>;

/// Tracks the vehicles whose waypoint buffers pass through each waypoint,
/// and the vehicles whose buffers overlap each other.
///
/// The overlap relation is kept symmetric by [TrackTraffic::record_push],
/// [TrackTraffic::record_pop] and [TrackTraffic::remove_actor]. The single-direction
/// primitives leave symmetry to the caller, who must call both directions.
#[derive(Default)]
pub struct TrackTraffic {
    inner: Mutex<TrackTrafficInner>,
}

#[derive(Default)]
struct TrackTrafficInner {
    /// The vehicles passing through each waypoint.
    passing: SparseSecondaryMap<WaypointId, ActorIdSet>,
    /// The vehicles overlapping each vehicle.
    overlapping: HashMap<ActorId, ActorIdSet>,
}

impl TrackTraffic {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Marks the actor as passing through the waypoint.
    pub fn update_passing_vehicle(&self, waypoint_id: WaypointId, actor_id: ActorId) {
        self.inner.lock().add_passing(waypoint_id, actor_id);
    }

    /// Unmarks the actor as passing through the waypoint.
    pub fn remove_passing_vehicle(&self, waypoint_id: WaypointId, actor_id: ActorId) {
        self.inner.lock().remove_passing(waypoint_id, actor_id);
    }

    /// The actors whose buffers pass through the waypoint.
    pub fn passing_vehicles(&self, waypoint_id: WaypointId) -> ActorIdSet {
        self.inner.lock().passing(waypoint_id).clone()
    }

    /// Whether no buffer passes through the waypoint.
    pub fn is_waypoint_free(&self, waypoint_id: WaypointId) -> bool {
        self.inner.lock().passing(waypoint_id).is_empty()
    }

    /// Records that `other_id` overlaps `actor_id`. One direction only.
    pub fn update_overlapping_vehicle(&self, actor_id: ActorId, other_id: ActorId) {
        self.inner.lock().add_overlap(actor_id, other_id);
    }

    /// Forgets that `other_id` overlaps `actor_id`. One direction only.
    pub fn remove_overlapping_vehicle(&self, actor_id: ActorId, other_id: ActorId) {
        self.inner.lock().remove_overlap(actor_id, other_id);
    }

    /// The actors whose buffers overlap the given actor's buffer.
    pub fn overlapping_vehicles(&self, actor_id: ActorId) -> ActorIdSet {
        self.inner
            .lock()
            .overlapping
            .get(&actor_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Records a waypoint appended to an actor's buffer.
    ///
    /// Only actors on the waypoint that do not already overlap the actor are
    /// registered as new overlaps, in both directions.
    pub fn record_push(&self, actor_id: ActorId, waypoint_id: WaypointId) {
        let mut inner = self.inner.lock();
        inner.add_passing(waypoint_id, actor_id);

        let current = inner.overlapping.get(&actor_id);
        let new_actors = inner
            .passing(waypoint_id)
            .iter()
            .copied()
            .filter(|id| *id != actor_id && !current.map_or(false, |set| set.contains(id)))
            .collect::<Vec<_>>();

        for other_id in new_actors {
            inner.add_overlap(actor_id, other_id);
            inner.add_overlap(other_id, actor_id);
        }
    }

    /// Records the front waypoint removed from an actor's buffer.
    ///
    /// Actors that shared the removed waypoint but not the new front
    /// stop overlapping the actor, in both directions.
    /// When the buffer became empty, overlaps are left untouched.
    pub fn record_pop(&self, actor_id: ActorId, removed_id: WaypointId, new_front: Option<WaypointId>) {
        let mut inner = self.inner.lock();
        inner.remove_passing(removed_id, actor_id);

        let Some(new_front) = new_front else {
            return;
        };
        let stale = inner
            .passing(removed_id)
            .difference(inner.passing(new_front))
            .copied()
            .collect::<Vec<_>>();

        for other_id in stale {
            inner.remove_overlap(actor_id, other_id);
            inner.remove_overlap(other_id, actor_id);
        }
    }

    /// Removes every trace of an actor: its passage through `waypoints`,
    /// and all its overlaps in both directions.
    pub fn remove_actor(&self, actor_id: ActorId, waypoints: impl IntoIterator<Item = WaypointId>) {
        let mut inner = self.inner.lock();
        for waypoint_id in waypoints {
            inner.remove_passing(waypoint_id, actor_id);
        }
        if let Some(others) = inner.overlapping.remove(&actor_id) {
            for other_id in others {
                inner.remove_overlap(other_id, actor_id);
            }
        }
    }
}

impl TrackTrafficInner {
    fn passing(&self, waypoint_id: WaypointId) -> &ActorIdSet {
        static EMPTY: ActorIdSet = BTreeSet::new();
        self.passing.get(waypoint_id).unwrap_or(&EMPTY)
    }

    fn add_passing(&mut self, waypoint_id: WaypointId, actor_id: ActorId) {
        match self.passing.get_mut(waypoint_id) {
            Some(set) => {
                set.insert(actor_id);
            }
            None => {
                self.passing.insert(waypoint_id, BTreeSet::from([actor_id]));
            }
        }
    }

    fn remove_passing(&mut self, waypoint_id: WaypointId, actor_id: ActorId) {
        if let Some(set) = self.passing.get_mut(waypoint_id) {
            set.remove(&actor_id);
            if set.is_empty() {
                self.passing.remove(waypoint_id);
            }
        }
    }

    fn add_overlap(&mut self, actor_id: ActorId, other_id: ActorId) {
        self.overlapping.entry(actor_id).or_default().insert(other_id);
    }

    fn remove_overlap(&mut self, actor_id: ActorId, other_id: ActorId) {
        if let Some(set) = self.overlapping.get_mut(&actor_id) {
            set.remove(&other_id);
            if set.is_empty() {
                self.overlapping.remove(&actor_id);
            }
        }
    }
}
