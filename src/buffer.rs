//! The forward-looking path of a single vehicle.

use crate::error::Result;
use crate::map::LocalMap;
use crate::math::{deviation_dot, Point3d, Vector3d};
use crate::track_traffic::TrackTraffic;
use crate::{ActorId, WaypointId};
use cgmath::prelude::*;
use itertools::Itertools;
use rand::Rng;
use std::collections::VecDeque;

/// An ordered window of upcoming waypoints, nearest first.
///
/// Every push and pop is mirrored into the [TrackTraffic] registry,
/// so the buffer must always be mutated through these methods.
#[derive(Clone, Debug, Default)]
pub struct WaypointBuffer {
    waypoints: VecDeque<WaypointId>,
}

impl WaypointBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Default::default()
    }

    /// The number of waypoints in the buffer.
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// The nearest upcoming waypoint.
    pub fn front(&self) -> Option<WaypointId> {
        self.waypoints.front().copied()
    }

    /// The farthest waypoint on the horizon.
    pub fn back(&self) -> Option<WaypointId> {
        self.waypoints.back().copied()
    }

    /// The waypoint at position `idx`, counting from the front.
    pub fn get(&self, idx: usize) -> Option<WaypointId> {
        self.waypoints.get(idx).copied()
    }

    /// Returns an iterator over the waypoints, front to back.
    pub fn iter(&self) -> impl Iterator<Item = WaypointId> + '_ {
        self.waypoints.iter().copied()
    }

    /// Copies the waypoints out, front to back.
    pub fn to_vec(&self) -> Vec<WaypointId> {
        self.iter().collect()
    }

    /// Appends a waypoint to the back of the buffer.
    pub fn push(&mut self, actor_id: ActorId, waypoint_id: WaypointId, track: &TrackTraffic) {
        self.waypoints.push_back(waypoint_id);
        track.record_push(actor_id, waypoint_id);
    }

    /// Removes the front waypoint.
    pub fn pop(&mut self, actor_id: ActorId, track: &TrackTraffic) -> Option<WaypointId> {
        let removed = self.waypoints.pop_front()?;
        track.record_pop(actor_id, removed, self.front());
        Some(removed)
    }

    /// Pops every waypoint, one at a time.
    pub fn clear(&mut self, actor_id: ActorId, track: &TrackTraffic) {
        while self.pop(actor_id, track).is_some() {}
    }

    /// Empties the buffer and erases the actor from the registry altogether.
    pub fn release(&mut self, actor_id: ActorId, track: &TrackTraffic) {
        track.remove_actor(actor_id, self.waypoints.drain(..));
    }

    /// Pops waypoints which are no longer ahead of the vehicle.
    /// Returns the number of waypoints popped.
    ///
    /// # Parameters
    /// * `location` - The vehicle's location
    /// * `heading` - A unit vector aligned with the vehicle's heading
    pub fn prune(
        &mut self,
        actor_id: ActorId,
        location: Point3d,
        heading: Vector3d,
        map: &dyn LocalMap,
        track: &TrackTraffic,
    ) -> Result<usize> {
        let mut popped = 0;
        while let Some(front) = self.front() {
            let front = map.get(front)?;
            if deviation_dot(location, heading, front.location()) > 0.0 {
                break;
            }
            self.pop(actor_id, track);
            popped += 1;
        }
        Ok(popped)
    }

    /// Appends successors until the buffer spans `horizon` metres, measured
    /// as the straight-line distance from front to back.
    /// Where the path branches, a successor is picked uniformly at random.
    /// Stops early at a dead end, or where the path runs back into the buffer.
    pub fn grow(
        &mut self,
        actor_id: ActorId,
        horizon: f64,
        map: &dyn LocalMap,
        track: &TrackTraffic,
        rng: &mut impl Rng,
    ) -> Result<()> {
        let (Some(front), Some(mut back)) = (self.front(), self.back()) else {
            return Ok(());
        };
        let front = map.get(front)?;
        let horizon_sq = horizon * horizon;

        loop {
            let waypoint = map.get(back)?;
            if waypoint.distance_squared(front) > horizon_sq {
                return Ok(());
            }
            let next = waypoint.next_waypoints();
            let next = match next.len() {
                0 => return Ok(()),
                1 => next[0],
                n => next[rng.gen_range(0..n)],
            };
            if self.waypoints.contains(&next) {
                return Ok(());
            }
            back = next;
            self.push(actor_id, back, track);
        }
    }

    /// The index of the first waypoint at least `distance` metres
    /// (in a straight line) from the front, or the last index if none is.
    pub fn index_at_distance(&self, distance: f64, map: &dyn LocalMap) -> Result<usize> {
        let Some(front) = self.front() else {
            return Ok(0);
        };
        let front = map.get(front)?.location();
        let distance_sq = distance * distance;
        for (idx, id) in self.iter().enumerate() {
            if map.get(id)?.location().distance2(front) >= distance_sq {
                return Ok(idx);
            }
        }
        Ok(self.len().saturating_sub(1))
    }

    /// Approximates the squared length of the buffer from three samples:
    /// the front, the middle and the back.
    ///
    /// On curved roads this may over- or under-estimate the true path length.
    pub fn approx_length_squared(&self, map: &dyn LocalMap) -> Result<f64> {
        let (Some(front), Some(mid), Some(back)) =
            (self.front(), self.get(self.len() / 2), self.back())
        else {
            return Ok(0.0);
        };
        let location = |id| map.get(id).map(|wp| wp.location());
        let (front, mid, back) = (location(front)?, location(mid)?, location(back)?);
        Ok((front.distance(mid) + mid.distance(back)).powi(2))
    }

    /// The length of the polyline through every waypoint in the buffer.
    pub fn path_length(&self, map: &dyn LocalMap) -> Result<f64> {
        let mut length = 0.0;
        for (a, b) in self.iter().tuple_windows() {
            length += map.get(a)?.location().distance(map.get(b)?.location());
        }
        Ok(length)
    }
}
