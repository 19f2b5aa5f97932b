//! The road network as seen by the localization stage.

use crate::error::{Error, Result};
use crate::math::{Point3d, Vector3d};
use crate::WaypointId;
use cgmath::prelude::*;
use slotmap::SlotMap;
use smallvec::SmallVec;

/// Default search radius of [InMemoryMap::waypoint_in_vicinity], in m.
const VICINITY_RADIUS: f64 = 10.0;

/// A discrete point with an orientation on the road graph.
#[derive(Clone, Debug)]
pub struct Waypoint {
    /// The waypoint's ID.
    id: WaypointId,
    /// The world space location.
    location: Point3d,
    /// A unit vector along the direction of travel.
    forward: Vector3d,
    /// Whether the waypoint lies inside a junction.
    junction: bool,
    /// The waypoints that succeed this one.
    next: SmallVec<[WaypointId; 2]>,
    /// The neighbour in the lane to the left, travelling the same direction.
    left: Option<WaypointId>,
    /// The neighbour in the lane to the right, travelling the same direction.
    right: Option<WaypointId>,
}

impl Waypoint {
    /// Gets the waypoint's ID.
    pub fn id(&self) -> WaypointId {
        self.id
    }

    /// The world space location of the waypoint.
    pub fn location(&self) -> Point3d {
        self.location
    }

    /// A unit vector along the direction of travel.
    pub fn forward_vector(&self) -> Vector3d {
        self.forward
    }

    /// Whether the waypoint lies inside a junction.
    pub fn is_junction(&self) -> bool {
        self.junction
    }

    /// The waypoints that succeed this one.
    pub fn next_waypoints(&self) -> &[WaypointId] {
        &self.next
    }

    /// The neighbour in the lane to the left.
    pub fn left_waypoint(&self) -> Option<WaypointId> {
        self.left
    }

    /// The neighbour in the lane to the right.
    pub fn right_waypoint(&self) -> Option<WaypointId> {
        self.right
    }

    /// The squared distance between this waypoint and another.
    pub fn distance_squared(&self, other: &Waypoint) -> f64 {
        self.location.distance2(other.location)
    }
}

/// Read-only queries on a precomputed waypoint graph.
pub trait LocalMap: Send + Sync {
    /// Looks up a waypoint by its ID.
    fn waypoint(&self, id: WaypointId) -> Option<&Waypoint>;

    /// Finds the waypoint closest to `location`, however far away it is.
    fn nearest_waypoint(&self, location: Point3d) -> Option<WaypointId>;

    /// Finds the closest waypoint reachable from `location`,
    /// or `None` if there is none nearby.
    fn waypoint_in_vicinity(&self, location: Point3d) -> Option<WaypointId>;

    /// Looks up a waypoint, treating a missing one as an error.
    fn get(&self, id: WaypointId) -> Result<&Waypoint> {
        self.waypoint(id).ok_or(Error::UnknownWaypoint(id))
    }
}

/// A [LocalMap] held entirely in memory.
#[derive(Clone)]
pub struct InMemoryMap {
    waypoints: SlotMap<WaypointId, Waypoint>,
    vicinity_radius: f64,
}

impl Default for InMemoryMap {
    fn default() -> Self {
        Self {
            waypoints: SlotMap::with_key(),
            vicinity_radius: VICINITY_RADIUS,
        }
    }
}

impl InMemoryMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets the search radius used by [LocalMap::waypoint_in_vicinity], in m.
    pub fn set_vicinity_radius(&mut self, radius: f64) {
        self.vicinity_radius = radius;
    }

    /// Adds a waypoint with no connections.
    pub fn add_waypoint(&mut self, location: Point3d, forward: Vector3d) -> WaypointId {
        self.waypoints.insert_with_key(|id| Waypoint {
            id,
            location,
            forward: forward.normalize(),
            junction: false,
            next: SmallVec::new(),
            left: None,
            right: None,
        })
    }

    /// Specifies that `to` succeeds `from`.
    pub fn connect(&mut self, from: WaypointId, to: WaypointId) {
        let next = &mut self.waypoints[from].next;
        if !next.contains(&to) {
            next.push(to);
        }
    }

    /// Marks a waypoint as lying inside (or outside) a junction.
    pub fn set_junction(&mut self, id: WaypointId, junction: bool) {
        self.waypoints[id].junction = junction;
    }

    /// Specifies that two lanes run side by side in the same direction.
    /// Waypoints are paired up in order; surplus waypoints of the longer lane get no neighbour.
    pub fn link_lanes(&mut self, left_lane: &[WaypointId], right_lane: &[WaypointId]) {
        for (left, right) in left_lane.iter().zip(right_lane) {
            self.waypoints[*left].right = Some(*right);
            self.waypoints[*right].left = Some(*left);
        }
    }

    /// Adds a straight lane from `start` to `end` with waypoints spaced
    /// `spacing` apart, each connected to the next.
    /// Returns the IDs of the new waypoints in order of travel.
    pub fn add_straight_lane(&mut self, start: Point3d, end: Point3d, spacing: f64) -> Vec<WaypointId> {
        let length = start.distance(end);
        let forward = (end - start).normalize();
        let count = (length / spacing).floor() as usize + 1;
        let ids = (0..count)
            .map(|i| self.add_waypoint(start + forward * (spacing * i as f64), forward))
            .collect::<Vec<_>>();
        for pair in ids.windows(2) {
            self.connect(pair[0], pair[1]);
        }
        ids
    }

    /// The number of waypoints in the map.
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    /// Whether the map has no waypoints.
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    /// Returns an iterator over all the waypoints in the map.
    pub fn iter_waypoints(&self) -> impl Iterator<Item = &Waypoint> {
        self.waypoints.values()
    }

    fn closest(&self, location: Point3d) -> Option<(&Waypoint, f64)> {
        self.waypoints
            .values()
            .map(|wp| (wp, wp.location.distance2(location)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl LocalMap for InMemoryMap {
    fn waypoint(&self, id: WaypointId) -> Option<&Waypoint> {
        self.waypoints.get(id)
    }

    fn nearest_waypoint(&self, location: Point3d) -> Option<WaypointId> {
        self.closest(location).map(|(wp, _)| wp.id)
    }

    fn waypoint_in_vicinity(&self, location: Point3d) -> Option<WaypointId> {
        self.closest(location)
            .filter(|(_, dist_sq)| *dist_sq <= self.vicinity_radius * self.vicinity_radius)
            .map(|(wp, _)| wp.id)
    }
}
