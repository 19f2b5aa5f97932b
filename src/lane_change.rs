//! Deciding whether, and where, a vehicle should change lanes.

use crate::debug::debug_line;
use crate::error::Result;
use crate::localization::LocalizationAttributes;
use crate::map::{LocalMap, Waypoint};
use crate::math::{deviation_dot, Point3d, Vector3d};
use crate::parameters::LaneChangeDirection;
use crate::track_traffic::TrackTraffic;
use crate::{ActorId, WaypointId};
use arrayvec::ArrayVec;
use cgmath::prelude::*;
use log::debug;

/// The vehicle a lane change is being considered for.
#[derive(Clone, Copy, Debug)]
pub struct LaneChangeQuery {
    /// The vehicle's ID.
    pub actor_id: ActorId,
    /// The vehicle's location.
    pub location: Point3d,
    /// A unit vector aligned with the vehicle's heading.
    pub heading: Vector3d,
    /// The vehicle's speed in m/s.
    pub speed: f64,
    /// The front of the vehicle's waypoint buffer.
    pub front: WaypointId,
}

/// Arbitrates lane changes from the occupancy recorded in a [TrackTraffic] registry.
pub struct LaneChangeArbiter<'a, F> {
    map: &'a dyn LocalMap,
    track: &'a TrackTraffic,
    attributes: &'a LocalizationAttributes,
    /// Looks up the front of another vehicle's buffer.
    front_of: F,
}

impl<'a, F> LaneChangeArbiter<'a, F>
where
    F: Fn(ActorId) -> Option<WaypointId>,
{
    pub fn new(
        map: &'a dyn LocalMap,
        track: &'a TrackTraffic,
        attributes: &'a LocalizationAttributes,
        front_of: F,
    ) -> Self {
        Self {
            map,
            track,
            attributes,
            front_of,
        }
    }

    /// Decides on a lane change for the vehicle.
    ///
    /// Returns the change-over point the vehicle's buffer should be rebuilt from,
    /// or `None` if the vehicle should stay in its lane.
    ///
    /// # Parameters
    /// * `vehicle` - The vehicle to consider
    /// * `force` - A commanded lane change, which skips the desirability check
    ///   and ignores whether the target lane is occupied
    pub fn assign_lane_change(
        &self,
        vehicle: &LaneChangeQuery,
        force: Option<LaneChangeDirection>,
    ) -> Result<Option<WaypointId>> {
        let current = self.map.get(vehicle.front)?;

        let need_to_change_lane = match force {
            Some(_) => true,
            None => self.lane_change_desirable(vehicle, current)?,
        };
        if !need_to_change_lane {
            return Ok(None);
        }

        let candidates: ArrayVec<Option<WaypointId>, 2> = match force {
            Some(LaneChangeDirection::Left) => [current.left_waypoint()].into_iter().collect(),
            Some(LaneChangeDirection::Right) => [current.right_waypoint()].into_iter().collect(),
            None => [current.left_waypoint(), current.right_waypoint()].into(),
        };
        let target = candidates
            .into_iter()
            .flatten()
            .find(|id| force.is_some() || self.track.is_waypoint_free(*id));

        match target {
            Some(target) => self.change_over_point(target, vehicle.speed).map(Some),
            None => Ok(None),
        }
    }

    /// Scans the vehicles overlapping this one for a reason to change lanes.
    ///
    /// A roughly parallel vehicle ahead, beyond the minimum change distance and
    /// next to a free lane, makes a change desirable. One that is closer than the
    /// minimum change distance vetoes the change outright.
    fn lane_change_desirable(&self, vehicle: &LaneChangeQuery, current: &Waypoint) -> Result<bool> {
        let min_dist_sq = self.attributes.min_lane_change_distance.powi(2);
        let mut need_to_change_lane = false;

        for other_id in self.track.overlapping_vehicles(vehicle.actor_id) {
            if other_id == vehicle.actor_id {
                continue;
            }
            let Some(other) = (self.front_of)(other_id).and_then(|id| self.map.waypoint(id)) else {
                debug!("No buffer for overlapping vehicle {}", other_id);
                continue;
            };
            let other_location = other.location();
            debug_line("lane change obstacle", vehicle.location, other_location);

            let parallel = current.forward_vector().dot(other.forward_vector())
                > self.attributes.max_lane_obstacle_curvature;
            if current.is_junction() || other.is_junction() || !parallel {
                continue;
            }
            if deviation_dot(vehicle.location, vehicle.heading, other_location) <= 0.0 {
                continue;
            }

            let dist_sq = other_location.distance2(vehicle.location);
            if dist_sq < min_dist_sq {
                return Ok(false);
            }
            if dist_sq > min_dist_sq && self.has_free_neighbour(other) {
                need_to_change_lane = true;
            }
        }

        Ok(need_to_change_lane)
    }

    /// Whether either lane beside the waypoint is unoccupied.
    fn has_free_neighbour(&self, waypoint: &Waypoint) -> bool {
        [waypoint.left_waypoint(), waypoint.right_waypoint()]
            .into_iter()
            .flatten()
            .any(|id| self.track.is_waypoint_free(id))
    }

    /// Walks forward from the first waypoint of the target lane until the
    /// change-over distance is covered or a junction is reached.
    fn change_over_point(&self, start: WaypointId, speed: f64) -> Result<WaypointId> {
        let start = self.map.get(start)?;
        let change_over_distance = self.attributes.change_over_distance(speed);

        let mut point = start;
        while point.distance_squared(start) < change_over_distance && !point.is_junction() {
            match point.next_waypoints().first() {
                Some(next) => point = self.map.get(*next)?,
                None => break,
            }
        }
        Ok(point.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::InMemoryMap;
    use std::collections::HashMap;

    /// Two parallel lanes along the x axis; `left` is the left neighbour of `right`.
    struct Road {
        map: InMemoryMap,
        right: Vec<WaypointId>,
        left: Vec<WaypointId>,
    }

    fn two_lane_road() -> Road {
        let mut map = InMemoryMap::new();
        let right = map.add_straight_lane(Point3d::new(0.0, 0.0, 0.0), Point3d::new(100.0, 0.0, 0.0), 2.0);
        let left = map.add_straight_lane(Point3d::new(0.0, 3.5, 0.0), Point3d::new(100.0, 3.5, 0.0), 2.0);
        map.link_lanes(&left, &right);
        Road { map, right, left }
    }

    /// Fills a buffer of 16 waypoints starting at `lane[start]` into the registry.
    fn occupy(track: &TrackTraffic, fronts: &mut HashMap<ActorId, WaypointId>, actor: ActorId, lane: &[WaypointId], start: usize) {
        for id in &lane[start..start + 16] {
            track.record_push(actor, *id);
        }
        fronts.insert(actor, lane[start]);
    }

    fn ego(road: &Road) -> LaneChangeQuery {
        LaneChangeQuery {
            actor_id: 1,
            location: Point3d::new(1.0, 0.0, 0.0),
            heading: Vector3d::unit_x(),
            speed: 0.0,
            front: road.right[1],
        }
    }

    #[test]
    fn distant_obstacle_triggers_change() {
        let road = two_lane_road();
        let track = TrackTraffic::new();
        let attributes = LocalizationAttributes::default();
        let mut fronts = HashMap::new();
        occupy(&track, &mut fronts, 1, &road.right, 1);
        occupy(&track, &mut fronts, 2, &road.right, 11);

        let arbiter = LaneChangeArbiter::new(&road.map, &track, &attributes, |id| fronts.get(&id).copied());
        let point = arbiter.assign_lane_change(&ego(&road), None).unwrap();
        assert_eq!(point, Some(road.left[3]));
    }

    #[test]
    fn close_obstacle_vetoes_change() {
        let road = two_lane_road();
        let track = TrackTraffic::new();
        let attributes = LocalizationAttributes::default();
        let mut fronts = HashMap::new();
        occupy(&track, &mut fronts, 1, &road.right, 1);
        // Actor 2 alone would make a change desirable; actor 3 is too close.
        occupy(&track, &mut fronts, 2, &road.right, 11);
        occupy(&track, &mut fronts, 3, &road.right, 4);

        let arbiter = LaneChangeArbiter::new(&road.map, &track, &attributes, |id| fronts.get(&id).copied());
        assert_eq!(arbiter.assign_lane_change(&ego(&road), None).unwrap(), None);
    }

    #[test]
    fn no_change_without_obstacles() {
        let road = two_lane_road();
        let track = TrackTraffic::new();
        let attributes = LocalizationAttributes::default();
        let mut fronts = HashMap::new();
        occupy(&track, &mut fronts, 1, &road.right, 1);

        let arbiter = LaneChangeArbiter::new(&road.map, &track, &attributes, |id| fronts.get(&id).copied());
        assert_eq!(arbiter.assign_lane_change(&ego(&road), None).unwrap(), None);
    }

    #[test]
    fn occupied_neighbour_lanes_block_change() {
        let road = two_lane_road();
        let track = TrackTraffic::new();
        let attributes = LocalizationAttributes::default();
        let mut fronts = HashMap::new();
        occupy(&track, &mut fronts, 1, &road.right, 1);
        occupy(&track, &mut fronts, 2, &road.right, 11);
        occupy(&track, &mut fronts, 4, &road.left, 0);

        let arbiter = LaneChangeArbiter::new(&road.map, &track, &attributes, |id| fronts.get(&id).copied());
        assert_eq!(arbiter.assign_lane_change(&ego(&road), None).unwrap(), None);
    }

    #[test]
    fn forced_change_ignores_occupancy() {
        let road = two_lane_road();
        let track = TrackTraffic::new();
        let attributes = LocalizationAttributes::default();
        let mut fronts = HashMap::new();
        occupy(&track, &mut fronts, 1, &road.right, 1);
        occupy(&track, &mut fronts, 4, &road.left, 0);

        let arbiter = LaneChangeArbiter::new(&road.map, &track, &attributes, |id| fronts.get(&id).copied());
        let left = arbiter
            .assign_lane_change(&ego(&road), Some(LaneChangeDirection::Left))
            .unwrap();
        assert_eq!(left, Some(road.left[3]));
        let right = arbiter
            .assign_lane_change(&ego(&road), Some(LaneChangeDirection::Right))
            .unwrap();
        assert_eq!(right, None);
    }

    #[test]
    fn change_over_stops_at_junction() {
        let mut road = two_lane_road();
        road.map.set_junction(road.left[2], true);
        let track = TrackTraffic::new();
        let attributes = LocalizationAttributes::default();
        let arbiter = LaneChangeArbiter::new(&road.map, &track, &attributes, |_| None);
        let point = arbiter
            .assign_lane_change(&ego(&road), Some(LaneChangeDirection::Left))
            .unwrap();
        assert_eq!(point, Some(road.left[2]));
    }
}
