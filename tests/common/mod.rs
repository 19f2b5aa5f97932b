//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use traffic_manager::cgmath::prelude::*;
use traffic_manager::math::{Point3d, Vector3d};
use traffic_manager::*;

/// The lateral position of the left lane, in m.
pub const LEFT_LANE_Y: f64 = 3.5;

/// A straight two-lane road along the x axis with waypoints every 2 m,
/// wired to a localization stage.
pub struct Fixture {
    pub map: Arc<InMemoryMap>,
    /// The right lane, at y = 0.
    pub right: Vec<WaypointId>,
    /// The left lane, at y = [LEFT_LANE_Y].
    pub left: Vec<WaypointId>,
    pub links: LocalizationLinks,
    pub clock: ManualClock,
}

pub fn two_lane_map(length: f64) -> (InMemoryMap, Vec<WaypointId>, Vec<WaypointId>) {
    let mut map = InMemoryMap::new();
    let right = map.add_straight_lane(Point3d::new(0.0, 0.0, 0.0), Point3d::new(length, 0.0, 0.0), 2.0);
    let left = map.add_straight_lane(
        Point3d::new(0.0, LEFT_LANE_Y, 0.0),
        Point3d::new(length, LEFT_LANE_Y, 0.0),
        2.0,
    );
    map.link_lanes(&left, &right);
    (map, right, left)
}

impl Fixture {
    pub fn new(length: f64) -> Self {
        let (map, right, left) = two_lane_map(length);
        Self::with_map(map, right, left)
    }

    pub fn with_map(map: InMemoryMap, right: Vec<WaypointId>, left: Vec<WaypointId>) -> Self {
        let map = Arc::new(map);
        let links = LocalizationLinks {
            planner_messenger: Arc::new(Messenger::new()),
            collision_messenger: Arc::new(Messenger::new()),
            traffic_light_messenger: Arc::new(Messenger::new()),
            registered_actors: Arc::new(AtomicActorSet::new()),
            map: map.clone(),
            parameters: Arc::new(Parameters::new()),
            track_traffic: Arc::new(TrackTraffic::new()),
        };
        Self {
            map,
            right,
            left,
            links,
            clock: ManualClock::new(),
        }
    }

    /// A deterministic localization stage driven by the fixture's clock.
    pub fn stage(&self) -> LocalizationStage<StdRng, ManualClock> {
        LocalizationStage::with_sources("localization", self.links.clone(), StdRng::seed_from_u64(7), self.clock.clone())
    }

    /// Creates a vehicle heading along the road and registers it.
    pub fn spawn(&self, id: ActorId, x: f64, y: f64) -> Arc<SimulatedActor> {
        let actor = SimulatedActor::spawn(id, Point3d::new(x, y, 0.0), Vector3d::unit_x());
        self.links.registered_actors.insert([actor.clone() as ActorHandle]);
        actor
    }

    pub fn track(&self) -> &TrackTraffic {
        &self.links.track_traffic
    }

    /// Asserts that every overlap between the given actors is recorded in both directions.
    pub fn assert_overlap_symmetric(&self, ids: &[ActorId]) {
        for a in ids {
            for b in self.track().overlapping_vehicles(*a) {
                assert!(
                    self.track().overlapping_vehicles(b).contains(a),
                    "{} overlaps {} but not the other way round",
                    a,
                    b
                );
            }
        }
    }

    pub fn location(&self, id: WaypointId) -> Point3d {
        self.map.get(id).unwrap().location()
    }
}

/// The distance between consecutive buffer entries, front to back.
pub fn spacings(buffer: &WaypointBuffer, map: &dyn LocalMap) -> Vec<f64> {
    let points = buffer
        .iter()
        .map(|id| map.get(id).unwrap().location())
        .collect::<Vec<_>>();
    points.windows(2).map(|p| p[0].distance(p[1])).collect()
}
