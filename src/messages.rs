//! The payloads the localization stage hands to downstream stages.

use crate::actor::ActorHandle;
use crate::messenger::Messenger;
use crate::track_traffic::ActorIdSet;
use crate::WaypointId;
use std::sync::Arc;

/// Localization output for the motion planner.
#[derive(Clone)]
pub struct PlannerData {
    pub actor: ActorHandle,
    /// Signed steering deviation towards the target waypoint.
    /// Zero when dead ahead; the sign gives the side.
    pub deviation: f64,
    /// Whether the vehicle is about to enter a junction it must negotiate.
    pub approaching_true_junction: bool,
}

/// Localization output for collision avoidance.
#[derive(Clone)]
pub struct CollisionData {
    pub actor: ActorHandle,
    /// A snapshot of the vehicle's waypoint buffer, nearest first.
    pub buffer: Vec<WaypointId>,
    /// The vehicles whose buffers overlap this one's.
    pub overlapping_actors: ActorIdSet,
}

/// Localization output for traffic light compliance.
#[derive(Clone)]
pub struct TrafficLightData {
    pub actor: ActorHandle,
    /// The front of the vehicle's waypoint buffer.
    pub closest_waypoint: WaypointId,
    /// The waypoint used to detect an upcoming junction.
    pub junction_look_ahead_waypoint: WaypointId,
}

pub type PlannerFrame = Vec<PlannerData>;
pub type CollisionFrame = Vec<CollisionData>;
pub type TrafficLightFrame = Vec<TrafficLightData>;

pub type PlannerMessenger = Messenger<Arc<PlannerFrame>>;
pub type CollisionMessenger = Messenger<Arc<CollisionFrame>>;
pub type TrafficLightMessenger = Messenger<Arc<TrafficLightFrame>>;
