//! Errors raised while localizing vehicles.

use crate::math::Point3d;
use crate::{ActorId, WaypointId};
use thiserror::Error;

/// A fault in the localization pipeline.
///
/// None of these are fatal to a stage: they are confined to one vehicle
/// for one tick and logged by the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// A waypoint ID that the map does not know about.
    #[error("waypoint {0:?} is not in the map")]
    UnknownWaypoint(WaypointId),
    /// The map has no waypoint anywhere near an actor.
    #[error("no waypoint near actor {actor} at {location:?}")]
    NoWaypointNearby { actor: ActorId, location: Point3d },
    /// A pipeline stage's worker thread could not be started.
    #[error("failed to spawn thread for stage `{stage}`")]
    SpawnStage {
        stage: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
