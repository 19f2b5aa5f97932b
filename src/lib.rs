pub use actor::{Actor, ActorHandle, SimulatedActor};
pub use buffer::WaypointBuffer;
pub use cgmath;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use lane_change::{LaneChangeArbiter, LaneChangeQuery};
pub use localization::{LocalizationAttributes, LocalizationLinks, LocalizationStage};
pub use map::{InMemoryMap, LocalMap, Waypoint};
pub use messages::*;
pub use messenger::{DataPacket, Messenger};
pub use parameters::{ChangeLaneInfo, LaneChangeDirection, Parameters};
pub use registry::AtomicActorSet;
use slotmap::new_key_type;
pub use slotmap::{Key, KeyData};
pub use stage::{run_tick, PipelineStage, StageRunner};
pub use track_traffic::{ActorIdSet, TrackTraffic};

mod actor;
mod buffer;
mod clock;
mod debug;
mod error;
mod lane_change;
mod localization;
mod map;
pub mod math;
mod messages;
mod messenger;
mod parameters;
mod registry;
mod stage;
mod track_traffic;

new_key_type! {
    /// Unique ID of a [Waypoint].
    pub struct WaypointId;
}

/// Unique ID of an [Actor], as assigned by the world.
pub type ActorId = u32;
