//! Per-vehicle behaviour switches set by the traffic manager's user.

use crate::actor::Actor;
use crate::ActorId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// The side a lane change should head towards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum LaneChangeDirection {
    Left,
    Right,
}

/// A lane change request as returned by [Parameters::force_lane_change].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChangeLaneInfo {
    /// Whether a lane change has been commanded.
    pub change_lane: bool,
    /// The commanded side.
    pub direction: LaneChangeDirection,
}

impl Default for ChangeLaneInfo {
    fn default() -> Self {
        Self {
            change_lane: false,
            direction: LaneChangeDirection::Left,
        }
    }
}

/// Thread-safe store of per-vehicle lane changing permissions.
pub struct Parameters {
    auto_lane_change: RwLock<HashMap<ActorId, bool>>,
    force_lane_change: RwLock<HashMap<ActorId, LaneChangeDirection>>,
    default_auto_lane_change: AtomicBool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            auto_lane_change: Default::default(),
            force_lane_change: Default::default(),
            default_auto_lane_change: AtomicBool::new(true),
        }
    }
}

impl Parameters {
    /// Creates a parameter store where every vehicle may change lanes on its own.
    pub fn new() -> Self {
        Default::default()
    }

    /// Sets whether vehicles without an explicit setting may change lanes on their own.
    pub fn set_default_auto_lane_change(&self, enable: bool) {
        self.default_auto_lane_change.store(enable, Ordering::Release);
    }

    /// Enables or disables automatic lane changes for one vehicle.
    pub fn set_auto_lane_change(&self, actor: &dyn Actor, enable: bool) {
        self.auto_lane_change.write().insert(actor.id(), enable);
    }

    /// Commands one vehicle to change lanes towards `direction` on its next update.
    pub fn set_force_lane_change(&self, actor: &dyn Actor, direction: LaneChangeDirection) {
        self.force_lane_change.write().insert(actor.id(), direction);
    }

    /// Whether the vehicle may change lanes on its own.
    pub fn auto_lane_change(&self, actor: &dyn Actor) -> bool {
        self.auto_lane_change
            .read()
            .get(&actor.id())
            .copied()
            .unwrap_or_else(|| self.default_auto_lane_change.load(Ordering::Acquire))
    }

    /// Takes the pending forced lane change for the vehicle, if any.
    /// A command is only ever reported once.
    pub fn force_lane_change(&self, actor: &dyn Actor) -> ChangeLaneInfo {
        match self.force_lane_change.write().remove(&actor.id()) {
            Some(direction) => ChangeLaneInfo {
                change_lane: true,
                direction,
            },
            None => ChangeLaneInfo::default(),
        }
    }

    /// Forgets everything about a vehicle.
    pub fn forget(&self, id: ActorId) {
        self.auto_lane_change.write().remove(&id);
        self.force_lane_change.write().remove(&id);
    }
}
