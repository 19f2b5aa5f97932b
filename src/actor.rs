//! Vehicles as exposed by the simulated world.

use crate::math::{Point3d, Vector3d};
use crate::ActorId;
use cgmath::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

/// A shared handle to an actor in the world.
pub type ActorHandle = Arc<dyn Actor>;

/// A vehicle owned by the world.
///
/// All queries reflect the world's current state and may change between calls.
pub trait Actor: Send + Sync {
    /// The actor's ID, unique among living actors.
    fn id(&self) -> ActorId;
    /// The location of the actor in world space.
    fn location(&self) -> Point3d;
    /// The velocity in m/s.
    fn velocity(&self) -> Vector3d;
    /// A unit vector aligned with the actor's heading.
    fn forward_vector(&self) -> Vector3d;
    /// The speed limit the actor is currently subject to, in m/s.
    fn speed_limit(&self) -> f64;
    /// Removes the actor from the world. Returns `true` iff it was alive.
    fn destroy(&self) -> bool;

    /// The actor's speed in m/s.
    fn speed(&self) -> f64 {
        self.velocity().magnitude()
    }
}

/// A kinematic actor which moves only when told to.
pub struct SimulatedActor {
    id: ActorId,
    state: Mutex<SimulatedState>,
}

#[derive(Clone, Copy)]
struct SimulatedState {
    location: Point3d,
    velocity: Vector3d,
    forward: Vector3d,
    speed_limit: f64,
    alive: bool,
}

impl SimulatedActor {
    /// Creates a stationary actor facing along `forward`.
    pub fn new(id: ActorId, location: Point3d, forward: Vector3d) -> Self {
        Self {
            id,
            state: Mutex::new(SimulatedState {
                location,
                velocity: Vector3d::zero(),
                forward: forward.normalize(),
                speed_limit: 30.0 / 3.6,
                alive: true,
            }),
        }
    }

    /// Creates an actor wrapped in a shared handle.
    pub fn spawn(id: ActorId, location: Point3d, forward: Vector3d) -> Arc<Self> {
        Arc::new(Self::new(id, location, forward))
    }

    /// Teleports the actor.
    pub fn set_location(&self, location: Point3d) {
        self.state.lock().location = location;
    }

    /// Sets the velocity in m/s.
    pub fn set_velocity(&self, velocity: Vector3d) {
        self.state.lock().velocity = velocity;
    }

    /// Sets the heading.
    pub fn set_forward_vector(&self, forward: Vector3d) {
        self.state.lock().forward = forward.normalize();
    }

    /// Sets the speed limit in m/s.
    pub fn set_speed_limit(&self, speed_limit: f64) {
        self.state.lock().speed_limit = speed_limit;
    }

    /// Whether the actor has not been destroyed.
    pub fn is_alive(&self) -> bool {
        self.state.lock().alive
    }

    /// Moves the actor along its velocity for `dt` seconds.
    pub fn integrate(&self, dt: f64) {
        let mut state = self.state.lock();
        if state.alive {
            let velocity = state.velocity;
            state.location += velocity * dt;
        }
    }
}

impl Actor for SimulatedActor {
    fn id(&self) -> ActorId {
        self.id
    }

    fn location(&self) -> Point3d {
        self.state.lock().location
    }

    fn velocity(&self) -> Vector3d {
        self.state.lock().velocity
    }

    fn forward_vector(&self) -> Vector3d {
        self.state.lock().forward
    }

    fn speed_limit(&self) -> f64 {
        self.state.lock().speed_limit
    }

    fn destroy(&self) -> bool {
        std::mem::replace(&mut self.state.lock().alive, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn destroy_only_succeeds_once() {
        let actor = SimulatedActor::new(7, Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_x());
        assert!(actor.destroy());
        assert!(!actor.destroy());
        assert!(!actor.is_alive());
    }

    #[test]
    fn integrate_moves_along_velocity() {
        let actor = SimulatedActor::new(1, Point3d::new(0.0, 0.0, 0.0), Vector3d::unit_x());
        actor.set_velocity(Vector3d::new(3.0, 4.0, 0.0));
        actor.integrate(0.5);
        assert_approx_eq!(actor.location().x, 1.5);
        assert_approx_eq!(actor.location().y, 2.0);
        assert_approx_eq!(actor.speed(), 5.0);
    }
}
