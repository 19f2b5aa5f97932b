//! The first stage of the pipeline: keeps every vehicle's path up to date
//! and hands per-vehicle results to the downstream stages.

use crate::actor::ActorHandle;
use crate::buffer::WaypointBuffer;
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::lane_change::{LaneChangeArbiter, LaneChangeQuery};
use crate::map::LocalMap;
use crate::math::{steering_deviation, Point3d};
use crate::messages::*;
use crate::messenger::Messenger;
use crate::parameters::Parameters;
use crate::registry::AtomicActorSet;
use crate::stage::PipelineStage;
use crate::track_traffic::TrackTraffic;
use crate::ActorId;
use cgmath::prelude::*;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The tuning constants of the localization stage.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalizationAttributes {
    /// Seconds of travel scaling the buffer horizon.
    pub waypoint_time_horizon: f64,
    /// The minimum buffer horizon, in m.
    pub minimum_horizon_length: f64,
    /// Seconds of travel to the steering target point.
    pub target_waypoint_time_horizon: f64,
    /// The minimum distance to the steering target point, in m.
    pub target_waypoint_horizon_length: f64,
    /// The minimum distance looked ahead for junctions, in m.
    pub minimum_junction_look_ahead: f64,
    /// Roads with speed limits above this (in m/s) are treated as highways.
    pub highway_speed: f64,
    /// Obstacles closer than this (in m) veto a lane change.
    pub min_lane_change_distance: f64,
    /// Minimum cosine between two headings for them to count as parallel lanes.
    pub max_lane_obstacle_curvature: f64,
    /// The minimum change-over distance of a lane change.
    pub min_change_over_distance: f64,
    /// Vehicles that make no progress for this long are removed.
    pub idle_timeout: Duration,
}

impl Default for LocalizationAttributes {
    fn default() -> Self {
        Self {
            waypoint_time_horizon: 3.0,
            minimum_horizon_length: 30.0,
            target_waypoint_time_horizon: 0.5,
            target_waypoint_horizon_length: 2.0,
            minimum_junction_look_ahead: 3.0,
            highway_speed: 50.0 / 3.6,
            min_lane_change_distance: 10.0,
            max_lane_obstacle_curvature: 0.93969,
            min_change_over_distance: 10.0,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl LocalizationAttributes {
    /// The distance the waypoint buffer should span at the given speed.
    pub fn horizon_length(&self, speed: f64) -> f64 {
        f64::max(
            self.waypoint_time_horizon * (10.0 * speed).sqrt(),
            self.minimum_horizon_length,
        )
    }

    /// The distance to the point the vehicle steers towards.
    pub fn target_point_distance(&self, speed: f64) -> f64 {
        f64::max(
            (speed * self.target_waypoint_time_horizon).ceil(),
            self.target_waypoint_horizon_length,
        )
    }

    /// The distance looked ahead for junctions.
    pub fn look_ahead_distance(&self, speed: f64) -> f64 {
        f64::max(2.0 * speed, self.minimum_junction_look_ahead)
    }

    /// The distance, compared against squared waypoint distances,
    /// travelled along the target lane before the buffer rejoins it.
    pub fn change_over_distance(&self, speed: f64) -> f64 {
        f64::max(2.0 * speed, self.min_change_over_distance)
    }
}

/// The shared objects the localization stage is wired to.
#[derive(Clone)]
pub struct LocalizationLinks {
    pub planner_messenger: Arc<PlannerMessenger>,
    pub collision_messenger: Arc<CollisionMessenger>,
    pub traffic_light_messenger: Arc<TrafficLightMessenger>,
    pub registered_actors: Arc<AtomicActorSet>,
    pub map: Arc<dyn LocalMap>,
    pub parameters: Arc<Parameters>,
    pub track_traffic: Arc<TrackTraffic>,
}

/// Per-vehicle state owned by the stage.
struct VehicleState {
    buffer: WaypointBuffer,
    /// When the vehicle last made progress along its buffer.
    idle_since: Duration,
}

/// Everything produced for one vehicle in one tick.
struct VehicleOutputs {
    planner: PlannerData,
    collision: Option<CollisionData>,
    traffic_light: TrafficLightData,
}

/// An output frame filled each tick and handed to a [Messenger].
///
/// The messenger's two slots hold the frames of the last two sends. Each send
/// displaces the older of them, and that frame is written next, so storage is
/// recycled once consumers let go of it.
struct OutputFrame<T> {
    frame: Arc<Vec<T>>,
    capacity: usize,
}

impl<T: Clone> OutputFrame<T> {
    fn new() -> Self {
        Self {
            frame: Default::default(),
            capacity: 0,
        }
    }

    fn reserve(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    /// Empties the frame for writing.
    fn begin(&mut self) {
        match Arc::get_mut(&mut self.frame) {
            Some(frame) => {
                frame.clear();
                frame.reserve(self.capacity);
            }
            // Still held by a consumer; leave that copy to it.
            None => self.frame = Arc::new(Vec::with_capacity(self.capacity)),
        }
    }

    fn push(&mut self, item: T) {
        Arc::make_mut(&mut self.frame).push(item);
    }

    /// Sends the frame and takes back the one it displaced.
    /// Returns the new version.
    fn publish(&mut self, messenger: &Messenger<Arc<Vec<T>>>) -> u64 {
        let (version, displaced) = messenger.replace_data(std::mem::take(&mut self.frame));
        self.frame = displaced.unwrap_or_default();
        version
    }
}

/// Maintains the waypoint buffers of all registered vehicles, arbitrates lane
/// changes, tracks overlapping vehicles, and feeds the planner, collision and
/// traffic light stages.
pub struct LocalizationStage<R = StdRng, C = SystemClock> {
    name: String,
    links: LocalizationLinks,
    attributes: LocalizationAttributes,
    rng: R,
    clock: C,
    /// The registered actors as of the last refresh.
    actor_list: Vec<ActorHandle>,
    /// Position of each actor in `actor_list`.
    vehicle_id_to_index: HashMap<ActorId, usize>,
    /// The registry version `actor_list` was copied at.
    registered_actors_state: Option<u64>,
    number_of_vehicles: usize,
    vehicles: HashMap<ActorId, VehicleState>,
    planner_frame: OutputFrame<PlannerData>,
    collision_frame: OutputFrame<CollisionData>,
    traffic_light_frame: OutputFrame<TrafficLightData>,
    /// Messenger versions as of our last send.
    collision_messenger_state: u64,
    traffic_light_messenger_state: u64,
    /// Whether a collision frame was filled and awaits sending.
    collision_frame_ready: bool,
}

impl LocalizationStage {
    /// Creates a stage using wall-clock time and an entropy-seeded random source.
    pub fn new(name: impl Into<String>, links: LocalizationLinks) -> Self {
        Self::with_sources(name, links, StdRng::from_entropy(), SystemClock::new())
    }
}

impl<R: Rng + Send, C: Clock> LocalizationStage<R, C> {
    /// Creates a stage with the given random source, used to choose
    /// between branching paths, and clock, used to detect idle vehicles.
    pub fn with_sources(name: impl Into<String>, links: LocalizationLinks, rng: R, clock: C) -> Self {
        // Start one behind each messenger so the first frame is always sent.
        let collision_messenger_state = links.collision_messenger.state().wrapping_sub(1);
        let traffic_light_messenger_state = links.traffic_light_messenger.state().wrapping_sub(1);
        Self {
            name: name.into(),
            links,
            attributes: Default::default(),
            rng,
            clock,
            actor_list: vec![],
            vehicle_id_to_index: HashMap::new(),
            registered_actors_state: None,
            number_of_vehicles: 0,
            vehicles: HashMap::new(),
            planner_frame: OutputFrame::new(),
            collision_frame: OutputFrame::new(),
            traffic_light_frame: OutputFrame::new(),
            collision_messenger_state,
            traffic_light_messenger_state,
            collision_frame_ready: false,
        }
    }

    /// Replaces the tuning constants.
    pub fn set_attributes(&mut self, attributes: LocalizationAttributes) {
        self.attributes = attributes;
    }

    /// The tuning constants in use.
    pub fn attributes(&self) -> &LocalizationAttributes {
        &self.attributes
    }

    /// The waypoint buffer of a vehicle, if the stage has seen it.
    pub fn buffer(&self, actor_id: ActorId) -> Option<&WaypointBuffer> {
        self.vehicles.get(&actor_id).map(|v| &v.buffer)
    }

    /// The number of vehicles the stage holds state for.
    pub fn tracked_vehicles(&self) -> usize {
        self.vehicles.len()
    }

    /// Gets the debugging information recorded on this thread as a JSON array, and clears it.
    #[cfg(feature = "debug")]
    pub fn take_debug_frame(&self) -> serde_json::Value {
        crate::debug::take_debug_frame()
    }

    /// Localizes a single vehicle and produces its outputs.
    /// Returns `None` if the vehicle was removed instead.
    fn localize_vehicle(&mut self, actor: &ActorHandle, populate_collision: bool) -> Result<Option<VehicleOutputs>> {
        let actor_id = actor.id();
        let location = actor.location();
        let heading = actor.forward_vector();
        let speed = actor.speed();
        let now = self.clock.now();
        let map = self.links.map.as_ref();
        let track = self.links.track_traffic.as_ref();

        let state = self.vehicles.entry(actor_id).or_insert_with(|| VehicleState {
            buffer: WaypointBuffer::new(),
            idle_since: now,
        });

        // Purge passed waypoints
        if !state.buffer.is_empty() {
            if now.saturating_sub(state.idle_since) > self.attributes.idle_timeout {
                self.evict(actor);
                return Ok(None);
            }
            if state.buffer.prune(actor_id, location, heading, map, track)? > 0 {
                state.idle_since = now;
            }
        }

        // Initialize the buffer if it is empty
        let mut front = match state.buffer.front() {
            Some(front) => front,
            None => {
                let closest = map
                    .waypoint_in_vicinity(location)
                    .or_else(|| map.nearest_waypoint(location))
                    .ok_or(Error::NoWaypointNearby { actor: actor_id, location })?;
                state.buffer.push(actor_id, closest, track);
                closest
            }
        };

        // Assign a lane change
        let force = self.links.parameters.force_lane_change(actor.as_ref());
        let wants_lane_change = force.change_lane || self.links.parameters.auto_lane_change(actor.as_ref());
        if wants_lane_change && !map.get(front)?.is_junction() {
            let vehicles = &self.vehicles;
            let arbiter = LaneChangeArbiter::new(map, track, &self.attributes, |id| {
                vehicles.get(&id).and_then(|v| v.buffer.front())
            });
            let query = LaneChangeQuery {
                actor_id,
                location,
                heading,
                speed,
                front,
            };
            let force = force.change_lane.then_some(force.direction);
            if let Some(change_over_point) = arbiter.assign_lane_change(&query, force)? {
                if let Some(state) = self.vehicles.get_mut(&actor_id) {
                    state.buffer.clear(actor_id, track);
                    state.buffer.push(actor_id, change_over_point, track);
                    front = change_over_point;
                }
            }
        }

        // Populate the buffer
        let Some(state) = self.vehicles.get_mut(&actor_id) else {
            return Ok(None);
        };
        let horizon = self.attributes.horizon_length(speed);
        state.buffer.grow(actor_id, horizon, map, track, &mut self.rng)?;

        let Some(buffer) = self.vehicles.get(&actor_id).map(|v| &v.buffer) else {
            return Ok(None);
        };

        #[cfg(feature = "debug")]
        for id in buffer.iter().take(5) {
            crate::debug::debug_point("buffer", map.get(id)?.location());
        }

        // Steering deviation towards the target point
        let target_index = buffer.index_at_distance(self.attributes.target_point_distance(speed), map)?;
        let target = map.get(buffer.get(target_index).unwrap_or(front))?.location();
        let deviation = steering_deviation(location, heading, target);

        // Junction detection
        let look_ahead_index = buffer.index_at_distance(self.attributes.look_ahead_distance(speed), map)?;
        let look_ahead_point = buffer.get(look_ahead_index).unwrap_or(front);
        let approaching_true_junction =
            self.approaching_true_junction(buffer, look_ahead_index, actor.speed_limit())?;

        // Stop tracking vehicles which are too far away
        let squared_buffer_length = buffer.approx_length_squared(map)?;
        for tracking_id in track.overlapping_vehicles(actor_id) {
            let Some(tracking_location) = self.location_of(tracking_id) else {
                debug!("Overlapping vehicle {} is not registered", tracking_id);
                continue;
            };
            if tracking_location.distance2(location) > squared_buffer_length {
                track.remove_overlapping_vehicle(actor_id, tracking_id);
                track.remove_overlapping_vehicle(tracking_id, actor_id);
            }
        }

        Ok(Some(VehicleOutputs {
            planner: PlannerData {
                actor: actor.clone(),
                deviation,
                approaching_true_junction,
            },
            collision: populate_collision.then(|| CollisionData {
                actor: actor.clone(),
                buffer: buffer.to_vec(),
                overlapping_actors: track.overlapping_vehicles(actor_id),
            }),
            traffic_light: TrafficLightData {
                actor: actor.clone(),
                closest_waypoint: front,
                junction_look_ahead_waypoint: look_ahead_point,
            },
        }))
    }

    /// Whether the vehicle is approaching a junction it has to negotiate.
    ///
    /// On highways, junctions the vehicle can only pass straight through are
    /// false positives: there the junction only counts if the buffer branches
    /// before the look-ahead point.
    fn approaching_true_junction(
        &self,
        buffer: &WaypointBuffer,
        look_ahead_index: usize,
        speed_limit: f64,
    ) -> Result<bool> {
        let map = self.links.map.as_ref();
        let (Some(front), Some(look_ahead)) = (buffer.front(), buffer.get(look_ahead_index)) else {
            return Ok(false);
        };
        if !map.get(look_ahead)?.is_junction() || map.get(front)?.is_junction() {
            return Ok(false);
        }
        if speed_limit <= self.attributes.highway_speed {
            return Ok(true);
        }
        for id in buffer.iter().take(look_ahead_index) {
            if map.get(id)?.next_waypoints().len() > 1 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The current location of a registered vehicle.
    fn location_of(&self, actor_id: ActorId) -> Option<Point3d> {
        let idx = *self.vehicle_id_to_index.get(&actor_id)?;
        self.actor_list.get(idx).map(|actor| actor.location())
    }

    /// Removes a stuck vehicle from the registry and the world.
    fn evict(&mut self, actor: &ActorHandle) {
        let actor_id = actor.id();
        warn!(
            "Vehicle {} made no progress for {:?}, removing it",
            actor_id, self.attributes.idle_timeout
        );
        self.links.registered_actors.remove(&[actor_id]);
        if let Some(mut state) = self.vehicles.remove(&actor_id) {
            state.buffer.release(actor_id, &self.links.track_traffic);
        }
        self.links.parameters.forget(actor_id);
        if actor.destroy() {
            info!("Destroyed vehicle {}", actor_id);
        } else {
            warn!("Failed to destroy vehicle {}", actor_id);
        }
    }

    /// Releases the state of vehicles which are no longer registered.
    fn forget_unregistered(&mut self) {
        let index = &self.vehicle_id_to_index;
        let track = self.links.track_traffic.as_ref();
        self.vehicles.retain(|actor_id, vehicle| {
            let registered = index.contains_key(actor_id);
            if !registered {
                vehicle.buffer.release(*actor_id, track);
            }
            registered
        });
    }
}

impl<R: Rng + Send, C: Clock> PipelineStage for LocalizationStage<R, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&mut self) {
        let registry = &self.links.registered_actors;
        let state = registry.state();
        if self.registered_actors_state != Some(state) {
            self.actor_list = registry.list();
            self.vehicle_id_to_index = self
                .actor_list
                .iter()
                .enumerate()
                .map(|(idx, actor)| (actor.id(), idx))
                .collect();
            self.registered_actors_state = Some(state);
            self.forget_unregistered();
        }

        if self.number_of_vehicles != self.actor_list.len() {
            self.number_of_vehicles = self.actor_list.len();
            info!("Localizing {} vehicles", self.number_of_vehicles);
            self.planner_frame.reserve(self.number_of_vehicles);
            self.collision_frame.reserve(self.number_of_vehicles);
            self.traffic_light_frame.reserve(self.number_of_vehicles);
        }
    }

    fn act(&mut self) -> Result<()> {
        // Only fill a collision frame once the collision stage took the last one.
        let populate_collision = !self.collision_frame_ready
            && self.links.collision_messenger.state() != self.collision_messenger_state;

        self.planner_frame.begin();
        self.traffic_light_frame.begin();
        if populate_collision {
            self.collision_frame.begin();
        }

        for idx in 0..self.actor_list.len() {
            let actor = self.actor_list[idx].clone();
            match self.localize_vehicle(&actor, populate_collision) {
                Ok(Some(outputs)) => {
                    self.planner_frame.push(outputs.planner);
                    self.traffic_light_frame.push(outputs.traffic_light);
                    if let Some(collision) = outputs.collision {
                        self.collision_frame.push(collision);
                    }
                }
                Ok(None) => {}
                Err(err) => debug!("Skipping vehicle {} this tick: {}", actor.id(), err),
            }
        }

        if populate_collision {
            self.collision_frame_ready = true;
        }
        Ok(())
    }

    fn send(&mut self) {
        // The planner needs the highest rate of data, so it is never throttled.
        self.planner_frame.publish(&self.links.planner_messenger);

        // The other stages only get a frame once they took the previous one.
        let collision = &self.links.collision_messenger;
        if self.collision_frame_ready && collision.state() != self.collision_messenger_state {
            self.collision_messenger_state = self.collision_frame.publish(collision);
            self.collision_frame_ready = false;
        }

        let traffic_light = &self.links.traffic_light_messenger;
        if traffic_light.state() != self.traffic_light_messenger_state {
            self.traffic_light_messenger_state = self.traffic_light_frame.publish(traffic_light);
        }
    }
}
