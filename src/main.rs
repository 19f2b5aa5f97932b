use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use traffic_manager::cgmath::{Deg, Rad};
use traffic_manager::math::{Point3d, Vector3d};
use traffic_manager::*;

const NUM_LANES: usize = 3;
const LANE_WIDTH: f64 = 3.5;
const ROAD_LENGTH: f64 = 3000.0;
const VEHICLES_PER_LANE: usize = 20;
const DT: f64 = 0.05;
const NUM_FRAMES: usize = 2400;
const REPORT_EVERY: usize = 200;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(0);
    let speeds = Normal::new(12.0, 3.0)?;

    // A straight road with lanes numbered from the right
    let mut map = InMemoryMap::new();
    let lanes = (0..NUM_LANES)
        .map(|i| {
            let y = i as f64 * LANE_WIDTH;
            map.add_straight_lane(Point3d::new(0.0, y, 0.0), Point3d::new(ROAD_LENGTH, y, 0.0), 2.0)
        })
        .collect::<Vec<_>>();
    for pair in lanes.windows(2) {
        map.link_lanes(&pair[1], &pair[0]);
    }

    let links = LocalizationLinks {
        planner_messenger: Arc::new(Messenger::new()),
        collision_messenger: Arc::new(Messenger::new()),
        traffic_light_messenger: Arc::new(Messenger::new()),
        registered_actors: Arc::new(AtomicActorSet::new()),
        map: Arc::new(map),
        parameters: Arc::new(Parameters::new()),
        track_traffic: Arc::new(TrackTraffic::new()),
    };

    let mut vehicles = vec![];
    for lane in 0..NUM_LANES {
        for i in 0..VEHICLES_PER_LANE {
            let id = vehicles.len() as ActorId;
            let x = 1.3 + 15.0 * i as f64;
            let location = Point3d::new(x, lane as f64 * LANE_WIDTH, 0.0);
            let actor = SimulatedActor::spawn(id, location, Vector3d::unit_x());
            let speed: f64 = speeds.sample(&mut rng);
            actor.set_velocity(Vector3d::new(speed.max(2.0), 0.0, 0.0));
            vehicles.push(actor);
        }
    }
    links
        .registered_actors
        .insert(vehicles.iter().map(|v| v.clone() as ActorHandle));

    let stage = LocalizationStage::new("localization", links.clone());
    let mut runner = StageRunner::start(stage, Duration::from_millis(1))?;

    println!("Simulating {} vehicles...", vehicles.len());
    let max_yaw_rate = Rad::from(Deg(30.0)).0;
    let mut last_seen = 0;
    let mut start = Instant::now();
    for frame in 1..=NUM_FRAMES {
        // Wait for fresh localization results
        let packet = loop {
            match links.planner_messenger.receive_data(last_seen) {
                Some(packet) => break packet,
                None => std::thread::yield_now(),
            }
        };
        last_seen = packet.id;

        // Steer each vehicle towards its target and move it along
        for data in packet.data.iter() {
            let Some(vehicle) = vehicles.iter().find(|v| v.id() == data.actor.id()) else {
                continue;
            };
            let heading = vehicle.forward_vector();
            let yaw = heading.y.atan2(heading.x) + (data.deviation * 2.0).clamp(-1.0, 1.0) * max_yaw_rate * DT;
            let forward = Vector3d::new(yaw.cos(), yaw.sin(), 0.0);
            vehicle.set_forward_vector(forward);
            vehicle.set_velocity(forward * vehicle.speed());
            vehicle.integrate(DT);
        }

        if frame % REPORT_EVERY == 0 {
            let elapsed = start.elapsed() / REPORT_EVERY as u32;
            let alive = links.registered_actors.len();
            let overlaps = vehicles
                .iter()
                .map(|v| links.track_traffic.overlapping_vehicles(v.id()).len())
                .sum::<usize>()
                / 2;
            let mean_speed = vehicles.iter().map(|v| v.speed()).sum::<f64>() / vehicles.len() as f64;
            println!(
                "t = {:>5.1}s: avg. frame {:?} --> {:.0}x speedup ({} vehs, {:.1} m/s mean, {} overlapping pairs)",
                frame as f64 * DT,
                elapsed,
                DT / elapsed.as_secs_f64(),
                alive,
                mean_speed,
                overlaps,
            );
            start = Instant::now();
        }
    }

    runner.stop();
    Ok(())
}
