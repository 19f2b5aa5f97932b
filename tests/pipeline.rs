//! Tests of the handoff between the localization stage and its consumers.

mod common;

use common::{Fixture, LEFT_LANE_Y};
use std::sync::Arc;
use std::time::{Duration, Instant};
use traffic_manager::math::Vector3d;
use traffic_manager::*;

/// Test that the planner gets a frame every tick, while the other
/// stages only get a new frame once they took the previous one.
#[test]
fn downstream_backpressure() {
    let fixture = Fixture::new(200.0);
    let mut stage = fixture.stage();
    fixture.spawn(1, 1.2, 0.0);
    let links = &fixture.links;

    for _ in 0..3 {
        run_tick(&mut stage);
    }
    assert_eq!(links.planner_messenger.state(), 3);
    assert_eq!(links.collision_messenger.state(), 1);
    assert_eq!(links.traffic_light_messenger.state(), 1);

    // Only the collision stage catches up.
    let packet = links.collision_messenger.receive_data(0).unwrap();
    assert_eq!(packet.id, 2);
    assert_eq!(links.collision_messenger.receive_data(packet.id), None);

    run_tick(&mut stage);
    assert_eq!(links.planner_messenger.state(), 4);
    assert_eq!(links.collision_messenger.state(), 3);
    assert_eq!(links.traffic_light_messenger.state(), 1);

    let packet = links.traffic_light_messenger.receive_data(0).unwrap();
    run_tick(&mut stage);
    assert_eq!(links.traffic_light_messenger.state(), packet.id + 1);
    assert_eq!(links.collision_messenger.state(), 3);
}

/// Test that collision frames carry the buffer and overlaps of each vehicle.
#[test]
fn collision_frame_contents() {
    let fixture = Fixture::new(200.0);
    let mut stage = fixture.stage();
    let a = fixture.spawn(1, 1.2, 0.0);
    let b = fixture.spawn(2, 11.2, 0.0);
    for veh in [&a, &b] {
        fixture.links.parameters.set_auto_lane_change(&**veh, false);
    }
    run_tick(&mut stage);

    let frame = fixture.links.collision_messenger.receive_data(0).unwrap().data;
    assert_eq!(frame.len(), 2);
    for data in frame.iter() {
        let id = data.actor.id();
        assert_eq!(data.buffer, stage.buffer(id).unwrap().to_vec());
        assert_eq!(data.overlapping_actors, fixture.track().overlapping_vehicles(id));
    }
    assert!(frame[0].overlapping_actors.contains(&2));
    assert!(frame[1].overlapping_actors.contains(&1));
}

/// Test that a frame held by a consumer is never written to again.
#[test]
fn held_frames_are_not_modified() {
    let fixture = Fixture::new(200.0);
    let mut stage = fixture.stage();
    fixture.spawn(1, 1.2, 0.0);
    run_tick(&mut stage);

    let held = fixture.links.planner_messenger.receive_data(0).unwrap();
    fixture.spawn(2, 1.2, LEFT_LANE_Y);
    for _ in 0..4 {
        run_tick(&mut stage);
    }

    assert_eq!(held.data.len(), 1);
    assert_eq!(held.data[0].actor.id(), 1);
    let latest = fixture.links.planner_messenger.receive_data(held.id).unwrap();
    assert_eq!(latest.data.len(), 2);
}

/// Test a localization stage on its own thread feeding a consumer
/// that moves the vehicles along.
#[test]
fn threaded_pipeline() {
    let fixture = Fixture::new(500.0);
    let vehicles = [fixture.spawn(1, 1.2, 0.0), fixture.spawn(2, 1.2, LEFT_LANE_Y)];
    for veh in &vehicles {
        veh.set_velocity(Vector3d::new(10.0, 0.0, 0.0));
    }

    let stage = LocalizationStage::new("localization", fixture.links.clone());
    let mut runner = StageRunner::start(stage, Duration::from_millis(1)).unwrap();
    assert_eq!(runner.name(), "localization");

    let planner = Arc::clone(&fixture.links.planner_messenger);
    let mut last_seen = 0;
    let mut frames = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while frames < 20 && Instant::now() < deadline {
        match planner.receive_data(last_seen) {
            Some(packet) => {
                assert!(packet.id > last_seen);
                last_seen = packet.id;
                assert_eq!(packet.data.len(), 2);
                for veh in &vehicles {
                    veh.integrate(0.1);
                }
                frames += 1;
            }
            None => std::thread::yield_now(),
        }
    }
    runner.stop();

    assert_eq!(frames, 20);
    assert!(!runner.is_running());
    // Vehicles in separate lanes never share a waypoint.
    for id in [1, 2] {
        assert!(fixture.track().overlapping_vehicles(id).is_empty());
    }
}

/// Test that frame storage is reused once no consumer holds it.
#[test]
fn released_frames_are_recycled() {
    let fixture = Fixture::new(200.0);
    let mut stage = fixture.stage();
    fixture.spawn(1, 1.2, 0.0);
    let planner = &fixture.links.planner_messenger;

    run_tick(&mut stage);
    let first = planner.receive_data(0).unwrap();
    let first_ptr = Arc::as_ptr(&first.data);
    drop(first);

    // The messenger holds the last two frames; the third send displaces the first.
    run_tick(&mut stage);
    run_tick(&mut stage);
    run_tick(&mut stage);
    let fourth = planner.receive_data(0).unwrap();
    assert_eq!(fourth.data.len(), 1);
    assert!(std::ptr::eq(Arc::as_ptr(&fourth.data), first_ptr));
}
