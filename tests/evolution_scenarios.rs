use std::sync::Arc;

use glam::Vec3;
use parking_lot::Mutex;
use rust_pbd_rigids::physics::collidables::ImplicitShape;
use rust_pbd_rigids::physics::collision_detection::mid_phase::should_enable_ccd;
use rust_pbd_rigids::physics::collision_detection::{CollisionConstraintAllocator, ParticlePairKey};
use rust_pbd_rigids::physics::particles::{Particles, RigidParticle};
use rust_pbd_rigids::physics::IEvolutionObserver;
use rust_pbd_rigids::utilities::thread_dispatcher::ThreadDispatcher;
use rust_pbd_rigids::{Evolution, EvolutionSettings, ParticleDescription, ParticleHandle, RigidPose, SubStepInfo};

const DT: f32 = 1.0 / 60.0;

fn step(evolution: &mut Evolution, ticks: usize) {
    for _ in 0..ticks {
        evolution.advance_one_time_step(DT, SubStepInfo::SINGLE);
    }
}

fn add_ground(evolution: &mut Evolution) -> ParticleHandle {
    evolution
        .create_particle(ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::plane(Vec3::Y)))
        .unwrap()
}

fn add_box(evolution: &mut Evolution, position: Vec3, half_extents: Vec3) -> ParticleHandle {
    evolution
        .create_particle(ParticleDescription::dynamic(
            RigidPose::from_position(position),
            1.0,
            ImplicitShape::cuboid(half_extents),
        ))
        .unwrap()
}

fn add_ball(evolution: &mut Evolution, position: Vec3, velocity: Vec3) -> ParticleHandle {
    evolution
        .create_particle(
            ParticleDescription::dynamic(RigidPose::from_position(position), 1.0, ImplicitShape::sphere(0.5))
                .with_velocity(velocity, Vec3::ZERO),
        )
        .unwrap()
}

fn particle(evolution: &Evolution, handle: ParticleHandle) -> &RigidParticle {
    evolution.particle(handle).unwrap()
}

/// Enabled collisions as (particle pair, shape pair, contact count), in a stable order.
fn enabled_contacts(evolution: &Evolution) -> Vec<(u64, u64, usize)> {
    let mut contacts = Vec::new();
    evolution.collisions().visit_collisions(|_, constraint| {
        if constraint.is_enabled() {
            let [a, b] = constraint.particles;
            contacts.push((
                ParticlePairKey::new(a, b).0,
                constraint.shape_pair_key.0,
                constraint.manifold_points.len(),
            ));
        }
    });
    contacts.sort_unstable();
    contacts
}

/// Runs until the particle falls asleep, returning the number of ticks it took.
fn run_until_asleep(evolution: &mut Evolution, handle: ParticleHandle, max_ticks: usize) -> Option<usize> {
    (1..=max_ticks).find(|_| {
        step(evolution, 1);
        particle(evolution, handle).is_sleeping()
    })
}

#[test]
fn resting_box_falls_asleep() {
    let mut evolution = Evolution::new(EvolutionSettings::default()).unwrap();
    add_ground(&mut evolution);
    let handle = add_box(&mut evolution, Vec3::new(0.0, 0.501, 0.0), Vec3::splat(0.5));

    let ticks = run_until_asleep(&mut evolution, handle, 600);
    assert!(ticks.is_some(), "box never fell asleep");
    let resting = particle(&evolution, handle);
    assert_eq!(resting.v, Vec3::ZERO);
    assert!((resting.x.y - 0.5).abs() < 0.02, "box rests at {}", resting.x.y);

    let x = resting.x;
    step(&mut evolution, 10);
    assert_eq!(particle(&evolution, handle).x, x);
    assert!(evolution.stats().solved_islands == 0);
}

#[derive(Default)]
struct SweepRecord {
    swept_ticks: usize,
    ccd_contact_points: Vec<Vec3>,
}

struct SweepObserver {
    ball: ParticleHandle,
    bounds_scale: f32,
    record: Arc<Mutex<SweepRecord>>,
}

impl IEvolutionObserver for SweepObserver {
    fn post_integrate(&self, particles: &Particles) {
        if particles
            .get(self.ball)
            .map_or(false, |ball| should_enable_ccd(ball, self.bounds_scale))
        {
            self.record.lock().swept_ticks += 1;
        }
    }

    fn post_detect_collisions(&self, collisions: &CollisionConstraintAllocator) {
        let mut record = self.record.lock();
        collisions.visit_collisions(|_, constraint| {
            if constraint.is_enabled() && constraint.is_ccd() && constraint.particles.contains(&self.ball) {
                for point in &constraint.manifold_points {
                    record.ccd_contact_points.extend(point.contact.shape_contact_points);
                }
            }
        });
    }
}

#[test]
fn fast_ball_does_not_tunnel_through_thin_wall() {
    let settings = EvolutionSettings::default().with_gravity(Vec3::ZERO);
    let mut evolution = Evolution::new(settings).unwrap();
    evolution
        .create_particle(ParticleDescription::fixed(
            RigidPose::from_position(Vec3::new(5.0, 0.0, 0.0)),
            ImplicitShape::cuboid(Vec3::new(0.05, 2.0, 2.0)),
        ))
        .unwrap();
    let ball = evolution
        .create_particle(
            ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.1))
                .with_ccd(true)
                .with_velocity(Vec3::new(200.0, 0.0, 0.0), Vec3::ZERO),
        )
        .unwrap();
    let record = Arc::new(Mutex::new(SweepRecord::default()));
    let bounds_scale = evolution.settings().ccd_enable_threshold_bounds_scale;
    evolution.set_observer(Box::new(SweepObserver {
        ball,
        bounds_scale,
        record: record.clone(),
    }));

    step(&mut evolution, 6);
    let x = particle(&evolution, ball).x.x;
    assert!(x < 4.95, "ball tunneled to x = {}", x);

    let record = record.lock();
    assert!(record.swept_ticks > 0);
    assert!(!record.ccd_contact_points.is_empty(), "no swept contact was created");
    for point in &record.ccd_contact_points {
        assert!(point.x > 4.85 && point.x < 5.0, "contact on the far side at {}", point.x);
    }
}

#[test]
fn disjoint_islands_solve_bit_identically() {
    let build = |perturbed_velocity: Vec3| {
        let mut evolution = Evolution::new(EvolutionSettings::default())
            .unwrap()
            .with_thread_dispatcher(Box::new(ThreadDispatcher::new(4)));
        add_ground(&mut evolution);
        let lower = add_box(&mut evolution, Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5));
        let upper = add_ball(&mut evolution, Vec3::new(0.1, 1.6, 0.0), Vec3::ZERO);
        add_box(&mut evolution, Vec3::new(20.0, 0.5, 0.0), Vec3::splat(0.5));
        add_ball(&mut evolution, Vec3::new(20.0, 1.6, 0.0), perturbed_velocity);
        (evolution, [lower, upper])
    };

    let (mut reference, handles) = build(Vec3::ZERO);
    let (mut perturbed, _) = build(Vec3::new(3.0, -4.0, 1.0));
    for _ in 0..90 {
        step(&mut reference, 1);
        step(&mut perturbed, 1);
        for handle in handles {
            let a = particle(&reference, handle);
            let b = particle(&perturbed, handle);
            assert_eq!(a.x, b.x);
            assert_eq!(a.r, b.r);
            assert_eq!(a.v, b.v);
            assert_eq!(a.w, b.w);
        }
    }
}

#[test]
fn waking_one_member_wakes_the_whole_island() {
    let mut evolution = Evolution::new(EvolutionSettings::default()).unwrap();
    add_ground(&mut evolution);
    let lower = add_box(&mut evolution, Vec3::new(0.0, 0.5, 0.0), Vec3::splat(0.5));
    let upper = add_box(&mut evolution, Vec3::new(0.0, 1.5, 0.0), Vec3::splat(0.5));

    assert!(run_until_asleep(&mut evolution, lower, 900).is_some());
    assert!(particle(&evolution, upper).is_sleeping());
    let resting = [particle(&evolution, lower).x, particle(&evolution, upper).x];
    let contacts_at_sleep = enabled_contacts(&evolution);
    assert_eq!(contacts_at_sleep.len(), 2);

    assert!(evolution.wake_particle(upper).unwrap());
    step(&mut evolution, 1);
    assert!(!particle(&evolution, lower).is_sleeping());
    assert!(!particle(&evolution, upper).is_sleeping());
    assert_eq!(evolution.stats().woken_islands, 1);
    assert_eq!(enabled_contacts(&evolution), contacts_at_sleep);

    assert!(run_until_asleep(&mut evolution, upper, 900).is_some());
    assert!(particle(&evolution, lower).is_sleeping());
    for (handle, before) in [lower, upper].into_iter().zip(resting) {
        let after = particle(&evolution, handle).x;
        assert!((after - before).length() < 0.01);
    }
}

#[test]
fn disabling_is_idempotent_and_freezes_the_particle() {
    let mut evolution = Evolution::new(EvolutionSettings::default()).unwrap();
    add_ground(&mut evolution);
    let handle = add_ball(&mut evolution, Vec3::new(0.0, 3.0, 0.0), Vec3::ZERO);
    step(&mut evolution, 5);

    evolution.disable_particle(handle).unwrap();
    let frozen = particle(&evolution, handle).clone();
    evolution.disable_particle(handle).unwrap();
    assert_eq!(particle(&evolution, handle), &frozen);

    step(&mut evolution, 10);
    let after = particle(&evolution, handle);
    assert!(after.disabled);
    assert_eq!(after.x, frozen.x);
    assert!(evolution
        .collisions()
        .mid_phases()
        .iter()
        .all(|mid_phase| !mid_phase.contains_particle(handle)));

    evolution.enable_particle(handle).unwrap();
    step(&mut evolution, 1);
    assert!(particle(&evolution, handle).x.y < frozen.x.y);
}

#[test]
fn resting_particles_auto_disable() {
    let settings = EvolutionSettings::default()
        .with_sleeping(false)
        .with_disable_thresholds(0.05, 0.05, 10);
    let mut evolution = Evolution::new(settings).unwrap();
    add_ground(&mut evolution);
    let handle = evolution
        .create_particle(
            ParticleDescription::dynamic(
                RigidPose::from_position(Vec3::new(0.0, 0.5, 0.0)),
                1.0,
                ImplicitShape::cuboid(Vec3::splat(0.5)),
            )
            .with_auto_disable(true),
        )
        .unwrap();
    step(&mut evolution, 300);
    assert!(particle(&evolution, handle).disabled);
}

#[test]
fn sub_steps_cover_the_whole_advance() {
    let settings = EvolutionSettings::default().with_gravity(Vec3::ZERO);
    let mut evolution = Evolution::new(settings).unwrap();
    let handle = add_ball(&mut evolution, Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
    let schedule = evolution.advance(0.05, 0.02, 8);
    assert_eq!(schedule.num_steps, 3);
    assert_eq!(evolution.tick(), 3);
    assert!((particle(&evolution, handle).x.x - 0.05).abs() < 1e-5);
}
