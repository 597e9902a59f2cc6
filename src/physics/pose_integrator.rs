use glam::Vec3;

use crate::physics::collision_detection::mid_phase::should_enable_ccd;
use crate::physics::evolution_settings::EvolutionSettings;
use crate::physics::particle_properties::{KinematicTargetMode, ObjectState};
use crate::physics::particles::{Particles, RigidParticle};
use crate::physics::timestepper::SubStepInfo;
use crate::utilities::math_helper;

/// Integrates forces and velocities into predicted poses, drives kinematic particles towards their
/// targets and commits solved poses at the end of a tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseIntegrator {
    pub gravity: Vec3,
    pub max_linear_velocity: f32,
    pub max_angular_velocity: f32,
    pub cull_distance: f32,
    pub bounds_velocity_inflation: f32,
    pub ccd_enabled: bool,
    pub ccd_bounds_scale: f32,
}

impl PoseIntegrator {
    pub fn new(settings: &EvolutionSettings) -> Self {
        Self {
            gravity: settings.gravity,
            max_linear_velocity: settings.max_linear_velocity,
            max_angular_velocity: settings.max_angular_velocity,
            cull_distance: settings.collision_cull_distance,
            bounds_velocity_inflation: settings.bounds_velocity_inflation,
            ccd_enabled: settings.ccd_enabled,
            ccd_bounds_scale: settings.ccd_enable_threshold_bounds_scale,
        }
    }

    /// Updates bounds for the motion of this tick. CCD particles get bounds covering their sweep.
    fn update_bounds(&self, particle: &mut RigidParticle, dt: f32) {
        particle.ccd_active = self.ccd_enabled && should_enable_ccd(particle, self.ccd_bounds_scale);
        let margin = if particle.ccd_active {
            self.cull_distance
        } else {
            self.cull_distance + particle.v.length() * dt * self.bounds_velocity_inflation
        };
        particle.update_world_bounds(margin, particle.ccd_active);
    }

    /// Explicit Euler step of one awake dynamic particle.
    pub fn integrate_particle(&self, particle: &mut RigidParticle, dt: f32) {
        let inverse_mass = particle.inv_mass();
        let mut acceleration = particle.force * inverse_mass;
        if particle.gravity_enabled {
            acceleration += self.gravity;
        }
        let angular_acceleration = particle.inv_inertia_world(particle.r) * particle.torque;

        let mut v = particle.v + acceleration * dt;
        let mut w = particle.w + angular_acceleration * dt;
        v *= (1.0 - particle.linear_ether_drag * dt).max(0.0);
        w *= (1.0 - particle.angular_ether_drag * dt).max(0.0);
        v = math_helper::clamp_length(v, self.max_linear_velocity);
        w = math_helper::clamp_length(w, self.max_angular_velocity);

        particle.v = v;
        particle.w = w;
        particle.pre_v = v;
        particle.pre_w = w;
        particle.p = particle.x + v * dt;
        particle.q = math_helper::integrate_orientation(particle.r, w, dt);
        self.update_bounds(particle, dt);
    }

    /// Integrates every awake, enabled dynamic particle. Returns how many were integrated.
    pub fn integrate(&self, particles: &mut Particles, dt: f32) -> usize {
        let mut count = 0;
        for particle in particles.iter_mut() {
            if particle.disabled || particle.state != ObjectState::Dynamic {
                continue;
            }
            self.integrate_particle(particle, dt);
            count += 1;
        }
        count
    }

    /// Moves kinematic particles for one sub-step. Position targets are interpolated from the pose at
    /// the start of the advance by the sub-step's fraction and consumed on the last sub-step.
    pub fn apply_kinematic_targets(&self, particles: &mut Particles, dt: f32, sub_step: SubStepInfo) {
        for particle in particles.iter_mut() {
            if particle.disabled || particle.state != ObjectState::Kinematic {
                continue;
            }
            match particle.kinematic_target.mode {
                KinematicTargetMode::None => {
                    particle.p = particle.x + particle.v * dt;
                    particle.q = math_helper::integrate_orientation(particle.r, particle.w, dt);
                }
                KinematicTargetMode::Reset => {
                    particle.v = Vec3::ZERO;
                    particle.w = Vec3::ZERO;
                    particle.p = particle.x;
                    particle.q = particle.r;
                    particle.kinematic_target.mode = KinematicTargetMode::None;
                }
                KinematicTargetMode::Position => {
                    if sub_step.step == 0 {
                        particle.kinematic_start = particle.pose();
                    }
                    let target = particle
                        .kinematic_start
                        .lerp(&particle.kinematic_target.target, sub_step.pseudo_fraction);
                    particle.v = (target.position - particle.x) / dt;
                    particle.w = math_helper::angular_velocity_between(particle.r, target.orientation, dt);
                    particle.p = target.position;
                    particle.q = target.orientation;
                    if sub_step.is_last() {
                        particle.kinematic_target.mode = KinematicTargetMode::Reset;
                    }
                }
            }
            particle.pre_v = particle.v;
            particle.pre_w = particle.w;
            self.update_bounds(particle, dt);
        }
    }

    /// Makes the solved pose the committed pose and clears the force accumulators.
    pub fn commit(&self, particles: &mut Particles) {
        for particle in particles.iter_mut() {
            particle.force = Vec3::ZERO;
            particle.torque = Vec3::ZERO;
            if particle.disabled {
                continue;
            }
            particle.x = particle.p;
            particle.r = particle.q;
            particle.ccd_active = false;
            particle.update_world_bounds(self.cull_distance, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::ImplicitShape;
    use crate::physics::handles::ParticleHandle;
    use crate::physics::particle_description::ParticleDescription;
    use crate::physics::particle_properties::{KinematicTarget, RigidPose};
    use approx::assert_relative_eq;
    use glam::Quat;

    fn add(particles: &mut Particles, description: ParticleDescription) -> ParticleHandle {
        particles.insert(|handle| RigidParticle::from_description(handle, &description))
    }

    #[test]
    fn gravity_moves_the_predicted_pose_only() {
        let mut particles = Particles::new();
        let handle = add(
            &mut particles,
            ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.5)),
        );
        let integrator = PoseIntegrator::new(&EvolutionSettings::default());
        let dt = 0.1;
        assert_eq!(integrator.integrate(&mut particles, dt), 1);
        let particle = particles.get(handle).unwrap();
        assert_relative_eq!(particle.v.y, -0.98, epsilon = 1e-6);
        assert_relative_eq!(particle.p.y, -0.098, epsilon = 1e-6);
        assert_eq!(particle.x, Vec3::ZERO);
        assert_eq!(particle.pre_v, particle.v);
    }

    #[test]
    fn velocities_are_rescaled_to_the_limits() {
        let mut particles = Particles::new();
        let handle = add(
            &mut particles,
            ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.5))
                .with_gravity(false)
                .with_velocity(Vec3::new(30.0, 40.0, 0.0), Vec3::ZERO),
        );
        let mut integrator = PoseIntegrator::new(&EvolutionSettings::default());
        integrator.max_linear_velocity = 10.0;
        integrator.integrate(&mut particles, 0.01);
        let v = particles.get(handle).unwrap().v;
        assert_relative_eq!(v.length(), 10.0, epsilon = 1e-4);
        assert_relative_eq!(v.x / v.y, 0.75, epsilon = 1e-5);
    }

    #[test]
    fn sleeping_and_static_particles_are_not_integrated() {
        let mut particles = Particles::new();
        add(
            &mut particles,
            ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.5)).asleep(),
        );
        add(&mut particles, ParticleDescription::fixed(RigidPose::IDENTITY, ImplicitShape::plane(Vec3::Y)));
        let integrator = PoseIntegrator::new(&EvolutionSettings::default());
        assert_eq!(integrator.integrate(&mut particles, 0.1), 0);
    }

    #[test]
    fn kinematic_targets_are_reached_over_sub_steps() {
        let mut particles = Particles::new();
        let handle = add(
            &mut particles,
            ParticleDescription::kinematic(RigidPose::IDENTITY, ImplicitShape::sphere(0.5)),
        );
        let target = RigidPose::new(Vec3::new(2.0, 0.0, 0.0), Quat::IDENTITY);
        particles.get_mut(handle).unwrap().kinematic_target = KinematicTarget::position(target);
        let integrator = PoseIntegrator::new(&EvolutionSettings::default());
        let dt = 0.5;

        let first = SubStepInfo {
            step: 0,
            num_steps: 2,
            pseudo_fraction: 0.5,
        };
        integrator.apply_kinematic_targets(&mut particles, dt, first);
        assert_relative_eq!(particles.get(handle).unwrap().p.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(particles.get(handle).unwrap().v.x, 2.0, epsilon = 1e-6);
        integrator.commit(&mut particles);

        let second = SubStepInfo {
            step: 1,
            num_steps: 2,
            pseudo_fraction: 1.0,
        };
        integrator.apply_kinematic_targets(&mut particles, dt, second);
        integrator.commit(&mut particles);
        let particle = particles.get(handle).unwrap();
        assert_relative_eq!(particle.x.x, 2.0, epsilon = 1e-6);
        assert_eq!(particle.kinematic_target.mode, KinematicTargetMode::Reset);

        integrator.apply_kinematic_targets(&mut particles, dt, SubStepInfo::SINGLE);
        let particle = particles.get(handle).unwrap();
        assert_eq!(particle.v, Vec3::ZERO);
        assert_eq!(particle.kinematic_target.mode, KinematicTargetMode::None);
    }

    #[test]
    fn fast_ccd_particles_get_swept_bounds() {
        let mut particles = Particles::new();
        let handle = add(
            &mut particles,
            ParticleDescription::dynamic(RigidPose::IDENTITY, 1.0, ImplicitShape::sphere(0.1))
                .with_gravity(false)
                .with_ccd(true)
                .with_velocity(Vec3::new(100.0, 0.0, 0.0), Vec3::ZERO),
        );
        let integrator = PoseIntegrator::new(&EvolutionSettings::default());
        integrator.integrate(&mut particles, 1.0 / 60.0);
        let particle = particles.get(handle).unwrap();
        assert!(particle.ccd_active);
        assert!(particle.world_bounds.contains_point(Vec3::ZERO));
        assert!(particle.world_bounds.contains_point(particle.p));
    }
}
