use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::physics::collidables::ShapeInstance;
use crate::physics::handles::{ClusterHandle, MaterialHandle, ParticleHandle};
use crate::physics::particle_description::ParticleDescription;
use crate::physics::particle_properties::{
    KinematicTarget, KinematicTargetMode, ObjectState, ParticleActivity, ParticleInertia, RigidPose,
};
use crate::utilities::bounding_box::BoundingBox;
use crate::utilities::memory::IdPool;

/// Number of ticks a destroyed particle's slot index stays reserved before it can be reused.
pub const DEFERRED_RELEASE_TICKS: u64 = 2;

/// Rigid particle state. X/R hold the committed pose, P/Q the predicted pose being solved,
/// V/W the velocities and PreV/PreW the velocities before the solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidParticle {
    pub handle: ParticleHandle,
    pub state: ObjectState,
    pub x: Vec3,
    pub r: Quat,
    pub p: Vec3,
    pub q: Quat,
    pub v: Vec3,
    pub w: Vec3,
    pub pre_v: Vec3,
    pub pre_w: Vec3,
    pub inertia: ParticleInertia,
    pub shapes: Vec<ShapeInstance>,
    /// Bounds of every shape in local space.
    pub local_bounds: BoundingBox,
    /// Bounds in world space covering the motion of the current tick.
    pub world_bounds: BoundingBox,
    pub material: MaterialHandle,
    /// Accumulated external force, cleared at the end of every tick.
    pub force: Vec3,
    /// Accumulated external torque, cleared at the end of every tick.
    pub torque: Vec3,
    pub gravity_enabled: bool,
    pub linear_ether_drag: f32,
    pub angular_ether_drag: f32,
    pub ccd_enabled: bool,
    /// Set during integration when the particle moves far enough this tick to need CCD.
    pub ccd_active: bool,
    pub auto_disable: bool,
    pub disabled: bool,
    pub activity: ParticleActivity,
    pub kinematic_target: KinematicTarget,
    /// Pose at the start of the tick, used to interpolate kinematic targets across sub-steps.
    pub kinematic_start: RigidPose,
    /// Cluster that owns this particle, if any.
    pub cluster: Option<ClusterHandle>,
    /// Particle created by the evolution itself (cluster parents).
    pub is_internal: bool,
    /// Whether the particle's state diverged from the resim cache.
    pub resim_desynced: bool,
}

impl RigidParticle {
    /// Creates a particle from its description.
    pub fn from_description(handle: ParticleHandle, description: &ParticleDescription) -> Self {
        let local_bounds = description.local_bounds();
        let pose = description.pose;
        let mut particle = Self {
            handle,
            state: description.state,
            x: pose.position,
            r: pose.orientation.normalize(),
            p: pose.position,
            q: pose.orientation.normalize(),
            v: description.linear_velocity,
            w: description.angular_velocity,
            pre_v: description.linear_velocity,
            pre_w: description.angular_velocity,
            inertia: description.compute_inertia(),
            shapes: description.shapes.clone(),
            local_bounds,
            world_bounds: BoundingBox::EMPTY,
            material: description.material,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            gravity_enabled: description.gravity_enabled,
            linear_ether_drag: description.linear_ether_drag,
            angular_ether_drag: description.angular_ether_drag,
            ccd_enabled: description.ccd_enabled,
            ccd_active: false,
            auto_disable: description.auto_disable,
            disabled: false,
            activity: ParticleActivity::default(),
            kinematic_target: KinematicTarget::default(),
            kinematic_start: pose,
            cluster: None,
            is_internal: false,
            resim_desynced: false,
        };
        if particle.state == ObjectState::Sleeping {
            particle.v = Vec3::ZERO;
            particle.w = Vec3::ZERO;
        }
        particle.update_world_bounds(0.0, false);
        particle
    }

    /// Committed pose.
    #[inline(always)]
    pub fn pose(&self) -> RigidPose {
        RigidPose::new(self.x, self.r)
    }

    /// Predicted pose.
    #[inline(always)]
    pub fn predicted_pose(&self) -> RigidPose {
        RigidPose::new(self.p, self.q)
    }

    #[inline(always)]
    pub fn object_state(&self) -> ObjectState {
        self.state
    }

    /// Dynamic or sleeping and not disabled.
    #[inline(always)]
    pub fn is_dynamic(&self) -> bool {
        self.state.is_dynamic() && !self.disabled
    }

    #[inline(always)]
    pub fn is_sleeping(&self) -> bool {
        self.state == ObjectState::Sleeping
    }

    /// Kinematic particles with any velocity or a pending target count as moving.
    #[inline]
    pub fn is_moving_kinematic(&self) -> bool {
        self.state == ObjectState::Kinematic
            && !self.disabled
            && (self.v != Vec3::ZERO
                || self.w != Vec3::ZERO
                || self.kinematic_target.mode != KinematicTargetMode::None)
    }

    /// Inverse mass as seen by the solver. Non-dynamic particles are immovable.
    #[inline(always)]
    pub fn inv_mass(&self) -> f32 {
        if self.state.is_dynamic() {
            self.inertia.inverse_mass
        } else {
            0.0
        }
    }

    /// World space inverse inertia tensor at the given orientation.
    #[inline]
    pub fn inv_inertia_world(&self, orientation: Quat) -> Mat3 {
        if !self.state.is_dynamic() {
            return Mat3::ZERO;
        }
        let rotation = Mat3::from_quat(orientation);
        rotation * Mat3::from_diagonal(self.inertia.inverse_inertia) * rotation.transpose()
    }

    /// Recomputes local bounds after the shape list changed.
    pub fn refresh_local_bounds(&mut self) {
        self.local_bounds = self
            .shapes
            .iter()
            .fold(BoundingBox::EMPTY, |bounds, shape| {
                bounds.merged(&shape.local_bounds())
            });
    }

    /// Recomputes world bounds from the predicted pose, inflated by the distance covered this tick
    /// and the cull distance. When `swept` is set the bounds also cover the committed pose.
    pub fn update_world_bounds(&mut self, cull_distance: f32, swept: bool) {
        if self.local_bounds.is_empty() {
            self.world_bounds = BoundingBox::EMPTY;
            return;
        }
        let end = self.local_bounds.transformed(&self.predicted_pose());
        let mut bounds = end.expanded(cull_distance);
        if swept {
            bounds = bounds.merged(&self.local_bounds.transformed(&self.pose()).expanded(cull_distance));
        }
        self.world_bounds = bounds;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ParticleSlot {
    generation: u32,
    particle: Option<RigidParticle>,
}

/// Generation-checked arena holding every particle of an evolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Particles {
    slots: Vec<ParticleSlot>,
    id_pool: IdPool,
    /// Slot indices of destroyed particles along with the tick they were destroyed on.
    pending_releases: Vec<(u32, u64)>,
    count: usize,
}

impl Particles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a particle built by `create` from its newly assigned handle.
    pub fn insert(&mut self, create: impl FnOnce(ParticleHandle) -> RigidParticle) -> ParticleHandle {
        let index = self.id_pool.take();
        let slot_index = index as usize;
        if slot_index == self.slots.len() {
            self.slots.push(ParticleSlot {
                generation: 0,
                particle: None,
            });
        }
        let slot = &mut self.slots[slot_index];
        debug_assert!(slot.particle.is_none(), "Taken ids must point to free slots.");
        let handle = ParticleHandle::new(index, slot.generation);
        slot.particle = Some(create(handle));
        self.count += 1;
        handle
    }

    /// Removes a particle. Its slot index is reserved until `release_deferred` runs
    /// `DEFERRED_RELEASE_TICKS` ticks later.
    pub fn remove(&mut self, handle: ParticleHandle, tick: u64) -> Option<RigidParticle> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        let particle = slot.particle.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.pending_releases.push((handle.index, tick));
        self.count -= 1;
        Some(particle)
    }

    /// Returns slot indices of particles destroyed at least `DEFERRED_RELEASE_TICKS` ago to the pool.
    pub fn release_deferred(&mut self, tick: u64) -> usize {
        let id_pool = &mut self.id_pool;
        let before = self.pending_releases.len();
        self.pending_releases.retain(|&(index, destroyed_on)| {
            if destroyed_on + DEFERRED_RELEASE_TICKS <= tick {
                id_pool.return_id(index);
                false
            } else {
                true
            }
        });
        before - self.pending_releases.len()
    }

    #[inline]
    pub fn contains(&self, handle: ParticleHandle) -> bool {
        self.get(handle).is_some()
    }

    #[inline]
    pub fn get(&self, handle: ParticleHandle) -> Option<&RigidParticle> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.particle.as_ref())
    }

    #[inline]
    pub fn get_mut(&mut self, handle: ParticleHandle) -> Option<&mut RigidParticle> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.particle.as_mut())
    }

    /// Gets the live particle in a slot regardless of generation.
    #[inline]
    pub fn get_by_index(&self, index: usize) -> Option<&RigidParticle> {
        self.slots.get(index).and_then(|slot| slot.particle.as_ref())
    }

    #[inline]
    pub fn get_by_index_mut(&mut self, index: usize) -> Option<&mut RigidParticle> {
        self.slots.get_mut(index).and_then(|slot| slot.particle.as_mut())
    }

    /// Number of live particles.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of slots, live or not. Every particle index is below this.
    #[inline]
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Iterates live particles in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &RigidParticle> {
        self.slots.iter().filter_map(|slot| slot.particle.as_ref())
    }

    /// Iterates live particles in slot order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RigidParticle> {
        self.slots.iter_mut().filter_map(|slot| slot.particle.as_mut())
    }

    /// Handles of every live particle in slot order.
    pub fn handles(&self) -> Vec<ParticleHandle> {
        self.iter().map(|particle| particle.handle).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collidables::ImplicitShape;

    fn sphere_at(x: f32) -> ParticleDescription {
        ParticleDescription::dynamic(
            RigidPose::from_position(Vec3::new(x, 0.0, 0.0)),
            1.0,
            ImplicitShape::sphere(0.5),
        )
    }

    #[test]
    fn stale_handles_are_rejected() {
        let mut particles = Particles::new();
        let desc = sphere_at(0.0);
        let a = particles.insert(|h| RigidParticle::from_description(h, &desc));
        assert!(particles.contains(a));
        assert!(particles.remove(a, 0).is_some());
        assert!(!particles.contains(a));
        assert!(particles.remove(a, 0).is_none());
        assert_eq!(particles.len(), 0);
    }

    #[test]
    fn slot_reuse_is_deferred() {
        let mut particles = Particles::new();
        let desc = sphere_at(0.0);
        let a = particles.insert(|h| RigidParticle::from_description(h, &desc));
        particles.remove(a, 5);
        assert_eq!(particles.release_deferred(6), 0);
        let b = particles.insert(|h| RigidParticle::from_description(h, &desc));
        assert_ne!(a.index, b.index);
        assert_eq!(particles.release_deferred(7), 1);
        let c = particles.insert(|h| RigidParticle::from_description(h, &desc));
        assert_eq!(c.index, a.index);
        assert_ne!(c.generation, a.generation);
        assert!(particles.get(a).is_none());
        assert!(particles.get(c).is_some());
    }

    #[test]
    fn swept_bounds_cover_start_and_end() {
        let desc = sphere_at(0.0);
        let mut particle = RigidParticle::from_description(ParticleHandle::new(0, 0), &desc);
        particle.p = Vec3::new(10.0, 0.0, 0.0);
        particle.update_world_bounds(0.0, true);
        assert!(particle.world_bounds.min.x <= -0.5);
        assert!(particle.world_bounds.max.x >= 10.5);
        particle.update_world_bounds(0.0, false);
        assert!(particle.world_bounds.min.x >= 9.0);
    }
}
