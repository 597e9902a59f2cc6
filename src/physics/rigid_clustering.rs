use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::physics::collision_detection::CollisionConstraintAllocator;
use crate::physics::error::{EvolutionError, Result};
use crate::physics::handles::{ClusterHandle, ParticleHandle};
use crate::physics::particle_description::ParticleDescription;
use crate::physics::particle_properties::{ObjectState, RigidPose};
use crate::physics::particles::{Particles, RigidParticle};
use crate::utilities::memory::IdPool;

/// Dynamic particles welded into one internal parent particle. The children are disabled while the
/// cluster exists and follow the parent when it dissolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigidCluster {
    pub handle: ClusterHandle,
    pub parent: ParticleHandle,
    pub children: Vec<ParticleHandle>,
    /// Pose of every child relative to the parent.
    pub child_offsets: Vec<RigidPose>,
    /// Contact impulse on the parent above which the cluster breaks apart.
    pub strain_threshold: f32,
}

/// Owns every cluster and the queue of clusters waiting to dissolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RigidClustering {
    clusters: Vec<Option<RigidCluster>>,
    id_pool: IdPool,
    pending_releases: Vec<ClusterHandle>,
}

impl RigidClustering {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn get(&self, handle: ClusterHandle) -> Option<&RigidCluster> {
        self.clusters.get(handle.0 as usize).and_then(Option::as_ref)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RigidCluster> {
        self.clusters.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Welds `children` into a new parent particle placed at their center of mass. Children must be
    /// live, enabled, dynamic, unclustered and have finite mass.
    pub fn create_cluster(
        &mut self,
        particles: &mut Particles,
        children: &[ParticleHandle],
        strain_threshold: f32,
    ) -> Result<(ClusterHandle, ParticleHandle)> {
        if children.is_empty() {
            return Err(EvolutionError::InvalidConfig("a cluster needs at least one child".into()));
        }
        let mut mass = 0.0;
        let mut center = Vec3::ZERO;
        let mut momentum = Vec3::ZERO;
        let mut angular = Vec3::ZERO;
        for (index, &handle) in children.iter().enumerate() {
            let child = particles.get(handle).ok_or(EvolutionError::InvalidParticle(handle))?;
            if children[..index].contains(&handle) {
                return Err(EvolutionError::InvalidParticleState {
                    handle,
                    reason: "listed twice in one cluster",
                });
            }
            if !child.is_dynamic() || child.inertia.inverse_mass <= 0.0 {
                return Err(EvolutionError::InvalidParticleState {
                    handle,
                    reason: "only dynamic particles can be clustered",
                });
            }
            if child.cluster.is_some() {
                return Err(EvolutionError::InvalidParticleState {
                    handle,
                    reason: "already belongs to a cluster",
                });
            }
            let child_mass = 1.0 / child.inertia.inverse_mass;
            mass += child_mass;
            center += child.x * child_mass;
            momentum += child.v * child_mass;
            angular += child.w * child_mass;
        }
        center /= mass;
        let parent_pose = RigidPose::new(center, Quat::IDENTITY);

        let mut description = ParticleDescription::dynamic_without_shapes(parent_pose, mass)
            .with_velocity(momentum / mass, angular / mass);
        let mut child_offsets = Vec::with_capacity(children.len());
        for &handle in children {
            let Some(child) = particles.get(handle) else {
                continue;
            };
            let offset = RigidPose::new(child.x - center, child.r);
            for shape in &child.shapes {
                let mut shape = shape.clone();
                shape.local_pose = offset.compose(&shape.local_pose);
                description = description.with_shape(shape);
            }
            description.material = child.material;
            child_offsets.push(offset);
        }
        description.validate()?;

        let id = self.id_pool.take();
        let cluster_handle = ClusterHandle(id);
        let parent = particles.insert(|handle| {
            let mut particle = RigidParticle::from_description(handle, &description);
            particle.is_internal = true;
            particle.cluster = Some(cluster_handle);
            particle
        });
        for &handle in children {
            if let Some(child) = particles.get_mut(handle) {
                child.disabled = true;
                child.cluster = Some(cluster_handle);
                child.v = Vec3::ZERO;
                child.w = Vec3::ZERO;
            }
        }

        let index = id as usize;
        if index >= self.clusters.len() {
            self.clusters.resize(index + 1, None);
        }
        self.clusters[index] = Some(RigidCluster {
            handle: cluster_handle,
            parent,
            children: children.to_vec(),
            child_offsets,
            strain_threshold,
        });
        log::debug!("cluster {} created from {} particles", cluster_handle, children.len());
        Ok((cluster_handle, parent))
    }

    /// Queues a cluster for dissolution at the start of the next tick.
    pub fn release_cluster(&mut self, handle: ClusterHandle) -> Result<()> {
        if self.get(handle).is_none() {
            return Err(EvolutionError::InvalidCluster(handle));
        }
        if !self.pending_releases.contains(&handle) {
            self.pending_releases.push(handle);
        }
        Ok(())
    }

    pub fn take_pending_releases(&mut self) -> Vec<ClusterHandle> {
        std::mem::take(&mut self.pending_releases)
    }

    /// Clusters whose parent absorbed more contact impulse in the last solve than they can take.
    pub fn find_breaking_clusters(&self, collisions: &CollisionConstraintAllocator) -> Vec<ClusterHandle> {
        let mut strain = vec![0.0f32; self.clusters.len()];
        let parents: Vec<Option<ParticleHandle>> = self
            .clusters
            .iter()
            .map(|cluster| cluster.as_ref().map(|cluster| cluster.parent))
            .collect();
        collisions.visit_collisions(|_, constraint| {
            if !constraint.is_enabled() {
                return;
            }
            let impulse = constraint.accumulated_impulse.length();
            for (index, parent) in parents.iter().enumerate() {
                if parent.map_or(false, |parent| constraint.particles.contains(&parent)) {
                    strain[index] += impulse;
                }
            }
        });
        self.iter()
            .filter(|cluster| strain[cluster.handle.0 as usize] > cluster.strain_threshold)
            .map(|cluster| cluster.handle)
            .collect()
    }

    /// Removes the parent particle and places the children at its predicted pose with its motion.
    /// Returns the dissolved cluster so callers can detach its parent from collision detection.
    pub fn dissolve(&mut self, handle: ClusterHandle, particles: &mut Particles, tick: u64) -> Option<RigidCluster> {
        let cluster = self.clusters.get_mut(handle.0 as usize)?.take()?;
        self.id_pool.return_id(handle.0);
        self.pending_releases.retain(|&pending| pending != handle);

        let parent = particles.remove(cluster.parent, tick);
        for (&child_handle, offset) in cluster.children.iter().zip(&cluster.child_offsets) {
            let Some(child) = particles.get_mut(child_handle) else {
                continue;
            };
            if let Some(parent) = &parent {
                let pose = parent.predicted_pose().compose(offset);
                let arm = pose.position - parent.p;
                child.x = pose.position;
                child.r = pose.orientation;
                child.p = pose.position;
                child.q = pose.orientation;
                child.v = parent.v + parent.w.cross(arm);
                child.w = parent.w;
                child.pre_v = child.v;
                child.pre_w = child.w;
                if parent.state == ObjectState::Sleeping {
                    child.state = ObjectState::Dynamic;
                }
            }
            child.disabled = false;
            child.cluster = None;
            child.activity = Default::default();
        }
        log::debug!("cluster {} dissolved into {} particles", handle, cluster.children.len());
        Some(cluster)
    }
}
