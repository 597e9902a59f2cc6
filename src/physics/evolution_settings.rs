//! Tunables of the evolution.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::physics::error::{EvolutionError, Result};

/// Settings consumed by every stage of the evolution. Replaceable between ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvolutionSettings {
    /// Gravity acceleration applied to particles with gravity enabled.
    pub gravity: Vec3,
    /// Linear speeds above this are rescaled down to it.
    pub max_linear_velocity: f32,
    /// Angular speeds above this are rescaled down to it.
    pub max_angular_velocity: f32,
    /// Linear speed under which a particle with auto-disable counts towards being disabled.
    pub disable_linear_threshold: f32,
    /// Angular speed under which a particle with auto-disable counts towards being disabled.
    pub disable_angular_threshold: f32,
    /// Consecutive ticks under both disable thresholds before a particle is disabled.
    pub disable_frame_count: u32,
    /// Largest separation at which contacts are still generated.
    pub collision_cull_distance: f32,
    /// Multiplier on the distance travelled in a tick that is added to particle bounds.
    pub bounds_velocity_inflation: f32,
    /// CCD kicks in once a particle moves further than this fraction of its smallest extent.
    pub ccd_enable_threshold_bounds_scale: f32,
    pub ccd_enabled: bool,
    /// Iterations of the position solve.
    pub num_position_iterations: u32,
    /// Iterations of the velocity and push out solve.
    pub num_push_out_iterations: u32,
    /// Approach speed above which restitution applies.
    pub restitution_threshold: f32,
    pub collision_rule_priority: u32,
    pub joint_rule_priority: u32,
    pub suspension_rule_priority: u32,
    /// Particles that moved less than this since the last narrow phase reuse their manifolds.
    pub restore_position_threshold: f32,
    /// Particles that rotated less than this (radians) since the last narrow phase reuse their manifolds.
    pub restore_rotation_threshold: f32,
    /// Ticks a mid-phase survives without bounds overlap.
    pub mid_phase_grace_ticks: u64,
    /// Corrections smaller than this count as converged.
    pub solver_tolerance: f32,
    pub sleeping_enabled: bool,
}

impl Default for EvolutionSettings {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.8, 0.0),
            max_linear_velocity: 1.0e4,
            max_angular_velocity: 1.0e3,
            disable_linear_threshold: 0.01,
            disable_angular_threshold: 0.01,
            disable_frame_count: 30,
            collision_cull_distance: 0.05,
            bounds_velocity_inflation: 1.0,
            ccd_enable_threshold_bounds_scale: 0.4,
            ccd_enabled: true,
            num_position_iterations: 8,
            num_push_out_iterations: 2,
            restitution_threshold: 1.0,
            collision_rule_priority: 2,
            joint_rule_priority: 1,
            suspension_rule_priority: 0,
            restore_position_threshold: 0.002,
            restore_rotation_threshold: 0.002,
            mid_phase_grace_ticks: 2,
            solver_tolerance: 1.0e-6,
            sleeping_enabled: true,
        }
    }
}

impl EvolutionSettings {
    /// More iterations for stacking-heavy scenes.
    pub fn high_precision() -> Self {
        Self {
            num_position_iterations: 16,
            num_push_out_iterations: 4,
            ..Default::default()
        }
    }

    /// Fewer iterations and no CCD.
    pub fn fast() -> Self {
        Self {
            num_position_iterations: 4,
            num_push_out_iterations: 1,
            ccd_enabled: false,
            ..Default::default()
        }
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn with_iterations(mut self, position: u32, push_out: u32) -> Self {
        self.num_position_iterations = position;
        self.num_push_out_iterations = push_out;
        self
    }

    pub fn with_ccd(mut self, enabled: bool) -> Self {
        self.ccd_enabled = enabled;
        self
    }

    pub fn with_sleeping(mut self, enabled: bool) -> Self {
        self.sleeping_enabled = enabled;
        self
    }

    pub fn with_cull_distance(mut self, distance: f32) -> Self {
        self.collision_cull_distance = distance;
        self
    }

    pub fn with_restore_thresholds(mut self, position: f32, rotation: f32) -> Self {
        self.restore_position_threshold = position;
        self.restore_rotation_threshold = rotation;
        self
    }

    pub fn with_disable_thresholds(mut self, linear: f32, angular: f32, frames: u32) -> Self {
        self.disable_linear_threshold = linear;
        self.disable_angular_threshold = angular;
        self.disable_frame_count = frames;
        self
    }

    /// Checks that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        fn non_negative(name: &str, value: f32) -> Result<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(EvolutionError::InvalidConfig(format!(
                    "{name} must be finite and non-negative, got {value}"
                )))
            }
        }
        if !(self.gravity.is_finite()) {
            return Err(EvolutionError::InvalidConfig(format!(
                "gravity must be finite, got {}",
                self.gravity
            )));
        }
        non_negative("max_linear_velocity", self.max_linear_velocity)?;
        non_negative("max_angular_velocity", self.max_angular_velocity)?;
        non_negative("disable_linear_threshold", self.disable_linear_threshold)?;
        non_negative("disable_angular_threshold", self.disable_angular_threshold)?;
        non_negative("collision_cull_distance", self.collision_cull_distance)?;
        non_negative("bounds_velocity_inflation", self.bounds_velocity_inflation)?;
        non_negative(
            "ccd_enable_threshold_bounds_scale",
            self.ccd_enable_threshold_bounds_scale,
        )?;
        non_negative("restitution_threshold", self.restitution_threshold)?;
        non_negative("restore_position_threshold", self.restore_position_threshold)?;
        non_negative("restore_rotation_threshold", self.restore_rotation_threshold)?;
        non_negative("solver_tolerance", self.solver_tolerance)?;
        if self.num_position_iterations == 0 {
            return Err(EvolutionError::InvalidConfig(
                "num_position_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EvolutionSettings::default().validate().is_ok());
        assert!(EvolutionSettings::high_precision().validate().is_ok());
        assert!(!EvolutionSettings::fast().ccd_enabled);
    }

    #[test]
    fn rejects_negative_and_nan() {
        let mut settings = EvolutionSettings::default();
        settings.collision_cull_distance = -1.0;
        assert!(matches!(
            settings.validate(),
            Err(EvolutionError::InvalidConfig(_))
        ));
        let settings = EvolutionSettings::default().with_gravity(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(settings.validate().is_err());
        let settings = EvolutionSettings::default().with_iterations(0, 1);
        assert!(settings.validate().is_err());
    }
}
