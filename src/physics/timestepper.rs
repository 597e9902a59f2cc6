use serde::{Deserialize, Serialize};

/// Position of one sub-step inside a call to `Evolution::advance`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubStepInfo {
    /// Zero-based index of the sub-step.
    pub step: u32,
    pub num_steps: u32,
    /// Fraction of the whole advance completed at the end of this sub-step, in (0, 1].
    pub pseudo_fraction: f32,
}

impl SubStepInfo {
    /// A single step covering the whole advance.
    pub const SINGLE: Self = Self {
        step: 0,
        num_steps: 1,
        pseudo_fraction: 1.0,
    };

    #[inline(always)]
    pub fn is_last(&self) -> bool {
        self.step + 1 >= self.num_steps
    }
}

impl Default for SubStepInfo {
    fn default() -> Self {
        Self::SINGLE
    }
}

/// Splits an advance into sub-steps no longer than a maximum step. When more than `max_steps`
/// would be needed the steps stay at `max_step_dt` and the simulation runs slower than real time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubStepSchedule {
    pub step_dt: f32,
    pub num_steps: u32,
    /// Whether the step count hit `max_steps` and simulated time was dropped.
    pub clamped: bool,
}

impl SubStepSchedule {
    pub fn new(dt: f32, max_step_dt: f32, max_steps: u32) -> Self {
        assert!(dt > 0.0 && max_step_dt > 0.0, "Time steps must be positive.");
        let max_steps = max_steps.max(1);
        let wanted = (dt / max_step_dt).ceil().max(1.0) as u32;
        if wanted > max_steps {
            log::warn!(
                "advance of {:.4}s needs {} steps of at most {:.4}s, clamped to {}",
                dt,
                wanted,
                max_step_dt,
                max_steps
            );
            Self {
                step_dt: max_step_dt,
                num_steps: max_steps,
                clamped: true,
            }
        } else {
            Self {
                step_dt: dt / wanted as f32,
                num_steps: wanted,
                clamped: false,
            }
        }
    }

    /// Total simulated time covered by the schedule.
    #[inline]
    pub fn simulated_time(&self) -> f32 {
        self.step_dt * self.num_steps as f32
    }

    pub fn steps(&self) -> impl Iterator<Item = SubStepInfo> {
        let num_steps = self.num_steps;
        (0..num_steps).map(move |step| SubStepInfo {
            step,
            num_steps,
            pseudo_fraction: (step + 1) as f32 / num_steps as f32,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn splits_evenly_below_the_maximum() {
        let schedule = SubStepSchedule::new(0.05, 1.0 / 60.0, 4);
        assert_eq!(schedule.num_steps, 3);
        assert!(!schedule.clamped);
        assert_relative_eq!(schedule.simulated_time(), 0.05, epsilon = 1e-6);
        let fractions: Vec<f32> = schedule.steps().map(|info| info.pseudo_fraction).collect();
        assert_relative_eq!(fractions[0], 1.0 / 3.0, epsilon = 1e-6);
        assert_eq!(fractions[2], 1.0);
        assert!(schedule.steps().last().map_or(false, |info| info.is_last()));
    }

    #[test]
    fn too_many_steps_slow_the_simulation_down() {
        let schedule = SubStepSchedule::new(1.0, 0.1, 3);
        assert_eq!(schedule.num_steps, 3);
        assert!(schedule.clamped);
        assert_relative_eq!(schedule.step_dt, 0.1);
    }

    #[test]
    fn short_advances_take_one_step() {
        let schedule = SubStepSchedule::new(0.001, 1.0 / 60.0, 4);
        assert_eq!(schedule.num_steps, 1);
        assert_relative_eq!(schedule.step_dt, 0.001);
    }
}
