#[cfg(feature = "profile")]
use std::collections::BTreeMap;
#[cfg(feature = "profile")]
use std::time::Instant;

/// Stores profiling information for the previous evolution tick.
///
/// Profiling is only active when the `profile` feature is enabled.
/// When inactive, all methods are no-ops.
#[derive(Debug, Default)]
pub struct SimulationProfiler {
    #[cfg(feature = "profile")]
    stages: BTreeMap<&'static str, f64>,
    #[cfg(feature = "profile")]
    start_timestamps: BTreeMap<&'static str, Instant>,
}

impl SimulationProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the time in seconds it took to complete the last execution of the given stage.
    /// If no stage matching the given key ran, returns -1.
    pub fn get(&self, _stage: &'static str) -> f64 {
        #[cfg(feature = "profile")]
        {
            if let Some(&time) = self.stages.get(_stage) {
                return time;
            }
        }
        -1.0
    }

    /// Starts timing a stage.
    pub fn start(&mut self, _stage: &'static str) {
        #[cfg(feature = "profile")]
        {
            debug_assert!(
                !self.start_timestamps.contains_key(_stage),
                "Cannot start a stage that has already been started."
            );
            self.start_timestamps.insert(_stage, Instant::now());
        }
    }

    /// Ends timing a stage and accumulates the elapsed time.
    pub fn end(&mut self, _stage: &'static str) {
        #[cfg(feature = "profile")]
        {
            let end_time = Instant::now();
            let Some(start_time) = self.start_timestamps.remove(_stage) else {
                debug_assert!(
                    false,
                    "To end a stage, it must currently be active (started and not already stopped)."
                );
                return;
            };
            let elapsed = end_time.duration_since(start_time).as_secs_f64();
            *self.stages.entry(_stage).or_insert(0.0) += elapsed;
        }
    }

    /// Writes every stage time of the last tick to the trace log.
    pub fn log_stages(&self, _tick: u64) {
        #[cfg(feature = "profile")]
        {
            for (stage, time) in &self.stages {
                log::trace!("tick {}: {} took {:.3} ms", _tick, stage, time * 1000.0);
            }
        }
    }

    /// Clears all accumulated stage times.
    pub fn clear(&mut self) {
        #[cfg(feature = "profile")]
        {
            debug_assert!(
                self.start_timestamps.is_empty(),
                "It's likely that some stage was left unended from the previous frame."
            );
            self.stages.clear();
        }
    }
}
