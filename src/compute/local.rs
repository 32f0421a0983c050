//! In-process `ComputeService`.

use async_trait::async_trait;
use chrono::{Datelike, Local, Timelike};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{kernels, ComputeError, ComputeService, ScoringInput, ScoringOutput, UpdateWeightsInput};
use crate::types::FeatureWeights;

/// Where seasonality reads the current time from.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Clock {
    Local,
    Fixed { hour: f64, weekday: f64 },
}

pub struct LocalCompute {
    rng: Mutex<StdRng>,
    clock: Clock,
}

impl LocalCompute {
    pub fn new() -> Self {
        Self::seeded(rand::random())
    }

    /// Reproducible sampling for tests and offline evaluation.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            clock: Clock::Local,
        }
    }

    /// Pin the time seasonality is evaluated at: fractional hour of day and
    /// weekday with Sunday = 0.
    pub fn at_time(mut self, hour: f64, weekday: u32) -> Self {
        self.clock = Clock::Fixed {
            hour,
            weekday: weekday as f64,
        };
        self
    }

    fn now(&self) -> (f64, f64) {
        match self.clock {
            Clock::Fixed { hour, weekday } => (hour, weekday),
            Clock::Local => {
                let now = Local::now();
                let hour = now.hour() as f64
                    + now.minute() as f64 / 60.0
                    + now.second() as f64 / 3600.0;
                (hour, now.weekday().num_days_from_sunday() as f64)
            }
        }
    }
}

impl Default for LocalCompute {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ComputeService for LocalCompute {
    async fn sum_norm(&self, vec: Vec<f64>) -> Result<Vec<f64>, ComputeError> {
        Ok(kernels::sum_norm(&vec))
    }

    async fn update_weights(&self, input: UpdateWeightsInput) -> Result<FeatureWeights, ComputeError> {
        Ok(kernels::update_weights(&input))
    }

    async fn weighted_sample_top_sites(
        &self,
        input: ScoringInput,
    ) -> Result<ScoringOutput, ComputeError> {
        input.validate()?;
        let (hour, weekday) = self.now();
        let mut rng = self.rng.lock();
        Ok(kernels::weighted_sample_top_sites(&input, &mut rng, hour, weekday))
    }
}
