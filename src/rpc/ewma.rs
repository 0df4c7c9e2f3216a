//! Adaptive request timeouts from observed round trip times.

use std::time::Duration;

/// Exponentially weighted moving average of round trip times, one per
/// lookup.
///
/// The first sample becomes the average as is. Every later sample is
/// folded in with a fixed weight given to the newest observation, so
/// the average tracks current network conditions without jumping on a
/// single slow reply.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// Weight of the newest sample, in `(0, 1]`.
    weight: f64,
    /// Average round trip time in milliseconds. `None` until the first
    /// sample.
    average: Option<f64>,
}

impl RttEstimator {
    pub fn new(weight: f64) -> Self {
        Self {
            weight,
            average: None,
        }
    }

    /// Fold a round trip sample into the average.
    pub fn update(&mut self, rtt: Duration) {
        let millis = rtt.as_secs_f64() * 1000.0;

        self.average = Some(match self.average {
            None => millis,
            Some(average) => millis * self.weight + average * (1.0 - self.weight),
        });
    }

    /// The average round trip time, `None` before the first sample.
    pub fn average(&self) -> Option<Duration> {
        self.average
            .map(|millis| Duration::from_secs_f64(millis / 1000.0))
    }

    /// The deadline to give the next request: `multiplier` times the
    /// average round trip time, never below `base` and never above
    /// `max`. Before the first sample this is `base`.
    pub fn timeout(&self, base: Duration, max: Duration, multiplier: f64) -> Duration {
        match self.average {
            None => base,
            Some(average) => {
                Duration::from_secs_f64((average * multiplier) / 1000.0).max(base).min(max)
            }
        }
    }
}
