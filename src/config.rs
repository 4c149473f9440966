//! Scheduler configuration

use std::time::Duration;

use crate::error::SchedulerError;

/// Upper bound on frames in flight
pub const MAX_FRAMES_IN_FLIGHT: usize = 8;

/// Configuration shared by every object created through a
/// [`crate::GpuContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Bound on fence waits and target acquisition. `None` waits forever.
    pub wait_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            wait_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl SchedulerConfig {
    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Option<Duration>) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.frames_in_flight == 0 {
            return Err(SchedulerError::InvalidConfig(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(SchedulerError::InvalidConfig(format!(
                "frames_in_flight {} exceeds the maximum of {}",
                self.frames_in_flight, MAX_FRAMES_IN_FLIGHT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SchedulerConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(SchedulerConfig::default()
            .with_frames_in_flight(0)
            .validate()
            .is_err());
        assert!(SchedulerConfig::default()
            .with_frames_in_flight(MAX_FRAMES_IN_FLIGHT)
            .validate()
            .is_ok());
        assert!(SchedulerConfig::default()
            .with_frames_in_flight(MAX_FRAMES_IN_FLIGHT + 1)
            .validate()
            .is_err());
    }
}
