use std::time::Duration;
use crate::core::CalibrationConfig;

/// Outcome of judging one calibration pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassVerdict {
    /// Failure ratio acceptable, keep the averaged factors
    Accepted,

    /// Too many failed windows, rerun with a longer settle delay
    Retry { settle_delay: Duration },

    /// Retry budget exhausted
    GiveUp,
}

/// Linear settle-delay backoff applied to rejected calibration passes
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    settle_delay: Duration,
    increment: Duration,
    max_retries: u32,
    retries: u32,
}

impl BackoffPolicy {
    pub fn new(settle_delay: Duration, increment: Duration, max_retries: u32) -> Self {
        Self {
            settle_delay,
            increment,
            max_retries,
            retries: 0,
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(config.settle_delay(), config.settle_increment(), config.max_retries)
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Judge a pass of `rounds` rounds over `devices` devices with `failures` failed windows
    pub fn judge(&mut self, failures: usize, devices: usize, rounds: usize) -> PassVerdict {
        if !exceeds_failure_threshold(failures, devices, rounds) {
            return PassVerdict::Accepted;
        }
        if self.retries >= self.max_retries {
            return PassVerdict::GiveUp;
        }
        self.retries += 1;
        self.settle_delay += self.increment;
        PassVerdict::Retry {
            settle_delay: self.settle_delay,
        }
    }
}

/// `failures > devices * rounds / 2`, strictly
pub fn exceeds_failure_threshold(failures: usize, devices: usize, rounds: usize) -> bool {
    failures * 2 > devices * rounds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_half_is_accepted() {
        assert!(!exceeds_failure_threshold(5, 2, 5));
        assert!(exceeds_failure_threshold(6, 2, 5));
        assert!(!exceeds_failure_threshold(1, 1, 3));
        assert!(exceeds_failure_threshold(2, 1, 3));
    }

    #[test]
    fn test_retry_grows_settle_delay() {
        let mut policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(10), 3);

        assert_eq!(
            policy.judge(10, 2, 5),
            PassVerdict::Retry { settle_delay: Duration::from_millis(20) }
        );
        assert_eq!(
            policy.judge(10, 2, 5),
            PassVerdict::Retry { settle_delay: Duration::from_millis(30) }
        );
        assert_eq!(policy.judge(0, 2, 5), PassVerdict::Accepted);
        assert_eq!(policy.retries(), 2);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let mut policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(10), 1);

        assert!(matches!(policy.judge(3, 1, 3), PassVerdict::Retry { .. }));
        assert_eq!(policy.judge(3, 1, 3), PassVerdict::GiveUp);
        assert_eq!(policy.settle_delay(), Duration::from_millis(20));
    }
}
