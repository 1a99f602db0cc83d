use std::time::Duration;

/// Controls how many times a failed open/connect is retried and how long the
/// channel waits between attempts.
///
/// `times` counts the *additional* attempts beyond the first, so
/// `OpenRetry::new(4, ...)` performs up to five opens before giving up and
/// disabling the channel. The same delay is used before reopening after a
/// lost connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpenRetry {
    times: usize,
    delay: Duration,
}

impl OpenRetry {
    /// create a retry policy from an attempt budget and a reopen delay
    pub fn new(times: usize, delay: Duration) -> Self {
        Self { times, delay }
    }

    /// total number of open attempts made before giving up
    pub(crate) fn max_attempts(&self) -> usize {
        self.times + 1
    }

    /// delay applied before another open attempt or a reopen after disconnect
    pub(crate) fn delay(&self) -> Duration {
        self.delay
    }
}

/// A single attempt, then a 1 second pause before reconnects
impl Default for OpenRetry {
    fn default() -> Self {
        Self {
            times: 0,
            delay: Duration::from_millis(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_retry_times_means_a_single_attempt() {
        assert_eq!(OpenRetry::default().max_attempts(), 1);
        assert_eq!(OpenRetry::new(4, Duration::from_millis(10)).max_attempts(), 5);
    }
}
