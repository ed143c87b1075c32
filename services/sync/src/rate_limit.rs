use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

/// Keeps successive calls at least `interval` apart.
///
/// The first call passes straight through; later calls sleep until
/// `interval` has elapsed since the previous one was let through.
#[derive(Debug)]
pub struct MinIntervalGate {
    interval: Duration,
    last: Option<Instant>,
}

impl MinIntervalGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next slot and return how long that took
    pub async fn wait(&mut self) -> Duration {
        let now = Instant::now();
        let mut waited = Duration::ZERO;

        if let Some(last) = self.last {
            let ready_at = last + self.interval;
            if ready_at > now {
                waited = ready_at - now;
                debug!(wait_ms = waited.as_millis() as u64, "Rate limit gate waiting");
                sleep_until(ready_at).await;
            }
        }

        self.last = Some(Instant::now());
        waited
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_passes_immediately() {
        let mut gate = MinIntervalGate::new(Duration::from_secs(5));
        assert_eq!(gate.wait().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_calls_are_spaced() {
        let mut gate = MinIntervalGate::new(Duration::from_secs(5));
        let start = Instant::now();

        gate.wait().await;
        assert_eq!(gate.wait().await, Duration::from_secs(5));
        assert_eq!(gate.wait().await, Duration::from_secs(5));
        assert_eq!(start.elapsed(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_time_counts_toward_interval() {
        let mut gate = MinIntervalGate::new(Duration::from_secs(5));

        gate.wait().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(gate.wait().await, Duration::from_secs(2));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(gate.wait().await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_never_waits() {
        let mut gate = MinIntervalGate::new(Duration::ZERO);
        for _ in 0..3 {
            assert_eq!(gate.wait().await, Duration::ZERO);
        }
    }
}
