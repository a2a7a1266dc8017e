use std::thread;
use std::time::{Duration, Instant};

/// Stands in for long-running media work: blocks the calling worker for a
/// uniformly random time in `[0, max_jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkSimulator {
    max_jitter: Duration,
}

impl WorkSimulator {
    pub fn new(max_jitter: Duration) -> Self {
        Self { max_jitter }
    }

    /// Finishes immediately.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn max_jitter(&self) -> Duration {
        self.max_jitter
    }

    fn pick_delay(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..=max_ms))
    }

    /// Runs one unit of work, logging start and finish as
    /// "`<Verb>` `<subject>`..." / "Finished `<gerund>` `<subject>` in `<n>`s".
    pub fn run(&self, verb: &str, gerund: &str, subject: &str) -> Duration {
        log::info!("{} {}...", verb, subject);
        let started = Instant::now();

        let delay = self.pick_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let elapsed = started.elapsed();
        log::info!(
            "Finished {} {} in {:.1}s",
            gerund,
            subject,
            elapsed.as_secs_f64()
        );
        elapsed
    }
}

impl Default for WorkSimulator {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}
