//! Progress channel (spec §6): throughput-limited payloads pushed by the
//! Replayer and the Optimization Runner.

use std::time::{Duration, Instant};

/// One progress update. `completed`/`total` are bars for a single run,
/// or parameter-set combinations for the Optimization Runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressPayload {
    pub completed: u64,
    pub total: u64,
}

impl ProgressPayload {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total).min(100) as u8
    }
}

pub type ProgressCallback = Box<dyn FnMut(ProgressPayload) + Send>;

/// Rate-limits a progress callback so high-frequency replay loops don't
/// saturate it with one call per bar.
pub struct ThrottledProgress {
    callback: ProgressCallback,
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl ThrottledProgress {
    pub fn new(callback: ProgressCallback, min_interval: Duration) -> Self {
        Self {
            callback,
            min_interval,
            last_sent: None,
        }
    }

    /// Reports `payload`, dropping the update if it arrives before
    /// `min_interval` has elapsed since the last one — except for the
    /// final update (`completed == total`), which always goes through.
    pub fn report(&mut self, payload: ProgressPayload) {
        let is_final = payload.completed >= payload.total;
        let should_send = is_final
            || self
                .last_sent
                .map(|t| t.elapsed() >= self.min_interval)
                .unwrap_or(true);
        if should_send {
            (self.callback)(payload);
            self.last_sent = Some(Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn percent_saturates_at_100() {
        let payload = ProgressPayload { completed: 150, total: 100 };
        assert_eq!(payload.percent(), 100);
    }

    #[test]
    fn final_update_always_sent_even_if_throttled() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let mut throttled = ThrottledProgress::new(
            Box::new(move |p| received_clone.lock().unwrap().push(p)),
            Duration::from_secs(3600),
        );
        throttled.report(ProgressPayload { completed: 1, total: 10 });
        throttled.report(ProgressPayload { completed: 10, total: 10 });
        let got = received.lock().unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].completed, 10);
    }
}
