//! Rate-limited throughput reporting for streamed downloads.

use std::time::{Duration, Instant};

use tracing::info;

/// Minimum gap between two progress events.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

const MIB: f64 = 1_048_576.0;

/// Emits at most one progress event per [`PROGRESS_INTERVAL`].
///
/// Callers pass the current instant so tests can drive time explicitly.
#[derive(Debug, Clone)]
pub struct ProgressMeter {
    target: String,
    started: Instant,
    last_report: Instant,
}

impl ProgressMeter {
    /// Start measuring a transfer into `target`.
    pub fn new(target: impl Into<String>, now: Instant) -> Self {
        Self {
            target: target.into(),
            started: now,
            last_report: now,
        }
    }

    /// Record that `bytes` have been written in total; returns whether an
    /// event was emitted.
    pub fn observe(&mut self, now: Instant, bytes: u64) -> bool {
        if now.saturating_duration_since(self.last_report) < PROGRESS_INTERVAL {
            return false;
        }
        self.last_report = now;
        let elapsed = now.saturating_duration_since(self.started);
        let mib = bytes as f64 / MIB;
        let rate = mib / elapsed.as_secs_f64().max(1e-3);
        info!(
            target_file = %self.target,
            bytes,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            mib_per_sec = rate,
            "download progress"
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn reports_at_most_twice_per_second() {
        let start = Instant::now();
        let mut meter = ProgressMeter::new("london_raw.json", start);
        let reports: Vec<bool> = [100_u64, 499, 500, 700, 999, 1_000, 1_600]
            .into_iter()
            .map(|millis| meter.observe(start + Duration::from_millis(millis), millis * 1_024))
            .collect();

        assert_eq!(
            reports,
            vec![false, false, true, false, false, true, true]
        );
    }
}
