//! Progress reporting for long-running stages.
//!
//! Sinks are consumed, not implemented, by this workspace: a job system
//! hands one in, the pipeline calls it fire-and-forget. Reporting must
//! never block or fail the pipeline, so sinks are expected to be cheap and
//! infallible; the throttle below bounds the call cadence.

use std::sync::atomic::{AtomicU64, Ordering};

/// Callback surface for stage progress. Percent is monotonic within a
/// stage; no cross-stage ordering is guaranteed.
pub trait JobProgressSink: Send + Sync {
    fn report(&self, stage: &str, current: u64, total: u64, percent: f32);
}

/// Sink that drops every report.
pub struct NoopProgress;

impl JobProgressSink for NoopProgress {
    fn report(&self, _stage: &str, _current: u64, _total: u64, _percent: f32) {}
}

impl<F> JobProgressSink for F
where
    F: Fn(&str, u64, u64, f32) + Send + Sync,
{
    fn report(&self, stage: &str, current: u64, total: u64, percent: f32) {
        self(stage, current, total, percent)
    }
}

/// Bounds the report cadence for one stage: a report goes out at most once
/// per 1% of `total` or once per 100 items, whichever is the coarser step,
/// plus always at completion. Safe to tick from multiple workers.
pub struct ProgressThrottle<'a> {
    sink: &'a dyn JobProgressSink,
    stage: &'a str,
    total: u64,
    step: u64,
    last_reported: AtomicU64,
}

impl<'a> ProgressThrottle<'a> {
    pub fn new(sink: &'a dyn JobProgressSink, stage: &'a str, total: u64) -> Self {
        let step = (total / 100).max(100);
        Self {
            sink,
            stage,
            total,
            step,
            last_reported: AtomicU64::new(0),
        }
    }

    /// Record that `current` items are done, reporting if the cadence
    /// allows. Stale ticks (a slower worker reporting a smaller count
    /// after a faster one) are dropped to keep percent monotonic.
    pub fn tick(&self, current: u64) {
        if current < self.total {
            let last = self.last_reported.load(Ordering::Relaxed);
            if current.saturating_sub(last) < self.step && current != 0 {
                return;
            }
        }
        let previous = self.last_reported.fetch_max(current, Ordering::Relaxed);
        if previous > current {
            return;
        }
        let percent = if self.total == 0 {
            100.0
        } else {
            (current as f32 / self.total as f32) * 100.0
        };
        self.sink.report(self.stage, current, self.total, percent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        calls: Mutex<Vec<(u64, f32)>>,
    }

    impl JobProgressSink for Recorder {
        fn report(&self, _stage: &str, current: u64, _total: u64, percent: f32) {
            self.calls.lock().push((current, percent));
        }
    }

    #[test]
    fn cadence_is_bounded() {
        let recorder = Recorder {
            calls: Mutex::new(vec![]),
        };
        let throttle = ProgressThrottle::new(&recorder, "applying", 1_000);
        for i in 0..=1_000 {
            throttle.tick(i);
        }
        let calls = recorder.calls.lock();
        // step = max(1000/100, 100) = 100 -> roughly one report per 100.
        assert!(calls.len() <= 12, "too many reports: {}", calls.len());
        assert_eq!(calls.last().unwrap().0, 1_000);
    }

    #[test]
    fn percent_is_monotonic_even_with_stale_ticks() {
        let recorder = Recorder {
            calls: Mutex::new(vec![]),
        };
        let throttle = ProgressThrottle::new(&recorder, "applying", 200);
        throttle.tick(150);
        throttle.tick(100); // stale
        throttle.tick(200);
        let calls = recorder.calls.lock();
        let percents: Vec<f32> = calls.iter().map(|(_, p)| *p).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(calls.last().unwrap().0, 200);
    }

    #[test]
    fn zero_total_reports_complete() {
        let recorder = Recorder {
            calls: Mutex::new(vec![]),
        };
        let throttle = ProgressThrottle::new(&recorder, "applying", 0);
        throttle.tick(0);
        let calls = recorder.calls.lock();
        assert_eq!(calls.as_slice(), &[(0, 100.0)]);
    }
}
