//! Rolling per-stage timing accumulation for `--show-timings`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use pah_core::eval::ProfilerStats;

#[derive(Default)]
struct Totals {
    count: u64,
    total: BTreeMap<String, Duration>,
}

/// Accumulates per-stage durations across every evaluation the driver has
/// run, for a final `--show-timings` report.
pub struct Profiler {
    totals: Mutex<Totals>,
}

impl Profiler {
    /// Build an empty accumulator.
    pub fn new() -> Self {
        Self { totals: Mutex::new(Totals::default()) }
    }

    /// Record one evaluation's per-stage timings.
    pub fn record(&self, stats: &ProfilerStats) {
        let mut totals = self.totals.lock().unwrap();
        totals.count += 1;
        for (stage, dt) in &stats.time_stats {
            *totals.total.entry(stage.clone()).or_default() += *dt;
        }
    }

    /// Render a human-readable report: each stage's total time and average
    /// per evaluation.
    pub fn report(&self) -> String {
        let totals = self.totals.lock().unwrap();
        if totals.count == 0 {
            return "no evaluations completed".to_string();
        }
        let mut lines = vec![format!("{} evaluations:", totals.count)];
        for (stage, total) in &totals.total {
            let avg = *total / totals.count as u32;
            lines.push(format!(
                "  {stage}: total {:.3}s, avg {:.3}ms",
                total.as_secs_f64(),
                avg.as_secs_f64() * 1000.0
            ));
        }
        lines.join("\n")
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_multiple_records() {
        let profiler = Profiler::new();
        let mut stats = ProfilerStats::default();
        stats.add_stat("compile", Duration::from_millis(10));
        profiler.record(&stats);
        profiler.record(&stats);
        let report = profiler.report();
        assert!(report.contains("2 evaluations"));
        assert!(report.contains("compile"));
    }

    #[test]
    fn empty_profiler_reports_no_evaluations() {
        let profiler = Profiler::new();
        assert_eq!(profiler.report(), "no evaluations completed");
    }
}
