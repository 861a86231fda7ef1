//! Per-session ingestion statistics
//!
//! Lifetime totals plus an append-only stack of Run snapshots, one Run per
//! ingestion attempt (initial or restart). Opening a Run captures the
//! lifetime totals as a baseline so in-run deltas can be computed even
//! though the item collections are session-wide.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point counters shared by lifetime totals and run deltas
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PointTotals {
    /// Points sent to the store
    pub sent: u64,
    /// Points acknowledged by the store
    pub succeeded: u64,
    /// Points rejected by the store
    pub failed: u64,
}

/// One ingestion attempt over a session's items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Item collection sizes, refreshed on every item completion
    pub items_to_import: usize,
    pub items_imported: usize,
    pub items_in_error: usize,

    /// Run-scoped point deltas
    pub points: PointTotals,

    /// Items completed during this run
    pub items_completed: u64,

    /// Per-item throughput, points per second
    pub mean_rate: f64,
    pub min_rate: Option<f64>,
    pub max_rate: Option<f64>,
}

impl Run {
    fn open(to_import: usize, imported: usize, in_error: usize) -> Self {
        Self {
            started_at: Utc::now(),
            ended_at: None,
            items_to_import: to_import,
            items_imported: imported,
            items_in_error: in_error,
            points: PointTotals::default(),
            items_completed: 0,
            mean_rate: 0.0,
            min_rate: None,
            max_rate: None,
        }
    }

    /// Run duration in milliseconds, up to now for an open run
    pub fn duration_ms(&self) -> i64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds()
    }
}

/// Incrementally computed, concurrently-read session statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionStats {
    /// Item count recorded at analysis time
    pub items_initial: usize,

    /// Lifetime point totals across all runs
    pub lifetime: PointTotals,

    /// Ordered, append-only run history; the last entry is current
    pub runs: Vec<Run>,
}

impl SessionStats {
    /// Record the initial item count after discovery
    pub fn set_initial_items(&mut self, count: usize) {
        self.items_initial = count;
    }

    /// Open a new run, capturing current collection sizes
    pub fn open_run(&mut self, to_import: usize, imported: usize, in_error: usize) {
        self.runs.push(Run::open(to_import, imported, in_error));
    }

    /// The most recent run, if any
    pub fn current_run(&self) -> Option<&Run> {
        self.runs.last()
    }

    /// Record one completed item
    ///
    /// Refreshes collection sizes, adds the item's point counts to both the
    /// lifetime totals and the current run, and updates the running
    /// mean/min/max throughput with an incremental mean update.
    pub fn on_item_complete(
        &mut self,
        points_read: u64,
        points_succeeded: u64,
        points_failed: u64,
        rate: Option<f64>,
        to_import: usize,
        imported: usize,
        in_error: usize,
    ) {
        self.lifetime.sent += points_read;
        self.lifetime.succeeded += points_succeeded;
        self.lifetime.failed += points_failed;

        let Some(run) = self.runs.last_mut() else {
            return;
        };
        run.items_to_import = to_import;
        run.items_imported = imported;
        run.items_in_error = in_error;
        run.points.sent += points_read;
        run.points.succeeded += points_succeeded;
        run.points.failed += points_failed;
        run.items_completed += 1;

        if let Some(rate) = rate {
            let n = run.items_completed as f64;
            run.mean_rate += (rate - run.mean_rate) / n;
            run.min_rate = Some(run.min_rate.map_or(rate, |m| m.min(rate)));
            run.max_rate = Some(run.max_rate.map_or(rate, |m| m.max(rate)));
        }
    }

    /// Close the current run with final collection sizes
    pub fn close_run(&mut self, to_import: usize, imported: usize, in_error: usize) {
        if let Some(run) = self.runs.last_mut() {
            run.ended_at = Some(Utc::now());
            run.items_to_import = to_import;
            run.items_imported = imported;
            run.items_in_error = in_error;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_deltas_are_scoped_to_the_run() {
        let mut stats = SessionStats::default();
        stats.set_initial_items(2);

        stats.open_run(2, 0, 0);
        stats.on_item_complete(100, 100, 0, Some(50.0), 1, 1, 0);
        stats.on_item_complete(60, 50, 10, Some(30.0), 0, 1, 1);
        stats.close_run(0, 1, 1);

        // second run only sees its own deltas
        stats.open_run(1, 1, 0);
        stats.on_item_complete(60, 60, 0, Some(20.0), 0, 2, 0);
        stats.close_run(0, 2, 0);

        assert_eq!(stats.runs.len(), 2);
        assert_eq!(stats.lifetime.sent, 220);
        assert_eq!(stats.lifetime.succeeded, 210);
        assert_eq!(stats.lifetime.failed, 10);

        let first = &stats.runs[0];
        assert_eq!(first.points.sent, 160);
        assert_eq!(first.items_completed, 2);

        let second = stats.current_run().unwrap();
        assert_eq!(second.points.sent, 60);
        assert_eq!(second.items_completed, 1);
        assert_eq!(second.items_imported, 2);
    }

    #[test]
    fn incremental_mean_min_max() {
        let mut stats = SessionStats::default();
        stats.open_run(3, 0, 0);
        stats.on_item_complete(1, 1, 0, Some(10.0), 2, 1, 0);
        stats.on_item_complete(1, 1, 0, Some(20.0), 1, 2, 0);
        stats.on_item_complete(1, 1, 0, Some(60.0), 0, 3, 0);

        let run = stats.current_run().unwrap();
        assert!((run.mean_rate - 30.0).abs() < 1e-9);
        assert_eq!(run.min_rate, Some(10.0));
        assert_eq!(run.max_rate, Some(60.0));
    }

    #[test]
    fn item_without_rate_still_counts() {
        let mut stats = SessionStats::default();
        stats.open_run(1, 0, 0);
        stats.on_item_complete(0, 0, 0, None, 0, 0, 1);

        let run = stats.current_run().unwrap();
        assert_eq!(run.items_completed, 1);
        assert_eq!(run.mean_rate, 0.0);
        assert_eq!(run.min_rate, None);
    }
}
