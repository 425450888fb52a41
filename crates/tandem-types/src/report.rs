// Per-run accounting emitted by the pipeline executor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of one completed pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Rows in the input batch (and in the output).
    pub rows: usize,
    pub shard_size: usize,
    pub shards: usize,
    pub stage1_calls: usize,
    pub stage2_calls: usize,
    pub transfers: usize,
    /// Iterations that overlapped Stage 2 on shard i-1 with Stage 1 on shard i.
    pub steady_iterations: usize,
    /// Ideal slot-grid efficiency `K / (K + 1)` for this shard count.
    pub timeline_efficiency: f64,
    pub elapsed_ms: f64,
}

impl RunReport {
    pub fn new(run_id: Uuid, rows: usize, shard_size: usize) -> Self {
        Self {
            run_id,
            started_at: chrono::Utc::now(),
            rows,
            shard_size,
            shards: 0,
            stage1_calls: 0,
            stage2_calls: 0,
            transfers: 0,
            steady_iterations: 0,
            timeline_efficiency: 0.0,
            elapsed_ms: 0.0,
        }
    }

    /// True when every shard went through each stage and one transfer.
    pub fn is_balanced(&self) -> bool {
        self.stage1_calls == self.shards
            && self.stage2_calls == self.shards
            && self.transfers == self.shards
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_report_is_balanced_and_empty() {
        let r = RunReport::new(Uuid::new_v4(), 0, 3);
        assert_eq!(r.shards, 0);
        assert!(r.is_balanced());
    }

    #[test]
    fn report_serde() {
        let mut r = RunReport::new(Uuid::new_v4(), 10, 3);
        r.shards = 4;
        r.stage1_calls = 4;
        r.stage2_calls = 4;
        r.transfers = 4;
        r.steady_iterations = 3;
        let json = serde_json::to_string(&r).unwrap();
        let round: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(round.run_id, r.run_id);
        assert_eq!(round.steady_iterations, 3);
        assert!(round.is_balanced());
    }
}
