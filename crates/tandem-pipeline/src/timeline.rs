//! Ideal slot arithmetic of a software pipeline.
//!
//! ```text
//! slot →   0    1    2    3    4
//! S1:    [s0] [s1] [s2] [s3]
//! S2:         [s0] [s1] [s2] [s3]
//! ```
//!
//! Stage `s` (0-based) handles shard `m` in slot `s + m`. With S stages and
//! K shards a run spans K + S − 1 slots, of which K − S + 1 keep every
//! stage busy.

use tandem_types::StageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineTimeline {
    num_stages: usize,
    num_shards: usize,
}

impl PipelineTimeline {
    pub fn new(num_stages: usize, num_shards: usize) -> Self {
        Self {
            num_stages,
            num_shards,
        }
    }

    /// The two-stage grid the executor runs.
    pub fn two_stage(num_shards: usize) -> Self {
        Self::new(2, num_shards)
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    pub fn slot(&self, stage: StageId, shard: usize) -> usize {
        stage.number() as usize - 1 + shard
    }

    /// Zero for an empty run.
    pub fn total_time_slots(&self) -> usize {
        if self.num_shards == 0 {
            0
        } else {
            self.num_shards + self.num_stages - 1
        }
    }

    /// Slots in which every stage is busy; the executor's steady-state
    /// iterations must match this exactly.
    pub fn steady_slots(&self) -> usize {
        (self.num_shards + 1).saturating_sub(self.num_stages)
    }

    /// `K / (K + S - 1)`
    pub fn efficiency(&self) -> f64 {
        match self.total_time_slots() {
            0 => 0.0,
            total => self.num_shards as f64 / total as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_shards() {
        let t = PipelineTimeline::two_stage(4);
        assert_eq!(t.total_time_slots(), 5);
        assert_eq!(t.steady_slots(), 3);
        assert!((t.efficiency() - 0.8).abs() < 1e-10);
        // Stage 2 on shard i-1 shares a slot with Stage 1 on shard i.
        assert_eq!(t.slot(StageId::First, 2), t.slot(StageId::Second, 1));
        assert_eq!(t.slot(StageId::Second, 3), 4);
    }

    #[test]
    fn single_shard_has_no_steady_slot() {
        let t = PipelineTimeline::two_stage(1);
        assert_eq!(t.steady_slots(), 0);
        assert_eq!(t.total_time_slots(), 2);
        assert!((t.efficiency() - 0.5).abs() < 1e-10);
    }

    #[test]
    fn empty_run() {
        let t = PipelineTimeline::two_stage(0);
        assert_eq!(t.total_time_slots(), 0);
        assert_eq!(t.steady_slots(), 0);
        assert_eq!(t.efficiency(), 0.0);
    }

    #[test]
    fn deeper_pipeline() {
        let t = PipelineTimeline::new(4, 6);
        assert_eq!(t.total_time_slots(), 9);
        assert_eq!(t.steady_slots(), 3);
    }
}
