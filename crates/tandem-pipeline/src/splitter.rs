//! Row-order-preserving batch sharding.
//!
//! A batch of N rows with shard size S becomes K = ⌈N / S⌉ shards covering
//! `[0, S)`, `[S, 2S)`, … The last shard holds `N mod S` rows, or a full S
//! when N divides evenly. An empty batch yields no shards at all.

use std::ops::Range;

use tandem_types::Block;

use crate::error::{PipelineError, Result};

/// One contiguous slice of the input batch.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    /// Zero-based position in the shard sequence.
    pub index: usize,
    /// Rows of the batch this shard covers.
    pub rows: Range<usize>,
    pub block: Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardSplitter {
    shard_size: usize,
}

impl ShardSplitter {
    pub fn new(shard_size: usize) -> Result<Self> {
        if shard_size == 0 {
            return Err(PipelineError::Configuration(
                "shard size must be at least 1".into(),
            ));
        }
        Ok(Self { shard_size })
    }

    pub fn shard_size(&self) -> usize {
        self.shard_size
    }

    pub fn num_shards(&self, rows: usize) -> usize {
        rows.div_ceil(self.shard_size)
    }

    /// Row count of every shard, in order.
    pub fn shard_sizes(&self, rows: usize) -> Vec<usize> {
        (0..self.num_shards(rows))
            .map(|i| self.range_of(i, rows).len())
            .collect()
    }

    /// Lazily cut `batch` into shards. Calling again restarts from shard 0.
    pub fn split<'a>(&self, batch: &'a Block) -> Shards<'a> {
        Shards {
            batch,
            splitter: *self,
            next: 0,
            total: self.num_shards(batch.rows()),
        }
    }

    fn range_of(&self, index: usize, rows: usize) -> Range<usize> {
        let start = index * self.shard_size;
        start..(start + self.shard_size).min(rows)
    }
}

/// Iterator over the shards of one batch. Each item copies its rows out of
/// the batch only when it is pulled.
#[derive(Debug, Clone)]
pub struct Shards<'a> {
    batch: &'a Block,
    splitter: ShardSplitter,
    next: usize,
    total: usize,
}

impl Iterator for Shards<'_> {
    type Item = Result<Shard>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.total {
            return None;
        }
        let index = self.next;
        self.next += 1;

        let rows = self.splitter.range_of(index, self.batch.rows());
        let shard = self
            .batch
            .slice_rows(rows.clone())
            .map(|block| Shard { index, rows, block })
            .map_err(|e| PipelineError::Scheduling(format!("cutting shard {index}: {e}")));
        Some(shard)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.next;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Shards<'_> {}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::DeviceId;

    fn batch(rows: usize) -> Block {
        let data = (0..rows * 2).map(|v| v as f32).collect();
        Block::new(DeviceId::Accel(0), vec![rows, 2], data).unwrap()
    }

    #[test]
    fn ten_rows_by_three() {
        let s = ShardSplitter::new(3).unwrap();
        assert_eq!(s.num_shards(10), 4);
        assert_eq!(s.shard_sizes(10), vec![3, 3, 3, 1]);

        let shards: Vec<Shard> = s.split(&batch(10)).collect::<Result<_>>().unwrap();
        assert_eq!(shards.len(), 4);
        assert_eq!(shards[3].rows, 9..10);
        assert_eq!(shards[3].block.data(), &[18.0, 19.0]);
        for (i, sh) in shards.iter().enumerate() {
            assert_eq!(sh.index, i);
        }
    }

    #[test]
    fn even_division_has_full_last_shard() {
        let s = ShardSplitter::new(4).unwrap();
        assert_eq!(s.shard_sizes(8), vec![4, 4]);
    }

    #[test]
    fn shards_cover_batch_in_order() {
        let b = batch(7);
        let parts: Vec<Block> = ShardSplitter::new(2)
            .unwrap()
            .split(&b)
            .map(|s| s.map(|s| s.block))
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(Block::concat_rows(&parts, b.device()).unwrap(), b);
    }

    #[test]
    fn empty_batch_yields_nothing() {
        let s = ShardSplitter::new(3).unwrap();
        let empty = Block::empty(DeviceId::Accel(0), &[2]);
        assert_eq!(s.split(&empty).count(), 0);
        assert!(s.shard_sizes(0).is_empty());
    }

    #[test]
    fn oversized_shard_gives_single_shard() {
        let s = ShardSplitter::new(100).unwrap();
        assert_eq!(s.shard_sizes(10), vec![10]);
    }

    #[test]
    fn restartable() {
        let b = batch(5);
        let s = ShardSplitter::new(2).unwrap();
        let mut it = s.split(&b);
        assert_eq!(it.len(), 3);
        it.next();
        assert_eq!(it.len(), 2);
        assert_eq!(s.split(&b).len(), 3);
    }

    #[test]
    fn zero_shard_size_rejected() {
        assert!(matches!(
            ShardSplitter::new(0),
            Err(PipelineError::Configuration(_))
        ));
    }
}
