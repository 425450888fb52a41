//! Ordered reassembly of per-shard Stage 2 outputs.

use tandem_types::{Block, DeviceId};

use crate::error::{PipelineError, Result};

/// Owns the result sequence until it is concatenated and handed back to
/// the caller. Entries must arrive in shard order.
#[derive(Debug)]
pub struct OutputAssembler {
    device: DeviceId,
    expected: usize,
    parts: Vec<Block>,
}

impl OutputAssembler {
    /// `expected` is the shard count K; the result lives on `device`.
    pub fn new(device: DeviceId, expected: usize) -> Self {
        Self {
            device,
            expected,
            parts: Vec::with_capacity(expected),
        }
    }

    /// Append the Stage 2 output of `shard`, which must be the next index.
    pub fn push(&mut self, shard: usize, block: Block) -> Result<()> {
        if shard != self.parts.len() {
            return Err(PipelineError::Scheduling(format!(
                "shard {shard} arrived at position {}",
                self.parts.len()
            )));
        }
        if shard >= self.expected {
            return Err(PipelineError::Scheduling(format!(
                "shard {shard} beyond the {} expected",
                self.expected
            )));
        }
        if let Some(first) = self.parts.first() {
            if block.row_shape() != first.row_shape() {
                return Err(PipelineError::ShapeMismatch {
                    shard,
                    expected: first.row_shape().to_vec(),
                    found: block.row_shape().to_vec(),
                });
            }
        }
        self.parts.push(block);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Concatenate all parts along the row axis.
    ///
    /// With zero shards the result is an empty block with `empty_row_shape`.
    pub fn finish(self, empty_row_shape: &[usize]) -> Result<Block> {
        if self.parts.len() != self.expected {
            return Err(PipelineError::Scheduling(format!(
                "assembling {} of {} shards",
                self.parts.len(),
                self.expected
            )));
        }
        if self.parts.is_empty() {
            return Ok(Block::empty(self.device, empty_row_shape));
        }
        // Row shapes were checked on push.
        Block::concat_rows(&self.parts, self.device)
            .map_err(|e| PipelineError::Scheduling(format!("concatenating shards: {e}")))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const B: DeviceId = DeviceId::Accel(1);

    fn part(rows: usize, cols: usize, start: f32) -> Block {
        let data = (0..rows * cols).map(|v| start + v as f32).collect();
        Block::new(B, vec![rows, cols], data).unwrap()
    }

    #[test]
    fn concatenates_in_shard_order() {
        let mut asm = OutputAssembler::new(B, 3);
        asm.push(0, part(2, 1, 0.0)).unwrap();
        asm.push(1, part(2, 1, 2.0)).unwrap();
        asm.push(2, part(1, 1, 4.0)).unwrap();
        assert_eq!(asm.len(), 3);

        let out = asm.finish(&[1]).unwrap();
        assert_eq!(out.dims(), &[5, 1]);
        assert_eq!(out.data(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.device(), B);
    }

    #[test]
    fn out_of_order_push_rejected() {
        let mut asm = OutputAssembler::new(B, 2);
        let err = asm.push(1, part(1, 1, 0.0)).unwrap_err();
        assert!(matches!(err, PipelineError::Scheduling(_)));
    }

    #[test]
    fn inconsistent_row_shape_rejected() {
        let mut asm = OutputAssembler::new(B, 2);
        asm.push(0, part(2, 3, 0.0)).unwrap();
        let err = asm.push(1, part(2, 4, 0.0)).unwrap_err();
        match err {
            PipelineError::ShapeMismatch { shard, expected, found } => {
                assert_eq!(shard, 1);
                assert_eq!(expected, vec![3]);
                assert_eq!(found, vec![4]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn incomplete_sequence_rejected() {
        let mut asm = OutputAssembler::new(B, 2);
        asm.push(0, part(1, 1, 0.0)).unwrap();
        assert!(asm.finish(&[1]).is_err());
    }

    #[test]
    fn zero_shards_give_empty_block() {
        let asm = OutputAssembler::new(B, 0);
        assert!(asm.is_empty());
        let out = asm.finish(&[4]).unwrap();
        assert_eq!(out.dims(), &[0, 4]);
    }
}
