//! The single in-flight slot between Stage 1 and Stage 2.

use tandem_types::Block;

use crate::error::{PipelineError, Result};

/// Holds at most one transferred Stage 1 output awaiting Stage 2.
///
/// Empty at the start of a run, written once per iteration, read and
/// cleared once per iteration, empty again after the drain step.
#[derive(Debug, Default)]
pub struct PipelineRegister {
    slot: Option<(usize, Block)>,
}

impl PipelineRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the value for `shard`. The slot must be empty.
    pub fn put(&mut self, shard: usize, block: Block) -> Result<()> {
        if let Some((held, _)) = &self.slot {
            return Err(PipelineError::Scheduling(format!(
                "register still holds shard {held} while writing shard {shard}"
            )));
        }
        self.slot = Some((shard, block));
        Ok(())
    }

    /// Read and clear the slot.
    pub fn take(&mut self) -> Option<(usize, Block)> {
        self.slot.take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Shard index currently held, if any.
    pub fn held_shard(&self) -> Option<usize> {
        self.slot.as_ref().map(|(i, _)| *i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::DeviceId;

    #[test]
    fn single_slot_lifecycle() {
        let mut reg = PipelineRegister::new();
        assert!(reg.is_empty());

        reg.put(0, Block::zeros(DeviceId::Accel(1), 2, &[2])).unwrap();
        assert_eq!(reg.held_shard(), Some(0));

        let err = reg.put(1, Block::zeros(DeviceId::Accel(1), 2, &[2])).unwrap_err();
        assert!(matches!(err, PipelineError::Scheduling(_)));

        let (shard, block) = reg.take().unwrap();
        assert_eq!(shard, 0);
        assert_eq!(block.rows(), 2);
        assert!(reg.is_empty());
        assert!(reg.take().is_none());
    }
}
