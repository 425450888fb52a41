//! Stage functions and their device binding.
//!
//! The numeric work of a stage is opaque to the scheduler. It is supplied
//! as a [`StageFn`]; the scheduler only decides when and on which device
//! queue it runs.

use std::sync::Arc;

use tandem_types::{Block, DeviceId, StageId};

/// A pure mapping from an array on `device` to an array on `device`.
pub trait StageFn: Send + Sync + 'static {
    fn forward(&self, device: DeviceId, input: &Block) -> tandem_types::Result<Block>;
}

impl<F> StageFn for F
where
    F: Fn(DeviceId, &Block) -> tandem_types::Result<Block> + Send + Sync + 'static,
{
    fn forward(&self, device: DeviceId, input: &Block) -> tandem_types::Result<Block> {
        self(device, input)
    }
}

/// A stage function tagged with which of the two stages it is.
#[derive(Clone)]
pub struct Stage {
    id: StageId,
    func: Arc<dyn StageFn>,
}

impl Stage {
    pub fn new(id: StageId, func: impl StageFn) -> Self {
        Self {
            id,
            func: Arc::new(func),
        }
    }

    pub fn from_arc(id: StageId, func: Arc<dyn StageFn>) -> Self {
        Self { id, func }
    }

    pub fn id(&self) -> StageId {
        self.id
    }

    /// Job body run on `device`'s queue.
    ///
    /// Rejects inputs that are not resident on `device`, and outputs that
    /// either left the device or changed the row count.
    pub(crate) fn invoke(&self, device: DeviceId, input: Block) -> Result<Block, String> {
        if input.device() != device {
            return Err(format!(
                "input resident on {}, {} is bound to {device}",
                input.device(),
                self.id
            ));
        }
        let output = self
            .func
            .forward(device, &input)
            .map_err(|e| e.to_string())?;
        if output.device() != device {
            return Err(format!("output left on {}, expected {device}", output.device()));
        }
        if output.rows() != input.rows() {
            return Err(format!(
                "output has {} rows for an input of {}",
                output.rows(),
                input.rows()
            ));
        }
        Ok(output)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::TandemError;

    const A: DeviceId = DeviceId::Accel(0);

    fn doubler() -> Stage {
        Stage::new(StageId::First, |dev: DeviceId, x: &Block| {
            let data = x.data().iter().map(|v| v * 2.0).collect();
            Block::new(dev, x.dims().to_vec(), data)
        })
    }

    #[test]
    fn invoke_runs_function() {
        let input = Block::new(A, vec![2, 1], vec![1.0, 2.0]).unwrap();
        let out = doubler().invoke(A, input).unwrap();
        assert_eq!(out.data(), &[2.0, 4.0]);
    }

    #[test]
    fn invoke_rejects_foreign_input() {
        let input = Block::zeros(DeviceId::Accel(1), 1, &[1]);
        let err = doubler().invoke(A, input).unwrap_err();
        assert!(err.contains("accel:1"));
    }

    #[test]
    fn invoke_rejects_row_count_change() {
        let stage = Stage::new(StageId::Second, |dev: DeviceId, _: &Block| -> tandem_types::Result<Block> {
            Ok(Block::zeros(dev, 1, &[1]))
        });
        let err = stage.invoke(A, Block::zeros(A, 3, &[1])).unwrap_err();
        assert!(err.contains("1 rows"));
    }

    #[test]
    fn invoke_surfaces_function_error() {
        let stage = Stage::new(StageId::Second, |_: DeviceId, _: &Block| -> tandem_types::Result<Block> {
            Err(TandemError::Device("out of memory".into()))
        });
        let err = stage.invoke(A, Block::zeros(A, 1, &[1])).unwrap_err();
        assert!(err.contains("out of memory"));
    }
}
