//! Two-device model training driven by the pipelined executor.
//!
//! `Linear(input → hidden)` lives on `accel:0`, `Linear(hidden → output)` on
//! `accel:1`. The forward pass runs through [`PipelineExecutor`]; the backward
//! pass runs once per epoch on the whole batch, recomputing the first
//! layer's activations instead of keeping per-shard intermediates.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::{debug, info};

use tandem_device::Mesh;
use tandem_pipeline::{range, Markers, PipelineExecutor, Stage, StageFn};
use tandem_types::config::{DeviceConfig, PipelineConfig, TrainConfig};
use tandem_types::{Block, DeviceId, RunReport, StageId, StagePlacement};

use crate::model::{mse_loss, Linear};

pub const STAGE1_DEVICE: DeviceId = DeviceId::Accel(0);
pub const STAGE2_DEVICE: DeviceId = DeviceId::Accel(1);

/// Both model halves plus the executor that pipelines them.
pub struct TwoPartModel {
    part1: Arc<Linear>,
    part2: Arc<Linear>,
    executor: PipelineExecutor,
}

impl TwoPartModel {
    pub fn new(
        config: &TrainConfig,
        mesh: Arc<Mesh>,
        rng: &mut StdRng,
        markers: Arc<dyn Markers>,
    ) -> Result<Self> {
        let part1 = Arc::new(Linear::new(
            STAGE1_DEVICE,
            config.input_dim,
            config.hidden_dim,
            rng,
        ));
        let part2 = Arc::new(Linear::new(
            STAGE2_DEVICE,
            config.hidden_dim,
            config.output_dim,
            rng,
        ));
        let stage1 = Stage::from_arc(StageId::First, Arc::clone(&part1) as Arc<dyn StageFn>);
        let stage2 = Stage::from_arc(StageId::Second, Arc::clone(&part2) as Arc<dyn StageFn>);
        let placement = StagePlacement::new(STAGE1_DEVICE, STAGE2_DEVICE)?;
        let executor =
            PipelineExecutor::new(mesh, placement, stage1, stage2)?.with_markers(markers);
        Ok(Self {
            part1,
            part2,
            executor,
        })
    }

    fn mesh(&self) -> &Mesh {
        self.executor.mesh()
    }

    pub async fn forward(&self, data: &Block, split_size: usize) -> Result<(Block, RunReport)> {
        Ok(self.executor.run_with_report(data.clone(), split_size).await?)
    }

    async fn zero_grad(&self) -> Result<()> {
        let (p1, p2) = (Arc::clone(&self.part1), Arc::clone(&self.part2));
        let a = self.mesh().device(STAGE1_DEVICE)?.run(move || p1.zero_grad());
        let b = self.mesh().device(STAGE2_DEVICE)?.run(move || p2.zero_grad());
        let (a, b) = tokio::try_join!(a, b)?;
        a?;
        b?;
        Ok(())
    }

    /// Backpropagate `grad_out` (on `accel:1`) through both halves.
    async fn backward(&self, data: &Block, grad_out: Block) -> Result<()> {
        let mesh = self.mesh();

        let (p1, x) = (Arc::clone(&self.part1), data.clone());
        let hidden = mesh
            .device(STAGE1_DEVICE)?
            .run(move || p1.forward(&x))
            .await??;
        let hidden = mesh
            .link(STAGE1_DEVICE, STAGE2_DEVICE)?
            .transfer(hidden)
            .await?
            .wait()
            .await??;

        let p2 = Arc::clone(&self.part2);
        let grad_hidden = mesh
            .device(STAGE2_DEVICE)?
            .run(move || p2.backward(&hidden, &grad_out))
            .await??;
        let grad_hidden = mesh
            .link(STAGE2_DEVICE, STAGE1_DEVICE)?
            .transfer(grad_hidden)
            .await?
            .wait()
            .await??;

        let (p1, x) = (Arc::clone(&self.part1), data.clone());
        mesh.device(STAGE1_DEVICE)?
            .run(move || p1.backward(&x, &grad_hidden))
            .await??;
        Ok(())
    }

    async fn step(&self, lr: f32) -> Result<()> {
        let (p1, p2) = (Arc::clone(&self.part1), Arc::clone(&self.part2));
        let a = self.mesh().device(STAGE1_DEVICE)?.run(move || p1.step(lr));
        let b = self.mesh().device(STAGE2_DEVICE)?.run(move || p2.step(lr));
        let (a, b) = tokio::try_join!(a, b)?;
        a?;
        b?;
        Ok(())
    }
}

/// Random `[rows, width]` block with standard-normal entries, on the host.
pub fn random_block(rng: &mut StdRng, rows: usize, width: usize) -> Result<Block> {
    let data = (0..rows * width)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Ok(Block::new(DeviceId::Host, vec![rows, width], data)?)
}

/// Spawn the two-device mesh the exercise runs on.
pub fn spawn_mesh(device_config: &DeviceConfig) -> Result<Arc<Mesh>> {
    Ok(Arc::new(Mesh::spawn(
        &[STAGE1_DEVICE, STAGE2_DEVICE],
        device_config,
    )?))
}

/// Train for `config.num_epochs`; returns the loss of every epoch.
pub async fn train(
    config: &TrainConfig,
    device_config: &DeviceConfig,
    markers: Arc<dyn Markers>,
) -> Result<Vec<f32>> {
    config.validate()?;
    let mesh = spawn_mesh(device_config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let model = TwoPartModel::new(config, Arc::clone(&mesh), &mut rng, Arc::clone(&markers))?;
    let m = markers.as_ref();

    let (data, labels) = {
        let _r = range(m, "data_creation");
        (
            random_block(&mut rng, config.batch_size, config.input_dim)?,
            random_block(&mut rng, config.batch_size, config.output_dim)?,
        )
    };

    let (data, labels) = {
        let _r = range(m, "host_2_device");
        (data.to_device(STAGE1_DEVICE), labels.to_device(STAGE2_DEVICE))
    };

    info!(
        batch = config.batch_size,
        split = config.split_size,
        epochs = config.num_epochs,
        "training started"
    );

    let mut losses = Vec::with_capacity(config.num_epochs as usize);
    for epoch in 0..config.num_epochs {
        let started = Instant::now();

        {
            let _r = range(m, "zero_gradient_buffers");
            model.zero_grad().await?;
        }

        let (outputs, report) = {
            let _r = range(m, "forward_pass");
            model.forward(&data, config.split_size).await?
        };

        let (loss, grad) = {
            let _r = range(m, "loss_computation");
            let labels = labels.clone();
            mesh.device(STAGE2_DEVICE)?
                .run(move || mse_loss(&outputs, &labels))
                .await??
        };
        if !loss.is_finite() {
            bail!("loss diverged at epoch {epoch}: {loss}");
        }

        {
            let _r = range(m, "back_propagation");
            model.backward(&data, grad).await?;
        }

        {
            let _r = range(m, "model_update");
            model.step(config.learning_rate).await?;
        }

        debug!(run_id = %report.run_id, shards = report.shards, "forward pass report");
        info!(
            epoch,
            loss,
            elapsed_ms = started.elapsed().as_secs_f64() * 1e3,
            "epoch complete"
        );
        losses.push(loss);
    }
    Ok(losses)
}

// ── Compare ──────────────────────────────────────────────────────────────────

/// Pipelined and unsharded runs of the same forward pass.
#[derive(Debug)]
pub struct Comparison {
    pub pipelined: RunReport,
    pub unsharded: RunReport,
    pub max_abs_diff: f32,
}

/// `pipeline.shard_size` replaces `config.split_size` for the pipelined run.
pub async fn compare(
    config: &TrainConfig,
    pipeline: &PipelineConfig,
    device_config: &DeviceConfig,
    markers: Arc<dyn Markers>,
) -> Result<Comparison> {
    config.validate()?;
    pipeline.validate()?;
    let mesh = spawn_mesh(device_config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let model = TwoPartModel::new(config, mesh, &mut rng, markers)?;
    let data =
        random_block(&mut rng, config.batch_size, config.input_dim)?.to_device(STAGE1_DEVICE);

    let (pipelined_out, pipelined) = model.forward(&data, pipeline.shard_size).await?;
    let (unsharded_out, unsharded) = model.forward(&data, config.batch_size.max(1)).await?;
    let Some(max_abs_diff) = pipelined_out.max_abs_diff(&unsharded_out) else {
        bail!(
            "output shapes differ: {:?} vs {:?}",
            pipelined_out.dims(),
            unsharded_out.dims()
        );
    };

    info!(
        pipelined_ms = pipelined.elapsed_ms,
        unsharded_ms = unsharded.elapsed_ms,
        max_abs_diff,
        "comparison complete"
    );
    Ok(Comparison {
        pipelined,
        unsharded,
        max_abs_diff,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_pipeline::{NoMarkers, RecordingMarkers};

    fn small() -> TrainConfig {
        TrainConfig {
            input_dim: 8,
            hidden_dim: 16,
            output_dim: 1,
            batch_size: 20,
            split_size: 6,
            num_epochs: 25,
            learning_rate: 0.02,
            seed: 3,
        }
    }

    #[tokio::test]
    async fn loss_decreases() {
        let losses = train(&small(), &DeviceConfig::default(), Arc::new(NoMarkers))
            .await
            .unwrap();
        assert_eq!(losses.len(), 25);
        assert!(losses[24] < losses[0], "{losses:?}");
    }

    #[tokio::test]
    async fn training_is_deterministic_for_a_seed() {
        let cfg = TrainConfig { num_epochs: 3, ..small() };
        let a = train(&cfg, &DeviceConfig::default(), Arc::new(NoMarkers)).await.unwrap();
        let b = train(&cfg, &DeviceConfig::default(), Arc::new(NoMarkers)).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn epoch_ranges_are_marked() {
        let cfg = TrainConfig { num_epochs: 2, ..small() };
        let rec = Arc::new(RecordingMarkers::new());
        train(&cfg, &DeviceConfig::default(), rec.clone()).await.unwrap();

        assert_eq!(rec.count("data_creation"), 1);
        assert_eq!(rec.count("host_2_device"), 1);
        for name in [
            "zero_gradient_buffers",
            "forward_pass",
            "loss_computation",
            "back_propagation",
            "model_update",
        ] {
            assert_eq!(rec.count(name), 2, "{name}");
        }
        // 20 rows in shards of 6: four Stage 1 ranges per epoch.
        assert_eq!(rec.count("stage1"), 8);
    }

    #[tokio::test]
    async fn pipelined_matches_unsharded() {
        let pipeline = PipelineConfig { shard_size: 6 };
        let cmp = compare(&small(), &pipeline, &DeviceConfig::default(), Arc::new(NoMarkers))
            .await
            .unwrap();
        assert!(cmp.max_abs_diff < 1e-5);
        assert_eq!(cmp.pipelined.shards, 4);
        assert_eq!(cmp.unsharded.shards, 1);
        assert_eq!(cmp.unsharded.steady_iterations, 0);
    }

    #[test]
    fn invalid_config_rejected_before_spawning() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let cfg = TrainConfig { split_size: 0, ..small() };
        let err = rt
            .block_on(train(&cfg, &DeviceConfig::default(), Arc::new(NoMarkers)))
            .unwrap_err();
        assert!(err.to_string().contains("split_size"), "{err}");
    }
}
