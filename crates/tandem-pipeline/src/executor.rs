//! Two-stage software-pipelined executor.
//!
//! One control flow issues all work. Stage 1 runs on the first device,
//! Stage 2 on the second, and every value crossing between them goes
//! through the mesh link. With a one-shard lag, Stage 2 on shard i-1 is
//! issued before Stage 1 on shard i, so the two devices work concurrently.
//!
//! ```text
//! fill:    S1(0) → xfer(0) → reg
//! steady:  S2(reg=0) ‖ S1(1) → xfer(1) → reg
//!          S2(reg=1) ‖ S1(2) → xfer(2) → reg
//! drain:   S2(reg=K-1)
//! ```
//!
//! The control flow suspends only to load the register (waiting for a
//! Stage 1 result and its transfer) and at the end to collect Stage 2
//! results. A run is atomic: any failure discards the register and every
//! collected result.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_device::{Device, DeviceError, Link, Mesh, Pending};
use tandem_types::{Block, DeviceId, RunReport, StageId, StagePlacement};

use crate::assembler::OutputAssembler;
use crate::error::{PipelineError, Result};
use crate::markers::{self, Markers, NoMarkers};
use crate::phase::{PhaseTracker, RunPhase};
use crate::register::PipelineRegister;
use crate::splitter::{Shard, ShardSplitter, Shards};
use crate::stage::Stage;
use crate::timeline::PipelineTimeline;

type StageOutcome = std::result::Result<Block, String>;

/// Drives Stage 1 and Stage 2 across the shards of a batch.
pub struct PipelineExecutor {
    mesh: Arc<Mesh>,
    placement: StagePlacement,
    stage1: Stage,
    stage2: Stage,
    markers: Arc<dyn Markers>,
}

impl PipelineExecutor {
    /// Bind the two stages to the devices named by `placement`.
    ///
    /// Both devices and the link between them must exist in `mesh`.
    pub fn new(
        mesh: Arc<Mesh>,
        placement: StagePlacement,
        stage1: Stage,
        stage2: Stage,
    ) -> Result<Self> {
        if stage1.id() != StageId::First || stage2.id() != StageId::Second {
            return Err(PipelineError::Configuration(format!(
                "stages given as ({}, {}), expected (stage1, stage2)",
                stage1.id(),
                stage2.id()
            )));
        }
        let config_err = |e: DeviceError| PipelineError::Configuration(e.to_string());
        mesh.device(placement.first()).map_err(config_err)?;
        mesh.device(placement.second()).map_err(config_err)?;
        mesh.link(placement.first(), placement.second())
            .map_err(config_err)?;

        Ok(Self {
            mesh,
            placement,
            stage1,
            stage2,
            markers: Arc::new(NoMarkers),
        })
    }

    pub fn with_markers(mut self, markers: Arc<dyn Markers>) -> Self {
        self.markers = markers;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn placement(&self) -> StagePlacement {
        self.placement
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    // ── Entry points ─────────────────────────────────────────────────────

    /// Synchronous entry point. Builds a current-thread runtime and blocks
    /// on [`PipelineExecutor::run`]. Inside a runtime it fails with
    /// `Execution`; async callers use `run`.
    pub fn run_pipeline(&self, batch: Block, shard_size: usize) -> Result<Block> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(PipelineError::Execution(
                "run_pipeline called inside a runtime; use run".into(),
            ));
        }
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| PipelineError::Execution(format!("building runtime: {e}")))?;
        rt.block_on(self.run(batch, shard_size))
    }

    pub async fn run(&self, batch: Block, shard_size: usize) -> Result<Block> {
        self.run_with_report(batch, shard_size)
            .await
            .map(|(output, _)| output)
    }

    /// Run the full fill / steady-state / drain sequence over `batch`.
    ///
    /// `batch` must be resident on Stage 1's device; the output is
    /// resident on Stage 2's device with the same row count and order.
    pub async fn run_with_report(
        &self,
        batch: Block,
        shard_size: usize,
    ) -> Result<(Block, RunReport)> {
        let started = Instant::now();
        let splitter = ShardSplitter::new(shard_size)?;

        if batch.device() != self.placement.first() {
            return Err(PipelineError::Configuration(format!(
                "batch resident on {}, stage1 runs on {}",
                batch.device(),
                self.placement.first()
            )));
        }

        let mut report = RunReport::new(Uuid::new_v4(), batch.rows(), shard_size);
        let run_id = report.run_id;
        let num_shards = splitter.num_shards(batch.rows());
        let timeline = PipelineTimeline::two_stage(num_shards);

        info!(
            %run_id,
            rows = batch.rows(),
            shard_size,
            shards = num_shards,
            stage1 = %self.placement.first(),
            stage2 = %self.placement.second(),
            efficiency = timeline.efficiency(),
            "pipeline run starting"
        );

        let mut run = RunState::new(self.placement.second(), timeline);
        if let Err(e) = self.drive(splitter.split(&batch), &mut run).await {
            warn!(
                %run_id,
                phase = %run.phase.phase(),
                shard = ?e.shard(),
                error = %e,
                "pipeline run aborted"
            );
            run.phase.fail();
            return Err(e);
        }

        let RunState {
            register,
            assembler,
            phase,
            stage1_calls,
            stage2_calls,
            transfers,
            ..
        } = run;
        if !register.is_empty() {
            return Err(PipelineError::Scheduling(format!(
                "register still holds shard {:?} after drain",
                register.held_shard()
            )));
        }
        if phase.steady_iterations() != timeline.steady_slots() {
            return Err(PipelineError::Scheduling(format!(
                "{} steady iterations for {} steady slots",
                phase.steady_iterations(),
                timeline.steady_slots()
            )));
        }
        let output = assembler.finish(batch.row_shape())?;

        report.shards = num_shards;
        report.stage1_calls = stage1_calls;
        report.stage2_calls = stage2_calls;
        report.transfers = transfers;
        report.steady_iterations = phase.steady_iterations();
        report.timeline_efficiency = timeline.efficiency();
        report.elapsed_ms = started.elapsed().as_secs_f64() * 1e3;

        info!(
            %run_id,
            shards = report.shards,
            steady_iterations = report.steady_iterations,
            elapsed_ms = report.elapsed_ms,
            "pipeline run complete"
        );

        Ok((output, report))
    }

    // ── Fill / steady / drain ────────────────────────────────────────────

    async fn drive(&self, mut shards: Shards<'_>, run: &mut RunState) -> Result<()> {
        // K = 0: nothing to issue.
        let Some(first) = shards.next() else {
            return run.phase.advance(RunPhase::Completed);
        };

        run.phase.advance(RunPhase::Filling)?;
        self.load_register(first?, run).await?;

        for shard in shards {
            let shard = shard?;
            run.phase.advance(RunPhase::Steady)?;
            self.issue_stage2(run).await?;
            self.load_register(shard, run).await?;
            run.reap()?;
        }

        run.phase.advance(RunPhase::Draining)?;
        self.issue_stage2(run).await?;
        run.collect().await?;

        run.phase.advance(RunPhase::Completed)
    }

    /// Stage 1 on `shard`, transfer, and store into the register.
    async fn load_register(&self, shard: Shard, run: &mut RunState) -> Result<()> {
        let Shard { index, block, .. } = shard;
        let device = self.placement.first();

        let produced = {
            let _range = markers::range(self.markers.as_ref(), "stage1");
            let stage = self.stage1.clone();
            let pending = self
                .device(device)?
                .submit_fallible(move || stage.invoke(device, block))
                .await
                .map_err(|e| stage_error(StageId::First, index, e.to_string()))?;
            run.stage1_calls += 1;
            stage_result(StageId::First, index, pending.wait().await)?
        };

        let moved = {
            let _range = markers::range(self.markers.as_ref(), "transfer");
            let pending = self
                .link()?
                .transfer(produced)
                .await
                .map_err(|e| transfer_error(index, e))?;
            run.transfers += 1;
            pending
                .wait()
                .await
                .and_then(|copied| copied)
                .map_err(|e| transfer_error(index, e))?
        };

        debug!(
            shard = index,
            slot = run.timeline.slot(StageId::First, index),
            rows = moved.rows(),
            device = %moved.device(),
            "register loaded"
        );
        run.register.put(index, moved)
    }

    /// Issue Stage 2 on the register contents without waiting for it.
    async fn issue_stage2(&self, run: &mut RunState) -> Result<()> {
        let (index, block) = run.register.take().ok_or_else(|| {
            PipelineError::Scheduling("register empty when issuing stage2".into())
        })?;
        let device = self.placement.second();

        let _range = markers::range(self.markers.as_ref(), "stage2");
        let stage = self.stage2.clone();
        let pending = self
            .device(device)?
            .submit_fallible(move || stage.invoke(device, block))
            .await
            .map_err(|e| stage_error(StageId::Second, index, e.to_string()))?;
        run.stage2_calls += 1;
        debug!(
            shard = index,
            slot = run.timeline.slot(StageId::Second, index),
            device = %device,
            "stage2 issued"
        );
        run.inflight.push_back((index, pending));
        Ok(())
    }

    fn device(&self, id: DeviceId) -> Result<&Device> {
        self.mesh
            .device(id)
            .map_err(|e| PipelineError::Execution(e.to_string()))
    }

    fn link(&self) -> Result<&Link> {
        self.mesh
            .link(self.placement.first(), self.placement.second())
            .map_err(|e| PipelineError::Execution(e.to_string()))
    }
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("placement", &self.placement)
            .field("mesh", &self.mesh)
            .finish()
    }
}

// ── Per-run state ─────────────────────────────────────────────────────────────

/// Everything owned by a single run; dropped wholesale on failure.
struct RunState {
    register: PipelineRegister,
    /// Issued Stage 2 jobs not yet collected, oldest first.
    inflight: VecDeque<(usize, Pending<StageOutcome>)>,
    assembler: OutputAssembler,
    phase: PhaseTracker,
    timeline: PipelineTimeline,
    stage1_calls: usize,
    stage2_calls: usize,
    transfers: usize,
}

impl RunState {
    fn new(output_device: DeviceId, timeline: PipelineTimeline) -> Self {
        let num_shards = timeline.num_shards();
        Self {
            register: PipelineRegister::new(),
            inflight: VecDeque::with_capacity(num_shards),
            assembler: OutputAssembler::new(output_device, num_shards),
            phase: PhaseTracker::new(),
            timeline,
            stage1_calls: 0,
            stage2_calls: 0,
            transfers: 0,
        }
    }

    /// Move already-finished Stage 2 results into the assembler without
    /// blocking. A failed one aborts the run early.
    fn reap(&mut self) -> Result<()> {
        while let Some((index, pending)) = self.inflight.front_mut() {
            let index = *index;
            let Some(outcome) = pending.try_take() else {
                break;
            };
            self.inflight.pop_front();
            let block = stage_result(StageId::Second, index, outcome)?;
            self.assembler.push(index, block)?;
        }
        Ok(())
    }

    /// Wait for every outstanding Stage 2 result, in shard order.
    async fn collect(&mut self) -> Result<()> {
        while let Some((index, pending)) = self.inflight.pop_front() {
            let block = stage_result(StageId::Second, index, pending.wait().await)?;
            self.assembler.push(index, block)?;
        }
        Ok(())
    }
}

// ── Error mapping ─────────────────────────────────────────────────────────────

fn stage_error(stage: StageId, shard: usize, reason: String) -> PipelineError {
    PipelineError::StageExecution {
        stage,
        shard,
        reason,
    }
}

fn stage_result(
    stage: StageId,
    shard: usize,
    outcome: tandem_device::Result<StageOutcome>,
) -> Result<Block> {
    match outcome {
        Ok(Ok(block)) => Ok(block),
        Ok(Err(reason)) => Err(stage_error(stage, shard, reason)),
        Err(e) => Err(stage_error(stage, shard, e.to_string())),
    }
}

fn transfer_error(shard: usize, e: DeviceError) -> PipelineError {
    PipelineError::Transfer {
        shard,
        reason: e.to_string(),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
