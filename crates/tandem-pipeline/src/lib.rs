//! `tandem-pipeline`: two-stage software pipelining over a device pair.
//!
//! A batch is cut into row shards. Stage 1 runs on the first device and
//! Stage 2 on the second; a single pipeline register carries one shard's
//! intermediate result across the link so that Stage 2 on shard i-1
//! overlaps Stage 1 on shard i. Outputs are concatenated in shard order.
//!
//! # Architecture
//!
//! ```text
//!   batch ──▶ ShardSplitter ──▶ Stage 1 (accel:0)
//!                                   │ Link
//!                                   ▼
//!                           PipelineRegister
//!                                   │
//!                                   ▼
//!                           Stage 2 (accel:1) ──▶ OutputAssembler ──▶ output
//! ```

pub mod assembler;
pub mod error;
pub mod executor;
pub mod markers;
pub mod phase;
pub mod register;
pub mod splitter;
pub mod stage;
pub mod timeline;

// ── Public re-exports ────────────────────────────────────────────────────────

pub use assembler::OutputAssembler;
pub use error::{PipelineError, Result};
pub use executor::PipelineExecutor;
pub use markers::{range, MarkerEvent, Markers, NoMarkers, RecordingMarkers, TracingMarkers};
pub use phase::{PhaseTracker, RunPhase};
pub use register::PipelineRegister;
pub use splitter::{Shard, ShardSplitter};
pub use stage::{Stage, StageFn};
pub use timeline::PipelineTimeline;
