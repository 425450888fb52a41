use std::fmt;

use crate::error::{PipelineError, Result};

// ── Run Phase ────────────────────────────────────────────────────────────────

/// Idle → Filling → (Steady) → Draining → Completed, or Failed from anywhere.
/// An empty batch goes straight from Idle to Completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    /// First shard through Stage 1; Stage 2 not yet issued.
    Filling,
    /// Stage 2 on shard i-1 overlapping Stage 1 on shard i.
    Steady,
    /// Last register value through Stage 2.
    Draining,
    Completed,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle      => write!(f, "Idle"),
            Self::Filling   => write!(f, "Filling"),
            Self::Steady    => write!(f, "Steady"),
            Self::Draining  => write!(f, "Draining"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed    => write!(f, "Failed"),
        }
    }
}

impl RunPhase {
    fn can_enter(self, next: RunPhase) -> bool {
        use RunPhase::*;
        matches!(
            (self, next),
            (Idle, Filling)
                | (Idle, Completed)
                | (Filling, Steady)
                | (Filling, Draining)
                | (Steady, Steady)
                | (Steady, Draining)
                | (Draining, Completed)
        ) || (next == Failed && self != Completed)
    }
}

// ── Phase Tracker ────────────────────────────────────────────────────────────

/// Phase of one run plus how many steady-state iterations it went through.
#[derive(Debug)]
pub struct PhaseTracker {
    phase: RunPhase,
    steady_iterations: usize,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            steady_iterations: 0,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn steady_iterations(&self) -> usize {
        self.steady_iterations
    }

    /// Move to `next`. Re-entering `Steady` counts one more iteration.
    pub fn advance(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_enter(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        if next == RunPhase::Steady {
            self.steady_iterations += 1;
        }
        self.phase = next;
        Ok(())
    }

    pub fn fail(&mut self) {
        self.phase = RunPhase::Failed;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_counts_steady_iterations() {
        let mut t = PhaseTracker::new();
        t.advance(RunPhase::Filling).unwrap();
        t.advance(RunPhase::Steady).unwrap();
        t.advance(RunPhase::Steady).unwrap();
        t.advance(RunPhase::Steady).unwrap();
        t.advance(RunPhase::Draining).unwrap();
        t.advance(RunPhase::Completed).unwrap();
        assert_eq!(t.phase(), RunPhase::Completed);
        assert_eq!(t.steady_iterations(), 3);
    }

    #[test]
    fn single_shard_skips_steady() {
        let mut t = PhaseTracker::new();
        t.advance(RunPhase::Filling).unwrap();
        t.advance(RunPhase::Draining).unwrap();
        t.advance(RunPhase::Completed).unwrap();
        assert_eq!(t.steady_iterations(), 0);
    }

    #[test]
    fn empty_run_completes_from_idle() {
        let mut t = PhaseTracker::new();
        t.advance(RunPhase::Completed).unwrap();
    }

    #[test]
    fn invalid_transition_rejects() {
        let mut t = PhaseTracker::new();
        assert!(t.advance(RunPhase::Draining).is_err());
        t.advance(RunPhase::Filling).unwrap();
        let err = t.advance(RunPhase::Completed).unwrap_err();
        assert!(err.to_string().contains("Filling → Completed"));
    }

    #[test]
    fn fail_from_any_live_phase() {
        let mut t = PhaseTracker::new();
        t.advance(RunPhase::Filling).unwrap();
        t.advance(RunPhase::Failed).unwrap();
        assert_eq!(t.phase(), RunPhase::Failed);
    }
}
