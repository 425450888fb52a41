// Device identity and stage-to-device placement.
//
// Shared across tandem-device, tandem-pipeline, tandem-node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

// ── Device ───────────────────────────────────────────────────────────────────

/// Memory space a [`crate::Block`] lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceId {
    /// Host memory. Never runs a stage.
    Host,
    /// Accelerator with its own command queue, e.g. `accel:0`.
    Accel(u32),
}

impl DeviceId {
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host     => write!(f, "host"),
            Self::Accel(n) => write!(f, "accel:{n}"),
        }
    }
}

// ── Stage ────────────────────────────────────────────────────────────────────

/// Identity of one of the two sequential stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageId {
    First,
    Second,
}

impl StageId {
    /// 1-based stage number, as used in error reports.
    pub fn number(&self) -> u8 {
        match self {
            Self::First  => 1,
            Self::Second => 2,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stage{}", self.number())
    }
}

// ── Stage Placement ──────────────────────────────────────────────────────────

/// Binding from stage identity to the device its function executes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePlacement {
    first: DeviceId,
    second: DeviceId,
}

impl StagePlacement {
    /// Both stages must sit on distinct accelerators.
    pub fn new(first: DeviceId, second: DeviceId) -> Result<Self> {
        if first.is_host() || second.is_host() {
            return Err(TandemError::Config(format!(
                "stages cannot be placed on the host (got {first} / {second})"
            )));
        }
        if first == second {
            return Err(TandemError::Config(format!(
                "both stages placed on {first}; a two-stage pipeline needs two devices"
            )));
        }
        Ok(Self { first, second })
    }

    pub fn device_for(&self, stage: StageId) -> DeviceId {
        match stage {
            StageId::First  => self.first,
            StageId::Second => self.second,
        }
    }

    pub fn first(&self) -> DeviceId {
        self.first
    }

    pub fn second(&self) -> DeviceId {
        self.second
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_display() {
        assert_eq!(DeviceId::Host.to_string(), "host");
        assert_eq!(DeviceId::Accel(1).to_string(), "accel:1");
    }

    #[test]
    fn stage_numbers() {
        assert_eq!(StageId::First.number(), 1);
        assert_eq!(StageId::Second.number(), 2);
        assert_eq!(StageId::Second.to_string(), "stage2");
    }

    #[test]
    fn placement_resolves_devices() {
        let p = StagePlacement::new(DeviceId::Accel(0), DeviceId::Accel(1)).unwrap();
        assert_eq!(p.device_for(StageId::First), DeviceId::Accel(0));
        assert_eq!(p.device_for(StageId::Second), DeviceId::Accel(1));
    }

    #[test]
    fn placement_rejects_shared_device() {
        let err = StagePlacement::new(DeviceId::Accel(0), DeviceId::Accel(0)).unwrap_err();
        assert!(matches!(err, TandemError::Config(_)));
    }

    #[test]
    fn placement_rejects_host() {
        assert!(StagePlacement::new(DeviceId::Host, DeviceId::Accel(1)).is_err());
    }

    #[test]
    fn placement_serde() {
        let p = StagePlacement::new(DeviceId::Accel(0), DeviceId::Accel(3)).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        let round: StagePlacement = serde_json::from_str(&json).unwrap();
        assert_eq!(round, p);
    }
}
