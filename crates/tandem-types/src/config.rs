// Global configuration structs. Defaults mirror the two-device training exercise.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TandemError};

// ── Pipeline ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows per shard. The last shard of a batch may be smaller.
    /// Default: 128.
    pub shard_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { shard_size: 128 }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.shard_size == 0 {
            return Err(TandemError::Config("shard_size must be > 0".into()));
        }
        Ok(())
    }
}

// ── Devices ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Command-queue slots per device and per link. Issuing blocks only when
    /// a queue is full. Default: 64.
    pub queue_depth: usize,

    /// Simulated latency added to every cross-device copy, in microseconds.
    /// Default: 0.
    pub link_latency_us: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            link_latency_us: 0,
        }
    }
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(TandemError::Config("queue_depth must be > 0".into()));
        }
        Ok(())
    }
}

// ── Training exercise ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub output_dim: usize,
    pub batch_size: usize,
    /// Shard size handed to the pipeline for the forward pass.
    pub split_size: usize,
    pub num_epochs: u32,
    pub learning_rate: f32,
    /// Seed for weight init and synthetic data.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            input_dim: 1024,
            hidden_dim: 2048,
            output_dim: 1,
            batch_size: 512,
            split_size: 128,
            num_epochs: 10,
            learning_rate: 0.001,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("input_dim", self.input_dim),
            ("hidden_dim", self.hidden_dim),
            ("output_dim", self.output_dim),
            ("batch_size", self.batch_size),
            ("split_size", self.split_size),
        ];
        for (name, value) in dims {
            if value == 0 {
                return Err(TandemError::Config(format!("{name} must be > 0")));
            }
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(TandemError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        assert_eq!(PipelineConfig::default().shard_size, 128);
        let dev = DeviceConfig::default();
        assert_eq!(dev.queue_depth, 64);
        assert_eq!(dev.link_latency_us, 0);

        let train = TrainConfig::default();
        assert_eq!(train.batch_size, 512);
        assert_eq!(train.split_size, 128);
        assert_eq!(train.hidden_dim, 2048);
        assert!(train.validate().is_ok());
    }

    #[test]
    fn zero_sizes_rejected() {
        assert!(PipelineConfig { shard_size: 0 }.validate().is_err());
        assert!(DeviceConfig { queue_depth: 0, link_latency_us: 0 }.validate().is_err());

        let cfg = TrainConfig { hidden_dim: 0, ..TrainConfig::default() };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("hidden_dim"));
    }

    #[test]
    fn bad_learning_rate_rejected() {
        let cfg = TrainConfig { learning_rate: -0.1, ..TrainConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn train_config_serde() {
        let json = serde_json::to_string(&TrainConfig::default()).unwrap();
        let round: TrainConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(round.input_dim, 1024);
        assert_eq!(round.num_epochs, 10);
    }
}
