pub mod block;
pub mod config;
pub mod device;
pub mod error;
pub mod report;

pub use block::Block;
pub use device::{DeviceId, StageId, StagePlacement};
pub use error::{Result, TandemError};
pub use report::RunReport;
