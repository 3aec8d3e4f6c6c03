//! CPU training, the replay engine (CPU/memory/disk worker pools and
//! dispatcher), and the validation collector used to grade a replay
//! run against the journal it was driven from.

mod calibration;
mod disk_mapping;
mod engine;
mod error;
mod pools;
mod validation;
mod work;

pub use calibration::CalibrationTable;
pub use disk_mapping::{parse_disk_mappings, DiskMapping};
pub use engine::{ReplayControls, ReplayEngine, ReplayMode, ReplayReport};
pub use error::ReplayError;
pub use pools::{CpuPool, DiskPool, MemoryPool};
pub use validation::{ValidationCollector, ValidationStats};
pub use work::Workload;
