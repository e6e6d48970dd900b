//! Core building blocks shared by DiskSeal binaries.
//!
//! Configuration, partition inspection, and encryption workflows live
//! here so downstream crates can focus on operator surfaces instead of
//! reimplementing orchestration.

pub mod config;
pub mod error;
pub mod exec;
pub mod logging;
pub mod partition;
pub mod workflow;

pub use config::{DisksealConfig, DEFAULT_CONFIG_PATH};
pub use error::{DisksealError, DisksealResult};
pub use partition::{PartitionTable, RootPartitionInfo, ROOT_X86_64_TYPE_GUID};
pub use workflow::{evaluate_support, EncryptionPipeline, SupportLevel};
