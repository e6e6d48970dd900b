//! Error taxonomy shared by every DiskSeal crate.
//!
//! Every workflow failure is fatal to the current invocation: the steps
//! mutate on-disk state in ways that are not safely repeatable, so there
//! is no retry machinery here, only precise classification.

use diskseal_provider::EncryptionState;
use std::path::PathBuf;
use thiserror::Error;

pub type DisksealResult<T> = Result<T, DisksealError>;

#[derive(Debug, Error)]
pub enum DisksealError {
    /// The partition-table query could not be executed or its output could
    /// not be understood (device missing, corrupt table, tool absent).
    #[error("device query failed: {0}")]
    DeviceQuery(String),

    /// No partition on the disk carries the Linux root type GUID.
    #[error("no root partition found on {}", disk.display())]
    RootPartitionNotFound { disk: PathBuf },

    /// Sector geometry could not be read or parsed from tool output.
    #[error("geometry query failed: {0}")]
    GeometryQuery(String),

    /// The partition-table rewrite failed; the device must not be reused
    /// in this provisioning attempt.
    #[error("partition resize failed: {0}")]
    PartitionResize(String),

    /// The hardware key source is absent or locked.
    #[error("key source unavailable: {0}")]
    KeyUnavailable(String),

    /// The key-management helper ran but produced no usable key.
    #[error("key provisioning failed: {0}")]
    KeyProvisioning(String),

    /// Formatting or re-encrypting the volume failed. `stage` separates a
    /// primary-step failure from a secondary-keyslot failure that leaves
    /// the volume encrypted with a single slot.
    #[error("encryption failed during {stage}: {reason}")]
    EncryptionInit { stage: &'static str, reason: String },

    /// The encrypted volume could not be unlocked (wrong key, mapper name
    /// collision, corrupted header).
    #[error("volume unlock failed: {0}")]
    VolumeUnlock(String),

    /// A declared workflow that is intentionally unbuilt was invoked.
    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    /// The target's tracked state forbids the requested operation.
    #[error("refusing to {operation} {}: target is {state}", target.display())]
    StateTransition {
        target: PathBuf,
        state: EncryptionState,
        operation: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("insufficient privileges: {0}")]
    Privilege(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
