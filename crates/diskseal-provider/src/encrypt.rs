//! Contract for the block-encryption driver.
//!
//! Targets are raw partition device paths. Every operation is destructive
//! or irreversible from the caller's perspective, so implementations must
//! report failure through their error type rather than a partial-success
//! state: exit status of the underlying tool is the sole success signal.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

/// Explicit lifecycle of an encryption target.
///
/// Workflows seed this from [`BlockEncryptor::probe`] on first contact and
/// advance it only through validated transitions; illegal transitions are
/// rejected before any external tool is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionState {
    Unencrypted,
    Encrypted,
    Opened,
}

impl fmt::Display for EncryptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncryptionState::Unencrypted => "unencrypted",
            EncryptionState::Encrypted => "encrypted",
            EncryptionState::Opened => "opened",
        };
        f.write_str(label)
    }
}

/// Abstraction over the block-encryption tool.
///
/// Key material is always passed by file path, never as inline bytes, so
/// the key cannot leak through process argument lists or provider logs.
pub trait BlockEncryptor {
    type Error: Error + Send + Sync + 'static;

    /// Format `partition` as a fresh encrypted volume keyed by `key_file`,
    /// then register the same key into a secondary key slot.
    fn initialize(&self, key_file: &Path, partition: &Path) -> Result<(), Self::Error>;

    /// Convert `partition` into an encrypted volume in place, shrinking the
    /// usable device by the header allowance, then register the secondary
    /// key slot.
    fn re_encrypt(&self, key_file: &Path, partition: &Path) -> Result<(), Self::Error>;

    /// Unlock `partition` under `mapper_name` and return the mapped device
    /// path.
    fn open(
        &self,
        key_file: &Path,
        partition: &Path,
        mapper_name: &str,
    ) -> Result<PathBuf, Self::Error>;

    /// Observe the current state of `partition` without mutating it.
    fn probe(&self, partition: &Path) -> Result<EncryptionState, Self::Error>;
}
