//! Contract toward the external key-management subsystem.
//!
//! The vault owns key generation, sealing, and unsealing. DiskSeal only
//! ever sees a transient plaintext copy on disk, referenced by path.

use std::error::Error;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Owned reference to transient plaintext key material.
///
/// The referenced file is scrubbed and removed when the handle is dropped,
/// so key material never outlives the encrypt/open call that consumed it.
/// Only the path is exposed; the bytes are never loaded by this type.
#[derive(Debug)]
pub struct KeyMaterial {
    path: PathBuf,
    cleanup_parent: bool,
}

impl KeyMaterial {
    /// Take ownership of the key file at `path`.
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            cleanup_parent: false,
        }
    }

    /// Take ownership of the key file and its single-use parent directory.
    pub fn with_parent_cleanup(path: PathBuf) -> Self {
        Self {
            path,
            cleanup_parent: true,
        }
    }

    /// Path handed to the block-encryption tool.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        scrub_file(&self.path);
        let _ = fs::remove_file(&self.path);
        if self.cleanup_parent {
            if let Some(parent) = self.path.parent() {
                let _ = fs::remove_dir(parent);
            }
        }
    }
}

/// Best-effort overwrite so deleted key bytes are not trivially
/// recoverable from the transient filesystem.
fn scrub_file(path: &Path) {
    let Ok(meta) = fs::metadata(path) else {
        return;
    };
    if !meta.is_file() {
        return;
    }
    let len = meta.len() as usize;
    if let Ok(mut file) = fs::OpenOptions::new().write(true).open(path) {
        let zeros = vec![0u8; len];
        let _ = file.write_all(&zeros);
        let _ = file.sync_all();
    }
}

/// Abstraction over the hardware-backed key source.
pub trait KeyVault {
    type Error: Error + Send + Sync + 'static;

    /// Mint and seal a fresh random key, returning the transient plaintext
    /// copy for immediate one-time use.
    fn mint_key(&self) -> Result<KeyMaterial, Self::Error>;

    /// Unseal a previously sealed key, returning the transient plaintext
    /// copy.
    fn unseal_key(&self) -> Result<KeyMaterial, Self::Error>;
}
