//! System-backed `BlockEncryptor` implementation.
//!
//! Wraps the host `cryptsetup` binary. Every freshly established volume
//! gets the same key registered into a second key slot so one corrupted
//! slot cannot lock out the machine.

use crate::command::CryptsetupCommand;
use diskseal_core::config::DisksealConfig;
use diskseal_core::error::{DisksealError, DisksealResult};
use diskseal_provider::{BlockEncryptor, EncryptionState};
use log::{error, info};
use std::path::{Path, PathBuf};

const MAPPER_DIR: &str = "/dev/mapper";

/// Driver that manages LUKS2 volumes via the host `cryptsetup` binary.
#[derive(Debug, Clone)]
pub struct SystemBlockEncryptor {
    cryptsetup: CryptsetupCommand,
}

impl SystemBlockEncryptor {
    /// Build a driver from configuration, resolving the `cryptsetup`
    /// binary up front.
    pub fn from_config(config: &DisksealConfig) -> DisksealResult<Self> {
        Ok(Self {
            cryptsetup: CryptsetupCommand::new(config.cryptsetup_binary()?, config.timeout()),
        })
    }

    /// The secondary slot is registered only after the primary step has
    /// succeeded. A failure here leaves the volume encrypted with a
    /// single slot, which is logged distinctly from a primary failure.
    fn register_second_slot(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        self.cryptsetup
            .add_key_slot(key_file, partition)
            .inspect_err(|err| {
                error!(
                    "{} is encrypted but carries only a single key slot: {err}",
                    partition.display()
                );
            })
    }
}

impl BlockEncryptor for SystemBlockEncryptor {
    type Error = DisksealError;

    fn initialize(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        self.cryptsetup
            .encrypt(key_file, partition)
            .inspect_err(|err| {
                error!("encryption failed for {}: {err}", partition.display());
            })?;
        self.register_second_slot(key_file, partition)?;
        info!("initialized encrypted volume on {}", partition.display());
        Ok(())
    }

    fn re_encrypt(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        self.cryptsetup
            .reencrypt(key_file, partition)
            .inspect_err(|err| {
                error!("re-encryption failed for {}: {err}", partition.display());
            })?;
        self.register_second_slot(key_file, partition)?;
        info!("re-encrypted volume in place on {}", partition.display());
        Ok(())
    }

    fn open(
        &self,
        key_file: &Path,
        partition: &Path,
        mapper_name: &str,
    ) -> DisksealResult<PathBuf> {
        self.cryptsetup
            .open(key_file, partition, mapper_name)
            .inspect_err(|err| {
                error!("unlock failed for {}: {err}", partition.display());
            })?;
        Ok(Path::new(MAPPER_DIR).join(mapper_name))
    }

    fn probe(&self, partition: &Path) -> DisksealResult<EncryptionState> {
        if self.cryptsetup.is_luks(partition)? {
            Ok(EncryptionState::Encrypted)
        } else {
            Ok(EncryptionState::Unencrypted)
        }
    }
}
