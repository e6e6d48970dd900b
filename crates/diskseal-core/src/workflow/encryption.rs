//! Encryption pipeline sequencing partition inspection, geometry
//! adjustment, key-vault calls, and the block-encryption driver for each
//! provisioning workflow.
//!
//! Every workflow is a fixed sequence with no backtracking. Each target
//! carries an explicit [`EncryptionState`], seeded by a driver probe on
//! first contact and advanced only through validated transitions, so an
//! illegal request (opening an unencrypted partition, re-encrypting an
//! encrypted one) is rejected before any external tool runs.

use super::{event, WorkflowLevel, WorkflowReport};
use crate::config::DisksealConfig;
use crate::error::{DisksealError, DisksealResult};
use crate::exec::ensure_root;
use crate::partition::PartitionTable;
use diskseal_provider::{BlockEncryptor, EncryptionState, KeyVault};
use log::{error, info};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Top-level orchestrator driving all encryption workflows for one
/// provisioning invocation.
pub struct EncryptionPipeline<E, V> {
    config: DisksealConfig,
    encryptor: E,
    vault: V,
    states: HashMap<PathBuf, EncryptionState>,
}

impl<E, V> EncryptionPipeline<E, V>
where
    E: BlockEncryptor<Error = DisksealError>,
    V: KeyVault<Error = DisksealError>,
{
    pub fn new(config: DisksealConfig, encryptor: E, vault: V) -> Self {
        Self {
            config,
            encryptor,
            vault,
            states: HashMap::new(),
        }
    }

    /// Whole-disk-image workflow: locate the root partition on a freshly
    /// written disk, reserve header space, then re-encrypt in place with a
    /// freshly minted key.
    pub fn encrypt_whole_disk_image(&mut self, disk: &Path) -> DisksealResult<WorkflowReport> {
        self.ensure_privileged()?;
        let mut events = Vec::new();

        let table = PartitionTable::from_config(&self.config)?;
        let root = table
            .find_root_partition(disk, &self.config.policy.root_link_path)
            .inspect_err(|err| {
                error!(
                    "root partition discovery failed on {}: {err}",
                    disk.display()
                );
            })?;
        events.push(event(
            WorkflowLevel::Info,
            format!(
                "Root partition {} (index {}) discovered on {}",
                root.partition_path.display(),
                root.index,
                disk.display()
            ),
        ));

        self.require_state(&root.partition_path, EncryptionState::Unencrypted, "re-encrypt")?;

        let change = table
            .reserve_header_space(&root, self.config.header_bytes())
            .inspect_err(|err| {
                error!(
                    "header reservation failed for {}: {err}",
                    root.partition_path.display()
                );
            })?;
        events.push(event(
            WorkflowLevel::Info,
            format!(
                "Reserved {} header sectors ({}-byte sectors), last sector {} -> {}",
                change.header_sectors,
                change.sector_size,
                change.old_last_sector,
                change.new_last_sector
            ),
        ));

        let key = self.vault.mint_key().inspect_err(|err| {
            error!(
                "key mint failed for {}: {err}",
                root.partition_path.display()
            );
        })?;
        self.encryptor.re_encrypt(key.path(), &root.partition_path)?;
        drop(key);

        self.record_state(&root.partition_path, EncryptionState::Encrypted);
        events.push(event(
            WorkflowLevel::Success,
            format!("Re-encrypted {}", root.partition_path.display()),
        ));
        info!(
            "whole-disk-image encryption finished for {}",
            disk.display()
        );

        Ok(WorkflowReport {
            title: format!("Encrypted root partition on {}", disk.display()),
            events,
            mapped_device: None,
        })
    }

    /// Config-drive workflow: encrypt an already-created partition in
    /// place with a freshly minted key. Runs after the partition is
    /// created but before it is populated; header space is presumed
    /// pre-reserved by the caller, so geometry is untouched.
    pub fn encrypt_config_drive(&mut self, partition: &Path) -> DisksealResult<WorkflowReport> {
        self.ensure_privileged()?;
        let mut events = Vec::new();

        self.require_state(partition, EncryptionState::Unencrypted, "re-encrypt")?;

        let key = self.vault.mint_key().inspect_err(|err| {
            error!("key mint failed for {}: {err}", partition.display());
        })?;
        self.encryptor.re_encrypt(key.path(), partition)?;
        drop(key);

        self.record_state(partition, EncryptionState::Encrypted);
        events.push(event(
            WorkflowLevel::Success,
            format!("Re-encrypted config drive {}", partition.display()),
        ));
        info!("config-drive encryption finished for {}", partition.display());

        Ok(WorkflowReport {
            title: format!("Encrypted config drive {}", partition.display()),
            events,
            mapped_device: None,
        })
    }

    /// Config-drive-open workflow: unseal the stored key and expose the
    /// encrypted config drive under the fixed mapper name so the pipeline
    /// can mount and populate it.
    pub fn open_config_drive(&mut self, partition: &Path) -> DisksealResult<WorkflowReport> {
        self.ensure_privileged()?;
        let mut events = Vec::new();

        self.require_state(partition, EncryptionState::Encrypted, "open")?;

        let mapper_name = self.config.encryption.config_drive_mapper.clone();
        let key = self.vault.unseal_key().inspect_err(|err| {
            error!("key unseal failed for {}: {err}", partition.display());
        })?;
        let mapped = self.encryptor.open(key.path(), partition, &mapper_name)?;
        drop(key);

        self.record_state(partition, EncryptionState::Opened);
        events.push(event(
            WorkflowLevel::Success,
            format!(
                "Opened {} as {}",
                partition.display(),
                mapped.display()
            ),
        ));
        info!(
            "config drive {} opened as {}",
            partition.display(),
            mapped.display()
        );

        Ok(WorkflowReport {
            title: format!("Opened config drive {}", partition.display()),
            events,
            mapped_device: Some(mapped),
        })
    }

    /// Declared by the partition-image workflow surface; intentionally
    /// unbuilt. Reports failure rather than a silent success so the
    /// surrounding pipeline cannot believe encryption occurred.
    pub fn encrypt_partition_image_root(
        &mut self,
        partition: &Path,
    ) -> DisksealResult<WorkflowReport> {
        error!(
            "partition-image root encryption requested for {} but is not built",
            partition.display()
        );
        Err(DisksealError::NotImplemented(
            "partition-image root-partition encryption",
        ))
    }

    /// See [`Self::encrypt_partition_image_root`].
    pub fn customize_partition_image_initrd(
        &mut self,
        partition: &Path,
    ) -> DisksealResult<WorkflowReport> {
        error!(
            "partition-image initrd customization requested for {} but is not built",
            partition.display()
        );
        Err(DisksealError::NotImplemented(
            "partition-image initrd customization",
        ))
    }

    /// See [`Self::encrypt_partition_image_root`].
    pub fn open_partition_image_root(
        &mut self,
        partition: &Path,
    ) -> DisksealResult<WorkflowReport> {
        error!(
            "partition-image root open requested for {} but is not built",
            partition.display()
        );
        Err(DisksealError::NotImplemented(
            "partition-image root-partition open",
        ))
    }

    fn ensure_privileged(&self) -> DisksealResult<()> {
        if self.config.policy.allow_unprivileged {
            return Ok(());
        }
        ensure_root()
    }

    /// Tracked state of `partition`, probing the driver on first contact.
    fn state_of(&mut self, partition: &Path) -> DisksealResult<EncryptionState> {
        if let Some(state) = self.states.get(partition) {
            return Ok(*state);
        }
        let state = self.encryptor.probe(partition)?;
        self.states.insert(partition.to_path_buf(), state);
        Ok(state)
    }

    fn require_state(
        &mut self,
        partition: &Path,
        expected: EncryptionState,
        operation: &'static str,
    ) -> DisksealResult<()> {
        let state = self.state_of(partition)?;
        if state == expected {
            return Ok(());
        }
        error!(
            "refusing to {operation} {}: target is {state}",
            partition.display()
        );
        Err(DisksealError::StateTransition {
            target: partition.to_path_buf(),
            state,
            operation,
        })
    }

    fn record_state(&mut self, partition: &Path, state: EncryptionState) {
        self.states.insert(partition.to_path_buf(), state);
    }
}
