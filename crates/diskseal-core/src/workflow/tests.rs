use super::*;
use crate::config::DisksealConfig;
use crate::error::{DisksealError, DisksealResult};
use diskseal_provider::{BlockEncryptor, EncryptionState, KeyMaterial, KeyVault};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Debug, Clone)]
struct RecordedCall {
    op: &'static str,
    partition: PathBuf,
    key_present: bool,
}

#[derive(Clone)]
struct MockEncryptor {
    initial: HashMap<PathBuf, EncryptionState>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockEncryptor {
    fn new(entries: &[(&str, EncryptionState)]) -> Self {
        Self {
            initial: entries
                .iter()
                .map(|(path, state)| (PathBuf::from(path), *state))
                .collect(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, op: &'static str, partition: &Path, key_file: Option<&Path>) {
        self.calls.lock().unwrap().push(RecordedCall {
            op,
            partition: partition.to_path_buf(),
            key_present: key_file.map(Path::exists).unwrap_or(false),
        });
    }

    fn ops(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().iter().map(|call| call.op).collect()
    }
}

impl BlockEncryptor for MockEncryptor {
    type Error = DisksealError;

    fn initialize(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        self.record("initialize", partition, Some(key_file));
        Ok(())
    }

    fn re_encrypt(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        self.record("re_encrypt", partition, Some(key_file));
        Ok(())
    }

    fn open(
        &self,
        key_file: &Path,
        partition: &Path,
        mapper_name: &str,
    ) -> DisksealResult<PathBuf> {
        self.record("open", partition, Some(key_file));
        Ok(PathBuf::from("/dev/mapper").join(mapper_name))
    }

    fn probe(&self, partition: &Path) -> DisksealResult<EncryptionState> {
        self.record("probe", partition, None);
        Ok(self
            .initial
            .get(partition)
            .copied()
            .unwrap_or(EncryptionState::Unencrypted))
    }
}

#[derive(Clone)]
struct MockVault {
    dir: Arc<TempDir>,
    minted: Arc<Mutex<Vec<PathBuf>>>,
    unsealed: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockVault {
    fn new() -> Self {
        Self {
            dir: Arc::new(tempfile::tempdir().unwrap()),
            minted: Arc::new(Mutex::new(Vec::new())),
            unsealed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn stage(&self, ledger: &Mutex<Vec<PathBuf>>, tag: &str) -> DisksealResult<KeyMaterial> {
        let mut entries = ledger.lock().unwrap();
        let path = self
            .dir
            .path()
            .join(format!("{tag}-{}.bin", entries.len()));
        fs::write(&path, [0xAAu8; 32])?;
        entries.push(path.clone());
        Ok(KeyMaterial::new(path))
    }

    fn minted(&self) -> Vec<PathBuf> {
        self.minted.lock().unwrap().clone()
    }

    fn unsealed(&self) -> Vec<PathBuf> {
        self.unsealed.lock().unwrap().clone()
    }
}

impl KeyVault for MockVault {
    type Error = DisksealError;

    fn mint_key(&self) -> DisksealResult<KeyMaterial> {
        self.stage(&self.minted, "minted")
    }

    fn unseal_key(&self) -> DisksealResult<KeyMaterial> {
        self.stage(&self.unsealed, "unsealed")
    }
}

fn sample_config() -> DisksealConfig {
    let mut config = DisksealConfig::default();
    config.policy.allow_unprivileged = true;
    config
}

fn pipeline(
    encryptor: &MockEncryptor,
    vault: &MockVault,
) -> EncryptionPipeline<MockEncryptor, MockVault> {
    EncryptionPipeline::new(sample_config(), encryptor.clone(), vault.clone())
}

#[test]
fn config_drive_encrypt_mints_key_and_re_encrypts() {
    let encryptor = MockEncryptor::new(&[("/dev/vdb2", EncryptionState::Unencrypted)]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);

    let report = pipeline.encrypt_config_drive(Path::new("/dev/vdb2")).unwrap();
    assert_eq!(report.title, "Encrypted config drive /dev/vdb2");
    assert!(report.mapped_device.is_none());
    assert_eq!(encryptor.ops(), vec!["probe", "re_encrypt"]);
    assert_eq!(vault.minted().len(), 1);
    assert!(vault.unsealed().is_empty());

    let calls = encryptor.calls.lock().unwrap();
    let re_encrypt = calls.iter().find(|call| call.op == "re_encrypt").unwrap();
    assert!(re_encrypt.key_present, "key file must exist during the call");
}

#[test]
fn key_material_is_destroyed_after_the_consuming_call() {
    let encryptor = MockEncryptor::new(&[("/dev/vdb2", EncryptionState::Unencrypted)]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);

    pipeline.encrypt_config_drive(Path::new("/dev/vdb2")).unwrap();

    let minted = vault.minted();
    assert_eq!(minted.len(), 1);
    assert!(!minted[0].exists(), "key file must not outlive the workflow");
}

#[test]
fn open_follows_encrypt_within_one_invocation() {
    let encryptor = MockEncryptor::new(&[("/dev/vdb2", EncryptionState::Unencrypted)]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);

    pipeline.encrypt_config_drive(Path::new("/dev/vdb2")).unwrap();
    let report = pipeline.open_config_drive(Path::new("/dev/vdb2")).unwrap();

    assert_eq!(
        report.mapped_device,
        Some(PathBuf::from("/dev/mapper/config-2"))
    );
    // The tracked Encrypted state is reused; no second probe.
    assert_eq!(encryptor.ops(), vec!["probe", "re_encrypt", "open"]);
    assert_eq!(vault.unsealed().len(), 1);
}

#[test]
fn open_of_unencrypted_target_is_rejected_before_any_tool_runs() {
    let encryptor = MockEncryptor::new(&[("/dev/vdb2", EncryptionState::Unencrypted)]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);

    let err = pipeline
        .open_config_drive(Path::new("/dev/vdb2"))
        .unwrap_err();
    match err {
        DisksealError::StateTransition {
            target,
            state,
            operation,
        } => {
            assert_eq!(target, PathBuf::from("/dev/vdb2"));
            assert_eq!(state, EncryptionState::Unencrypted);
            assert_eq!(operation, "open");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(encryptor.ops(), vec!["probe"]);
    assert!(vault.unsealed().is_empty(), "no key may be unsealed");
}

#[test]
fn re_encrypting_an_encrypted_target_is_rejected() {
    let encryptor = MockEncryptor::new(&[("/dev/vdb2", EncryptionState::Encrypted)]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);

    let err = pipeline
        .encrypt_config_drive(Path::new("/dev/vdb2"))
        .unwrap_err();
    assert!(matches!(err, DisksealError::StateTransition { .. }));
    assert_eq!(encryptor.ops(), vec!["probe"]);
    assert!(vault.minted().is_empty(), "no key may be minted");
}

#[test]
fn open_of_encrypted_target_returns_mapper_path() {
    let encryptor = MockEncryptor::new(&[("/dev/vdb2", EncryptionState::Encrypted)]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);

    let report = pipeline.open_config_drive(Path::new("/dev/vdb2")).unwrap();
    assert_eq!(
        report.mapped_device,
        Some(PathBuf::from("/dev/mapper/config-2"))
    );
    assert_eq!(vault.unsealed().len(), 1);
}

#[test]
fn partition_image_workflows_report_not_implemented() {
    let encryptor = MockEncryptor::new(&[]);
    let vault = MockVault::new();
    let mut pipeline = pipeline(&encryptor, &vault);
    let partition = Path::new("/dev/vdb3");

    for result in [
        pipeline.encrypt_partition_image_root(partition),
        pipeline.customize_partition_image_initrd(partition),
        pipeline.open_partition_image_root(partition),
    ] {
        assert!(matches!(
            result.unwrap_err(),
            DisksealError::NotImplemented(_)
        ));
    }
    assert!(encryptor.ops().is_empty());
    assert!(vault.minted().is_empty());
    assert!(vault.unsealed().is_empty());
}
