//! Execution wrapper for invoking `cryptsetup`.
//!
//! The goal is to keep shell integration isolated so driver logic stays
//! testable (fake binaries, deterministic stdout parsing). Exit status is
//! the sole success signal; stderr/stdout are captured for diagnostics
//! only and never contain key material, because keys are always passed by
//! file path.

use diskseal_core::error::{DisksealError, DisksealResult};
use diskseal_core::exec::{run_with_timeout, ExecOutput};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Usable-size allowance handed to `reencrypt`, matching the 32 MiB
/// header reservation made on the partition table.
const REDUCE_DEVICE_SIZE: &str = "32M";

#[derive(Debug, Clone)]
pub(crate) struct CryptsetupCommand {
    binary: PathBuf,
    timeout: Duration,
}

impl CryptsetupCommand {
    pub(crate) fn new(binary: PathBuf, timeout: Duration) -> Self {
        Self { binary, timeout }
    }

    /// Format `partition` as a fresh LUKS2 volume keyed by `key_file`.
    pub(crate) fn encrypt(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        let args = [
            OsString::from("encrypt"),
            OsString::from("--type"),
            OsString::from("luks2"),
            OsString::from("--key-file"),
            key_file.as_os_str().to_owned(),
            partition.as_os_str().to_owned(),
        ];
        self.expect_success("format", &args, partition)
    }

    /// Convert `partition` into a LUKS2 volume in place, shrinking the
    /// usable device by the fixed header allowance.
    pub(crate) fn reencrypt(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        let args = [
            OsString::from("reencrypt"),
            OsString::from("--encrypt"),
            OsString::from("--type"),
            OsString::from("luks2"),
            OsString::from("--reduce-device-size"),
            OsString::from(REDUCE_DEVICE_SIZE),
            OsString::from("--key-file"),
            key_file.as_os_str().to_owned(),
            partition.as_os_str().to_owned(),
        ];
        self.expect_success("re-encrypt", &args, partition)
    }

    /// Register the key from `key_file` into an additional key slot.
    pub(crate) fn add_key_slot(&self, key_file: &Path, partition: &Path) -> DisksealResult<()> {
        let args = [
            OsString::from("luksAddKey"),
            OsString::from("--type"),
            OsString::from("luks2"),
            OsString::from("--key-file"),
            key_file.as_os_str().to_owned(),
            partition.as_os_str().to_owned(),
            key_file.as_os_str().to_owned(),
        ];
        self.expect_success("secondary-keyslot", &args, partition)
    }

    /// Unlock `partition` under `mapper_name`.
    pub(crate) fn open(
        &self,
        key_file: &Path,
        partition: &Path,
        mapper_name: &str,
    ) -> DisksealResult<()> {
        let args = [
            OsString::from("open"),
            OsString::from("--type"),
            OsString::from("luks2"),
            OsString::from("--key-file"),
            key_file.as_os_str().to_owned(),
            partition.as_os_str().to_owned(),
            OsString::from(mapper_name),
        ];
        let out = self
            .run(&args)
            .map_err(|err| DisksealError::VolumeUnlock(err.to_string()))?;
        if out.success() {
            return Ok(());
        }
        Err(DisksealError::VolumeUnlock(classify_open_failure(
            mapper_name,
            partition,
            out.status,
            &out.diagnostic(),
        )))
    }

    /// Whether `partition` carries a LUKS header.
    pub(crate) fn is_luks(&self, partition: &Path) -> DisksealResult<bool> {
        let args = [
            OsString::from("isLuks"),
            partition.as_os_str().to_owned(),
        ];
        let out = self
            .run(&args)
            .map_err(|err| DisksealError::DeviceQuery(err.to_string()))?;
        Ok(out.success())
    }

    fn expect_success(
        &self,
        stage: &'static str,
        args: &[OsString],
        partition: &Path,
    ) -> DisksealResult<()> {
        let out = self.run(args).map_err(|err| DisksealError::EncryptionInit {
            stage,
            reason: err.to_string(),
        })?;
        if out.success() {
            return Ok(());
        }
        Err(DisksealError::EncryptionInit {
            stage,
            reason: format!(
                "cryptsetup exited {} for {}: {}",
                out.status,
                partition.display(),
                out.diagnostic()
            ),
        })
    }

    fn run(&self, args: &[OsString]) -> Result<ExecOutput, diskseal_core::exec::ExecError> {
        run_with_timeout(&self.binary, args, self.timeout)
    }
}

fn classify_open_failure(name: &str, partition: &Path, status: i32, diagnostic: &str) -> String {
    let trimmed = diagnostic.trim();
    let lower = trimmed.to_ascii_lowercase();
    let diagnostic = if trimmed.is_empty() {
        "no additional output".to_string()
    } else {
        trimmed.to_string()
    };
    let partition = partition.display();

    if lower.contains("no key available")
        || lower.contains("wrong key")
        || lower.contains("passphrase")
        || lower.contains("keyslot")
        || lower.contains("key slot")
    {
        return format!(
            "cryptsetup rejected the key material for mapping `{name}` from {partition} (exit code {status}): {diagnostic}"
        );
    }

    if lower.contains("already exists") || lower.contains("already in use") {
        return format!(
            "mapping name `{name}` already exists while opening {partition} (exit code {status}): {diagnostic}"
        );
    }

    if lower.contains("is not a valid luks device") || lower.contains("not a luks device") {
        return format!(
            "{partition} has no usable LUKS header for mapping `{name}` (exit code {status}): {diagnostic}"
        );
    }

    format!(
        "cryptsetup failed to unlock mapping `{name}` from {partition} (exit code {status}): {diagnostic}"
    )
}
