//! System-backed `KeyVault` implementation.
//!
//! Invokes the sealing helper (`<helper> mint|unseal --output <path>`)
//! with a unique per-invocation staging directory, so concurrent
//! provisioning runs on other disks can never share key-material paths.
//! The produced key file is locked down to owner-only permissions and
//! handed to the caller as a self-scrubbing [`KeyMaterial`].

use diskseal_core::config::DisksealConfig;
use diskseal_core::error::{DisksealError, DisksealResult};
use diskseal_core::exec::run_with_timeout;
use diskseal_provider::{KeyMaterial, KeyVault};
use log::{error, info};
use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

/// Key vault backed by the host TPM via the external sealing helper.
#[derive(Debug, Clone)]
pub struct SystemKeyVault {
    helper: PathBuf,
    staging_dir: PathBuf,
    tpm_device: PathBuf,
    timeout: Duration,
}

impl SystemKeyVault {
    /// Build a vault from configuration, resolving the helper binary up
    /// front.
    pub fn from_config(config: &DisksealConfig) -> DisksealResult<Self> {
        Ok(Self {
            helper: config.keyvault_helper()?,
            staging_dir: config.keyvault.staging_dir.clone(),
            tpm_device: config.keyvault.tpm_device.clone(),
            timeout: config.timeout(),
        })
    }

    fn produce(&self, action: &'static str) -> DisksealResult<KeyMaterial> {
        if !self.tpm_device.exists() {
            error!(
                "key {action} refused: TPM device {} is not present",
                self.tpm_device.display()
            );
            return Err(DisksealError::KeyUnavailable(format!(
                "TPM device {} is not present",
                self.tpm_device.display()
            )));
        }

        let staging = self.allocate_staging_dir()?;
        let key_path = staging.join("key.bin");

        let args = [
            OsString::from(action),
            OsString::from("--output"),
            key_path.as_os_str().to_owned(),
        ];
        let result = run_with_timeout(&self.helper, &args, self.timeout);
        let out = match result {
            Ok(out) => out,
            Err(err) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(DisksealError::KeyProvisioning(err.to_string()));
            }
        };

        if !out.success() {
            let _ = fs::remove_dir_all(&staging);
            let failure = classify_helper_failure(action, out.status, &out.diagnostic());
            error!("key {action} failed: {failure}");
            return Err(failure);
        }

        let usable = fs::metadata(&key_path)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false);
        if !usable {
            let _ = fs::remove_dir_all(&staging);
            return Err(DisksealError::KeyProvisioning(format!(
                "helper exited 0 but produced no key material at {}",
                key_path.display()
            )));
        }

        fs::set_permissions(&key_path, fs::Permissions::from_mode(0o400))?;
        info!("key {action} staged at {}", staging.display());
        Ok(KeyMaterial::with_parent_cleanup(key_path))
    }

    /// Allocate a fresh owner-only directory under the staging root.
    fn allocate_staging_dir(&self) -> DisksealResult<PathBuf> {
        fs::create_dir_all(&self.staging_dir)?;
        fs::set_permissions(&self.staging_dir, fs::Permissions::from_mode(0o700))?;

        let pid = std::process::id();
        for attempt in 0..64u32 {
            let candidate = self.staging_dir.join(format!("key-{pid}-{attempt}"));
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    fs::set_permissions(&candidate, fs::Permissions::from_mode(0o700))?;
                    return Ok(candidate);
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }

        Err(DisksealError::KeyProvisioning(format!(
            "unable to allocate a staging directory under {}",
            self.staging_dir.display()
        )))
    }
}

impl KeyVault for SystemKeyVault {
    type Error = DisksealError;

    fn mint_key(&self) -> DisksealResult<KeyMaterial> {
        self.produce("mint")
    }

    fn unseal_key(&self) -> DisksealResult<KeyMaterial> {
        self.produce("unseal")
    }
}

fn classify_helper_failure(action: &str, status: i32, diagnostic: &str) -> DisksealError {
    let trimmed = diagnostic.trim();
    let lower = trimmed.to_ascii_lowercase();
    let diagnostic = if trimmed.is_empty() {
        "no additional output".to_string()
    } else {
        trimmed.to_string()
    };

    let tpm_gone = lower.contains("tpm")
        && (lower.contains("not found")
            || lower.contains("no such")
            || lower.contains("unavailable")
            || lower.contains("locked")
            || lower.contains("no device"));
    if tpm_gone {
        DisksealError::KeyUnavailable(format!(
            "helper could not reach the TPM during {action} (exit code {status}): {diagnostic}"
        ))
    } else {
        DisksealError::KeyProvisioning(format!(
            "helper failed during {action} (exit code {status}): {diagnostic}"
        ))
    }
}
