//! Configuration model and helpers used by DiskSeal workflows.

use crate::error::{DisksealError, DisksealResult};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/diskseal.toml";

pub(crate) const KNOWN_SGDISK_PATHS: &[&str] = &[
    "/usr/sbin/sgdisk",
    "/sbin/sgdisk",
    "/usr/bin/sgdisk",
    "/bin/sgdisk",
];
pub(crate) const KNOWN_CRYPTSETUP_PATHS: &[&str] = &[
    "/usr/sbin/cryptsetup",
    "/usr/bin/cryptsetup",
    "/sbin/cryptsetup",
    "/bin/cryptsetup",
    "/usr/local/sbin/cryptsetup",
];
pub(crate) const KNOWN_BLOCKDEV_PATHS: &[&str] = &[
    "/usr/sbin/blockdev",
    "/sbin/blockdev",
    "/usr/bin/blockdev",
];
pub(crate) const KNOWN_LSBLK_PATHS: &[&str] = &["/bin/lsblk", "/usr/bin/lsblk"];
pub(crate) const KNOWN_SEAL_HELPER_PATHS: &[&str] = &[
    "/usr/sbin/tpm-sealkey",
    "/usr/bin/tpm-sealkey",
    "/usr/local/sbin/tpm-sealkey",
];

/// Top-level DiskSeal configuration, loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct DisksealConfig {
    pub tools: Tools,
    pub encryption: Encryption,
    pub keyvault: KeyVaultCfg,
    pub policy: Policy,
}

/// External tool locations and the shared execution timeout.
///
/// Unset paths fall back to the well-known locations above, then `PATH`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Tools {
    pub sgdisk_path: Option<String>,
    pub cryptsetup_path: Option<String>,
    pub blockdev_path: Option<String>,
    pub lsblk_path: Option<String>,
    /// Upper bound for any single external command. In-place re-encryption
    /// of a large root partition dominates this budget.
    pub timeout_secs: u64,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            sgdisk_path: None,
            cryptsetup_path: None,
            blockdev_path: None,
            lsblk_path: None,
            timeout_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Encryption {
    /// Header reservation appended to the root partition, in MiB. Must
    /// match the `--reduce-device-size` allowance used on re-encryption.
    pub header_mib: u64,
    /// Mapper name the opened config drive is exposed under.
    pub config_drive_mapper: String,
}

impl Default for Encryption {
    fn default() -> Self {
        Self {
            header_mib: 32,
            config_drive_mapper: "config-2".to_string(),
        }
    }
}

/// Key-management helper contract: `<helper> mint|unseal --output <path>`
/// writes raw key bytes to `<path>` and exits zero.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct KeyVaultCfg {
    pub helper_path: Option<String>,
    /// Transient filesystem root for per-invocation key staging.
    pub staging_dir: PathBuf,
    /// TPM device node whose presence gates the whole feature set.
    pub tpm_device: PathBuf,
}

impl Default for KeyVaultCfg {
    fn default() -> Self {
        Self {
            helper_path: None,
            staging_dir: PathBuf::from("/run/diskseal/keys"),
            tpm_device: PathBuf::from("/dev/tpmrm0"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default, deny_unknown_fields)]
pub struct Policy {
    /// Fixed symlink recording the discovered root partition for later
    /// provisioning stages.
    pub root_link_path: PathBuf,
    /// Skip the root-privilege gate. Only meaningful for test harnesses
    /// driving fake tool binaries.
    pub allow_unprivileged: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            root_link_path: PathBuf::from("/tmp/root_partition"),
            allow_unprivileged: false,
        }
    }
}

impl DisksealConfig {
    /// Parse configuration from `path`.
    pub fn load(path: &Path) -> DisksealResult<Self> {
        let contents = fs::read_to_string(path).map_err(|err| {
            DisksealError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        let config: Self = toml::from_str(&contents).map_err(|err| {
            DisksealError::InvalidConfig(format!("cannot parse {}: {err}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when present, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> DisksealResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            info!(
                "no configuration at {}; using built-in defaults",
                path.display()
            );
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn validate(&self) -> DisksealResult<()> {
        if self.encryption.header_mib == 0 {
            return Err(DisksealError::InvalidConfig(
                "encryption.header_mib must be greater than zero".into(),
            ));
        }
        if !looks_like_mapping_name(&self.encryption.config_drive_mapper) {
            return Err(DisksealError::InvalidConfig(format!(
                "encryption.config_drive_mapper `{}` is not a valid mapper name",
                self.encryption.config_drive_mapper
            )));
        }
        if self.policy.root_link_path.as_os_str().is_empty() {
            return Err(DisksealError::InvalidConfig(
                "policy.root_link_path must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Header reservation in bytes.
    pub fn header_bytes(&self) -> u64 {
        self.encryption.header_mib * 1024 * 1024
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.tools.timeout_secs)
    }

    pub fn sgdisk_binary(&self) -> DisksealResult<PathBuf> {
        resolve_tool(
            self.tools.sgdisk_path.as_deref(),
            KNOWN_SGDISK_PATHS,
            "sgdisk",
        )
    }

    pub fn cryptsetup_binary(&self) -> DisksealResult<PathBuf> {
        resolve_tool(
            self.tools.cryptsetup_path.as_deref(),
            KNOWN_CRYPTSETUP_PATHS,
            "cryptsetup",
        )
    }

    pub fn blockdev_binary(&self) -> DisksealResult<PathBuf> {
        resolve_tool(
            self.tools.blockdev_path.as_deref(),
            KNOWN_BLOCKDEV_PATHS,
            "blockdev",
        )
    }

    pub fn lsblk_binary(&self) -> DisksealResult<PathBuf> {
        resolve_tool(self.tools.lsblk_path.as_deref(), KNOWN_LSBLK_PATHS, "lsblk")
    }

    pub fn keyvault_helper(&self) -> DisksealResult<PathBuf> {
        resolve_tool(
            self.keyvault.helper_path.as_deref(),
            KNOWN_SEAL_HELPER_PATHS,
            "tpm-sealkey",
        )
    }
}

/// Resolve a tool binary: explicit configuration (which must exist), then
/// well-known locations, then `PATH`.
fn resolve_tool(configured: Option<&str>, known: &[&str], name: &str) -> DisksealResult<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|path| !path.is_empty()) {
        let candidate = Path::new(path);
        if !candidate.exists() {
            return Err(DisksealError::InvalidConfig(format!(
                "{name} binary not found at {}",
                candidate.display()
            )));
        }
        return Ok(candidate.to_path_buf());
    }

    if let Some(path) = detect_binary_path(known) {
        return Ok(path);
    }

    find_in_path(name).ok_or_else(|| {
        DisksealError::InvalidConfig(format!(
            "unable to locate {name} binary; tried {known:?} and PATH"
        ))
    })
}

pub(crate) fn detect_binary_path(candidates: &[&str]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
}

fn find_in_path(binary: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(binary);
        if candidate.exists() {
            Some(candidate)
        } else {
            None
        }
    })
}

/// Lightweight sanity check for device-mapper names.
pub fn looks_like_mapping_name(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return false;
    }
    trimmed
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}
