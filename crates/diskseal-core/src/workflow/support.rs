//! Capability evaluation exposed to the surrounding provisioning
//! framework, which uses it to decide whether the encryption feature set
//! is advertised at all.

use crate::config::DisksealConfig;
use log::debug;

/// Level of support this host offers for TPM-backed block encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportLevel {
    Unsupported,
    Supported,
}

/// A host is supported only when the block-encryption tool resolves and
/// the TPM key source is present (device node plus unseal helper).
pub fn evaluate_support(config: &DisksealConfig) -> SupportLevel {
    let cryptsetup = config.cryptsetup_binary().is_ok();
    let helper = config.keyvault_helper().is_ok();
    let tpm_device = config.keyvault.tpm_device.exists();

    if cryptsetup && helper && tpm_device {
        debug!("TPM-backed block encryption is supported");
        SupportLevel::Supported
    } else {
        debug!(
            "TPM-backed block encryption is not supported (cryptsetup: {cryptsetup}, \
             seal helper: {helper}, tpm device {}: {tpm_device})",
            config.keyvault.tpm_device.display()
        );
        SupportLevel::Unsupported
    }
}
