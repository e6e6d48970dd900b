#![forbid(unsafe_code)]

//! System key-vault adapter for the TPM sealing helper.
//!
//! Key generation, sealing, and unsealing are owned by an external
//! helper; this crate only stages and scopes the transient plaintext
//! copies it produces.

mod vault;

pub use vault::SystemKeyVault;
