#![forbid(unsafe_code)]

//! System driver for LUKS2 block encryption.
//!
//! Integrates with the host via `cryptsetup`
//! (encrypt/reencrypt/luksAddKey/open/isLuks).

mod command;
mod system;

pub use system::SystemBlockEncryptor;
