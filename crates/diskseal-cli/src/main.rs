#![forbid(unsafe_code)]

//! DiskSeal command-line interface for provisioning-time encryption
//! workflows.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use diskseal_core::{
    config::{DisksealConfig, DEFAULT_CONFIG_PATH},
    logging,
    workflow::{evaluate_support, EncryptionPipeline, SupportLevel, WorkflowLevel, WorkflowReport},
};
use diskseal_luks::SystemBlockEncryptor;
use diskseal_tpm::SystemKeyVault;
use std::path::PathBuf;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "diskseal",
    version,
    about = "Disk-encryption orchestration for bare-metal provisioning (GPT + LUKS2 + TPM-sealed keys)."
)]
struct Cli {
    /// Path to the DiskSeal configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Subcommands covering the provisioning workflows DiskSeal drives.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Report whether TPM-backed block encryption is supported on this host.
    Support,

    /// Encrypt the root partition of a freshly written whole-disk image.
    EncryptDisk {
        /// Disk device expected to hold the root partition (e.g. /dev/sda).
        device: PathBuf,
    },

    /// Encrypt an already-created config-drive partition in place.
    EncryptConfigDrive {
        /// Config-drive partition device (e.g. /dev/sda4).
        partition: PathBuf,
    },

    /// Unseal the TPM key and open the encrypted config drive.
    OpenConfigDrive {
        /// Encrypted config-drive partition device.
        partition: PathBuf,
    },

    /// Print the configuration JSON schema.
    Schema,
}

/// Entry point: parse arguments and surface errors with an exit code.
fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

/// Dispatch to the requested subcommand and map results into rich output.
fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();

    match cli.command {
        Commands::Support => {
            let config = load_cli_config(&cli.config)?;
            match evaluate_support(&config) {
                SupportLevel::Supported => println!("supported"),
                SupportLevel::Unsupported => {
                    println!("unsupported");
                    std::process::exit(2);
                }
            }
        }
        Commands::EncryptDisk { device } => {
            let mut pipeline = build_pipeline(&cli.config)?;
            let report = pipeline
                .encrypt_whole_disk_image(&device)
                .with_context(|| format!("whole-disk encryption failed for {}", device.display()))?;
            print_report(report);
        }
        Commands::EncryptConfigDrive { partition } => {
            let mut pipeline = build_pipeline(&cli.config)?;
            let report = pipeline.encrypt_config_drive(&partition).with_context(|| {
                format!("config-drive encryption failed for {}", partition.display())
            })?;
            print_report(report);
        }
        Commands::OpenConfigDrive { partition } => {
            let mut pipeline = build_pipeline(&cli.config)?;
            let report = pipeline.open_config_drive(&partition).with_context(|| {
                format!("config-drive open failed for {}", partition.display())
            })?;
            let mapped = report.mapped_device.clone();
            print_report(report);
            if let Some(mapped) = mapped {
                println!("{}", mapped.display());
            }
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(DisksealConfig);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }
    }

    Ok(())
}

fn load_cli_config(path: &PathBuf) -> Result<DisksealConfig> {
    DisksealConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

fn build_pipeline(
    config_path: &PathBuf,
) -> Result<EncryptionPipeline<SystemBlockEncryptor, SystemKeyVault>> {
    let config = load_cli_config(config_path)?;
    let encryptor = SystemBlockEncryptor::from_config(&config)
        .context("block-encryption tooling is not usable on this host")?;
    let vault =
        SystemKeyVault::from_config(&config).context("key vault is not usable on this host")?;
    Ok(EncryptionPipeline::new(config, encryptor, vault))
}

/// Pretty-print a workflow report so humans can follow along.
fn print_report(report: WorkflowReport) {
    println!("{}", report.title);
    for event in report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

/// Short tag used when printing workflow severity levels.
fn level_tag(level: WorkflowLevel) -> &'static str {
    match level {
        WorkflowLevel::Info => "INFO",
        WorkflowLevel::Success => "OK",
        WorkflowLevel::Warn => "WARN",
        WorkflowLevel::Error => "ERR",
        WorkflowLevel::Security => "SEC",
    }
}
