//! GPT partition inspection and geometry adjustment.
//!
//! Wraps the partition-table tool (`sgdisk`) together with the `lsblk`
//! and `blockdev` queries it depends on. All parsing is fixed-prefix and
//! validated: a numeric field that fails to parse is rejected instead of
//! flowing into sector arithmetic.

use crate::config::DisksealConfig;
use crate::error::{DisksealError, DisksealResult};
use crate::exec::{run_with_timeout, ExecOutput};
use log::{error, info, warn};
use std::ffi::OsString;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Linux root (x86-64) partition type GUID per the UAPI
/// discoverable-partitions specification.
pub const ROOT_X86_64_TYPE_GUID: &str = "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709";

const GUID_LINE_PREFIX: &str = "Partition GUID code:";
const FIRST_SECTOR_PREFIX: &str = "First sector:";
const LAST_SECTOR_PREFIX: &str = "Last sector:";

/// Resolved view over the one partition holding the OS root filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPartitionInfo {
    pub partition_path: PathBuf,
    pub index: u32,
    pub disk: PathBuf,
}

/// Outcome of a header-space reservation, kept for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryChange {
    pub sector_size: u64,
    pub header_sectors: u64,
    pub first_sector: u64,
    pub old_last_sector: u64,
    pub new_last_sector: u64,
}

/// Narrow wrapper around the partition-table toolchain.
#[derive(Debug, Clone)]
pub struct PartitionTable {
    sgdisk: PathBuf,
    lsblk: PathBuf,
    blockdev: PathBuf,
    timeout: Duration,
}

impl PartitionTable {
    pub fn from_config(config: &DisksealConfig) -> DisksealResult<Self> {
        Ok(Self {
            sgdisk: config.sgdisk_binary()?,
            lsblk: config.lsblk_binary()?,
            blockdev: config.blockdev_binary()?,
            timeout: config.timeout(),
        })
    }

    /// Locate the partition carrying the Linux root type GUID on `disk`.
    ///
    /// The scan walks partition indices in ascending order; when several
    /// partitions match, the last match wins. On success a symlink to the
    /// discovered partition is left at `link_path` for later provisioning
    /// stages; failure to create it fails the lookup as a whole.
    pub fn find_root_partition(
        &self,
        disk: &Path,
        link_path: &Path,
    ) -> DisksealResult<RootPartitionInfo> {
        let indices = self.partition_indices(disk)?;

        let mut found: Option<RootPartitionInfo> = None;
        for index in indices {
            let payload = self.partition_info(disk, index)?;
            let type_guid = parse_type_guid(&payload)?;
            if !type_guid.eq_ignore_ascii_case(ROOT_X86_64_TYPE_GUID) {
                continue;
            }
            if let Some(previous) = &found {
                warn!(
                    "multiple root partitions on {}: index {} supersedes index {}",
                    disk.display(),
                    index,
                    previous.index
                );
            }
            found = Some(RootPartitionInfo {
                partition_path: partition_index_to_path(disk, index),
                index,
                disk: disk.to_path_buf(),
            });
        }

        let Some(root) = found else {
            error!(
                "no partition with type GUID {} on {}",
                ROOT_X86_64_TYPE_GUID,
                disk.display()
            );
            return Err(DisksealError::RootPartitionNotFound {
                disk: disk.to_path_buf(),
            });
        };

        publish_root_link(&root.partition_path, link_path)?;
        info!(
            "root partition {} (index {}) found on {}",
            root.partition_path.display(),
            root.index,
            disk.display()
        );
        Ok(root)
    }

    /// Grow the partition's table entry by the sector equivalent of
    /// `header_bytes` so the encryption header fits.
    ///
    /// The rewrite is a single combined delete+recreate invocation with
    /// the same index and first sector; only the last sector moves, and
    /// only forward. The entry changes in metadata only — the bytes past
    /// the old end must already be free space (caller precondition). A
    /// failed rewrite is fatal for this device and is never retried.
    pub fn reserve_header_space(
        &self,
        root: &RootPartitionInfo,
        header_bytes: u64,
    ) -> DisksealResult<GeometryChange> {
        let sector_size = self.device_sector_size(&root.disk)?;
        let header_sectors = header_sectors(header_bytes, sector_size);

        let (first_sector, old_last_sector) = self.partition_bounds(&root.disk, root.index)?;
        let new_last_sector = old_last_sector + header_sectors;

        let entry = format!("{}:{}:{}", root.index, first_sector, new_last_sector);
        let out = self
            .run(
                &self.sgdisk,
                &[
                    OsString::from("-e"),
                    OsString::from("-d"),
                    OsString::from(root.index.to_string()),
                    OsString::from("-n"),
                    OsString::from(&entry),
                    root.disk.as_os_str().to_owned(),
                ],
            )
            .map_err(|err| DisksealError::PartitionResize(err.to_string()))?;
        if !out.success() {
            error!(
                "partition resize failed on {} index {} (first {first_sector}, last {new_last_sector}): {}",
                root.disk.display(),
                root.index,
                out.diagnostic()
            );
            return Err(DisksealError::PartitionResize(format!(
                "sgdisk exited {} rewriting {} entry {}: {}",
                out.status,
                root.disk.display(),
                root.index,
                out.diagnostic()
            )));
        }

        // The combined delete+recreate must land exactly as requested.
        let (verified_first, verified_last) = self.partition_bounds(&root.disk, root.index)?;
        if verified_first != first_sector || verified_last != new_last_sector {
            error!(
                "rewritten entry {} on {} reads back as {}..{} (wanted {}..{})",
                root.index,
                root.disk.display(),
                verified_first,
                verified_last,
                first_sector,
                new_last_sector
            );
            return Err(DisksealError::PartitionResize(format!(
                "rewritten entry {} on {} did not verify",
                root.index,
                root.disk.display()
            )));
        }

        info!(
            "reserved {header_sectors} header sectors on {} index {} (last sector {old_last_sector} -> {new_last_sector})",
            root.disk.display(),
            root.index
        );
        Ok(GeometryChange {
            sector_size,
            header_sectors,
            first_sector,
            old_last_sector,
            new_last_sector,
        })
    }

    /// Logical sector size of `disk` in bytes, via `blockdev --getss`.
    pub fn device_sector_size(&self, disk: &Path) -> DisksealResult<u64> {
        let out = self
            .run(
                &self.blockdev,
                &[OsString::from("--getss"), disk.as_os_str().to_owned()],
            )
            .map_err(|err| DisksealError::GeometryQuery(err.to_string()))?;
        if !out.success() {
            return Err(DisksealError::GeometryQuery(format!(
                "blockdev exited {} for {}: {}",
                out.status,
                disk.display(),
                out.diagnostic()
            )));
        }

        let field = out.stdout.trim();
        let sector_size: u64 = field.parse().map_err(|_| {
            DisksealError::GeometryQuery(format!(
                "unparseable sector size `{field}` reported for {}",
                disk.display()
            ))
        })?;
        if sector_size == 0 {
            return Err(DisksealError::GeometryQuery(format!(
                "zero sector size reported for {}",
                disk.display()
            )));
        }
        Ok(sector_size)
    }

    /// Current (first, last) sector of the table entry at `index`.
    pub fn partition_bounds(&self, disk: &Path, index: u32) -> DisksealResult<(u64, u64)> {
        let payload = self
            .partition_info(disk, index)
            .map_err(|err| DisksealError::GeometryQuery(err.to_string()))?;
        parse_sector_bounds(&payload)
    }

    /// GPT partition indices present on `disk`, ascending.
    fn partition_indices(&self, disk: &Path) -> DisksealResult<Vec<u32>> {
        let out = self
            .run(
                &self.lsblk,
                &[
                    OsString::from("--noheadings"),
                    OsString::from("--raw"),
                    OsString::from("--output"),
                    OsString::from("PARTN"),
                    disk.as_os_str().to_owned(),
                ],
            )
            .map_err(|err| DisksealError::DeviceQuery(err.to_string()))?;
        if !out.success() {
            return Err(DisksealError::DeviceQuery(format!(
                "lsblk exited {} for {}: {}",
                out.status,
                disk.display(),
                out.diagnostic()
            )));
        }

        let mut indices = Vec::new();
        for line in out.stdout.lines() {
            let field = line.trim();
            if field.is_empty() {
                // The disk row itself reports an empty PARTN.
                continue;
            }
            let index: u32 = field.parse().map_err(|_| {
                DisksealError::DeviceQuery(format!(
                    "unparseable partition index `{field}` reported for {}",
                    disk.display()
                ))
            })?;
            indices.push(index);
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    fn partition_info(&self, disk: &Path, index: u32) -> DisksealResult<String> {
        let out = self
            .run(
                &self.sgdisk,
                &[
                    OsString::from("--info"),
                    OsString::from(index.to_string()),
                    disk.as_os_str().to_owned(),
                ],
            )
            .map_err(|err| DisksealError::DeviceQuery(err.to_string()))?;
        if !out.success() {
            return Err(DisksealError::DeviceQuery(format!(
                "sgdisk exited {} querying {} entry {}: {}",
                out.status,
                disk.display(),
                index,
                out.diagnostic()
            )));
        }
        Ok(out.stdout)
    }

    fn run(&self, binary: &Path, args: &[OsString]) -> Result<ExecOutput, crate::exec::ExecError> {
        run_with_timeout(binary, args, self.timeout)
    }
}

/// Sectors needed to hold `header_bytes`, rounded up to whole sectors.
pub fn header_sectors(header_bytes: u64, sector_size: u64) -> u64 {
    header_bytes.div_ceil(sector_size)
}

/// Derive the partition device path from its parent disk and index
/// (`/dev/sda` + 2 -> `/dev/sda2`, `/dev/nvme0n1` + 2 -> `/dev/nvme0n1p2`).
pub fn partition_index_to_path(disk: &Path, index: u32) -> PathBuf {
    let device = disk.to_string_lossy();
    if device.ends_with(|ch: char| ch.is_ascii_digit()) {
        PathBuf::from(format!("{device}p{index}"))
    } else {
        PathBuf::from(format!("{device}{index}"))
    }
}

/// Leave a symlink at `link_path` pointing at the discovered partition.
///
/// A link that already exists is a failure: a leftover from an earlier run
/// must surface instead of being silently repointed.
fn publish_root_link(partition_path: &Path, link_path: &Path) -> DisksealResult<()> {
    symlink(partition_path, link_path).map_err(|err| {
        error!(
            "cannot record root partition {} at {}: {err}",
            partition_path.display(),
            link_path.display()
        );
        DisksealError::DeviceQuery(format!(
            "cannot create root-partition link {}: {err}",
            link_path.display()
        ))
    })
}

fn parse_type_guid(payload: &str) -> DisksealResult<String> {
    for line in payload.lines() {
        let Some(rest) = line.trim_start().strip_prefix(GUID_LINE_PREFIX) else {
            continue;
        };
        let Some(token) = rest.split_whitespace().next() else {
            return Err(DisksealError::DeviceQuery(
                "type GUID field missing after `Partition GUID code:`".into(),
            ));
        };
        if !looks_like_guid(token) {
            return Err(DisksealError::DeviceQuery(format!(
                "unparseable type GUID `{token}` in partition info output"
            )));
        }
        return Ok(token.to_ascii_uppercase());
    }
    Err(DisksealError::DeviceQuery(
        "no `Partition GUID code:` line in partition info output".into(),
    ))
}

fn parse_sector_bounds(payload: &str) -> DisksealResult<(u64, u64)> {
    let first = parse_sector_field(payload, FIRST_SECTOR_PREFIX)?;
    let last = parse_sector_field(payload, LAST_SECTOR_PREFIX)?;
    if first >= last {
        return Err(DisksealError::GeometryQuery(format!(
            "first sector {first} is not below last sector {last}"
        )));
    }
    Ok((first, last))
}

fn parse_sector_field(payload: &str, prefix: &str) -> DisksealResult<u64> {
    for line in payload.lines() {
        let Some(rest) = line.trim_start().strip_prefix(prefix) else {
            continue;
        };
        let Some(token) = rest.split_whitespace().next() else {
            return Err(DisksealError::GeometryQuery(format!(
                "sector value missing after `{prefix}`"
            )));
        };
        return token.parse().map_err(|_| {
            DisksealError::GeometryQuery(format!(
                "unparseable sector value `{token}` after `{prefix}`"
            ))
        });
    }
    Err(DisksealError::GeometryQuery(format!(
        "no `{prefix}` line in partition info output"
    )))
}

fn looks_like_guid(token: &str) -> bool {
    if token.len() != 36 {
        return false;
    }
    token.chars().enumerate().all(|(pos, ch)| match pos {
        8 | 13 | 18 | 23 => ch == '-',
        _ => ch.is_ascii_hexdigit(),
    })
}
