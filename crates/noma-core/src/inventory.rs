//! Block-device discovery from sysfs and `blkid`.

use crate::config::{NomaConfig, PatternCfg};
use crate::error::{NomaError, NomaResult};
use crate::system::{CommandRunner, Tool};
use log::{debug, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const DEFAULT_SECTOR_SIZE: u64 = 512;

/// Device class, decided purely by name pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// `sdX` style devices: USB sticks and disks.
    Usb,
    /// `mmcblkN` style devices: the boot SD card.
    Sd,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Usb => "usb",
            DeviceKind::Sd => "sd",
        }
    }

    /// Separator placed between the parent name and the partition number.
    fn partition_separator(self) -> &'static str {
        match self {
            DeviceKind::Usb => "",
            DeviceKind::Sd => "p",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled name patterns, one device and one partition pattern per kind.
#[derive(Debug, Clone)]
pub struct DevicePatterns {
    usb_device: Regex,
    usb_partition: Regex,
    sd_device: Regex,
    sd_partition: Regex,
}

impl DevicePatterns {
    pub fn from_config(cfg: &PatternCfg) -> NomaResult<Self> {
        Ok(Self {
            usb_device: Regex::new(&cfg.usb_device)?,
            usb_partition: Regex::new(&cfg.usb_partition)?,
            sd_device: Regex::new(&cfg.sd_device)?,
            sd_partition: Regex::new(&cfg.sd_partition)?,
        })
    }

    fn device(&self, kind: DeviceKind) -> &Regex {
        match kind {
            DeviceKind::Usb => &self.usb_device,
            DeviceKind::Sd => &self.sd_device,
        }
    }

    fn partition(&self, kind: DeviceKind) -> &Regex {
        match kind {
            DeviceKind::Usb => &self.usb_partition,
            DeviceKind::Sd => &self.sd_partition,
        }
    }

    pub fn device_kind(&self, name: &str) -> Option<DeviceKind> {
        [DeviceKind::Usb, DeviceKind::Sd]
            .into_iter()
            .find(|kind| self.device(*kind).is_match(name))
    }

    pub fn partition_kind(&self, name: &str) -> Option<DeviceKind> {
        [DeviceKind::Usb, DeviceKind::Sd]
            .into_iter()
            .find(|kind| self.partition(*kind).is_match(name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub name: String,
    pub size_bytes: u64,
    pub kind: DeviceKind,
}

/// A partition of a [`BlockDevice`].
///
/// `name` is always `parent` followed by a positive partition number, with a
/// `p` separator for SD-like devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub parent: String,
    pub size_bytes: u64,
}

impl Partition {
    pub fn dev_path(&self) -> PathBuf {
        Path::new("/dev").join(&self.name)
    }
}

/// Reads devices and partitions beneath a sysfs block root.
#[derive(Debug, Clone)]
pub struct DeviceInventory {
    root: PathBuf,
    patterns: DevicePatterns,
}

impl DeviceInventory {
    pub fn new(root: impl Into<PathBuf>, patterns: DevicePatterns) -> Self {
        Self {
            root: root.into(),
            patterns,
        }
    }

    pub fn from_config(config: &NomaConfig) -> NomaResult<Self> {
        Ok(Self::new(
            config.storage.sys_block_root.clone(),
            config.device_patterns()?,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Devices of `kind`, in name order. A missing sysfs root yields no devices.
    pub fn list_devices(&self, kind: DeviceKind) -> NomaResult<Vec<BlockDevice>> {
        let mut devices = Vec::new();
        for name in self.device_names()? {
            if !self.patterns.device(kind).is_match(&name) {
                continue;
            }
            let size_bytes = self.device_size(&name)?;
            devices.push(BlockDevice {
                name,
                size_bytes,
                kind,
            });
        }
        Ok(devices)
    }

    /// Partitions of every `kind` device, grouped by device then in name order.
    pub fn list_partitions(&self, kind: DeviceKind) -> NomaResult<Vec<Partition>> {
        let mut partitions = Vec::new();
        for device in self.list_devices(kind)? {
            let sector_size = self.sector_size(&device.name)?;
            for name in sorted_entries(&self.root.join(&device.name))? {
                if !self.patterns.partition(kind).is_match(&name) {
                    continue;
                }
                if !is_partition_of(&name, &device.name, kind) {
                    debug!(
                        "skipping {name}: not a numbered partition of {}",
                        device.name
                    );
                    continue;
                }
                let Some(sectors) = read_u64(&self.root.join(&device.name).join(&name).join("size"))?
                else {
                    debug!("skipping {name}: no size attribute");
                    continue;
                };
                let size_bytes = sectors.saturating_mul(sector_size);
                if size_bytes > device.size_bytes {
                    warn!(
                        "ignoring {name}: reports {size_bytes} bytes, larger than {} ({} bytes)",
                        device.name, device.size_bytes
                    );
                    continue;
                }
                partitions.push(Partition {
                    name,
                    parent: device.name.clone(),
                    size_bytes,
                });
            }
        }
        Ok(partitions)
    }

    /// Byte size of a device or partition name.
    pub fn size_of(&self, id: &str) -> NomaResult<u64> {
        if self.patterns.device_kind(id).is_some() && self.root.join(id).join("size").exists() {
            return self.device_size(id);
        }

        let kind = self
            .patterns
            .partition_kind(id)
            .ok_or_else(|| NomaError::DeviceNotFound(id.to_string()))?;
        let parent =
            parent_name(id, kind).ok_or_else(|| NomaError::DeviceNotFound(id.to_string()))?;
        let sectors = read_u64(&self.root.join(parent).join(id).join("size"))?
            .ok_or_else(|| NomaError::DeviceNotFound(id.to_string()))?;
        Ok(sectors.saturating_mul(self.sector_size(parent)?))
    }

    /// Name to UUID table from one `blkid` invocation.
    pub fn uuid_table<R: CommandRunner + ?Sized>(&self, runner: &R) -> NomaResult<BTreeMap<String, String>> {
        let output = runner.run(Tool::Blkid, &[])?;
        // blkid exits 2 when it found nothing; treat that as an empty table.
        if !output.success() && output.code != Some(2) {
            return Err(NomaError::Command(format!(
                "blkid failed: {}",
                output.diagnostic()
            )));
        }
        Ok(parse_blkid(&output.stdout_text()))
    }

    pub fn uuid_of<R: CommandRunner + ?Sized>(&self, runner: &R, partition: &str) -> NomaResult<String> {
        self.uuid_table(runner)?
            .remove(partition)
            .ok_or_else(|| NomaError::UuidNotFound(partition.to_string()))
    }

    fn device_names(&self) -> NomaResult<Vec<String>> {
        match sorted_entries(&self.root) {
            Ok(names) => Ok(names),
            Err(NomaError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                warn!("block device root {} does not exist", self.root.display());
                Ok(Vec::new())
            }
            Err(err) => Err(err),
        }
    }

    fn device_size(&self, name: &str) -> NomaResult<u64> {
        let sectors = read_u64(&self.root.join(name).join("size"))?
            .ok_or_else(|| NomaError::DeviceNotFound(name.to_string()))?;
        Ok(sectors.saturating_mul(self.sector_size(name)?))
    }

    fn sector_size(&self, device: &str) -> NomaResult<u64> {
        let path = self.root.join(device).join("queue").join("hw_sector_size");
        Ok(read_u64(&path)?.unwrap_or(DEFAULT_SECTOR_SIZE))
    }
}

/// Parse `blkid` output into a partition-name to UUID map.
///
/// Lines look like `/dev/sda1: LABEL="x" UUID="abcd" TYPE="ext4"`. Lines
/// without a `UUID` key (only `PARTUUID`, for example) are skipped.
pub fn parse_blkid(output: &str) -> BTreeMap<String, String> {
    let mut table = BTreeMap::new();
    for line in output.lines() {
        let Some((device, attrs)) = line.split_once(':') else {
            continue;
        };
        let Some(name) = device.trim().rsplit('/').next().filter(|n| !n.is_empty()) else {
            continue;
        };
        if let Some(uuid) = blkid_attr(attrs, "UUID") {
            table.insert(name.to_string(), uuid.to_string());
        }
    }
    table
}

fn blkid_attr<'a>(attrs: &'a str, key: &str) -> Option<&'a str> {
    let mut rest = attrs;
    while let Some(eq) = rest.find("=\"") {
        let name = rest[..eq].trim();
        let after = &rest[eq + 2..];
        let close = after.find('"')?;
        if name == key {
            return Some(&after[..close]);
        }
        rest = &after[close + 1..];
    }
    None
}

fn is_partition_of(name: &str, parent: &str, kind: DeviceKind) -> bool {
    parent_name(name, kind) == Some(parent)
}

/// Strip the partition number (and SD separator) from `name`.
fn parent_name(name: &str, kind: DeviceKind) -> Option<&str> {
    let digits_start = name.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let number = &name[digits_start..];
    if number.is_empty() || number.starts_with('0') {
        return None;
    }
    let parent = name[..digits_start].strip_suffix(kind.partition_separator())?;
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

fn sorted_entries(dir: &Path) -> NomaResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Read a decimal sysfs attribute. `Ok(None)` when the file does not exist.
fn read_u64(path: &Path) -> NomaResult<Option<u64>> {
    match fs::read_to_string(path) {
        Ok(raw) => raw.trim().parse::<u64>().map(Some).map_err(|err| {
            NomaError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {err}", path.display()),
            ))
        }),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;

    /// Lay out `/sys/block/<dev>` with a size, sector size, and partitions.
    pub(crate) fn add_device(
        root: &Path,
        name: &str,
        sectors: u64,
        sector_size: u64,
        partitions: &[(&str, u64)],
    ) {
        let dev = root.join(name);
        fs::create_dir_all(dev.join("queue")).unwrap();
        fs::write(dev.join("size"), format!("{sectors}\n")).unwrap();
        fs::write(dev.join("queue/hw_sector_size"), format!("{sector_size}\n")).unwrap();
        for (part, part_sectors) in partitions {
            fs::create_dir_all(dev.join(part)).unwrap();
            fs::write(dev.join(part).join("size"), format!("{part_sectors}\n")).unwrap();
        }
    }
}
