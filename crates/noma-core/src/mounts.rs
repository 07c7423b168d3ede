//! Mount table inspection and idempotent mounting.

use crate::error::{NomaError, NomaResult};
use crate::ranking::Role;
use crate::retry::{retry_until, RetryOutcome, RetryPolicy};
use crate::system::{argv, CommandRunner, Tool};
use log::{debug, info, warn};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// One row of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fs_type: String,
}

/// Point-in-time snapshot of the kernel mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    /// Read and parse `path`. A missing file is an empty table.
    pub fn read(path: &Path) -> NomaResult<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(Self::parse(&contents)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("mount table {} not present", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn parse(contents: &str) -> Self {
        let entries = contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let source = fields.next()?;
                let target = fields.next()?;
                let fs_type = fields.next().unwrap_or_default();
                Some(MountEntry {
                    source: unescape_mount_field(source),
                    target: PathBuf::from(unescape_mount_field(target)),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Latest entry whose source is `/dev/<partition>`.
    pub fn find_partition(&self, partition: &str) -> Option<&MountEntry> {
        let devnode = dev_node(partition);
        self.entries.iter().rev().find(|entry| entry.source == devnode)
    }

    /// Entry for `/dev/<partition>` attached at exactly `target`.
    pub fn find_mount(&self, partition: &str, target: &Path) -> Option<&MountEntry> {
        let devnode = dev_node(partition);
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.source == devnode && entry.target == target)
    }
}

fn dev_node(partition: &str) -> String {
    format!("/dev/{partition}")
}

/// Decode the octal escapes (`\040` for space) the kernel uses in mount fields.
fn unescape_mount_field(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'\\' && idx + 3 < bytes.len() {
            let oct = &bytes[idx + 1..idx + 4];
            if oct.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = oct
                    .iter()
                    .fold(0u16, |acc, b| acc * 8 + u16::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    output.push(byte);
                    idx += 4;
                    continue;
                }
            }
        }
        output.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&output).into_owned()
}

/// Where a role's partition ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountStatus {
    Unmounted,
    MountedPreferred,
    MountedFallback,
}

impl MountStatus {
    pub fn is_mounted(self) -> bool {
        !matches!(self, MountStatus::Unmounted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub role: Role,
    pub path: PathBuf,
    pub partition: String,
    pub status: MountStatus,
}

/// Result of [`MountManager::ensure_mounted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOutcome {
    pub mounted: bool,
    pub used_fallback: bool,
    /// No mount command was needed.
    pub already_mounted: bool,
}

impl MountOutcome {
    pub fn status(&self) -> MountStatus {
        match (self.mounted, self.used_fallback) {
            (false, _) => MountStatus::Unmounted,
            (true, false) => MountStatus::MountedPreferred,
            (true, true) => MountStatus::MountedFallback,
        }
    }
}

/// Mounts partitions and confirms every transition against a fresh read of
/// the mount table rather than trusting exit codes.
pub struct MountManager<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
    mounts_path: PathBuf,
    preferred_fs: String,
}

impl<'a, R: CommandRunner + ?Sized> MountManager<'a, R> {
    pub fn new(runner: &'a R, mounts_path: impl Into<PathBuf>, preferred_fs: impl Into<String>) -> Self {
        Self {
            runner,
            mounts_path: mounts_path.into(),
            preferred_fs: preferred_fs.into(),
        }
    }

    pub fn runner(&self) -> &'a R {
        self.runner
    }

    pub fn preferred_fs(&self) -> &str {
        &self.preferred_fs
    }

    pub fn snapshot(&self) -> NomaResult<MountTable> {
        MountTable::read(&self.mounts_path)
    }

    pub fn is_mounted(&self, partition: &str) -> NomaResult<bool> {
        Ok(self.snapshot()?.find_partition(partition).is_some())
    }

    pub fn is_mounted_at(&self, partition: &str, target: &Path) -> NomaResult<bool> {
        Ok(self.snapshot()?.find_mount(partition, target).is_some())
    }

    /// Filesystem type the mount table reports for `partition`, if mounted.
    pub fn mounted_fs_type(&self, partition: &str) -> NomaResult<Option<String>> {
        Ok(self
            .snapshot()?
            .find_partition(partition)
            .map(|entry| entry.fs_type.clone())
            .filter(|fs| !fs.is_empty()))
    }

    /// Mount `partition` on `target` with the preferred filesystem, falling
    /// back to auto-detection once. A partition attached somewhere else is
    /// unmounted first. Fails with [`NomaError::MountFailed`].
    pub fn ensure_mounted(&self, partition: &str, target: &Path) -> NomaResult<MountOutcome> {
        let table = self.snapshot()?;
        if table.find_mount(partition, target).is_some() {
            debug!("{partition} already mounted on {}, skipping mount", target.display());
            return Ok(MountOutcome {
                mounted: true,
                used_fallback: false,
                already_mounted: true,
            });
        }
        if let Some(stray) = table.find_partition(partition) {
            warn!(
                "{partition} is mounted on {} instead of {}; unmounting it",
                stray.target.display(),
                target.display()
            );
            self.unmount(partition, false)?;
            if self.is_mounted(partition)? {
                return Err(NomaError::MountFailed {
                    partition: partition.to_string(),
                    target: target.to_path_buf(),
                });
            }
        }

        let devnode = dev_node(partition);
        let preferred = argv([
            OsString::from("-t"),
            OsString::from(&self.preferred_fs),
            OsString::from(&devnode),
            target.as_os_str().to_os_string(),
        ]);
        self.attempt(&preferred, partition);
        if self.is_mounted_at(partition, target)? {
            info!(
                "mounted {devnode} on {} as {}",
                target.display(),
                self.preferred_fs
            );
            return Ok(MountOutcome {
                mounted: true,
                used_fallback: false,
                already_mounted: false,
            });
        }

        warn!(
            "{devnode} did not mount as {}; retrying with filesystem auto-detection",
            self.preferred_fs
        );
        let fallback = argv([OsString::from(&devnode), target.as_os_str().to_os_string()]);
        self.attempt(&fallback, partition);
        if self.is_mounted_at(partition, target)? {
            info!("mounted {devnode} on {} (auto-detected fs)", target.display());
            return Ok(MountOutcome {
                mounted: true,
                used_fallback: true,
                already_mounted: false,
            });
        }

        Err(NomaError::MountFailed {
            partition: partition.to_string(),
            target: target.to_path_buf(),
        })
    }

    /// Issue one `umount`, forced when `force` is set. Success is judged by
    /// the caller through [`MountManager::wait_until_unmounted`].
    pub fn unmount(&self, partition: &str, force: bool) -> NomaResult<()> {
        let devnode = dev_node(partition);
        let args = if force {
            argv(["-f", devnode.as_str()])
        } else {
            argv([devnode.as_str()])
        };
        let output = self.runner.run(Tool::Umount, &args)?;
        if !output.success() {
            debug!("umount {devnode} reported: {}", output.diagnostic());
        }
        Ok(())
    }

    /// Poll the mount table until `partition` disappears from it.
    pub fn wait_until_unmounted(&self, partition: &str, policy: RetryPolicy) -> RetryOutcome {
        retry_until(policy, || match self.is_mounted(partition) {
            Ok(mounted) => !mounted,
            Err(err) => {
                warn!("unable to read mount table: {err}");
                false
            }
        })
    }

    fn attempt(&self, args: &[OsString], partition: &str) {
        match self.runner.run(Tool::Mount, args) {
            Ok(output) if !output.success() => {
                debug!("mount of {partition} reported: {}", output.diagnostic());
            }
            Ok(_) => {}
            Err(err) => warn!("mount of {partition} could not run: {err}"),
        }
    }
}
