//! Operator-requested wipe of a mounted role device.
//!
//! An operator asks for a fresh filesystem by dropping the sentinel file (or
//! directory) at the root of the mounted device. Nothing else ever formats.

use crate::error::{NomaError, NomaResult};
use crate::mounts::{MountManager, MountOutcome};
use crate::retry::RetryPolicy;
use crate::system::{argv, CommandRunner, Tool};
use crate::workflow::{event, WorkflowEvent, WorkflowLevel};
use log::warn;
use std::path::Path;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// No sentinel; the device was left alone.
    Untouched,
    /// Unmounted, formatted as ext4, and mounted again as described.
    Reformatted(MountOutcome),
}

#[derive(Debug, Clone)]
pub struct DestructionGuard {
    sentinel: String,
    grace: Duration,
    settle: RetryPolicy,
}

impl DestructionGuard {
    pub fn new(sentinel: impl Into<String>, grace: Duration, settle: RetryPolicy) -> Self {
        Self {
            sentinel: sentinel.into(),
            grace,
            settle,
        }
    }

    pub fn sentinel_present(&self, target: &Path) -> bool {
        target.join(&self.sentinel).symlink_metadata().is_ok()
    }

    /// Scan `target` for the sentinel and, when present, unmount, format, and
    /// remount `partition`. Every transition is recorded in `events`.
    pub fn check_and_destroy<R: CommandRunner + ?Sized>(
        &self,
        mounts: &MountManager<'_, R>,
        partition: &str,
        target: &Path,
        events: &mut Vec<WorkflowEvent>,
    ) -> NomaResult<GuardOutcome> {
        if !self.sentinel_present(target) {
            return Ok(GuardOutcome::Untouched);
        }

        events.push(event(
            WorkflowLevel::Security,
            format!(
                "Found {} on {}: ALL DATA ON /dev/{partition} WILL BE DESTROYED in {}s",
                self.sentinel,
                target.display(),
                self.grace.as_secs()
            ),
        ));
        if !self.grace.is_zero() {
            thread::sleep(self.grace);
        }

        self.unmount(mounts, partition, events)?;

        let devnode = format!("/dev/{partition}");
        let output = mounts
            .runner()
            .run(Tool::MkfsExt4, &argv(["-F", devnode.as_str()]))
            .map_err(|err| NomaError::FormatFailed {
                device: partition.to_string(),
                reason: err.to_string(),
            })?;
        if !output.success() {
            return Err(NomaError::FormatFailed {
                device: partition.to_string(),
                reason: output.diagnostic(),
            });
        }
        events.push(event(
            WorkflowLevel::Security,
            format!("Formatted {devnode} as ext4"),
        ));

        let outcome = mounts.ensure_mounted(partition, target)?;
        events.push(event(
            WorkflowLevel::Success,
            format!(
                "Remounted {devnode} on {}{}",
                target.display(),
                if outcome.used_fallback {
                    " (auto-detected fs)"
                } else {
                    ""
                }
            ),
        ));
        Ok(GuardOutcome::Reformatted(outcome))
    }

    fn unmount<R: CommandRunner + ?Sized>(
        &self,
        mounts: &MountManager<'_, R>,
        partition: &str,
        events: &mut Vec<WorkflowEvent>,
    ) -> NomaResult<()> {
        mounts.unmount(partition, false)?;
        if mounts
            .wait_until_unmounted(partition, self.settle)
            .is_satisfied()
        {
            events.push(event(
                WorkflowLevel::Info,
                format!("Unmounted /dev/{partition}"),
            ));
            return Ok(());
        }

        warn!("/dev/{partition} still mounted; forcing unmount");
        events.push(event(
            WorkflowLevel::Warn,
            format!("/dev/{partition} still mounted, forcing unmount"),
        ));
        mounts.unmount(partition, true)?;
        if mounts
            .wait_until_unmounted(partition, self.settle)
            .is_satisfied()
        {
            events.push(event(
                WorkflowLevel::Info,
                format!("Force-unmounted /dev/{partition}"),
            ));
            return Ok(());
        }

        Err(NomaError::UnmountFailed {
            device: partition.to_string(),
        })
    }
}
