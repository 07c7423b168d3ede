//! Swap file on the volatile device.

use noma_core::config::NomaConfig;
use noma_core::error::NomaResult;
use noma_core::fstab::{FstabEntry, PersistentMountTable};
use noma_core::ranking::Role;
use noma_core::system::{argv, CommandRunner, Tool};
use noma_core::workflow::{event, WorkflowEvent, WorkflowLevel};
use std::ffi::OsString;
use std::path::PathBuf;

pub fn swap_file(config: &NomaConfig) -> PathBuf {
    config.storage.roles.data_dir(Role::Volatile).join("swap")
}

/// Create and activate the swap file, list it in the mount table, and enable
/// the swap service. An existing swap file is left alone.
pub fn create<R: CommandRunner + ?Sized>(
    config: &NomaConfig,
    runner: &R,
) -> NomaResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();
    let file = swap_file(config);

    if file.is_file() {
        events.push(event(
            WorkflowLevel::Info,
            format!("Swap file {} exists", file.display()),
        ));
    } else {
        let mut of = OsString::from("of=");
        of.push(file.as_os_str());
        runner.run_checked(
            Tool::Dd,
            &argv([
                OsString::from("if=/dev/zero"),
                of,
                OsString::from("bs=1M"),
                OsString::from(format!("count={}", config.swap.size_mib)),
            ]),
        )?;
        runner.run_checked(Tool::Mkswap, &argv([file.clone().into_os_string()]))?;
        runner.run_checked(
            Tool::Swapon,
            &argv([
                OsString::from("-p"),
                OsString::from(config.swap.priority.to_string()),
                file.clone().into_os_string(),
            ]),
        )?;
        events.push(event(
            WorkflowLevel::Success,
            format!(
                "Created {} MiB swap at {}",
                config.swap.size_mib,
                file.display()
            ),
        ));
    }

    let fstab = PersistentMountTable::new(config.storage.fstab_path.clone());
    if fstab.append_unique(&FstabEntry::swap(&file, config.swap.priority))? {
        events.push(event(
            WorkflowLevel::Success,
            format!("Added swap to {}", fstab.path().display()),
        ));
    }

    for runlevel in ["boot", "default"] {
        runner.run_checked(Tool::RcUpdate, &argv(["add", "swap", runlevel]))?;
    }
    events.push(event(WorkflowLevel::Success, "Enabled swap at boot"));
    Ok(events)
}
