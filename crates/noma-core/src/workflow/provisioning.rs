//! USB storage bring-up: rank, mount, guard, persist, then hand off to the
//! node services.

use super::{event, WorkflowEvent, WorkflowLevel, WorkflowReport};
use crate::config::NomaConfig;
use crate::error::{NomaError, NomaResult};
use crate::fstab::{FstabEntry, PersistentMountTable};
use crate::guard::{DestructionGuard, GuardOutcome};
use crate::inventory::{DeviceInventory, DeviceKind};
use crate::mounts::{MountManager, MountPoint};
use crate::ranking::{PartitionRanker, Role};
use crate::retry::RetryPolicy;
use crate::services::NodeServices;
use crate::system::CommandRunner;
use std::fs;
use std::path::Path;

/// Order the node services are invoked in once every role is mounted.
/// bitcoind is configured on `important` before `archive` fast-syncs into it.
pub const COLLABORATOR_ORDER: [Role; 3] = [Role::Volatile, Role::Important, Role::Archive];

/// Result of a successful storage bring-up.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub report: WorkflowReport,
    pub mount_points: Vec<MountPoint>,
}

impl Provisioned {
    pub fn mount_point(&self, role: Role) -> Option<&MountPoint> {
        self.mount_points.iter().find(|mp| mp.role == role)
    }
}

/// Bring up the three role devices and run the node services on top.
///
/// Errors are the fatal storage failures: too few partitions, a mount that
/// would not attach, or a failed wipe. Service failures become `Error` events.
pub fn provision_storage<R, S>(
    config: &NomaConfig,
    runner: &R,
    services: &S,
) -> NomaResult<Provisioned>
where
    R: CommandRunner + ?Sized,
    S: NodeServices + ?Sized,
{
    let mut events = Vec::new();
    let mount_points = provision_storage_into(config, runner, services, &mut events)?;
    Ok(Provisioned {
        report: WorkflowReport {
            title: "Provisioned USB storage".to_string(),
            events,
        },
        mount_points,
    })
}

/// [`provision_storage`] recording into `events`, which keeps everything
/// that happened before a fatal error.
pub fn provision_storage_into<R, S>(
    config: &NomaConfig,
    runner: &R,
    services: &S,
    events: &mut Vec<WorkflowEvent>,
) -> NomaResult<Vec<MountPoint>>
where
    R: CommandRunner + ?Sized,
    S: NodeServices + ?Sized,
{
    let inventory = DeviceInventory::from_config(config)?;
    let partitions = inventory.list_partitions(DeviceKind::Usb)?;
    for partition in &partitions {
        events.push(event(
            WorkflowLevel::Info,
            format!(
                "Found USB partition {} ({} bytes)",
                partition.name, partition.size_bytes
            ),
        ));
    }

    let ranker = PartitionRanker::rank(partitions);
    let assignment = config.storage.policy.assign(&ranker)?;
    for role in Role::ALL {
        events.push(event(
            WorkflowLevel::Info,
            format!(
                "Using {} as {role} storage",
                assignment.partition(role).name
            ),
        ));
    }

    let mounts = MountManager::new(
        runner,
        config.mounts_path(),
        config.storage.preferred_fs.clone(),
    );
    let guard = DestructionGuard::new(
        config.destruction.sentinel.clone(),
        config.grace_period(),
        RetryPolicy::new(config.storage.settle_attempts, config.settle_interval()),
    );
    let fstab = PersistentMountTable::new(config.storage.fstab_path.clone());

    let mut mount_points = Vec::new();
    for (role, partition) in assignment.iter_in(&config.storage.roles.order) {
        let target = config.storage.roles.mountpoint(role);
        fs::create_dir_all(target)?;

        let outcome = mounts.ensure_mounted(&partition.name, target)?;
        events.push(event(
            WorkflowLevel::Success,
            match (outcome.already_mounted, outcome.used_fallback) {
                (true, _) => format!(
                    "{} already mounted at {}",
                    partition.name,
                    target.display()
                ),
                (false, false) => format!(
                    "Mounted {} at {} ({})",
                    partition.name,
                    target.display(),
                    config.storage.preferred_fs
                ),
                (false, true) => format!(
                    "Mounted {} at {} with auto-detected filesystem",
                    partition.name,
                    target.display()
                ),
            },
        ));

        let mut status = outcome.status();
        let guarded = guard.check_and_destroy(&mounts, &partition.name, target, events)?;
        let reformatted = match guarded {
            GuardOutcome::Reformatted(remount) => {
                events.push(event(
                    WorkflowLevel::Security,
                    format!("{} wiped and reformatted for {role}", partition.name),
                ));
                status = remount.status();
                true
            }
            GuardOutcome::Untouched => false,
        };

        let data_dir = config.storage.roles.data_dir(role);
        fs::create_dir_all(&data_dir)?;

        persist(
            config,
            &inventory,
            &mounts,
            &fstab,
            &partition.name,
            target,
            reformatted,
            events,
        );

        mount_points.push(MountPoint {
            role,
            path: target.to_path_buf(),
            partition: partition.name.clone(),
            status,
        });
    }

    run_services(config, services, events);

    Ok(mount_points)
}

fn persist<R: CommandRunner + ?Sized>(
    config: &NomaConfig,
    inventory: &DeviceInventory,
    mounts: &MountManager<'_, R>,
    fstab: &PersistentMountTable,
    partition: &str,
    target: &Path,
    reformatted: bool,
    events: &mut Vec<WorkflowEvent>,
) {
    let result = (|| {
        let uuid = inventory.uuid_of(mounts.runner(), partition)?;
        let fs_type = mounts
            .mounted_fs_type(partition)?
            .unwrap_or_else(|| config.storage.preferred_fs.clone());
        let entry = FstabEntry::by_uuid(&uuid, target, &fs_type, &config.storage.fstab_options);
        // mkfs gave the device a new UUID; the old line would shadow this mount.
        if reformatted {
            for stale in fstab.remove_stale_for_target(&entry)? {
                events.push(event(
                    WorkflowLevel::Info,
                    format!("Dropped `{stale}` from {}", fstab.path().display()),
                ));
            }
        }
        let written = fstab.append_unique(&entry)?;
        Ok::<_, NomaError>((entry, written))
    })();

    match result {
        Ok((entry, true)) => events.push(event(
            WorkflowLevel::Success,
            format!("Added `{entry}` to {}", fstab.path().display()),
        )),
        Ok((entry, false)) => events.push(event(
            WorkflowLevel::Info,
            format!("{} already lists {}", fstab.path().display(), entry.spec),
        )),
        Err(err) => events.push(event(
            WorkflowLevel::Warn,
            format!(
                "{partition} will not be added to {}: {err}",
                fstab.path().display()
            ),
        )),
    }
}

fn run_services<S: NodeServices + ?Sized>(
    config: &NomaConfig,
    services: &S,
    events: &mut Vec<WorkflowEvent>,
) {
    for role in COLLABORATOR_ORDER {
        let path = config.storage.roles.mountpoint(role);
        match services.on_role_mounted(role, path) {
            Ok(mut extra) => events.append(&mut extra),
            Err(err) => events.push(event(
                WorkflowLevel::Error,
                format!("{role} setup failed: {err}"),
            )),
        }
    }

    match services.on_all_roles_mounted() {
        Ok(mut extra) => events.append(&mut extra),
        Err(err) => events.push(event(
            WorkflowLevel::Error,
            format!("post-storage setup failed: {err}"),
        )),
    }
}
