//! First-boot installation and on-disk layout checks.

use super::{event, provision_storage_into, WorkflowEvent, WorkflowLevel, WorkflowReport};
use crate::config::NomaConfig;
use crate::error::NomaResult;
use crate::ranking::Role;
use crate::services::NodeServices;
use crate::system::{argv, copy_tree, CommandRunner, Tool};
use std::fs;
use std::io;

/// Knobs for [`install_box`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Run even when the installed marker exists.
    pub force: bool,
}

/// Contents of the installed marker, or `None` when the box was never installed.
pub fn check_installed(config: &NomaConfig) -> NomaResult<Option<String>> {
    let marker = &config.node.installed_marker;
    match fs::read_to_string(marker) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) if marker.is_dir() => {
            log::debug!("{} is a directory: {err}", marker.display());
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Full first-boot installation. USB provisioning failures abort; every other
/// step only warns.
pub fn install_box<R, S>(
    config: &NomaConfig,
    runner: &R,
    services: &S,
    options: InstallOptions,
) -> NomaResult<WorkflowReport>
where
    R: CommandRunner + ?Sized,
    S: NodeServices + ?Sized,
{
    let mut events = Vec::new();
    let title = if install_box_into(config, runner, services, options, &mut events)? {
        "Installed node"
    } else {
        "Install skipped"
    };
    Ok(WorkflowReport {
        title: title.to_string(),
        events,
    })
}

/// [`install_box`] recording into `events`, which keeps everything that
/// happened before a fatal error. Returns `false` when the installed marker
/// stopped the run.
pub fn install_box_into<R, S>(
    config: &NomaConfig,
    runner: &R,
    services: &S,
    options: InstallOptions,
    events: &mut Vec<WorkflowEvent>,
) -> NomaResult<bool>
where
    R: CommandRunner + ?Sized,
    S: NodeServices + ?Sized,
{
    if let Some(contents) = check_installed(config)? {
        events.push(event(
            WorkflowLevel::Info,
            format!(
                "Box installation detected ({})",
                config.node.installed_marker.display()
            ),
        ));
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            events.push(event(WorkflowLevel::Info, line.to_string()));
        }
        if !options.force {
            events.push(event(
                WorkflowLevel::Warn,
                "Skipping installation; pass --force to run it again",
            ));
            return Ok(false);
        }
    }

    step(events, "Move apk cache to persistent storage", || {
        move_cache(config, runner)
    });

    let packages: [(&str, &[&str]); 4] = [
        ("Update package repository", &["update"]),
        ("Install raspberry-pi firmware", &["add", "raspberrypi"]),
        (
            "Install dependencies",
            &["add", "curl", "jq", "autossh", "axel"],
        ),
        ("Install docker-compose and tor", &["add", "docker-compose", "tor"]),
    ];
    for (label, args) in packages {
        step(events, label, || {
            runner.run_checked(Tool::Apk, &argv(args.iter().copied()))?;
            Ok(())
        });
    }

    step(events, "Enable docker-compose at boot", || {
        runner.run_checked(Tool::RcUpdate, &argv(["add", "docker-compose", "default"]))?;
        Ok(())
    });
    step(events, "Start tor", || {
        runner.run_checked(Tool::RcService, &argv(["tor", "start"]))?;
        runner.run_checked(Tool::RcUpdate, &argv(["add", "tor", "default"]))?;
        Ok(())
    });

    events.push(event(WorkflowLevel::Info, "Starting usb-setup"));
    provision_storage_into(config, runner, services, events)?;

    check_wallet_dir(config, events);

    let important = config.storage.roles.data_dir(Role::Important);
    if important.is_dir() {
        step(
            events,
            "Backup system state (apkovl) to important usb device",
            || {
                runner.run_checked(
                    Tool::Lbu,
                    &argv([
                        "pkg".into(),
                        "-v".into(),
                        important.clone().into_os_string(),
                    ]),
                )?;
                Ok(())
            },
        );
    }

    step(events, "Remove lncm-post from default runlevel", || {
        runner.run_checked(Tool::RcUpdate, &argv(["del", "lncm-post", "default"]))?;
        Ok(())
    });

    Ok(true)
}

/// Report which role directories and daemon config files exist.
pub fn check_storage(config: &NomaConfig) -> WorkflowReport {
    let mut events = Vec::new();

    for role in Role::ALL {
        let dir = config.storage.roles.data_dir(role);
        events.push(if dir.is_dir() {
            event(
                WorkflowLevel::Success,
                format!("{role} usb device exists ({})", dir.display()),
            )
        } else {
            event(
                WorkflowLevel::Error,
                format!("{role} usb device is missing ({})", dir.display()),
            )
        });
    }

    for (name, dir, conf) in [
        ("bitcoind", config.bitcoin_dir(), config.bitcoin_conf()),
        ("lnd", config.lnd_dir(), config.lnd_conf()),
    ] {
        events.push(presence(&format!("{name} directory"), dir.is_dir()));
        events.push(presence(
            &format!(
                "{name} {}",
                conf.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ),
            conf.is_file(),
        ));
    }

    WorkflowReport {
        title: "Storage check".to_string(),
        events,
    }
}

fn presence(what: &str, exists: bool) -> WorkflowEvent {
    if exists {
        event(WorkflowLevel::Success, format!("{what} exists"))
    } else {
        event(WorkflowLevel::Warn, format!("{what} missing"))
    }
}

fn step<F>(events: &mut Vec<WorkflowEvent>, label: &str, action: F)
where
    F: FnOnce() -> NomaResult<()>,
{
    match action() {
        Ok(()) => events.push(event(WorkflowLevel::Success, label)),
        Err(err) => events.push(event(WorkflowLevel::Warn, format!("{label}: {err}"))),
    }
}

fn move_cache<R: CommandRunner + ?Sized>(config: &NomaConfig, runner: &R) -> NomaResult<()> {
    let cache = &config.node.sd_cache;
    if !cache.is_dir() {
        log::debug!("no apk cache at {}", cache.display());
        return Ok(());
    }
    let target = &config.node.apk_cache;
    match fs::remove_dir_all(target) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    copy_tree(cache, target)?;
    runner.run_checked(
        Tool::SetupApkcache,
        &argv([target.clone().into_os_string()]),
    )?;
    Ok(())
}

fn check_wallet_dir(config: &NomaConfig, events: &mut Vec<WorkflowEvent>) {
    let lnd_dir = config.lnd_dir();
    let chain = lnd_dir.join("data").join("chain");
    if !lnd_dir.is_dir() {
        events.push(event(
            WorkflowLevel::Warn,
            format!("lnd directory {} does not exist", lnd_dir.display()),
        ));
    } else if chain.is_dir() {
        events.push(event(
            WorkflowLevel::Warn,
            format!(
                "Wallet already exists; back up and move {} before creating a new one",
                chain.display()
            ),
        ));
    } else {
        events.push(event(
            WorkflowLevel::Info,
            "No lnd wallet yet; create one once lnd is running",
        ));
    }
}
