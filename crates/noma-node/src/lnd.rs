//! lnd layout on the important device.

use noma_core::config::NomaConfig;
use noma_core::error::NomaResult;
use noma_core::kv::{set_kv, KvChange};
use noma_core::workflow::{event, WorkflowEvent, WorkflowLevel};
use std::fs;

const BITCOIND_SECTION: &str = "Bitcoind";
const APPLICATION_SECTION: &str = "Application Options";

/// Create the lnd directory and seed `lnd.conf` from the home template.
pub fn create(config: &NomaConfig) -> NomaResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();
    let dir = config.lnd_dir();
    if dir.is_dir() {
        events.push(event(WorkflowLevel::Info, "lnd directory exists"));
    } else {
        fs::create_dir_all(&dir)?;
        events.push(event(
            WorkflowLevel::Success,
            format!("Created lnd directory {}", dir.display()),
        ));
    }

    let conf = config.lnd_conf();
    let template = config.node.lnd_template();
    if conf.is_file() {
        events.push(event(WorkflowLevel::Info, "lnd.conf exists"));
    } else if template.is_file() {
        fs::copy(&template, &conf)?;
        events.push(event(
            WorkflowLevel::Success,
            format!("Copied {} to {}", template.display(), conf.display()),
        ));
    } else {
        events.push(event(
            WorkflowLevel::Warn,
            format!("lnd.conf template {} is missing", template.display()),
        ));
    }
    Ok(events)
}

/// lnd directory and config are both in place.
pub fn check(config: &NomaConfig) -> bool {
    config.lnd_dir().is_dir() && config.lnd_conf().is_file()
}

/// Point lnd at bitcoind's RPC credentials. Does nothing without an lnd.conf.
pub fn set_bitcoind(
    config: &NomaConfig,
    user: &str,
    password: &str,
) -> NomaResult<Option<WorkflowEvent>> {
    let conf = config.lnd_conf();
    if !conf.is_file() {
        log::debug!("{} missing, not setting bitcoind credentials", conf.display());
        return Ok(None);
    }
    set_kv(&conf, Some(BITCOIND_SECTION), "bitcoind.rpcuser", user)?;
    set_kv(&conf, Some(BITCOIND_SECTION), "bitcoind.rpcpass", password)?;
    Ok(Some(event(
        WorkflowLevel::Success,
        "Wrote bitcoind RPC credentials to lnd.conf",
    )))
}

/// Advertise the tor hidden service as lnd's `externalip`.
pub fn setup_tor(config: &NomaConfig) -> NomaResult<WorkflowEvent> {
    let hostname_path = &config.node.tor_hostname_path;
    let hostname = match fs::read_to_string(hostname_path) {
        Ok(contents) => contents.trim().to_string(),
        Err(err) => {
            return Ok(event(
                WorkflowLevel::Warn,
                format!(
                    "No tor hostname at {}: {err}",
                    hostname_path.display()
                ),
            ))
        }
    };
    if hostname.is_empty() {
        return Ok(event(
            WorkflowLevel::Warn,
            format!("{} is empty", hostname_path.display()),
        ));
    }

    let change = set_kv(
        &config.lnd_conf(),
        Some(APPLICATION_SECTION),
        "externalip",
        &hostname,
    )?;
    Ok(match change {
        KvChange::Unchanged => event(
            WorkflowLevel::Info,
            format!("lnd already advertises {hostname}"),
        ),
        _ => event(
            WorkflowLevel::Success,
            format!("lnd externalip set to {hostname}"),
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use noma_core::kv::get_kv;
    use noma_core::ranking::Role;
    use std::path::Path;
    use tempfile::tempdir;

    fn config(root: &Path) -> NomaConfig {
        let mut config = NomaConfig::default();
        config.storage.roles.important = root.join("important");
        config.node.home = root.join("home");
        config.node.tor_hostname_path = root.join("hostname");
        fs::create_dir_all(config.storage.roles.data_dir(Role::Important)).unwrap();
        config
    }

    #[test]
    fn create_copies_template_once() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.node.home.join("lnd")).unwrap();
        fs::write(config.node.lnd_template(), "[Application Options]\n").unwrap();

        create(&config).unwrap();
        assert!(check(&config));

        fs::write(config.lnd_conf(), "edited\n").unwrap();
        create(&config).unwrap();
        assert_eq!(fs::read_to_string(config.lnd_conf()).unwrap(), "edited\n");
    }

    #[test]
    fn create_without_template_warns() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let events = create(&config).unwrap();
        assert!(config.lnd_dir().is_dir());
        assert!(!check(&config));
        assert!(events.iter().any(|e| e.level == WorkflowLevel::Warn));
    }

    #[test]
    fn credentials_land_in_bitcoind_section() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.lnd_dir()).unwrap();
        fs::write(
            config.lnd_conf(),
            "[Application Options]\nalias=box\n\n[Bitcoind]\nbitcoind.rpchost=bitcoind\n",
        )
        .unwrap();

        assert!(set_bitcoind(&config, "lncm", "hunter2").unwrap().is_some());

        let conf = config.lnd_conf();
        assert_eq!(
            get_kv(&conf, Some("Bitcoind"), "bitcoind.rpcuser").unwrap().as_deref(),
            Some("lncm")
        );
        assert_eq!(
            get_kv(&conf, Some("Bitcoind"), "bitcoind.rpcpass").unwrap().as_deref(),
            Some("hunter2")
        );
        assert_eq!(
            get_kv(&conf, Some("Application Options"), "bitcoind.rpcuser").unwrap(),
            None
        );
    }

    #[test]
    fn set_bitcoind_skips_missing_config() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        assert!(set_bitcoind(&config, "lncm", "pw").unwrap().is_none());
        assert!(!config.lnd_conf().exists());
    }

    #[test]
    fn tor_hostname_becomes_externalip() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.lnd_dir()).unwrap();
        fs::write(config.lnd_conf(), "[Application Options]\nalias=box\n").unwrap();
        fs::write(&config.node.tor_hostname_path, "abcdef.onion\n").unwrap();

        let first = setup_tor(&config).unwrap();
        assert_eq!(first.level, WorkflowLevel::Success);
        assert_eq!(
            get_kv(&config.lnd_conf(), Some("Application Options"), "externalip")
                .unwrap()
                .as_deref(),
            Some("abcdef.onion")
        );
        assert_eq!(setup_tor(&config).unwrap().level, WorkflowLevel::Info);
    }

    #[test]
    fn missing_tor_hostname_is_a_warning() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        assert_eq!(setup_tor(&config).unwrap().level, WorkflowLevel::Warn);
    }
}
