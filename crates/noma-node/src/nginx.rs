//! nginx directories on the USB devices.

use noma_core::config::NomaConfig;
use noma_core::error::NomaResult;
use noma_core::ranking::Role;
use noma_core::system::copy_tree;
use noma_core::workflow::{event, WorkflowEvent, WorkflowLevel};
use std::fs;

/// Cache and log space on volatile, config copied once onto important.
pub fn setup(config: &NomaConfig) -> NomaResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();
    let volatile = config.storage.roles.data_dir(Role::Volatile).join("nginx");
    if volatile.is_dir() {
        events.push(event(WorkflowLevel::Info, "nginx volatile directory exists"));
    } else {
        fs::create_dir_all(&volatile)?;
        events.push(event(
            WorkflowLevel::Success,
            format!("Created {}", volatile.display()),
        ));
    }

    let important = config.storage.roles.data_dir(Role::Important).join("nginx");
    let source = &config.node.nginx_source;
    if important.is_dir() {
        events.push(event(WorkflowLevel::Info, "nginx important directory exists"));
    } else if source.is_dir() {
        copy_tree(source, &important)?;
        events.push(event(
            WorkflowLevel::Success,
            format!("Copied {} to {}", source.display(), important.display()),
        ));
    } else {
        events.push(event(
            WorkflowLevel::Warn,
            format!("No nginx config at {}", source.display()),
        ));
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn seeds_both_directories_and_keeps_existing_config() {
        let dir = tempdir().unwrap();
        let mut config = NomaConfig::default();
        config.storage.roles.volatile = dir.path().join("volatile");
        config.storage.roles.important = dir.path().join("important");
        config.node.nginx_source = dir.path().join("etc-nginx");
        fs::create_dir_all(config.node.nginx_source.join("conf.d")).unwrap();
        fs::write(config.node.nginx_source.join("conf.d/node.conf"), "server {}").unwrap();

        setup(&config).unwrap();

        let copied = dir.path().join("important/important/nginx/conf.d/node.conf");
        assert_eq!(fs::read_to_string(&copied).unwrap(), "server {}");
        assert!(dir.path().join("volatile/volatile/nginx").is_dir());

        fs::write(&copied, "edited").unwrap();
        setup(&config).unwrap();
        assert_eq!(fs::read_to_string(&copied).unwrap(), "edited");
    }

    #[test]
    fn missing_source_only_warns() {
        let dir = tempdir().unwrap();
        let mut config = NomaConfig::default();
        config.storage.roles.volatile = dir.path().join("volatile");
        config.storage.roles.important = dir.path().join("important");
        config.node.nginx_source = dir.path().join("absent");

        let events = setup(&config).unwrap();
        assert!(events.iter().any(|e| e.level == WorkflowLevel::Warn));
        assert!(!dir.path().join("important/important/nginx").exists());
    }
}
