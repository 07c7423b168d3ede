//! noma command-line interface for USB storage setup and node management.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use noma_core::{
    config::{NomaConfig, CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH},
    kv::{get_kv, set_kv, KvChange},
    logging,
    system::{ensure_root, SystemRunner},
    error::NomaResult,
    workflow::{self, InstallOptions, WorkflowEvent, WorkflowLevel, WorkflowReport},
    DeviceInventory, DeviceKind, PartitionRanker, Role,
};
use log::warn;
use noma_node::{compose, SystemNodeServices};
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};

fn load_cli_config(path: &Path) -> Result<NomaConfig> {
    let config = NomaConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    if config.path != path {
        println!(
            "Using bootstrap configuration at {} (set {CONFIG_PATH_ENV} to replace).",
            config.path.display()
        );
    }

    Ok(config)
}

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "noma",
    version,
    about = "Node management for bitcoind and lnd appliances with USB storage."
)]
struct Cli {
    /// Path to the noma configuration file.
    #[arg(short, long, env = CONFIG_PATH_ENV, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mount the three USB devices by size and persist them in fstab.
    UsbSetup,

    /// Run the first-boot installation.
    InstallBox {
        /// Install again even when the installed marker exists.
        #[arg(long)]
        force: bool,
    },

    /// Report which USB role directories and daemon files exist.
    Check,

    /// List USB and SD devices and the role each USB partition would get.
    Devices,

    /// Read or edit key=value config files such as bitcoin.conf and lnd.conf.
    Kv {
        #[command(subcommand)]
        command: KvCommands,
    },

    /// Start the docker-compose stack.
    Start,

    /// Stop bitcoind and lnd, waiting for a clean shutdown.
    Stop,

    /// Follow a daemon's container logs.
    Logs {
        #[arg(value_enum, default_value = "bitcoind")]
        node: Node,
    },

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Path to the configuration file to validate.
        #[arg(short = 'f', long, default_value = DEFAULT_CONFIG_PATH)]
        file: PathBuf,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

#[derive(Subcommand, Debug)]
enum KvCommands {
    /// Print the value of a key.
    Get {
        path: PathBuf,
        key: String,

        /// `[Section]` the key lives in; omit for top-level keys.
        #[arg(long)]
        section: Option<String>,
    },

    /// Set a key, keeping a .bak copy of the previous file.
    Set {
        path: PathBuf,
        key: String,
        value: String,

        #[arg(long)]
        section: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Node {
    Bitcoind,
    Lnd,
}

impl Node {
    fn as_str(self) -> &'static str {
        match self {
            Node::Bitcoind => "bitcoind",
            Node::Lnd => "lnd",
        }
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    });
    let config_path = cli.config.clone();
    let runner = SystemRunner;

    match cli.command {
        Commands::UsbSetup => {
            ensure_root()?;
            let config = load_cli_config(&config_path)?;
            let services = SystemNodeServices::new(&config, &runner);
            let mut events = Vec::new();
            let result =
                workflow::provision_storage_into(&config, &runner, &services, &mut events);
            let report = finish_report("USB storage setup", events, result)?;
            if report.has_errors() {
                warn!("storage is mounted but some node services failed");
            }
        }
        Commands::InstallBox { force } => {
            ensure_root()?;
            let config = load_cli_config(&config_path)?;
            let services = SystemNodeServices::new(&config, &runner);
            let mut events = Vec::new();
            let result = workflow::install_box_into(
                &config,
                &runner,
                &services,
                InstallOptions { force },
                &mut events,
            );
            let title = match &result {
                Ok(true) => "Installed node",
                Ok(false) => "Install skipped",
                Err(_) => "Install",
            };
            finish_report(title, events, result)?;
        }
        Commands::Check => {
            let config = load_cli_config(&config_path)?;
            let report = workflow::check_storage(&config);
            let failed = report.has_errors();
            print_report(&report);
            if failed {
                bail!("USB storage is incomplete");
            }
        }
        Commands::Devices => {
            let config = load_cli_config(&config_path)?;
            print_devices(&config)?;
        }
        Commands::Kv { command } => run_kv(command)?,
        Commands::Start => {
            ensure_root()?;
            let config = load_cli_config(&config_path)?;
            let done = compose::start(&config, &runner)?;
            println!("{}", done.message);
        }
        Commands::Stop => {
            ensure_root()?;
            let config = load_cli_config(&config_path)?;
            let report = compose::stop_daemons(&config, &runner)?;
            let failed = report.has_errors();
            print_report(&report);
            if failed {
                bail!("daemons did not stop");
            }
        }
        Commands::Logs { node } => {
            compose::logs(&runner, node.as_str())?;
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(NomaConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let cfg = NomaConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;
            println!(
                "Configuration valid ({} fs preferred, roles mounted at {}, {}, {}).",
                cfg.storage.preferred_fs,
                cfg.storage.roles.mountpoint(Role::Archive).display(),
                cfg.storage.roles.mountpoint(Role::Volatile).display(),
                cfg.storage.roles.mountpoint(Role::Important).display(),
            );
        }
    }

    Ok(())
}

fn run_kv(command: KvCommands) -> Result<()> {
    match command {
        KvCommands::Get { path, key, section } => {
            match get_kv(&path, section.as_deref(), &key)
                .with_context(|| format!("failed to read {}", path.display()))?
            {
                Some(value) => println!("{value}"),
                None => bail!("{key} is not set in {}", path.display()),
            }
        }
        KvCommands::Set {
            path,
            key,
            value,
            section,
        } => {
            let change = set_kv(&path, section.as_deref(), &key, &value)
                .with_context(|| format!("failed to update {}", path.display()))?;
            match change {
                KvChange::Unchanged => println!("{key} already set to {value}"),
                KvChange::Updated => println!("Updated {key}={value} in {}", path.display()),
                KvChange::Appended => println!("Added {key}={value} to {}", path.display()),
            }
        }
    }
    Ok(())
}

fn print_devices(config: &NomaConfig) -> Result<()> {
    let inventory = DeviceInventory::from_config(config)?;

    for kind in [DeviceKind::Usb, DeviceKind::Sd] {
        let devices = inventory.list_devices(kind)?;
        println!("{} devices:", kind.as_str().to_uppercase());
        if devices.is_empty() {
            println!("  (none)");
        }
        for device in devices {
            println!("  {:<10} {:>16} bytes", device.name, device.size_bytes);
        }
        for partition in inventory.list_partitions(kind)? {
            println!(
                "    {:<10} {:>16} bytes",
                partition.name, partition.size_bytes
            );
        }
    }

    let ranker = PartitionRanker::rank(inventory.list_partitions(DeviceKind::Usb)?);
    println!("USB partitions by size:");
    match config.storage.policy.assign(&ranker) {
        Ok(assignment) => {
            for role in config.storage.roles.order.iter().copied() {
                let partition = assignment.partition(role);
                println!(
                    "  {:<10} -> {:<9} ({})",
                    partition.name,
                    role,
                    config.storage.roles.mountpoint(role).display()
                );
            }
        }
        Err(err) => {
            for partition in ranker.ranked() {
                println!("  {:<10} {:>16} bytes", partition.name, partition.size_bytes);
            }
            println!("  roles not assignable: {err}");
        }
    }
    Ok(())
}

/// Pretty-print a workflow report so humans can follow along.
fn print_report(report: &WorkflowReport) {
    println!("{}", report.title);
    for event in &report.events {
        println!("  [{}] {}", level_tag(event.level), event.message);
    }
}

/// Print what a workflow recorded, including the steps before a fatal
/// error, then surface the error.
fn finish_report<T>(
    title: &str,
    events: Vec<WorkflowEvent>,
    result: NomaResult<T>,
) -> Result<WorkflowReport> {
    let report = WorkflowReport {
        title: match &result {
            Ok(_) => title.to_string(),
            Err(_) => format!("{title}: stopped"),
        },
        events,
    };
    print_report(&report);
    result?;
    Ok(report)
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_table_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_kv_set_with_section() {
        let cli = Cli::try_parse_from([
            "noma",
            "kv",
            "set",
            "/tmp/lnd.conf",
            "externalip",
            "x.onion",
            "--section",
            "Application Options",
        ])
        .unwrap();
        match cli.command {
            Commands::Kv {
                command: KvCommands::Set { key, section, .. },
            } => {
                assert_eq!(key, "externalip");
                assert_eq!(section.as_deref(), Some("Application Options"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn install_box_force_and_logs_default() {
        let cli = Cli::try_parse_from(["noma", "install-box", "--force"]).unwrap();
        assert!(matches!(cli.command, Commands::InstallBox { force: true }));

        let cli = Cli::try_parse_from(["noma", "-vv", "logs"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Logs { node: Node::Bitcoind }));
    }

    #[test]
    fn fatal_error_still_reports_earlier_events() {
        let events = vec![workflow::event(WorkflowLevel::Success, "Mounted sda1")];
        let err = finish_report::<()>(
            "Provisioned USB storage",
            events,
            Err(noma_core::NomaError::MountFailed {
                partition: "sdc1".into(),
                target: PathBuf::from("/media/volatile"),
            }),
        )
        .unwrap_err();
        assert!(err.to_string().contains("sdc1"));

        let report = finish_report("Provisioned USB storage", Vec::new(), Ok(())).unwrap();
        assert_eq!(report.title, "Provisioned USB storage");
    }

    #[test]
    fn level_tags_cover_every_level() {
        assert_eq!(level_tag(WorkflowLevel::Security), "SEC");
        assert_eq!(level_tag(WorkflowLevel::Success), "OK");
    }
}
