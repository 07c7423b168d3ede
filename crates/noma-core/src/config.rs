//! Configuration model and helpers used by noma services.

use crate::error::{NomaError, NomaResult};
use crate::inventory::DevicePatterns;
use crate::ranking::{Role, RolePolicy};
use directories_next::ProjectDirs;
use log::{info, warn};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/noma.toml";
pub const CONFIG_PATH_ENV: &str = "NOMA_CONFIG";
pub(crate) const MOUNTS_PATH_ENV: &str = "NOMA_MOUNTS_PATH";
const BOOTSTRAP_FILE_NAME: &str = "noma.toml";
const APP_QUALIFIER: &str = "org";
const APP_ORGANIZATION: &str = "lncm";
const APP_NAME: &str = "noma";

const BOOTSTRAP_TEMPLATE: &str = r#"# Auto-generated noma configuration bootstrap.
# Every value below is the built-in default; edit only what differs on this box.

[storage]
sys_block_root = "/sys/block"
mounts_path = "/proc/mounts"
fstab_path = "/etc/fstab"
preferred_fs = "ext4"
fstab_options = "defaults,noatime"
settle_attempts = 3
settle_interval_ms = 1000

[storage.patterns]
usb_device = "^sd[a-z]+$"
usb_partition = "^sd[a-z]+[1-9][0-9]*$"
sd_device = "^mmcblk[0-9]+$"
sd_partition = "^mmcblk[0-9]+p[1-9][0-9]*$"

[storage.roles]
archive = "/media/archive"
volatile = "/media/volatile"
important = "/media/important"
order = ["archive", "volatile", "important"]

[storage.policy]
smallest = "important"
medium = "volatile"
largest = "archive"

[destruction]
sentinel = "DESTROY_ALL_DATA_ON_THIS_DEVICE.txt"
grace_secs = 3

[node]
installed_marker = "/media/mmcblk0p1/installed"
home = "/home/lncm"
rpc_user = "lncm"
prune_target = "550"

[swap]
enabled = true
size_mib = 1024
priority = 100

[fastsync]
enabled = true
downloader = "axel"

[retry]
max_attempts = 5
interval_ms = 2000
"#;

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
}

/// Emit the bootstrap configuration template.
pub fn bootstrap_template() -> &'static str {
    BOOTSTRAP_TEMPLATE
}

/// Device-name patterns for the two device classes.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PatternCfg {
    #[serde(default = "default_usb_device_pattern")]
    pub usb_device: String,

    #[serde(default = "default_usb_partition_pattern")]
    pub usb_partition: String,

    #[serde(default = "default_sd_device_pattern")]
    pub sd_device: String,

    #[serde(default = "default_sd_partition_pattern")]
    pub sd_partition: String,
}

fn default_usb_device_pattern() -> String {
    "^sd[a-z]+$".to_string()
}

fn default_usb_partition_pattern() -> String {
    "^sd[a-z]+[1-9][0-9]*$".to_string()
}

fn default_sd_device_pattern() -> String {
    "^mmcblk[0-9]+$".to_string()
}

fn default_sd_partition_pattern() -> String {
    "^mmcblk[0-9]+p[1-9][0-9]*$".to_string()
}

impl Default for PatternCfg {
    fn default() -> Self {
        Self {
            usb_device: default_usb_device_pattern(),
            usb_partition: default_usb_partition_pattern(),
            sd_device: default_sd_device_pattern(),
            sd_partition: default_sd_partition_pattern(),
        }
    }
}

/// Mount paths for each storage role and the order they are brought up in.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RolePaths {
    #[serde(default = "default_archive_path")]
    pub archive: PathBuf,

    #[serde(default = "default_volatile_path")]
    pub volatile: PathBuf,

    #[serde(default = "default_important_path")]
    pub important: PathBuf,

    #[serde(default = "default_role_order")]
    pub order: Vec<Role>,
}

fn default_archive_path() -> PathBuf {
    PathBuf::from("/media/archive")
}

fn default_volatile_path() -> PathBuf {
    PathBuf::from("/media/volatile")
}

fn default_important_path() -> PathBuf {
    PathBuf::from("/media/important")
}

fn default_role_order() -> Vec<Role> {
    vec![Role::Archive, Role::Volatile, Role::Important]
}

impl Default for RolePaths {
    fn default() -> Self {
        Self {
            archive: default_archive_path(),
            volatile: default_volatile_path(),
            important: default_important_path(),
            order: default_role_order(),
        }
    }
}

impl RolePaths {
    /// Mount point for `role`.
    pub fn mountpoint(&self, role: Role) -> &Path {
        match role {
            Role::Archive => &self.archive,
            Role::Volatile => &self.volatile,
            Role::Important => &self.important,
        }
    }

    /// Role marker directory that lives inside the mounted filesystem,
    /// e.g. `/media/archive/archive`.
    pub fn data_dir(&self, role: Role) -> PathBuf {
        self.mountpoint(role).join(role.as_str())
    }
}

/// Block-device discovery, mounting, and mount-table persistence.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageCfg {
    #[serde(default = "default_sys_block_root")]
    pub sys_block_root: PathBuf,

    #[serde(default = "default_mounts_path")]
    pub mounts_path: PathBuf,

    #[serde(default = "default_fstab_path")]
    pub fstab_path: PathBuf,

    #[serde(default = "default_preferred_fs")]
    pub preferred_fs: String,

    #[serde(default = "default_fstab_options")]
    pub fstab_options: String,

    #[serde(default = "default_settle_attempts")]
    pub settle_attempts: u32,

    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    #[serde(default)]
    pub patterns: PatternCfg,

    #[serde(default)]
    pub roles: RolePaths,

    #[serde(default)]
    pub policy: RolePolicy,
}

fn default_sys_block_root() -> PathBuf {
    PathBuf::from("/sys/block")
}

fn default_mounts_path() -> PathBuf {
    PathBuf::from("/proc/mounts")
}

fn default_fstab_path() -> PathBuf {
    PathBuf::from("/etc/fstab")
}

fn default_preferred_fs() -> String {
    "ext4".to_string()
}

fn default_fstab_options() -> String {
    "defaults,noatime".to_string()
}

fn default_settle_attempts() -> u32 {
    3
}

fn default_settle_interval_ms() -> u64 {
    1_000
}

impl Default for StorageCfg {
    fn default() -> Self {
        Self {
            sys_block_root: default_sys_block_root(),
            mounts_path: default_mounts_path(),
            fstab_path: default_fstab_path(),
            preferred_fs: default_preferred_fs(),
            fstab_options: default_fstab_options(),
            settle_attempts: default_settle_attempts(),
            settle_interval_ms: default_settle_interval_ms(),
            patterns: PatternCfg::default(),
            roles: RolePaths::default(),
            policy: RolePolicy::default(),
        }
    }
}

/// Operator wipe sentinel handling.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DestructionCfg {
    #[serde(default = "default_sentinel")]
    pub sentinel: String,

    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

fn default_sentinel() -> String {
    "DESTROY_ALL_DATA_ON_THIS_DEVICE.txt".to_string()
}

fn default_grace_secs() -> u64 {
    3
}

impl Default for DestructionCfg {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            grace_secs: default_grace_secs(),
        }
    }
}

/// Host layout and defaults for the node services.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeCfg {
    #[serde(default = "default_installed_marker")]
    pub installed_marker: PathBuf,

    #[serde(default = "default_home")]
    pub home: PathBuf,

    /// Defaults to `<home>/compose`.
    #[serde(default)]
    pub compose_dir: Option<PathBuf>,

    /// Defaults to `<home>/bitcoin/bitcoin.conf`.
    #[serde(default)]
    pub bitcoind_template: Option<PathBuf>,

    /// Defaults to `<home>/lnd/lnd.conf`.
    #[serde(default)]
    pub lnd_template: Option<PathBuf>,

    /// Defaults to `<home>/crontab`.
    #[serde(default)]
    pub crontab_path: Option<PathBuf>,

    #[serde(default = "default_nginx_source")]
    pub nginx_source: PathBuf,

    #[serde(default = "default_apk_cache")]
    pub apk_cache: PathBuf,

    #[serde(default = "default_sd_cache")]
    pub sd_cache: PathBuf,

    #[serde(default = "default_tor_hostname_path")]
    pub tor_hostname_path: PathBuf,

    #[serde(default = "default_rpc_user")]
    pub rpc_user: String,

    #[serde(default = "default_prune_target")]
    pub prune_target: String,
}

fn default_installed_marker() -> PathBuf {
    PathBuf::from("/media/mmcblk0p1/installed")
}

fn default_home() -> PathBuf {
    PathBuf::from("/home/lncm")
}

fn default_nginx_source() -> PathBuf {
    PathBuf::from("/etc/nginx")
}

fn default_apk_cache() -> PathBuf {
    PathBuf::from("/var/cache/apk")
}

fn default_sd_cache() -> PathBuf {
    PathBuf::from("/media/mmcblk0p1/cache")
}

fn default_tor_hostname_path() -> PathBuf {
    PathBuf::from("/var/lib/tor/lnd-v3/hostname")
}

fn default_rpc_user() -> String {
    "lncm".to_string()
}

fn default_prune_target() -> String {
    "550".to_string()
}

impl Default for NodeCfg {
    fn default() -> Self {
        Self {
            installed_marker: default_installed_marker(),
            home: default_home(),
            compose_dir: None,
            bitcoind_template: None,
            lnd_template: None,
            crontab_path: None,
            nginx_source: default_nginx_source(),
            apk_cache: default_apk_cache(),
            sd_cache: default_sd_cache(),
            tor_hostname_path: default_tor_hostname_path(),
            rpc_user: default_rpc_user(),
            prune_target: default_prune_target(),
        }
    }
}

impl NodeCfg {
    pub fn compose_dir(&self) -> PathBuf {
        self.compose_dir
            .clone()
            .unwrap_or_else(|| self.home.join("compose"))
    }

    pub fn bitcoind_template(&self) -> PathBuf {
        self.bitcoind_template
            .clone()
            .unwrap_or_else(|| self.home.join("bitcoin").join("bitcoin.conf"))
    }

    pub fn lnd_template(&self) -> PathBuf {
        self.lnd_template
            .clone()
            .unwrap_or_else(|| self.home.join("lnd").join("lnd.conf"))
    }

    pub fn crontab_path(&self) -> PathBuf {
        self.crontab_path
            .clone()
            .unwrap_or_else(|| self.home.join("crontab"))
    }
}

/// Swap file created on the volatile device.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SwapCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_swap_size_mib")]
    pub size_mib: u64,

    #[serde(default = "default_swap_priority")]
    pub priority: i32,
}

fn default_true() -> bool {
    true
}

fn default_swap_size_mib() -> u64 {
    1024
}

fn default_swap_priority() -> i32 {
    100
}

impl Default for SwapCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            size_mib: default_swap_size_mib(),
            priority: default_swap_priority(),
        }
    }
}

/// Block and chainstate snapshot used to bootstrap bitcoind on the archive device.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FastsyncCfg {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_fastsync_location")]
    pub location: String,

    #[serde(default = "default_fastsync_snapshot")]
    pub snapshot: String,

    #[serde(default = "default_fastsync_sha256")]
    pub sha256: String,

    #[serde(default)]
    pub downloader: Downloader,
}

/// Tool used to fetch the fast-sync snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Downloader {
    #[default]
    Axel,
    Wget,
    Curl,
}

fn default_fastsync_location() -> String {
    "http://utxosets.blob.core.windows.net/public/".to_string()
}

fn default_fastsync_snapshot() -> String {
    "utxo-snapshot-bitcoin-mainnet-565305.tar".to_string()
}

fn default_fastsync_sha256() -> String {
    "8e18176138be351707aee95f349dd1debc714cc2cc4f0c76d6a7380988bf0d22".to_string()
}

impl Default for FastsyncCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            location: default_fastsync_location(),
            snapshot: default_fastsync_snapshot(),
            sha256: default_fastsync_sha256(),
            downloader: Downloader::default(),
        }
    }
}

impl FastsyncCfg {
    pub fn url(&self) -> String {
        format!("{}{}", self.location, self.snapshot)
    }
}

/// Polling budget for waits on external daemons.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RetryCfg {
    #[serde(default = "default_retry_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_interval")]
    pub interval_ms: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_interval() -> u64 {
    2_000
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_attempts(),
            interval_ms: default_retry_interval(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NomaConfig {
    #[serde(default)]
    pub storage: StorageCfg,

    #[serde(default)]
    pub destruction: DestructionCfg,

    #[serde(default)]
    pub node: NodeCfg,

    #[serde(default)]
    pub swap: SwapCfg,

    #[serde(default)]
    pub fastsync: FastsyncCfg,

    #[serde(default)]
    pub retry: RetryCfg,

    #[serde(skip)]
    pub path: PathBuf,

    #[serde(skip)]
    pub format: ConfigFormat,
}

/// Tracks whether we parsed TOML or YAML so writes preserve format.
#[derive(Debug, Clone, Copy, Default)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Yaml,
}

impl NomaConfig {
    /// Return the canonical system-wide configuration path.
    pub fn default_path() -> &'static Path {
        Path::new(DEFAULT_CONFIG_PATH)
    }

    /// Resolve the per-user configuration path used for bootstrapping.
    pub fn user_config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(BOOTSTRAP_FILE_NAME))
    }

    /// Load configuration from disk, creating a bootstrap copy when missing.
    ///
    /// When the caller asks for the global default and the process cannot
    /// create it, a per-user configuration is written instead.
    pub fn load_or_bootstrap<P: AsRef<Path>>(path: P) -> NomaResult<Self> {
        let target = path.as_ref();
        if target.exists() {
            return Self::load(target);
        }

        match ensure_bootstrap_file(target) {
            Ok(created) => {
                if created {
                    info!("noma config bootstrap created at {}", target.display());
                }
                Self::load(target)
            }
            Err(err) => {
                if target != Self::default_path() {
                    return Err(NomaError::InvalidConfig(format!(
                        "failed to initialise configuration at {}: {err}",
                        target.display()
                    )));
                }

                let user_path = Self::user_config_path().ok_or_else(|| {
                    NomaError::InvalidConfig(
                        "unable to determine user configuration directory; \
                        create /etc/noma.toml manually"
                            .to_string(),
                    )
                })?;

                let created_user = ensure_bootstrap_file(&user_path).map_err(|io_err| {
                    NomaError::InvalidConfig(format!(
                        "failed to prepare bootstrap configuration at {}: {io_err}",
                        user_path.display()
                    ))
                })?;

                if created_user {
                    info!("noma config bootstrap created at {}", user_path.display());
                }

                warn!(
                    "configuration missing at {}; using per-user bootstrap at {}",
                    target.display(),
                    user_path.display()
                );

                Self::load(&user_path)
            }
        }
    }

    /// Read a config file from disk, detect format, and validate basics.
    pub fn load<P: AsRef<Path>>(path: P) -> NomaResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        );
        let mut cfg = if is_yaml {
            serde_yaml::from_str::<Self>(&contents)?
        } else {
            toml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();
        cfg.format = if is_yaml {
            ConfigFormat::Yaml
        } else {
            ConfigFormat::Toml
        };

        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(NomaError::InvalidConfig(issues.join("; ")));
        }

        Ok(cfg)
    }

    /// Perform a best-effort validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let patterns = &self.storage.patterns;

        for (name, pattern) in [
            ("storage.patterns.usb_device", &patterns.usb_device),
            ("storage.patterns.usb_partition", &patterns.usb_partition),
            ("storage.patterns.sd_device", &patterns.sd_device),
            ("storage.patterns.sd_partition", &patterns.sd_partition),
        ] {
            if let Err(err) = Regex::new(pattern) {
                issues.push(format!("{name} is not a valid pattern: {err}"));
            }
        }

        let roles = &self.storage.roles;
        let mut seen_paths = HashSet::new();
        for role in Role::ALL {
            let path = roles.mountpoint(role);
            if !path.is_absolute() {
                issues.push(format!(
                    "storage.roles.{role} must be an absolute path (got {})",
                    path.display()
                ));
            }
            if !seen_paths.insert(path.to_path_buf()) {
                issues.push(format!(
                    "storage.roles.{role} reuses mount point {}",
                    path.display()
                ));
            }
        }

        let order: HashSet<Role> = roles.order.iter().copied().collect();
        if roles.order.len() != Role::ALL.len() || order.len() != Role::ALL.len() {
            issues.push(
                "storage.roles.order must list archive, volatile, and important exactly once"
                    .to_string(),
            );
        }

        if !self.storage.policy.is_complete() {
            issues.push(
                "storage.policy must map smallest, medium, and largest to distinct roles"
                    .to_string(),
            );
        }

        if self.storage.preferred_fs.trim().is_empty() {
            issues.push("storage.preferred_fs must not be empty".to_string());
        }

        if self.storage.settle_attempts == 0 {
            issues.push("storage.settle_attempts must be at least 1".to_string());
        }

        let sentinel = self.destruction.sentinel.trim();
        if sentinel.is_empty() || sentinel.contains('/') {
            issues.push("destruction.sentinel must be a bare file name".to_string());
        }

        if self.swap.enabled && self.swap.size_mib == 0 {
            issues.push("swap.size_mib must be greater than 0".to_string());
        }

        if self.fastsync.enabled {
            let sha = self.fastsync.sha256.trim();
            if sha.len() != 64 || hex::decode(sha).is_err() {
                issues.push("fastsync.sha256 must be a 64-character hex string".to_string());
            }
        }

        if self.retry.max_attempts == 0 {
            issues.push("retry.max_attempts must be at least 1".to_string());
        }

        issues
    }

    /// Compile the device-name patterns.
    pub fn device_patterns(&self) -> NomaResult<DevicePatterns> {
        DevicePatterns::from_config(&self.storage.patterns)
    }

    /// Resolve the live mount table, honouring `NOMA_MOUNTS_PATH`.
    pub fn mounts_path(&self) -> PathBuf {
        self.mounts_path_with(env::var(MOUNTS_PATH_ENV).ok())
    }

    fn mounts_path_with(&self, override_path: Option<String>) -> PathBuf {
        match override_path {
            Some(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.storage.mounts_path.clone(),
        }
    }

    /// bitcoind data directory on the archive device.
    pub fn bitcoin_dir(&self) -> PathBuf {
        self.storage.roles.data_dir(Role::Archive).join("bitcoin")
    }

    pub fn bitcoin_conf(&self) -> PathBuf {
        self.bitcoin_dir().join("bitcoin.conf")
    }

    /// lnd data directory on the important device.
    pub fn lnd_dir(&self) -> PathBuf {
        self.storage.roles.data_dir(Role::Important).join("lnd")
    }

    pub fn lnd_conf(&self) -> PathBuf {
        self.lnd_dir().join("lnd.conf")
    }

    /// Plain-text record of generated RPC credentials.
    pub fn rpc_credentials_path(&self) -> PathBuf {
        self.storage.roles.data_dir(Role::Important).join("rpc.txt")
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.destruction.grace_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.storage.settle_interval_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry.interval_ms)
    }

    /// Persist the configuration back to its original on-disk format.
    pub fn save(&self) -> NomaResult<()> {
        let payload = match self.format {
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
        };
        fs::write(&self.path, payload)?;
        Ok(())
    }
}

fn ensure_bootstrap_file(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    match OpenOptions::new().create_new(true).write(true).open(path) {
        Ok(mut file) => {
            file.write_all(BOOTSTRAP_TEMPLATE.as_bytes())?;
            file.flush()?;
            #[cfg(unix)]
            {
                let mode = if path.starts_with("/etc/") {
                    0o644
                } else {
                    0o600
                };
                fs::set_permissions(path, PermissionsExt::from_mode(mode))?;
            }
            Ok(true)
        }
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn bootstrap_template_parses_to_defaults() {
        let cfg: NomaConfig = toml::from_str(bootstrap_template()).unwrap();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert_eq!(cfg.storage.preferred_fs, "ext4");
        assert_eq!(cfg.storage.roles.archive, PathBuf::from("/media/archive"));
        assert_eq!(cfg.storage.policy, RolePolicy::default());
        assert_eq!(cfg.destruction.grace_secs, 3);
    }

    #[test]
    fn load_or_bootstrap_writes_template_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("noma.toml");

        let cfg = NomaConfig::load_or_bootstrap(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.path, path);
        assert_eq!(cfg.storage.roles.order, default_role_order());
    }

    #[test]
    fn load_reads_yaml_by_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noma.yaml");
        fs::write(
            &path,
            "storage:\n  preferred_fs: btrfs\n  roles:\n    archive: /srv/archive\n",
        )
        .unwrap();

        let cfg = NomaConfig::load(&path).unwrap();
        assert!(matches!(cfg.format, ConfigFormat::Yaml));
        assert_eq!(cfg.storage.preferred_fs, "btrfs");
        assert_eq!(cfg.storage.roles.archive, PathBuf::from("/srv/archive"));
        assert_eq!(cfg.storage.roles.volatile, PathBuf::from("/media/volatile"));
    }

    #[test]
    fn validate_flags_duplicate_mountpoints_and_bad_patterns() {
        let mut cfg = NomaConfig::default();
        cfg.storage.roles.volatile = cfg.storage.roles.archive.clone();
        cfg.storage.patterns.usb_partition = "sd[".to_string();

        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.contains("reuses mount point")));
        assert!(issues.iter().any(|i| i.contains("usb_partition")));
    }

    #[test]
    fn validate_flags_incomplete_role_order() {
        let mut cfg = NomaConfig::default();
        cfg.storage.roles.order = vec![Role::Archive, Role::Archive, Role::Important];
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.contains("storage.roles.order")));
    }

    #[test]
    fn load_rejects_invalid_configuration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noma.toml");
        fs::write(&path, "[swap]\nsize_mib = 0\n").unwrap();

        let err = NomaConfig::load(&path).unwrap_err();
        assert!(matches!(err, NomaError::InvalidConfig(msg) if msg.contains("swap.size_mib")));
    }

    #[test]
    fn mounts_path_prefers_non_empty_override() {
        let cfg = NomaConfig::default();
        assert_eq!(
            cfg.mounts_path_with(Some("/tmp/mounts.fixture".into())),
            PathBuf::from("/tmp/mounts.fixture")
        );
        assert_eq!(
            cfg.mounts_path_with(Some(String::new())),
            PathBuf::from("/proc/mounts")
        );
        assert_eq!(cfg.mounts_path_with(None), PathBuf::from("/proc/mounts"));
    }

    #[test]
    fn data_dir_nests_role_name_under_mountpoint() {
        let roles = RolePaths::default();
        assert_eq!(
            roles.data_dir(Role::Important),
            PathBuf::from("/media/important/important")
        );
    }
}
