//! Error types shared by the noma crates.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias used across the library crates.
pub type NomaResult<T> = Result<T, NomaError>;

/// Failure modes surfaced by storage provisioning and node workflows.
#[derive(Debug, Error)]
pub enum NomaError {
    /// Fewer eligible USB partitions than roles to fill.
    #[error("not enough USB devices available: found {found} partition(s), need {required}")]
    InsufficientDevices { found: usize, required: usize },

    /// Neither the preferred nor the auto-detected filesystem produced a mount.
    #[error("{partition} is not mountable at {} with any supported filesystem", target.display())]
    MountFailed { partition: String, target: PathBuf },

    /// The device stayed mounted after a polite and a forced unmount.
    #[error("unable to unmount /dev/{device}")]
    UnmountFailed { device: String },

    /// `mkfs` refused to build the filesystem.
    #[error("formatting /dev/{device} failed: {reason}")]
    FormatFailed { device: String, reason: String },

    /// The persistent mount table could not be appended to.
    #[error("could not write {}: {source}", path.display())]
    PersistenceWriteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no UUID found for {0}")]
    UuidNotFound(String),

    #[error("block device {0} not found")]
    DeviceNotFound(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Command(String),

    #[error("{0}")]
    Privilege(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),

    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Pattern(#[from] regex::Error),
}

impl NomaError {
    /// True for the failures that must abort a provisioning run.
    pub fn is_fatal_storage_error(&self) -> bool {
        matches!(
            self,
            NomaError::InsufficientDevices { .. }
                | NomaError::MountFailed { .. }
                | NomaError::UnmountFailed { .. }
                | NomaError::FormatFailed { .. }
        )
    }
}
