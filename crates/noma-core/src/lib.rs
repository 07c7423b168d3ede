//! Core building blocks shared by the noma binaries.
//!
//! USB storage discovery, role assignment, mounting, and the wipe sentinel live
//! here together with configuration and the workflows that stitch them up.

pub mod config;
pub mod error;
pub mod fstab;
pub mod guard;
pub mod inventory;
pub mod kv;
pub mod logging;
pub mod mounts;
pub mod ranking;
pub mod retry;
pub mod services;
pub mod system;
pub mod workflow;

pub use config::{ConfigFormat, Downloader, NomaConfig, RolePaths, StorageCfg};
pub use error::{NomaError, NomaResult};
pub use fstab::{FstabEntry, PersistentMountTable};
pub use guard::{DestructionGuard, GuardOutcome};
pub use inventory::{BlockDevice, DeviceInventory, DeviceKind, Partition};
pub use mounts::{MountManager, MountPoint, MountStatus};
pub use ranking::{PartitionRanker, Role, RoleAssignment, RolePolicy};
pub use retry::{retry_until, RetryOutcome, RetryPolicy};
pub use services::NodeServices;
pub use system::{CommandOutput, CommandRunner, SystemRunner, Tool};
