//! Size ranking of USB partitions and the role policy built on it.

use crate::error::{NomaError, NomaResult};
use crate::inventory::Partition;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of storage roles every node needs filled.
pub const REQUIRED_PARTITIONS: usize = 3;

/// What a USB partition is used for once mounted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Bulk chain data (bitcoind blocks).
    Archive,
    /// Scratch space: swap, web server cache.
    Volatile,
    /// Small but precious: wallet, credentials, configs.
    Important,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Archive, Role::Volatile, Role::Important];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Archive => "archive",
            Role::Volatile => "volatile",
            Role::Important => "important",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partitions sorted ascending by size. Equal sizes keep discovery order.
#[derive(Debug, Clone)]
pub struct PartitionRanker {
    ranked: Vec<Partition>,
}

impl PartitionRanker {
    pub fn rank(mut partitions: Vec<Partition>) -> Self {
        partitions.sort_by_key(|p| p.size_bytes);
        Self { ranked: partitions }
    }

    pub fn ranked(&self) -> &[Partition] {
        &self.ranked
    }

    pub fn len(&self) -> usize {
        self.ranked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranked.is_empty()
    }

    pub fn smallest(&self) -> NomaResult<&Partition> {
        self.ranked.first().ok_or_else(|| self.insufficient(1))
    }

    pub fn largest(&self) -> NomaResult<&Partition> {
        self.ranked.last().ok_or_else(|| self.insufficient(1))
    }

    /// First partition left after dropping one smallest and one largest.
    pub fn medium(&self) -> NomaResult<&Partition> {
        if self.ranked.len() < REQUIRED_PARTITIONS {
            return Err(self.insufficient(REQUIRED_PARTITIONS));
        }
        Ok(&self.ranked[1])
    }

    fn insufficient(&self, required: usize) -> NomaError {
        NomaError::InsufficientDevices {
            found: self.ranked.len(),
            required,
        }
    }
}

/// Which role the smallest, middle, and largest partition receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RolePolicy {
    #[serde(default = "default_smallest")]
    pub smallest: Role,

    #[serde(default = "default_medium")]
    pub medium: Role,

    #[serde(default = "default_largest")]
    pub largest: Role,
}

fn default_smallest() -> Role {
    Role::Important
}

fn default_medium() -> Role {
    Role::Volatile
}

fn default_largest() -> Role {
    Role::Archive
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self {
            smallest: default_smallest(),
            medium: default_medium(),
            largest: default_largest(),
        }
    }
}

impl RolePolicy {
    /// True when every role is assigned exactly once.
    pub fn is_complete(&self) -> bool {
        self.smallest != self.medium && self.medium != self.largest && self.smallest != self.largest
    }

    pub fn assign(&self, ranker: &PartitionRanker) -> NomaResult<RoleAssignment> {
        if ranker.len() < REQUIRED_PARTITIONS {
            return Err(NomaError::InsufficientDevices {
                found: ranker.len(),
                required: REQUIRED_PARTITIONS,
            });
        }
        if !self.is_complete() {
            return Err(NomaError::InvalidConfig(
                "storage.policy must map smallest, medium, and largest to distinct roles".into(),
            ));
        }

        let picks = [
            (self.smallest, ranker.smallest()?),
            (self.medium, ranker.medium()?),
            (self.largest, ranker.largest()?),
        ];
        let pick = |role: Role| {
            picks
                .iter()
                .find(|(assigned, _)| *assigned == role)
                .map(|(_, partition)| (*partition).clone())
                .ok_or_else(|| NomaError::InvalidConfig(format!("storage.policy never assigns {role}")))
        };
        Ok(RoleAssignment {
            archive: pick(Role::Archive)?,
            volatile: pick(Role::Volatile)?,
            important: pick(Role::Important)?,
        })
    }
}

/// Exactly one partition per [`Role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignment {
    archive: Partition,
    volatile: Partition,
    important: Partition,
}

impl RoleAssignment {
    pub fn partition(&self, role: Role) -> &Partition {
        match role {
            Role::Archive => &self.archive,
            Role::Volatile => &self.volatile,
            Role::Important => &self.important,
        }
    }

    /// `(role, partition)` pairs in `order`.
    pub fn iter_in<'a>(
        &'a self,
        order: &'a [Role],
    ) -> impl Iterator<Item = (Role, &'a Partition)> + 'a {
        order.iter().map(move |role| (*role, self.partition(*role)))
    }
}
