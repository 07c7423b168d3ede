//! Edits to `/etc/fstab`: appends, plus dropping lines a reformat made stale.

use crate::error::{NomaError, NomaResult};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// One line of `/etc/fstab`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FstabEntry {
    pub spec: String,
    pub target: String,
    pub fs_type: String,
    pub options: String,
    pub dump: u8,
    pub pass: u8,
}

impl FstabEntry {
    pub fn by_uuid(uuid: &str, target: &Path, fs_type: &str, options: &str) -> Self {
        Self {
            spec: format!("UUID={uuid}"),
            target: target.display().to_string(),
            fs_type: fs_type.to_string(),
            options: options.to_string(),
            dump: 0,
            pass: 0,
        }
    }

    pub fn swap(file: &Path, priority: i32) -> Self {
        Self {
            spec: file.display().to_string(),
            target: "none".to_string(),
            fs_type: "swap".to_string(),
            options: format!("sw,pri={priority}"),
            dump: 0,
            pass: 0,
        }
    }
}

impl fmt::Display for FstabEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {}",
            self.spec, self.target, self.fs_type, self.options, self.dump, self.pass
        )
    }
}

/// The boot-time mount table. Lines are appended, never twice for the same
/// spec (`UUID=...` or swap file path), and only removed when a reformat
/// replaced the spec of a mount point.
#[derive(Debug, Clone)]
pub struct PersistentMountTable {
    path: PathBuf,
}

impl PersistentMountTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// First field of every non-comment line. A missing file has none.
    pub fn specs(&self) -> NomaResult<Vec<String>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string)
            .collect())
    }

    pub fn contains_spec(&self, spec: &str) -> NomaResult<bool> {
        Ok(self.specs()?.iter().any(|existing| existing == spec))
    }

    /// Append `entry` unless its spec is already present. Returns whether a
    /// line was written.
    pub fn append_unique(&self, entry: &FstabEntry) -> NomaResult<bool> {
        if self.contains_spec(&entry.spec)? {
            return Ok(false);
        }
        self.append_line(&entry.to_string())
            .map_err(|source| NomaError::PersistenceWriteFailed {
                path: self.path.clone(),
                source,
            })?;
        Ok(true)
    }

    /// Remove lines that mount `entry.target` under a different spec.
    /// Comments and unrelated lines are kept byte for byte. Returns the
    /// removed lines.
    pub fn remove_stale_for_target(&self, entry: &FstabEntry) -> NomaResult<Vec<String>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut kept = String::with_capacity(contents.len());
        let mut removed = Vec::new();
        for line in contents.lines() {
            let trimmed = line.trim();
            let mut fields = trimmed.split_whitespace();
            let stale = !trimmed.starts_with('#')
                && matches!(
                    (fields.next(), fields.next()),
                    (Some(spec), Some(target)) if target == entry.target && spec != entry.spec
                );
            if stale {
                removed.push(line.to_string());
            } else {
                kept.push_str(line);
                kept.push('\n');
            }
        }

        if !removed.is_empty() {
            fs::write(&self.path, kept).map_err(|source| NomaError::PersistenceWriteFailed {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(removed)
    }

    fn append_line(&self, line: &str) -> io::Result<()> {
        let needs_newline = match fs::read(&self.path) {
            Ok(bytes) => bytes.last().is_some_and(|b| *b != b'\n'),
            Err(err) if err.kind() == io::ErrorKind::NotFound => false,
            Err(err) => return Err(err),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if needs_newline {
            file.write_all(b"\n")?;
        }
        writeln!(file, "{line}")?;
        file.flush()
    }
}
