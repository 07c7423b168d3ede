//! Line-preserving `key=value` editing for bitcoin.conf and lnd.conf.
//!
//! Keys before the first `[Section]` header belong to the unnamed section,
//! which is what bitcoin.conf uses. Comments and ordering are kept as-is.

use crate::error::NomaResult;
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvChange {
    /// The key already held the requested value; nothing was written.
    Unchanged,
    /// An existing key was rewritten.
    Updated,
    /// The key was missing and has been added.
    Appended,
}

/// In-memory copy of a key-value config file.
#[derive(Debug, Clone, Default)]
pub struct KvDocument {
    lines: Vec<String>,
}

enum Line<'a> {
    Blank,
    Comment,
    Section(&'a str),
    Pair { key: &'a str, value: &'a str },
    Other,
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Line::Blank;
    }
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return Line::Comment;
    }
    if let Some(name) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return Line::Section(name.trim());
    }
    match trimmed.split_once('=') {
        Some((key, value)) => Line::Pair {
            key: key.trim(),
            value: value.trim(),
        },
        None => Line::Other,
    }
}

impl KvDocument {
    pub fn parse(contents: &str) -> Self {
        Self {
            lines: contents.lines().map(str::to_string).collect(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if !out.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Line indices belonging to `section`, header excluded.
    fn section_span(&self, section: Option<&str>) -> Option<(usize, usize)> {
        let mut start = match section {
            None => Some(0),
            Some(_) => None,
        };
        for (idx, line) in self.lines.iter().enumerate() {
            if let Line::Section(name) = classify(line) {
                if let Some(begin) = start {
                    return Some((begin, idx));
                }
                if Some(name) == section {
                    start = Some(idx + 1);
                }
            }
        }
        start.map(|begin| (begin, self.lines.len()))
    }

    /// Last value of `key` in `section`.
    pub fn get(&self, section: Option<&str>, key: &str) -> Option<String> {
        let (begin, end) = self.section_span(section)?;
        self.lines[begin..end]
            .iter()
            .filter_map(|line| match classify(line) {
                Line::Pair { key: k, value } if k == key => Some(value.to_string()),
                _ => None,
            })
            .last()
    }

    pub fn set(&mut self, section: Option<&str>, key: &str, value: &str) -> KvChange {
        let rendered = format!("{key}={value}");
        let Some((begin, end)) = self.section_span(section) else {
            if self.lines.last().is_some_and(|l| !l.trim().is_empty()) {
                self.lines.push(String::new());
            }
            if let Some(name) = section {
                self.lines.push(format!("[{name}]"));
            }
            self.lines.push(rendered);
            return KvChange::Appended;
        };

        let matches: Vec<usize> = (begin..end)
            .filter(|idx| matches!(classify(&self.lines[*idx]), Line::Pair { key: k, .. } if k == key))
            .collect();

        if matches.is_empty() {
            // Insert after the last non-blank line of the section.
            let mut insert_at = end;
            while insert_at > begin && self.lines[insert_at - 1].trim().is_empty() {
                insert_at -= 1;
            }
            self.lines.insert(insert_at, rendered);
            return KvChange::Appended;
        }

        let unchanged = matches.iter().all(|idx| {
            matches!(classify(&self.lines[*idx]), Line::Pair { value: v, .. } if v == value)
        });
        if unchanged {
            return KvChange::Unchanged;
        }
        for idx in matches {
            self.lines[idx] = rendered.clone();
        }
        KvChange::Updated
    }
}

/// Read `key` from `section` of the file at `path`.
pub fn get_kv(path: &Path, section: Option<&str>, key: &str) -> NomaResult<Option<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(KvDocument::parse(&contents).get(section, key))
}

/// Set `key` in `section` of the file at `path`, creating the file if needed.
///
/// A rewrite of an existing file first copies it to `<path>.bak`.
pub fn set_kv(path: &Path, section: Option<&str>, key: &str, value: &str) -> NomaResult<KvChange> {
    let (mut doc, existed) = match fs::read_to_string(path) {
        Ok(contents) => (KvDocument::parse(&contents), true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => (KvDocument::default(), false),
        Err(err) => return Err(err.into()),
    };

    let change = doc.set(section, key, value);
    if change == KvChange::Unchanged {
        debug!("{} already has {key}={value}", path.display());
        return Ok(change);
    }

    if existed {
        fs::copy(path, backup_path(path))?;
    }
    fs::write(path, doc.render())?;
    Ok(change)
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".bak");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const LND_CONF: &str = "\
; lnd config
[Application Options]
debuglevel=info
alias = noma

[Bitcoind]
bitcoind.rpchost=127.0.0.1
";

    #[test]
    fn get_reads_sectioned_and_bare_keys() {
        let doc = KvDocument::parse(LND_CONF);
        assert_eq!(
            doc.get(Some("Application Options"), "alias").as_deref(),
            Some("noma")
        );
        assert_eq!(doc.get(Some("Bitcoind"), "debuglevel"), None);
        assert_eq!(doc.get(Some("Missing"), "alias"), None);

        let bitcoin = KvDocument::parse("server=1\nprune=550\n");
        assert_eq!(bitcoin.get(None, "prune").as_deref(), Some("550"));
    }

    #[test]
    fn set_existing_key_keeps_comments_and_order() {
        let mut doc = KvDocument::parse(LND_CONF);
        assert_eq!(
            doc.set(Some("Application Options"), "debuglevel", "debug"),
            KvChange::Updated
        );
        let rendered = doc.render();
        assert!(rendered.starts_with("; lnd config\n[Application Options]\ndebuglevel=debug\n"));
        assert!(rendered.contains("alias = noma"));
    }

    #[test]
    fn set_missing_key_lands_inside_its_section() {
        let mut doc = KvDocument::parse(LND_CONF);
        assert_eq!(
            doc.set(Some("Application Options"), "externalip", "abc.onion"),
            KvChange::Appended
        );
        assert_eq!(
            doc.render(),
            "; lnd config\n[Application Options]\ndebuglevel=info\nalias = noma\nexternalip=abc.onion\n\n[Bitcoind]\nbitcoind.rpchost=127.0.0.1\n"
        );
    }

    #[test]
    fn set_missing_section_appends_header() {
        let mut doc = KvDocument::parse("server=1\n");
        doc.set(Some("Bitcoind"), "bitcoind.rpcuser", "lncm");
        assert_eq!(doc.render(), "server=1\n\n[Bitcoind]\nbitcoind.rpcuser=lncm\n");
    }

    #[test]
    fn bare_key_goes_before_first_section() {
        let mut doc = KvDocument::parse("server=1\n\n[test]\nrpcport=1\n");
        doc.set(None, "prune", "550");
        assert_eq!(doc.render(), "server=1\nprune=550\n\n[test]\nrpcport=1\n");
    }

    #[test]
    fn set_kv_is_noop_when_unchanged_and_backs_up_on_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bitcoin.conf");
        fs::write(&path, "prune=550\n").unwrap();

        assert_eq!(
            set_kv(&path, None, "prune", "550").unwrap(),
            KvChange::Unchanged
        );
        assert!(!dir.path().join("bitcoin.conf.bak").exists());

        assert_eq!(
            set_kv(&path, None, "prune", "1000").unwrap(),
            KvChange::Updated
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("bitcoin.conf.bak")).unwrap(),
            "prune=550\n"
        );
        assert_eq!(
            get_kv(&path, None, "prune").unwrap().as_deref(),
            Some("1000")
        );
    }

    #[test]
    fn set_kv_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("lnd.conf");
        assert_eq!(
            set_kv(&path, Some("Application Options"), "externalip", "x.onion").unwrap(),
            KvChange::Appended
        );
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "[Application Options]\nexternalip=x.onion\n"
        );
    }

    #[test]
    fn get_kv_on_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(get_kv(&dir.path().join("absent"), None, "k").is_err());
    }
}
