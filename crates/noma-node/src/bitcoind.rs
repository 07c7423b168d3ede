//! bitcoind layout, RPC credentials, and the fast-sync snapshot.

use crate::lnd;
use crate::rpcauth::RpcAuth;
use noma_core::config::{Downloader, NomaConfig};
use noma_core::error::{NomaError, NomaResult};
use noma_core::kv::{set_kv, KvChange};
use noma_core::ranking::Role;
use noma_core::system::{argv, CommandRunner, Tool};
use noma_core::workflow::{event, WorkflowEvent, WorkflowLevel};
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

/// Create the bitcoind directory on the archive device and seed bitcoin.conf.
pub fn create(config: &NomaConfig) -> NomaResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();
    let dir = config.bitcoin_dir();
    if dir.is_dir() {
        events.push(event(WorkflowLevel::Info, "bitcoind directory exists"));
    } else {
        fs::create_dir_all(&dir)?;
        events.push(event(
            WorkflowLevel::Success,
            format!("Created bitcoind directory {}", dir.display()),
        ));
    }

    let conf = config.bitcoin_conf();
    let template = config.node.bitcoind_template();
    if conf.is_file() {
        events.push(event(WorkflowLevel::Info, "bitcoin.conf exists"));
    } else if template.is_file() {
        fs::copy(&template, &conf)?;
        events.push(event(
            WorkflowLevel::Success,
            format!("Copied {} to {}", template.display(), conf.display()),
        ));
    } else {
        events.push(event(
            WorkflowLevel::Warn,
            format!("bitcoin.conf template {} is missing", template.display()),
        ));
    }
    Ok(events)
}

/// bitcoind directory and config are both in place.
pub fn check(config: &NomaConfig) -> bool {
    config.bitcoin_dir().is_dir() && config.bitcoin_conf().is_file()
}

pub fn set_prune(config: &NomaConfig) -> NomaResult<WorkflowEvent> {
    let target = &config.node.prune_target;
    let change = set_kv(&config.bitcoin_conf(), None, "prune", target)?;
    Ok(match change {
        KvChange::Unchanged => event(
            WorkflowLevel::Info,
            format!("bitcoind prune already {target}"),
        ),
        _ => event(
            WorkflowLevel::Success,
            format!("bitcoind prune set to {target}"),
        ),
    })
}

/// Generate fresh RPC credentials and hand them to bitcoind and lnd.
///
/// Failing to record the clear password on the important device only warns;
/// the config writes are errors.
pub fn set_rpcauth(config: &NomaConfig) -> NomaResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();
    let auth = RpcAuth::generate(&config.node.rpc_user)?;

    set_kv(&config.bitcoin_conf(), None, "rpcauth", &auth.value())?;
    events.push(event(
        WorkflowLevel::Success,
        format!("Wrote rpcauth for {} to bitcoin.conf", auth.user),
    ));

    let record = config.rpc_credentials_path();
    match append(&record, &auth.record()) {
        Ok(()) => events.push(event(
            WorkflowLevel::Success,
            format!("Saved RPC credentials to {}", record.display()),
        )),
        Err(err) => events.push(event(
            WorkflowLevel::Warn,
            format!("Could not save RPC credentials to {}: {err}", record.display()),
        )),
    }

    if let Some(done) = lnd::set_bitcoind(config, &auth.user, &auth.password)? {
        events.push(done);
    }
    Ok(events)
}

fn append(path: &Path, text: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(text.as_bytes())
}

/// Hex SHA-256 of the file at `path`.
pub fn sha256_file(path: &Path) -> NomaResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Seed the archive device with a blocks and chainstate snapshot.
///
/// An existing `blocks/` or `chainstate/` directory means bitcoind already
/// has data and nothing is touched. A snapshot already on disk is reused when
/// its checksum matches; otherwise it is fetched once and must verify.
pub fn fastsync<R: CommandRunner + ?Sized>(
    config: &NomaConfig,
    runner: &R,
) -> NomaResult<Vec<WorkflowEvent>> {
    let mut events = Vec::new();
    let dir = config.bitcoin_dir();

    if !dir.is_dir() {
        let archive = config.storage.roles.data_dir(Role::Archive);
        if !archive.is_dir() {
            return Err(NomaError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("archive directory {} does not exist", archive.display()),
            )));
        }
        fs::create_dir_all(&dir)?;
    }

    for existing in ["blocks", "chainstate"] {
        if dir.join(existing).is_dir() {
            events.push(event(
                WorkflowLevel::Info,
                format!(
                    "bitcoind {existing} directory exists; remove it to fast-sync again"
                ),
            ));
            return Ok(events);
        }
    }

    let fastsync = &config.fastsync;
    let snapshot = dir.join(&fastsync.snapshot);
    let expected = fastsync.sha256.to_ascii_lowercase();

    let reusable = snapshot.is_file() && sha256_file(&snapshot)? == expected;
    if reusable {
        events.push(event(
            WorkflowLevel::Info,
            format!("Reusing verified snapshot {}", snapshot.display()),
        ));
    } else {
        if snapshot.is_file() {
            events.push(event(
                WorkflowLevel::Warn,
                format!("Discarding snapshot {} with wrong checksum", snapshot.display()),
            ));
            fs::remove_file(&snapshot)?;
        }
        let url = fastsync.url();
        events.push(event(WorkflowLevel::Info, format!("Downloading {url}")));
        let (tool, args) = download_command(fastsync.downloader, &url, &snapshot);
        runner.run_checked(tool, &args)?;

        let actual = sha256_file(&snapshot)?;
        if actual != expected {
            return Err(NomaError::Command(format!(
                "snapshot checksum mismatch: expected {expected}, got {actual}; remove {} to try again",
                snapshot.display()
            )));
        }
        events.push(event(WorkflowLevel::Success, "Snapshot checksum matches"));
    }

    runner.run_checked(
        Tool::Tar,
        &argv([
            OsString::from("xf"),
            snapshot.clone().into_os_string(),
            OsString::from("-C"),
            dir.clone().into_os_string(),
        ]),
    )?;
    events.push(event(
        WorkflowLevel::Success,
        format!("Extracted snapshot into {}", dir.display()),
    ));
    Ok(events)
}

fn download_command(downloader: Downloader, url: &str, output: &Path) -> (Tool, Vec<OsString>) {
    let output = output.as_os_str();
    match downloader {
        Downloader::Axel => {
            let mut target = OsString::from("--output=");
            target.push(output);
            (
                Tool::Axel,
                argv([
                    OsString::from("--quiet"),
                    OsString::from("--no-clobber"),
                    target,
                    OsString::from(url),
                ]),
            )
        }
        Downloader::Wget => (
            Tool::Wget,
            argv([
                OsString::from("--quiet"),
                OsString::from("--output-document"),
                output.to_os_string(),
                OsString::from(url),
            ]),
        ),
        Downloader::Curl => (
            Tool::Curl,
            argv([
                OsString::from("--silent"),
                OsString::from("--fail"),
                OsString::from("--location"),
                OsString::from("--output"),
                output.to_os_string(),
                OsString::from(url),
            ]),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use noma_core::kv::get_kv;
    use noma_core::system::CommandOutput;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use tempfile::tempdir;

    const SNAPSHOT_BODY: &[u8] = b"snapshot-bytes";
    const SNAPSHOT_SHA: &str = "7783d47a378f6c3ca8d1b29aa1b688ff6b14d26bd3bf8bae14785138db1eff0c";

    fn config(root: &Path) -> NomaConfig {
        let mut config = NomaConfig::default();
        config.storage.roles.archive = root.join("archive");
        config.storage.roles.important = root.join("important");
        config.node.home = root.join("home");
        config.fastsync.location = "http://snapshots.test/".to_string();
        config.fastsync.snapshot = "snap.tar".to_string();
        config.fastsync.sha256 = SNAPSHOT_SHA.to_string();
        for role in [Role::Archive, Role::Important] {
            fs::create_dir_all(config.storage.roles.data_dir(role)).unwrap();
        }
        config
    }

    /// Writes `body` to whatever path a downloader is told to write to.
    struct Downloads {
        body: &'static [u8],
        calls: RefCell<Vec<(Tool, Vec<String>)>>,
    }

    impl Downloads {
        fn new(body: &'static [u8]) -> Self {
            Self {
                body,
                calls: RefCell::new(Vec::new()),
            }
        }

        fn tools(&self) -> Vec<Tool> {
            self.calls.borrow().iter().map(|(t, _)| *t).collect()
        }
    }

    impl CommandRunner for Downloads {
        fn run(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
            let args: Vec<String> = args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            if tool == Tool::Axel {
                let path = args
                    .iter()
                    .find_map(|a| a.strip_prefix("--output="))
                    .map(PathBuf::from)
                    .unwrap();
                fs::write(path, self.body).unwrap();
            }
            self.calls.borrow_mut().push((tool, args));
            Ok(CommandOutput::ok(""))
        }
    }

    #[test]
    fn create_and_prune() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.node.home.join("bitcoin")).unwrap();
        fs::write(config.node.bitcoind_template(), "server=1\n").unwrap();

        create(&config).unwrap();
        assert!(check(&config));

        assert_eq!(set_prune(&config).unwrap().level, WorkflowLevel::Success);
        assert_eq!(set_prune(&config).unwrap().level, WorkflowLevel::Info);
        assert_eq!(
            get_kv(&config.bitcoin_conf(), None, "prune").unwrap().as_deref(),
            Some("550")
        );
    }

    #[test]
    fn rpcauth_reaches_bitcoind_lnd_and_record() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.bitcoin_dir()).unwrap();
        fs::write(config.bitcoin_conf(), "server=1\n").unwrap();
        fs::create_dir_all(config.lnd_dir()).unwrap();
        fs::write(config.lnd_conf(), "[Bitcoind]\n").unwrap();

        set_rpcauth(&config).unwrap();

        let auth = get_kv(&config.bitcoin_conf(), None, "rpcauth")
            .unwrap()
            .unwrap();
        assert!(auth.starts_with("lncm:"));
        let password = get_kv(&config.lnd_conf(), Some("Bitcoind"), "bitcoind.rpcpass")
            .unwrap()
            .unwrap();
        let record = fs::read_to_string(config.rpc_credentials_path()).unwrap();
        assert!(record.contains(&format!("rpcauth={auth}\n")));
        assert!(record.contains(&format!("password={password}\n")));
    }

    #[test]
    fn sha256_file_hashes_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, SNAPSHOT_BODY).unwrap();
        assert_eq!(sha256_file(&path).unwrap(), SNAPSHOT_SHA);
    }

    #[test]
    fn fastsync_downloads_verifies_and_extracts() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        let runner = Downloads::new(SNAPSHOT_BODY);

        fastsync(&config, &runner).unwrap();

        assert_eq!(runner.tools(), [Tool::Axel, Tool::Tar]);
        let calls = runner.calls.borrow();
        assert_eq!(calls[0].1.last().unwrap(), "http://snapshots.test/snap.tar");
        assert_eq!(calls[1].1[0], "xf");
        assert_eq!(calls[1].1[3], config.bitcoin_dir().display().to_string());
    }

    #[test]
    fn fastsync_reuses_verified_snapshot() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.bitcoin_dir()).unwrap();
        fs::write(config.bitcoin_dir().join("snap.tar"), SNAPSHOT_BODY).unwrap();
        let runner = Downloads::new(b"unused");

        fastsync(&config, &runner).unwrap();
        assert_eq!(runner.tools(), [Tool::Tar]);
    }

    #[test]
    fn fastsync_skips_existing_chainstate() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.bitcoin_dir().join("chainstate")).unwrap();
        let runner = Downloads::new(SNAPSHOT_BODY);

        let events = fastsync(&config, &runner).unwrap();
        assert!(runner.tools().is_empty());
        assert!(events[0].message.contains("chainstate"));
    }

    #[test]
    fn fastsync_rejects_corrupt_download_without_retrying() {
        let dir = tempdir().unwrap();
        let config = config(dir.path());
        fs::create_dir_all(config.bitcoin_dir()).unwrap();
        fs::write(config.bitcoin_dir().join("snap.tar"), b"stale").unwrap();
        let runner = Downloads::new(b"corrupt");

        let err = fastsync(&config, &runner).unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert_eq!(runner.tools(), [Tool::Axel]);
    }

    #[test]
    fn fastsync_needs_archive_directory() {
        let dir = tempdir().unwrap();
        let mut config = config(dir.path());
        config.storage.roles.archive = dir.path().join("nowhere");
        let runner = Downloads::new(SNAPSHOT_BODY);
        assert!(fastsync(&config, &runner).is_err());
        assert!(runner.tools().is_empty());
    }

    #[test]
    fn downloaders_write_to_the_snapshot_path() {
        let out = Path::new("/a/snap.tar");
        let (tool, args) = download_command(Downloader::Wget, "http://x/snap.tar", out);
        assert_eq!(tool, Tool::Wget);
        assert_eq!(args[2], OsString::from("/a/snap.tar"));
        let (tool, args) = download_command(Downloader::Curl, "http://x/snap.tar", out);
        assert_eq!(tool, Tool::Curl);
        assert_eq!(args.last().unwrap(), &OsString::from("http://x/snap.tar"));
    }
}
