//! Thin seam over the host utilities noma drives.
//!
//! Every external program goes through [`CommandRunner`], so workflows can be
//! exercised against a scripted runner in tests.

use crate::error::{NomaError, NomaResult};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;

/// Closed set of host utilities, each with its candidate install paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Mount,
    Umount,
    MkfsExt4,
    Blkid,
    RcUpdate,
    RcService,
    Docker,
    DockerCompose,
    Dd,
    Mkswap,
    Swapon,
    Tar,
    Crontab,
    Apk,
    Lbu,
    SetupApkcache,
    Axel,
    Wget,
    Curl,
}

impl Tool {
    /// Program name as it appears on `$PATH`.
    pub fn name(self) -> &'static str {
        match self {
            Tool::Mount => "mount",
            Tool::Umount => "umount",
            Tool::MkfsExt4 => "mkfs.ext4",
            Tool::Blkid => "blkid",
            Tool::RcUpdate => "rc-update",
            Tool::RcService => "rc-service",
            Tool::Docker => "docker",
            Tool::DockerCompose => "docker-compose",
            Tool::Dd => "dd",
            Tool::Mkswap => "mkswap",
            Tool::Swapon => "swapon",
            Tool::Tar => "tar",
            Tool::Crontab => "crontab",
            Tool::Apk => "apk",
            Tool::Lbu => "lbu",
            Tool::SetupApkcache => "setup-apkcache",
            Tool::Axel => "axel",
            Tool::Wget => "wget",
            Tool::Curl => "curl",
        }
    }

    /// Absolute paths tried in order before giving up.
    pub fn binaries(self) -> &'static [&'static str] {
        match self {
            Tool::Mount => &["/bin/mount", "/usr/bin/mount"],
            Tool::Umount => &["/bin/umount", "/usr/bin/umount"],
            Tool::MkfsExt4 => &["/sbin/mkfs.ext4", "/usr/sbin/mkfs.ext4", "/usr/bin/mkfs.ext4"],
            Tool::Blkid => &["/sbin/blkid", "/usr/sbin/blkid", "/usr/bin/blkid"],
            Tool::RcUpdate => &["/sbin/rc-update", "/usr/sbin/rc-update"],
            Tool::RcService => &["/sbin/rc-service", "/usr/sbin/rc-service"],
            Tool::Docker => &["/usr/bin/docker", "/usr/local/bin/docker"],
            Tool::DockerCompose => &["/usr/bin/docker-compose", "/usr/local/bin/docker-compose"],
            Tool::Dd => &["/bin/dd", "/usr/bin/dd"],
            Tool::Mkswap => &["/sbin/mkswap", "/usr/sbin/mkswap"],
            Tool::Swapon => &["/sbin/swapon", "/usr/sbin/swapon"],
            Tool::Tar => &["/bin/tar", "/usr/bin/tar"],
            Tool::Crontab => &["/usr/bin/crontab", "/bin/crontab"],
            Tool::Apk => &["/sbin/apk", "/usr/sbin/apk"],
            Tool::Lbu => &["/sbin/lbu", "/usr/sbin/lbu", "/usr/bin/lbu"],
            Tool::SetupApkcache => &["/sbin/setup-apkcache", "/usr/sbin/setup-apkcache"],
            Tool::Axel => &["/usr/bin/axel", "/usr/local/bin/axel"],
            Tool::Wget => &["/usr/bin/wget", "/bin/wget"],
            Tool::Curl => &["/usr/bin/curl", "/bin/curl"],
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: Vec::new(),
            code: Some(0),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: stderr.into(),
            code: Some(code),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Best single-line explanation of a failure: stderr, then stdout, then the code.
    pub fn diagnostic(&self) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr).trim().to_string();
        if !stderr.is_empty() {
            return stderr;
        }
        let stdout = String::from_utf8_lossy(&self.stdout).trim().to_string();
        if !stdout.is_empty() {
            return stdout;
        }
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Executes host utilities on behalf of the workflows.
pub trait CommandRunner {
    fn run(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput>;

    /// Like [`CommandRunner::run`] but a non-zero exit becomes [`NomaError::Command`].
    fn run_checked(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
        let output = self.run(tool, args)?;
        if output.success() {
            Ok(output)
        } else {
            Err(NomaError::Command(format!(
                "{} {} failed: {}",
                tool,
                render_args(args),
                output.diagnostic()
            )))
        }
    }

    /// Run with the terminal attached (for `docker logs -f` and friends).
    /// Output is not captured.
    fn run_attached(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
        self.run(tool, args)
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
        (**self).run(tool, args)
    }

    fn run_attached(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
        (**self).run_attached(tool, args)
    }
}

/// Runner backed by `std::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    fn dispatch(&self, tool: Tool, args: &[OsString], attached: bool) -> NomaResult<CommandOutput> {
        log::debug!("exec {} {}", tool, render_args(args));
        for candidate in tool.binaries() {
            if !Path::new(candidate).exists() {
                continue;
            }
            return execute(candidate, args, attached);
        }
        // Fall back to $PATH resolution for non-standard layouts.
        match execute(tool.name(), args, attached) {
            Err(NomaError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                Err(NomaError::Command(format!(
                    "none of {:?} are available on this system",
                    tool.binaries()
                )))
            }
            other => other,
        }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
        self.dispatch(tool, args, false)
    }

    fn run_attached(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
        self.dispatch(tool, args, true)
    }
}

fn execute(program: &str, args: &[OsString], attached: bool) -> NomaResult<CommandOutput> {
    let mut command = Command::new(program);
    command.args(args);
    if attached {
        let status = command.status()?;
        return Ok(CommandOutput {
            code: status.code(),
            ..CommandOutput::default()
        });
    }
    let raw = command.output()?;
    Ok(CommandOutput {
        stdout: raw.stdout,
        stderr: raw.stderr,
        code: raw.status.code(),
    })
}

/// Build an argument vector from anything string-like.
pub fn argv<I, S>(items: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    items.into_iter().map(Into::into).collect()
}

pub fn render_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Recursively copy `src` into `dst`, creating directories as needed.
/// Existing files in `dst` are overwritten.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Fail with [`NomaError::Privilege`] unless the effective uid is root.
pub fn ensure_root() -> NomaResult<()> {
    if running_as_root() {
        Ok(())
    } else {
        Err(NomaError::Privilege(
            "noma must run as root to mount, format, and configure devices; retry with sudo"
                .into(),
        ))
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_prefers_stderr_then_stdout() {
        let out = CommandOutput {
            stdout: b"partial\n".to_vec(),
            stderr: b"  wrong fs type \n".to_vec(),
            code: Some(32),
        };
        assert_eq!(out.diagnostic(), "wrong fs type");

        let out = CommandOutput {
            stdout: b"only stdout".to_vec(),
            stderr: Vec::new(),
            code: Some(1),
        };
        assert_eq!(out.diagnostic(), "only stdout");

        assert_eq!(CommandOutput::failed(5, "").diagnostic(), "exit code 5");
    }

    struct Refuses;

    impl CommandRunner for Refuses {
        fn run(&self, _tool: Tool, _args: &[OsString]) -> NomaResult<CommandOutput> {
            Ok(CommandOutput::failed(1, "permission denied"))
        }
    }

    #[test]
    fn run_checked_turns_nonzero_exit_into_error() {
        let err = Refuses
            .run_checked(Tool::Umount, &argv(["/dev/sda1"]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("umount /dev/sda1"), "{msg}");
        assert!(msg.contains("permission denied"), "{msg}");
    }

    #[test]
    fn copy_tree_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("nginx");
        fs::create_dir_all(src.join("conf.d")).unwrap();
        fs::write(src.join("nginx.conf"), "worker_processes 1;").unwrap();
        fs::write(src.join("conf.d/default.conf"), "server {}").unwrap();

        let dst = dir.path().join("copy");
        copy_tree(&src, &dst).unwrap();
        assert_eq!(
            fs::read_to_string(dst.join("conf.d/default.conf")).unwrap(),
            "server {}"
        );
        assert!(dst.join("nginx.conf").is_file());
    }

    #[test]
    fn every_tool_has_absolute_candidates() {
        let tools = [
            Tool::Mount,
            Tool::Umount,
            Tool::MkfsExt4,
            Tool::Blkid,
            Tool::RcUpdate,
            Tool::RcService,
            Tool::Docker,
            Tool::DockerCompose,
            Tool::Dd,
            Tool::Mkswap,
            Tool::Swapon,
            Tool::Tar,
            Tool::Crontab,
            Tool::Apk,
            Tool::Lbu,
            Tool::SetupApkcache,
            Tool::Axel,
            Tool::Wget,
            Tool::Curl,
        ];
        for tool in tools {
            assert!(!tool.binaries().is_empty());
            assert!(tool
                .binaries()
                .iter()
                .all(|path| path.starts_with('/') && path.ends_with(tool.name())));
        }
    }
}
