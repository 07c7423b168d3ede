//! docker-compose stack control: start, logs, and graceful daemon shutdown.

use noma_core::config::NomaConfig;
use noma_core::error::NomaResult;
use noma_core::retry::{retry_until, RetryOutcome, RetryPolicy};
use noma_core::system::{argv, CommandRunner, Tool};
use noma_core::workflow::{event, WorkflowEvent, WorkflowLevel, WorkflowReport};
use std::ffi::OsString;

/// Daemons managed by the compose stack, with their in-container stop command.
pub const DAEMONS: [(&str, &[&str]); 2] = [
    ("bitcoind", &["bitcoin-cli", "stop"]),
    ("lnd", &["lncli", "stop"]),
];

/// Name docker-compose gives the first container of `node`.
pub fn container_name(node: &str) -> String {
    format!("compose_{node}_1")
}

pub fn running_containers<R: CommandRunner + ?Sized>(runner: &R) -> NomaResult<Vec<String>> {
    let output = runner.run_checked(Tool::Docker, &argv(["ps", "--format", "{{.Names}}"]))?;
    Ok(output
        .stdout_text()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn is_running<R: CommandRunner + ?Sized>(runner: &R, node: &str) -> NomaResult<bool> {
    let name = container_name(node);
    Ok(running_containers(runner)?.iter().any(|c| *c == name))
}

fn running_daemons<R: CommandRunner + ?Sized>(runner: &R) -> NomaResult<Vec<&'static str>> {
    let containers = running_containers(runner)?;
    Ok(DAEMONS
        .iter()
        .map(|(node, _)| *node)
        .filter(|node| containers.contains(&container_name(node)))
        .collect())
}

/// `docker-compose up -d` for the stack in the compose directory.
pub fn start<R: CommandRunner + ?Sized>(
    config: &NomaConfig,
    runner: &R,
) -> NomaResult<WorkflowEvent> {
    let file = config.node.compose_dir().join("docker-compose.yml");
    runner.run_checked(
        Tool::DockerCompose,
        &argv([
            OsString::from("-f"),
            file.clone().into_os_string(),
            OsString::from("up"),
            OsString::from("-d"),
        ]),
    )?;
    Ok(event(
        WorkflowLevel::Success,
        format!("Started compose stack {}", file.display()),
    ))
}

/// Follow a container's logs on the attached terminal until interrupted.
pub fn logs<R: CommandRunner + ?Sized>(runner: &R, node: &str) -> NomaResult<()> {
    let args = argv(["logs".to_string(), "-f".to_string(), container_name(node)]);
    runner.run_attached(Tool::Docker, &args)?;
    Ok(())
}

/// Install the operator crontab shipped in the home directory.
pub fn install_crontab<R: CommandRunner + ?Sized>(
    config: &NomaConfig,
    runner: &R,
) -> NomaResult<WorkflowEvent> {
    let crontab = config.node.crontab_path();
    if !crontab.is_file() {
        return Ok(event(
            WorkflowLevel::Warn,
            format!("No crontab at {}", crontab.display()),
        ));
    }
    runner.run_checked(Tool::Crontab, &argv([crontab.clone().into_os_string()]))?;
    Ok(event(
        WorkflowLevel::Success,
        format!("Installed crontab {}", crontab.display()),
    ))
}

/// Ask bitcoind and lnd to shut down, wait for them, then force the stragglers.
pub fn stop_daemons<R: CommandRunner + ?Sized>(
    config: &NomaConfig,
    runner: &R,
) -> NomaResult<WorkflowReport> {
    let mut events = Vec::new();
    let title = "Stop daemons".to_string();

    let running = running_daemons(runner)?;
    if running.is_empty() {
        events.push(event(
            WorkflowLevel::Info,
            "bitcoind and lnd are already stopped",
        ));
        return Ok(WorkflowReport { title, events });
    }

    for (node, stop) in DAEMONS.iter().filter(|(node, _)| running.contains(node)) {
        let mut args = vec![OsString::from("exec"), OsString::from(container_name(node))];
        args.extend(stop.iter().map(OsString::from));
        match runner.run_checked(Tool::Docker, &args) {
            Ok(_) => events.push(event(
                WorkflowLevel::Info,
                format!("Asked {node} to stop"),
            )),
            Err(err) => events.push(event(
                WorkflowLevel::Warn,
                format!("{node} refused the stop request: {err}"),
            )),
        }
    }

    let policy = RetryPolicy::new(config.retry.max_attempts, config.retry_interval());
    let outcome = retry_until(policy, || match running_daemons(runner) {
        Ok(left) => left.is_empty(),
        Err(err) => {
            log::warn!("could not list containers: {err}");
            false
        }
    });
    if let RetryOutcome::Satisfied { attempts } = outcome {
        events.push(event(
            WorkflowLevel::Success,
            format!("bitcoind and lnd stopped after {attempts} check(s)"),
        ));
        return Ok(WorkflowReport { title, events });
    }

    for node in running_daemons(runner)? {
        events.push(event(
            WorkflowLevel::Warn,
            format!("{node} still running, stopping its container"),
        ));
        runner.run_checked(
            Tool::Docker,
            &argv(["stop".to_string(), container_name(node)]),
        )?;
    }

    let left = running_daemons(runner)?;
    if left.is_empty() {
        events.push(event(WorkflowLevel::Success, "bitcoind and lnd stopped"));
    } else {
        events.push(event(
            WorkflowLevel::Error,
            format!("Still running: {}", left.join(", ")),
        ));
    }
    Ok(WorkflowReport { title, events })
}

#[cfg(test)]
mod tests {
    use super::*;
    use noma_core::error::NomaResult;
    use noma_core::system::CommandOutput;
    use std::cell::RefCell;

    /// Containers that exit after a number of `docker ps` calls, or only
    /// when `docker stop` is issued.
    struct Docker {
        running: RefCell<Vec<(String, Option<u32>)>>,
        calls: RefCell<Vec<Vec<String>>>,
    }

    impl Docker {
        fn new(containers: &[(&str, Option<u32>)]) -> Self {
            Self {
                running: RefCell::new(
                    containers
                        .iter()
                        .map(|(name, polls)| (name.to_string(), *polls))
                        .collect(),
                ),
                calls: RefCell::new(Vec::new()),
            }
        }

        fn commands(&self, verb: &str) -> Vec<Vec<String>> {
            self.calls
                .borrow()
                .iter()
                .filter(|args| args[0] == verb)
                .cloned()
                .collect()
        }
    }

    impl CommandRunner for Docker {
        fn run(&self, tool: Tool, args: &[OsString]) -> NomaResult<CommandOutput> {
            assert_eq!(tool, Tool::Docker);
            let args: Vec<String> = args
                .iter()
                .map(|a| a.to_string_lossy().into_owned())
                .collect();
            self.calls.borrow_mut().push(args.clone());
            let mut running = self.running.borrow_mut();
            match args[0].as_str() {
                "ps" => {
                    let listing: String =
                        running.iter().map(|(name, _)| format!("{name}\n")).collect();
                    for (_, polls) in running.iter_mut() {
                        if let Some(left) = polls {
                            *left = left.saturating_sub(1);
                        }
                    }
                    running.retain(|(_, polls)| *polls != Some(0));
                    Ok(CommandOutput::ok(listing))
                }
                "stop" => {
                    running.retain(|(name, _)| *name != args[1]);
                    Ok(CommandOutput::ok(""))
                }
                _ => Ok(CommandOutput::ok("")),
            }
        }
    }

    fn config() -> NomaConfig {
        let mut config = NomaConfig::default();
        config.retry.max_attempts = 3;
        config.retry.interval_ms = 0;
        config
    }

    #[test]
    fn already_stopped_sends_nothing() {
        let docker = Docker::new(&[("compose_nginx_1", None)]);
        let report = stop_daemons(&config(), &docker).unwrap();
        assert!(docker.commands("exec").is_empty());
        assert!(report.events[0].message.contains("already stopped"));
    }

    #[test]
    fn polite_stop_is_awaited() {
        let docker = Docker::new(&[("compose_bitcoind_1", Some(3)), ("compose_lnd_1", Some(2))]);
        let report = stop_daemons(&config(), &docker).unwrap();

        assert_eq!(
            docker.commands("exec"),
            [
                vec!["exec", "compose_bitcoind_1", "bitcoin-cli", "stop"],
                vec!["exec", "compose_lnd_1", "lncli", "stop"],
            ]
        );
        assert!(docker.commands("stop").is_empty());
        assert!(!report.has_errors());
    }

    #[test]
    fn stubborn_container_is_stopped_forcibly() {
        let docker = Docker::new(&[("compose_lnd_1", None)]);
        let report = stop_daemons(&config(), &docker).unwrap();

        assert_eq!(docker.commands("exec").len(), 1);
        assert_eq!(docker.commands("stop"), [vec!["stop", "compose_lnd_1"]]);
        assert!(!report.has_errors());
        assert!(report
            .events
            .iter()
            .any(|e| e.level == WorkflowLevel::Warn && e.message.starts_with("lnd")));
    }

    #[test]
    fn is_running_matches_exact_container() {
        let docker = Docker::new(&[("compose_lnd_1", None), ("compose_bitcoind_10", None)]);
        assert!(is_running(&docker, "lnd").unwrap());
        assert!(!is_running(&docker, "bitcoind").unwrap());
    }

    #[test]
    fn logs_follow_compose_container() {
        let docker = Docker::new(&[]);
        logs(&docker, "bitcoind").unwrap();
        assert_eq!(
            docker.calls.borrow()[0],
            ["logs", "-f", "compose_bitcoind_1"]
        );
    }
}
