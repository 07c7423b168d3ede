//! `NodeServices` backed by the real host.

use crate::{bitcoind, compose, lnd, nginx, swap};
use noma_core::config::NomaConfig;
use noma_core::error::NomaResult;
use noma_core::ranking::Role;
use noma_core::services::NodeServices;
use noma_core::system::CommandRunner;
use noma_core::workflow::{event, WorkflowEvent, WorkflowLevel};
use std::path::Path;

/// Sets up swap, nginx, bitcoind, lnd, and the compose stack once the USB
/// devices are mounted.
pub struct SystemNodeServices<'a, R: CommandRunner + ?Sized> {
    config: &'a NomaConfig,
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> SystemNodeServices<'a, R> {
    pub fn new(config: &'a NomaConfig, runner: &'a R) -> Self {
        Self { config, runner }
    }

    fn volatile(&self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        if self.config.swap.enabled {
            match swap::create(self.config, self.runner) {
                Ok(mut done) => events.append(&mut done),
                Err(err) => events.push(event(
                    WorkflowLevel::Warn,
                    format!("Cannot create and enable swap: {err}"),
                )),
            }
        }
        step(&mut events, "nginx setup", nginx::setup(self.config));
        events
    }

    fn important(&self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        step(&mut events, "bitcoind setup", bitcoind::create(self.config));
        if bitcoind::check(self.config) {
            step(
                &mut events,
                "bitcoind prune",
                bitcoind::set_prune(self.config).map(|done| vec![done]),
            );
            step(
                &mut events,
                "RPC credentials",
                bitcoind::set_rpcauth(self.config),
            );
        }

        step(&mut events, "lnd setup", lnd::create(self.config));
        if lnd::check(self.config) {
            step(
                &mut events,
                "lnd onion address",
                lnd::setup_tor(self.config).map(|done| vec![done]),
            );
        }
        events
    }

    fn archive(&self) -> NomaResult<Vec<WorkflowEvent>> {
        if !self.config.fastsync.enabled {
            return Ok(vec![event(WorkflowLevel::Info, "Fast-sync disabled")]);
        }
        if !bitcoind::check(self.config) {
            return Ok(vec![event(
                WorkflowLevel::Warn,
                "bitcoind is not set up; skipping fast-sync",
            )]);
        }
        bitcoind::fastsync(self.config, self.runner)
    }
}

impl<R: CommandRunner + ?Sized> NodeServices for SystemNodeServices<'_, R> {
    fn on_role_mounted(&self, role: Role, path: &Path) -> NomaResult<Vec<WorkflowEvent>> {
        log::debug!("setting up {role} services on {}", path.display());
        match role {
            Role::Volatile => Ok(self.volatile()),
            Role::Important => Ok(self.important()),
            Role::Archive => self.archive(),
        }
    }

    fn on_all_roles_mounted(&self) -> NomaResult<Vec<WorkflowEvent>> {
        let mut events = Vec::new();
        step(
            &mut events,
            "docker-compose start",
            compose::start(self.config, self.runner).map(|done| vec![done]),
        );
        step(
            &mut events,
            "crontab install",
            compose::install_crontab(self.config, self.runner).map(|done| vec![done]),
        );
        Ok(events)
    }
}

/// Keep a step's events, or record its failure and let the next step run.
fn step(events: &mut Vec<WorkflowEvent>, label: &str, result: NomaResult<Vec<WorkflowEvent>>) {
    match result {
        Ok(mut done) => events.append(&mut done),
        Err(err) => events.push(event(WorkflowLevel::Error, format!("{label} failed: {err}"))),
    }
}
