//! Workflow orchestration for storage provisioning, installation, and checks.

mod install;
mod provisioning;

pub use install::{check_installed, check_storage, install_box, install_box_into, InstallOptions};
pub use provisioning::{provision_storage, provision_storage_into, Provisioned, COLLABORATOR_ORDER};

/// Severity levels used when reporting workflow events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowLevel {
    Info,
    Success,
    Warn,
    Error,
    Security,
}

/// Single line of output produced by a workflow step.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub level: WorkflowLevel,
    pub message: String,
}

/// Aggregated report returned by any workflow entry point.
#[derive(Debug, Clone)]
pub struct WorkflowReport {
    pub title: String,
    pub events: Vec<WorkflowEvent>,
}

impl WorkflowReport {
    pub fn has_errors(&self) -> bool {
        self.events
            .iter()
            .any(|event| event.level == WorkflowLevel::Error)
    }
}

/// Build an event and mirror it to the `log` facade.
pub fn event(level: WorkflowLevel, message: impl Into<String>) -> WorkflowEvent {
    let message = message.into();
    match level {
        WorkflowLevel::Info | WorkflowLevel::Success => log::info!("{message}"),
        WorkflowLevel::Warn | WorkflowLevel::Security => log::warn!("{message}"),
        WorkflowLevel::Error => log::error!("{message}"),
    }
    WorkflowEvent { level, message }
}
