//! Follow-up work that runs once storage is in place.

use crate::error::NomaResult;
use crate::ranking::Role;
use crate::workflow::WorkflowEvent;
use std::path::Path;

/// Role-specific setup that depends on mounted storage.
///
/// Failures are reported by the provisioning workflow and never undo the
/// storage work that came before.
pub trait NodeServices {
    /// Called once per role after every role is mounted. `path` is the role's
    /// mount point.
    fn on_role_mounted(&self, role: Role, path: &Path) -> NomaResult<Vec<WorkflowEvent>>;

    /// Called once after every `on_role_mounted` call returned.
    fn on_all_roles_mounted(&self) -> NomaResult<Vec<WorkflowEvent>>;
}
