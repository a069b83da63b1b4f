//! Server-side scheduled tasks.
//!
//! Tasks move `scheduled -> active -> complete | failed` on the server; the
//! client only observes them.

use std::collections::HashMap;

use {
    serde::{Deserialize, Serialize},
    tokio_util::sync::CancellationToken,
};

use crate::{client::AdminClient, error::Result};

/// Task actions that delete a room.
pub const DELETION_ACTIONS: [&str; 2] = ["shutdown_and_purge_room", "purge_room"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Scheduled,
    Active,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ScheduledTask {
    pub id: String,
    pub action: String,
    pub status: TaskStatus,
    pub timestamp_ms: u64,
    pub resource_id: Option<String>,
    pub result: Option<HashMap<String, serde_json::Value>>,
    pub error: Option<String>,
}

impl ScheduledTask {
    pub fn is_deletion(&self) -> bool {
        DELETION_ACTIONS.contains(&self.action.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScheduledTaskList {
    scheduled_tasks: Vec<ScheduledTask>,
}

/// Whether any task is still moving, i.e. the list has to be fetched again.
pub fn needs_refresh(tasks: &[ScheduledTask]) -> bool {
    tasks.iter().any(|t| !t.status.is_terminal())
}

/// A room may be deleted (again) only when every deletion task for it has
/// failed. No deletion task at all also allows it.
pub fn deletion_allowed(tasks: &[ScheduledTask]) -> bool {
    tasks
        .iter()
        .filter(|t| t.is_deletion())
        .all(|t| t.status == TaskStatus::Failed)
}

impl AdminClient {
    pub async fn scheduled_tasks_for_resource(
        &self,
        resource_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScheduledTask>> {
        let mut url = self.endpoint("/_synapse/admin/v1/scheduled_tasks")?;
        url.query_pairs_mut().append_pair("resource_id", resource_id);
        let list: ScheduledTaskList = self.get_json(url, false, cancel).await?;
        Ok(list.scheduled_tasks)
    }
}

#[cfg(test)]
pub(crate) fn task(id: &str, action: &str, status: TaskStatus) -> ScheduledTask {
    ScheduledTask {
        id: id.into(),
        action: action.into(),
        status,
        timestamp_ms: 1_700_000_000_000,
        resource_id: Some("!room:example.org".into()),
        result: None,
        error: None,
    }
}
