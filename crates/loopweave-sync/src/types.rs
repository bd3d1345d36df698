use serde::{Deserialize, Serialize};

/// One row of the workflow list endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// The list endpoint answers either with a `{ "data": [...] }` envelope or,
/// on older servers, with a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum ListResponse {
    Envelope { data: Vec<WorkflowSummary> },
    Bare(Vec<WorkflowSummary>),
}

impl ListResponse {
    pub(crate) fn into_workflows(self) -> Vec<WorkflowSummary> {
        match self {
            ListResponse::Envelope { data } => data,
            ListResponse::Bare(data) => data,
        }
    }
}
