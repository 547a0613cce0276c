use serde::{Deserialize, Serialize};

use crate::providers::ProviderKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Polling,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One in-flight provider submission.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderJob {
    pub id: String,
    pub provider: ProviderKind,
    /// Operation name for long-running jobs; `None` for synchronous providers.
    pub handle: Option<String>,
    pub status: JobStatus,
    pub progress: Option<f64>,
    pub poll_errors: u32,
    pub polls: u32,
}

impl ProviderJob {
    pub fn submitted(provider: ProviderKind, handle: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            provider,
            handle,
            status: JobStatus::Submitted,
            progress: None,
            poll_errors: 0,
            polls: 0,
        }
    }
}
