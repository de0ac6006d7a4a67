//! State persistence bridge.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::CloudProvider;

/// Infrastructure state reported to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfrastructureStatus {
    /// An apply finished.
    Deployed,
    /// A destroy finished.
    Destroyed,
}

impl fmt::Display for InfrastructureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployed => write!(f, "deployed"),
            Self::Destroyed => write!(f, "destroyed"),
        }
    }
}

/// Writes deployment results back to the owning workspace record.
///
/// Implemented by the host application. Failures never change a job's
/// status: the infrastructure is already live (or already gone).
#[async_trait]
pub trait StatePersistence: Send + Sync {
    /// Saves `outputs` and `status` for a workspace/provider pair.
    async fn save(
        &self,
        workspace_id: &str,
        provider: CloudProvider,
        outputs: &BTreeMap<String, String>,
        status: InfrastructureStatus,
    ) -> anyhow::Result<()>;
}
