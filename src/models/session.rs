use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StimulationMode;

/// Record of a finished session, returned by `EngineController::stop`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub mode: StimulationMode,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    /// Time spent running, excluding pauses.
    pub active_ms: u64,
    pub muted: bool,
}
