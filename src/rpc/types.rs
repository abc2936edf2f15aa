use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spaced_repetition::{IntervalPreview, MemoryState, ReviewQuality, SpacedRepetitionError};

/// Grade as sent by clients: either the 0-5 scale or a grade name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QualityInput {
    Scale(i64),
    Name(String),
}

impl QualityInput {
    pub fn parse(&self) -> Result<ReviewQuality, SpacedRepetitionError> {
        match self {
            QualityInput::Scale(value) => ReviewQuality::try_from(*value),
            QualityInput::Name(name) => name.parse(),
        }
    }
}

/// Requests take an optional `now` so clients can replay reviews; it defaults
/// to the server clock.
fn resolve_now(now: Option<DateTime<Utc>>) -> DateTime<Utc> {
    now.unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRequest {
    pub user_id: String,
    pub card_id: String,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl CardRequest {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeRequest {
    pub user_id: String,
    pub card_id: String,
    pub quality: QualityInput,
    #[serde(default)]
    pub response_ms: Option<u64>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl GradeRequest {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueRequest {
    pub user_id: String,
    /// Omitted means "use the recommended size".
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl QueueRequest {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

fn default_due_limit() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueRequest {
    pub user_id: String,
    #[serde(default = "default_due_limit")]
    pub limit: usize,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl DueRequest {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCompleteRequest {
    pub user_id: String,
    pub correct: u32,
    pub total: u32,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl SessionCompleteRequest {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRequest {
    pub user_id: String,
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl UserRequest {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

/// Query string for GET routes: `?now=2024-05-01T08:00:00Z`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsOfQuery {
    #[serde(default)]
    pub now: Option<DateTime<Utc>>,
}

impl AsOfQuery {
    pub fn now(&self) -> DateTime<Utc> {
        resolve_now(self.now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStateResponse {
    #[serde(flatten)]
    pub state: MemoryState,
    pub due_at: DateTime<Utc>,
    pub is_new: bool,
}

impl From<MemoryState> for MemoryStateResponse {
    fn from(state: MemoryState) -> Self {
        Self {
            due_at: state.due_at(),
            is_new: state.is_new(),
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DueResponse {
    pub user_id: String,
    pub cards: Vec<MemoryStateResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub user_id: String,
    pub card_id: String,
    pub options: Vec<IntervalPreview>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSizeResponse {
    pub user_id: String,
    pub session_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl From<&SpacedRepetitionError> for ErrorResponse {
    fn from(err: &SpacedRepetitionError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}
