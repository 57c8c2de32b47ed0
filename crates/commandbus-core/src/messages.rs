//! Wire formats for the queue body and reply body (spec §6). These are the
//! only JSON shapes the library itself understands; handler `data`/`result`
//! payloads are opaque `serde_json::Value` passed through unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMessage {
    pub command_id: Uuid,
    #[serde(rename = "type")]
    pub command_type: String,
    pub domain: String,
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub reply_to: String,
    pub created_at: DateTime<Utc>,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyOutcome {
    Success,
    Canceled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: String,
    pub message: String,
    pub class: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyMessage {
    pub command_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub domain: String,
    #[serde(rename = "type")]
    pub reply_type: String,
    pub outcome: ReplyOutcome,
    pub completed_at: DateTime<Utc>,
    pub data: serde_json::Value,
    pub error: Option<ReplyError>,
}

impl ReplyMessage {
    pub fn success(
        command_id: Uuid,
        correlation_id: Option<Uuid>,
        domain: impl Into<String>,
        command_type: &str,
        data: serde_json::Value,
    ) -> Self {
        Self {
            command_id,
            correlation_id,
            domain: domain.into(),
            reply_type: format!("{command_type}Response"),
            outcome: ReplyOutcome::Success,
            completed_at: Utc::now(),
            data,
            error: None,
        }
    }

    pub fn failed(
        command_id: Uuid,
        correlation_id: Option<Uuid>,
        domain: impl Into<String>,
        command_type: &str,
        error: ReplyError,
    ) -> Self {
        Self {
            command_id,
            correlation_id,
            domain: domain.into(),
            reply_type: format!("{command_type}Response"),
            outcome: ReplyOutcome::Failed,
            completed_at: Utc::now(),
            data: serde_json::Value::Null,
            error: Some(error),
        }
    }

    pub fn canceled(
        command_id: Uuid,
        correlation_id: Option<Uuid>,
        domain: impl Into<String>,
        command_type: &str,
    ) -> Self {
        Self {
            command_id,
            correlation_id,
            domain: domain.into(),
            reply_type: format!("{command_type}Response"),
            outcome: ReplyOutcome::Canceled,
            completed_at: Utc::now(),
            data: serde_json::Value::Null,
            error: None,
        }
    }
}
