//! # Request Data Model
//!
//! In-flight request types owned by the orchestrator: the tracked
//! [`DialogRequest`], the inbound channel payload, and the typed results
//! stages report back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single inbound utterance as delivered by a channel adapter.
///
/// Channel adapters (CLI loop, HTTP handler, chat-bot webhook) translate
/// their transport-specific message into this shape before calling
/// `Agent::register_msg`. Utterance validation belongs to the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub utterance: String,
    pub user_id: String,
    pub device_type: String,
    pub channel_type: String,
    pub location: String,
    /// Absolute deadline for the reply. `None` falls back to the configured
    /// response timeout for `require_response` callers.
    pub deadline: Option<DateTime<Utc>>,
    /// When set, the caller blocks on the correlation entry until the
    /// responder stage resolves it (or the deadline releases it).
    pub require_response: bool,
    /// Correlation id supplied by the transport; generated when absent.
    pub correlation_id: Option<Uuid>,
}

impl InboundMessage {
    pub fn new(utterance: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            utterance: utterance.into(),
            user_id: user_id.into(),
            device_type: "unknown".to_string(),
            channel_type: "unknown".to_string(),
            location: String::new(),
            deadline: None,
            require_response: true,
            correlation_id: None,
        }
    }
}

/// Tracked unit of work for one utterance.
///
/// Created by the agent at `register_msg`, exclusively mutated by the agent
/// until terminal, evicted once resolved and consumed or once the deadline
/// expires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogRequest {
    pub request_id: Uuid,
    pub utterance: String,
    pub user_id: String,
    pub device_type: String,
    pub channel_type: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub require_response: bool,
}

impl DialogRequest {
    pub fn from_message(message: &InboundMessage) -> Self {
        Self {
            request_id: message.correlation_id.unwrap_or_else(Uuid::new_v4),
            utterance: message.utterance.clone(),
            user_id: message.user_id.clone(),
            device_type: message.device_type.clone(),
            channel_type: message.channel_type.clone(),
            location: message.location.clone(),
            created_at: Utc::now(),
            deadline: message.deadline,
            require_response: message.require_response,
        }
    }

    /// Check whether the deadline has already elapsed
    pub fn deadline_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Outcome of one stage invocation for one request.
///
/// Connector failures are carried as data so fan-in can proceed with the
/// remaining branches instead of tearing down the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageResult {
    Success { payload: Value },
    Failure { message: String },
    TimedOut,
}

impl StageResult {
    pub fn success(payload: Value) -> Self {
        Self::Success { payload }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Successful payload, if any
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Success { payload } => Some(payload),
            _ => None,
        }
    }
}

/// Final reply delivered through the correlation store to a waiting adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedReply {
    pub request_id: Uuid,
    pub result: StageResult,
}

/// Result of `Agent::register_msg`
#[derive(Debug, Clone, PartialEq)]
pub enum Registration {
    /// Fire-and-forget request: dispatched into the pipeline, no reply wait
    Dispatched { request_id: Uuid },
    /// Resolved reply, or a timeout result when the deadline cut the
    /// request short — including a deadline already elapsed at intake,
    /// where nothing was dispatched at all
    Resolved(ResolvedReply),
}

impl Registration {
    pub fn request_id(&self) -> Uuid {
        match self {
            Self::Dispatched { request_id } => *request_id,
            Self::Resolved(reply) => reply.request_id,
        }
    }

    pub fn reply(&self) -> Option<&ResolvedReply> {
        match self {
            Self::Dispatched { .. } => None,
            Self::Resolved(reply) => Some(reply),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_correlation_id_generated_when_absent() {
        let message = InboundMessage::new("hello", "user-1");
        let a = DialogRequest::from_message(&message);
        let b = DialogRequest::from_message(&message);
        assert_ne!(a.request_id, b.request_id);
    }

    #[test]
    fn test_supplied_correlation_id_preserved() {
        let id = Uuid::new_v4();
        let mut message = InboundMessage::new("hello", "user-1");
        message.correlation_id = Some(id);
        assert_eq!(DialogRequest::from_message(&message).request_id, id);
    }

    #[test]
    fn test_deadline_expiry_check() {
        let mut message = InboundMessage::new("hello", "user-1");
        message.deadline = Some(Utc::now() - Duration::seconds(1));
        let request = DialogRequest::from_message(&message);
        assert!(request.deadline_expired(Utc::now()));

        message.deadline = Some(Utc::now() + Duration::seconds(60));
        let request = DialogRequest::from_message(&message);
        assert!(!request.deadline_expired(Utc::now()));
    }

    #[test]
    fn test_stage_result_serde_shape() {
        let result = StageResult::success(serde_json::json!({"text": "hi"}));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["payload"]["text"], "hi");

        let timeout: StageResult =
            serde_json::from_value(serde_json::json!({"outcome": "timed_out"})).unwrap();
        assert!(timeout.is_timeout());
    }
}
