//! Typed bus messages with strict validation
//!
//! Messages are serialized as one JSON object per file, discriminated by
//! `message_type`. Every variant rejects fields it does not declare: a
//! producer that needs new fields must bump `schema_version` instead of
//! relying on consumers to ignore them.

use crate::text::sanitize_component;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// The only schema version this crate produces and accepts
pub const SCHEMA_VERSION: &str = "1.0";

/// Filename timestamp layout: sortable, UTC, millisecond precision, no colons
const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S_%3fZ";

/// Rendered width of [`FILE_TIMESTAMP_FORMAT`]
const FILE_TIMESTAMP_LEN: usize = 20;

/// Why a message file could not be turned into a [`Message`]
#[derive(Debug, Error)]
pub enum MessageError {
    /// Bytes are not well-formed JSON
    #[error("Invalid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    /// JSON is well-formed but does not match the schema
    #[error("Schema validation failed: {0}")]
    Validation(String),
}

impl MessageError {
    fn from_serde(err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Data => MessageError::Validation(err.to_string()),
            _ => MessageError::Decode(err),
        }
    }
}

/// Discriminator values carried in `message_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    TaskAssignment,
    StatusUpdate,
    TaskComplete,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::TaskAssignment => "task_assignment",
            MessageType::StatusUpdate => "status_update",
            MessageType::TaskComplete => "task_complete",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority of an assignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Retry settings the assignee should honour for its own work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_seconds() -> f64 {
    5.0
}

/// Progress states reported by [`StatusUpdate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Blocked,
    Failed,
    Completed,
}

/// Terminal states reported by [`TaskComplete`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

fn new_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Orchestrator hands a task to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskAssignment {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub workflow_id: String,
    pub task_id: String,
    /// Sender
    pub agent_id: String,
    #[serde(default = "new_message_id")]
    pub message_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub assigned_to: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

/// Agent reports progress on a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatusUpdate {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub workflow_id: String,
    pub task_id: String,
    pub agent_id: String,
    #[serde(default = "new_message_id")]
    pub message_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: TaskStatus,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
}

/// Agent reports the final outcome of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskComplete {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub workflow_id: String,
    pub task_id: String,
    pub agent_id: String,
    #[serde(default = "new_message_id")]
    pub message_id: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub status: CompletionStatus,
    #[serde(default)]
    pub results: Map<String, Value>,
}

/// A message on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum Message {
    TaskAssignment(TaskAssignment),
    StatusUpdate(StatusUpdate),
    TaskComplete(TaskComplete),
}

macro_rules! each_variant {
    ($msg:expr, $m:ident => $body:expr) => {
        match $msg {
            Message::TaskAssignment($m) => $body,
            Message::StatusUpdate($m) => $body,
            Message::TaskComplete($m) => $body,
        }
    };
}

impl Message {
    /// New assignment with a fresh `message_id` and `created_at = now`
    pub fn task_assignment(
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        assigned_to: impl Into<String>,
    ) -> Self {
        Message::TaskAssignment(TaskAssignment {
            schema_version: default_schema_version(),
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            message_id: new_message_id(),
            created_at: Utc::now(),
            idempotency_key: None,
            metadata: Map::new(),
            assigned_to: assigned_to.into(),
            priority: Priority::default(),
            inputs: Map::new(),
            timeout_seconds: None,
            retry_policy: RetryPolicy::default(),
        })
    }

    /// New progress report with a fresh `message_id` and `created_at = now`
    pub fn status_update(
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        status: TaskStatus,
        progress_percent: u8,
    ) -> Self {
        Message::StatusUpdate(StatusUpdate {
            schema_version: default_schema_version(),
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            message_id: new_message_id(),
            created_at: Utc::now(),
            idempotency_key: None,
            metadata: Map::new(),
            status,
            progress_percent,
            current_step: None,
        })
    }

    /// New completion report with a fresh `message_id` and `created_at = now`
    pub fn task_complete(
        workflow_id: impl Into<String>,
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        status: CompletionStatus,
    ) -> Self {
        Message::TaskComplete(TaskComplete {
            schema_version: default_schema_version(),
            workflow_id: workflow_id.into(),
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            message_id: new_message_id(),
            created_at: Utc::now(),
            idempotency_key: None,
            metadata: Map::new(),
            status,
            results: Map::new(),
        })
    }

    /// Replace the generated `message_id`, e.g. to re-send the same logical message
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        let id = message_id.into();
        each_variant!(&mut self, m => m.message_id = id);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        each_variant!(&mut self, m => m.idempotency_key = Some(key));
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        each_variant!(&mut self, m => { m.metadata.insert(key, value); });
        self
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::TaskAssignment(_) => MessageType::TaskAssignment,
            Message::StatusUpdate(_) => MessageType::StatusUpdate,
            Message::TaskComplete(_) => MessageType::TaskComplete,
        }
    }

    pub fn schema_version(&self) -> &str {
        each_variant!(self, m => &m.schema_version)
    }

    pub fn workflow_id(&self) -> &str {
        each_variant!(self, m => &m.workflow_id)
    }

    pub fn task_id(&self) -> &str {
        each_variant!(self, m => &m.task_id)
    }

    pub fn agent_id(&self) -> &str {
        each_variant!(self, m => &m.agent_id)
    }

    pub fn message_id(&self) -> &str {
        each_variant!(self, m => &m.message_id)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        each_variant!(self, m => m.created_at)
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        each_variant!(self, m => m.idempotency_key.as_deref())
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        each_variant!(self, m => &m.metadata)
    }

    /// Parse and validate raw file contents
    ///
    /// # Errors
    ///
    /// `MessageError::Decode` for malformed JSON; `MessageError::Validation`
    /// for an unknown `message_type`, a missing or undeclared field, or a
    /// value that fails [`Message::validate`].
    pub fn parse(bytes: &[u8]) -> Result<Self, MessageError> {
        let message: Message = serde_json::from_slice(bytes).map_err(MessageError::from_serde)?;
        message.validate()?;
        Ok(message)
    }

    /// Semantic checks serde cannot express
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.schema_version() != SCHEMA_VERSION {
            return Err(MessageError::Validation(format!(
                "unsupported schema_version {:?} (expected {SCHEMA_VERSION:?})",
                self.schema_version()
            )));
        }

        let mut required = vec![
            ("workflow_id", self.workflow_id()),
            ("task_id", self.task_id()),
            ("agent_id", self.agent_id()),
            ("message_id", self.message_id()),
        ];
        if let Message::TaskAssignment(m) = self {
            required.push(("assigned_to", m.assigned_to.as_str()));
        }
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(MessageError::Validation(format!(
                    "field `{field}` must not be empty"
                )));
            }
        }

        if self.message_id().chars().any(char::is_control) {
            return Err(MessageError::Validation(
                "field `message_id` must not contain control characters".to_string(),
            ));
        }

        if let Message::StatusUpdate(m) = self
            && m.progress_percent > 100
        {
            return Err(MessageError::Validation(format!(
                "progress_percent must be within 0..=100, got {}",
                m.progress_percent
            )));
        }

        Ok(())
    }

    /// Bus filename for this message sent at `sent_at`
    ///
    /// `{YYYYMMDDThhmmss}_{millis}Z_{message_id}_{message_type}.json`. The
    /// timestamp only approximates arrival order; uniqueness comes from the
    /// message id.
    pub fn file_name(&self, sent_at: DateTime<Utc>, max_component_len: usize) -> String {
        format!(
            "{}{}",
            sent_at.format(FILE_TIMESTAMP_FORMAT),
            self.file_suffix(max_component_len)
        )
    }

    /// The `_{message_id}_{message_type}.json` tail shared by every file
    /// holding this message
    ///
    /// Distinct ids can share a suffix once sanitized (`a/b` and `a_b`), so
    /// a matching name alone does not prove a file holds this message.
    pub fn file_suffix(&self, max_component_len: usize) -> String {
        format!(
            "_{}_{}.json",
            sanitize_component(self.message_id(), max_component_len),
            self.message_type()
        )
    }
}

/// Suffix of a name produced by [`Message::file_name`], or `None` if `name`
/// does not start with a bus timestamp (hand-written files)
pub fn generated_file_suffix(name: &str) -> Option<&str> {
    let (stamp, rest) = name.split_at_checked(FILE_TIMESTAMP_LEN)?;
    let b = stamp.as_bytes();
    let digits = |range: std::ops::Range<usize>| b[range].iter().all(u8::is_ascii_digit);
    let shaped = digits(0..8)
        && b[8] == b'T'
        && digits(9..15)
        && b[15] == b'_'
        && digits(16..19)
        && b[19] == b'Z';
    shaped.then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn assignment_json() -> Value {
        json!({
            "schema_version": "1.0",
            "message_type": "task_assignment",
            "workflow_id": "wf-1",
            "task_id": "t-1",
            "agent_id": "orchestrator",
            "message_id": "msg-1",
            "created_at": "2026-02-11T14:30:00.123Z",
            "assigned_to": "agent-a",
            "priority": "high",
            "inputs": {"path": "src/lib.rs"},
            "timeout_seconds": 600
        })
    }

    fn parse_value(value: &Value) -> Result<Message, MessageError> {
        Message::parse(&serde_json::to_vec(value).unwrap())
    }

    #[test]
    fn test_parse_task_assignment() {
        let msg = parse_value(&assignment_json()).unwrap();
        assert_eq!(msg.message_type(), MessageType::TaskAssignment);
        assert_eq!(msg.task_id(), "t-1");
        assert_eq!(msg.message_id(), "msg-1");
        match msg {
            Message::TaskAssignment(a) => {
                assert_eq!(a.assigned_to, "agent-a");
                assert_eq!(a.priority, Priority::High);
                assert_eq!(a.timeout_seconds, Some(600));
                assert_eq!(a.retry_policy, RetryPolicy::default());
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn test_parse_status_update() {
        let msg = parse_value(&json!({
            "message_type": "status_update",
            "workflow_id": "wf-1",
            "task_id": "t-1",
            "agent_id": "agent-a",
            "status": "in_progress",
            "progress_percent": 40,
            "current_step": "running tests"
        }))
        .unwrap();
        let Message::StatusUpdate(update) = msg else {
            panic!("expected status update");
        };
        assert_eq!(update.status, TaskStatus::InProgress);
        assert_eq!(update.progress_percent, 40);
        assert_eq!(update.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_parse_task_complete() {
        let msg = parse_value(&json!({
            "message_type": "task_complete",
            "workflow_id": "wf-1",
            "task_id": "t-1",
            "agent_id": "agent-a",
            "status": "failed",
            "results": {"error": "timeout"}
        }))
        .unwrap();
        let Message::TaskComplete(done) = msg else {
            panic!("expected task complete");
        };
        assert_eq!(done.status, CompletionStatus::Failed);
        assert_eq!(done.results["error"], "timeout");
    }

    #[test]
    fn test_parse_fills_missing_id_and_timestamp() {
        let mut value = assignment_json();
        let obj = value.as_object_mut().unwrap();
        obj.remove("message_id");
        obj.remove("created_at");

        let msg = parse_value(&value).unwrap();
        assert!(uuid::Uuid::parse_str(msg.message_id()).is_ok());
    }

    #[test]
    fn test_invalid_json_is_decode_error() {
        let err = Message::parse(b"{not-json").unwrap_err();
        assert!(matches!(err, MessageError::Decode(_)));
        assert!(err.to_string().starts_with("Invalid JSON: "));
    }

    #[test]
    fn test_truncated_json_is_decode_error() {
        let err = Message::parse(br#"{"message_type": "task_assignment""#).unwrap_err();
        assert!(matches!(err, MessageError::Decode(_)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut value = assignment_json();
        value["surprise"] = json!(true);
        let err = parse_value(&value).unwrap_err();
        assert!(matches!(err, MessageError::Validation(_)));
        assert!(err.to_string().contains("surprise"));
    }

    #[test]
    fn test_unknown_nested_field_rejected() {
        let mut value = assignment_json();
        value["retry_policy"] = json!({"max_attempts": 2, "jitter": true});
        assert!(matches!(
            parse_value(&value),
            Err(MessageError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let mut value = assignment_json();
        value.as_object_mut().unwrap().remove("workflow_id");
        let err = parse_value(&value).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("Schema validation failed: "));
        assert!(text.contains("workflow_id"));
    }

    #[test]
    fn test_unknown_message_type_rejected() {
        let mut value = assignment_json();
        value["message_type"] = json!("code_review");
        assert!(matches!(
            parse_value(&value),
            Err(MessageError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_message_type_rejected() {
        let mut value = assignment_json();
        value.as_object_mut().unwrap().remove("message_type");
        assert!(matches!(
            parse_value(&value),
            Err(MessageError::Validation(_))
        ));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            Message::parse(b"[1, 2, 3]"),
            Err(MessageError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_identifier_rejected() {
        let mut value = assignment_json();
        value["task_id"] = json!("  ");
        let err = parse_value(&value).unwrap_err();
        assert!(err.to_string().contains("task_id"));
    }

    #[test]
    fn test_wrong_schema_version_rejected() {
        let mut value = assignment_json();
        value["schema_version"] = json!("2.0");
        assert!(matches!(
            parse_value(&value),
            Err(MessageError::Validation(_))
        ));
    }

    #[test]
    fn test_progress_over_100_rejected() {
        let msg = Message::status_update("wf", "t", "a", TaskStatus::InProgress, 101);
        assert!(msg.validate().is_err());
    }

    #[test]
    fn test_constructor_generates_unique_ids() {
        let a = Message::task_assignment("wf", "t", "orch", "agent-a");
        let b = Message::task_assignment("wf", "t", "orch", "agent-a");
        assert_ne!(a.message_id(), b.message_id());
        assert_eq!(a.schema_version(), SCHEMA_VERSION);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let msg = Message::task_complete("wf", "t", "agent-a", CompletionStatus::Completed)
            .with_message_id("fixed-id")
            .with_idempotency_key("wf:t:done")
            .with_metadata("attempt", json!(2));
        assert_eq!(msg.message_id(), "fixed-id");
        assert_eq!(msg.idempotency_key(), Some("wf:t:done"));
        assert_eq!(msg.metadata()["attempt"], 2);
    }

    #[test]
    fn test_serialized_form_reparses() {
        let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a")
            .with_metadata("origin", json!("planner"));
        let bytes = serde_json::to_vec(&msg).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains(r#""message_type":"task_assignment""#));
        assert_eq!(Message::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_file_name_format() {
        let sent_at = Utc.with_ymd_and_hms(2026, 2, 11, 14, 30, 5).unwrap()
            + chrono::Duration::milliseconds(42);
        let msg = Message::task_assignment("wf", "t", "orch", "agent-a").with_message_id("abc");
        assert_eq!(
            msg.file_name(sent_at, 64),
            "20260211T143005_042Z_abc_task_assignment.json"
        );
    }

    #[test]
    fn test_generated_file_suffix() {
        let msg = Message::task_assignment("wf", "t", "orch", "agent-a").with_message_id("x_1");
        let name = msg.file_name(Utc::now(), 64);
        assert_eq!(generated_file_suffix(&name), Some("_x_1_task_assignment.json"));
        assert_eq!(generated_file_suffix(&name), Some(msg.file_suffix(64).as_str()));

        assert_eq!(generated_file_suffix("bad.json"), None);
        assert_eq!(generated_file_suffix("00000000T000000_000Z"), Some(""));
        assert_eq!(generated_file_suffix("2026021XT143005_042Z_a.json"), None);
        assert_eq!(generated_file_suffix("é0260211T143005_042Z_a.json"), None);
    }

    #[test]
    fn test_file_name_sanitizes_message_id() {
        let msg = Message::task_assignment("wf", "t", "orch", "agent-a").with_message_id("../x:y");
        let suffix = msg.file_suffix(64);
        assert_eq!(suffix, "_x_y_task_assignment.json");
        assert!(!msg.file_name(Utc::now(), 64).contains('/'));
    }
}
