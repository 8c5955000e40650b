//! The file-based message bus
//!
//! Producers deposit typed messages into per-agent mailboxes with
//! [`MessageBus::send_to_inbox`] / [`MessageBus::send_to_outbox`]. Consumers
//! drive the claim cycle:
//!
//! 1. [`MessageBus::poll`] renames inbox files into the agent's lock
//!    directory (rename success = exclusive claim), parses them, quarantines
//!    bad ones and silently drops ids already acked.
//! 2. [`MessageBus::ack`] records the id in the idempotency index and removes
//!    the claim, or [`MessageBus::fail`] moves the claim to the DLQ with a
//!    reason sidecar.
//! 3. [`MessageBus::replay`] moves DLQ entries back into an inbox.
//!
//! Every operation is synchronous filesystem I/O. Any number of threads or
//! processes may share one root, provided the whole root sits on a single
//! volume. A consumer that crashes between poll and ack leaves its claim in
//! `locks/` until an operator calls [`MessageBus::requeue_claimed`].
//!
//! # Example
//!
//! ```rust,no_run
//! use agent_file_bus_core::bus::MessageBus;
//! use agent_file_bus_core::schema::Message;
//!
//! # fn main() -> Result<(), agent_file_bus_core::io::BusError> {
//! let bus = MessageBus::new("messages");
//! let msg = Message::task_assignment("wf-1", "t-1", "orchestrator", "agent-a");
//! bus.send_to_inbox("agent-a", &msg)?;
//!
//! for message in bus.poll("agent-a", 10)? {
//!     // ... do the work ...
//!     bus.ack("agent-a", &message)?;
//! }
//! # Ok(())
//! # }
//! ```

mod claim;
mod dlq;
mod processed;

pub use dlq::DlqEntry;
pub use processed::ProcessedIndex;

use crate::config::BusConfig;
use crate::io::{BusError, write_atomic};
use crate::layout::{BusLayout, Mailbox, list_json_files};
use crate::schema::{Message, MessageType};
use crate::text::DEFAULT_MAX_COMPONENT_LEN;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// (sanitized agent, message id, message type) of a message this process claimed
type ClaimKey = (String, String, MessageType);

/// Per-agent counters for operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStatus {
    /// Files waiting in the agent's inbox
    pub pending: usize,
    /// Files claimed and not yet acked or failed
    pub claimed: usize,
    /// Distinct ids in the agent's idempotency index
    pub processed: usize,
    /// Entries in the shared DLQ (all agents)
    pub quarantined: usize,
}

/// Handle on one bus root
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct MessageBus {
    layout: BusLayout,
    sync_directories: bool,
    processed: ProcessedIndex,
    claims: Mutex<HashMap<ClaimKey, PathBuf>>,
}

impl MessageBus {
    /// Bus rooted at `root` with default settings
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let config = BusConfig {
            root: root.into(),
            ..BusConfig::default()
        };
        Self::from_config(&config)
    }

    pub fn from_config(config: &BusConfig) -> Self {
        let max_len = if config.max_component_len == 0 {
            DEFAULT_MAX_COMPONENT_LEN
        } else {
            config.max_component_len
        };
        let layout = BusLayout::new(config.root.clone(), max_len);
        Self {
            processed: ProcessedIndex::new(layout.clone(), config.lock_retries),
            layout,
            sync_directories: config.sync_directories,
            claims: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self) -> &BusLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        self.layout.root()
    }

    /// Deliver `message` to `agent_id`'s inbox
    ///
    /// # Errors
    ///
    /// `BusError::InvalidMessage` if the message would not pass validation on
    /// the consumer side; `BusError::Io` / `BusError::Json` for write failures.
    pub fn send_to_inbox(&self, agent_id: &str, message: &Message) -> Result<PathBuf, BusError> {
        self.send(Mailbox::Inbox, agent_id, message)
    }

    /// Publish `message` into `agent_id`'s outbox
    pub fn send_to_outbox(&self, agent_id: &str, message: &Message) -> Result<PathBuf, BusError> {
        self.send(Mailbox::Outbox, agent_id, message)
    }

    fn send(&self, mailbox: Mailbox, agent_id: &str, message: &Message) -> Result<PathBuf, BusError> {
        message.validate().map_err(|e| BusError::InvalidMessage {
            reason: e.to_string(),
        })?;

        let dir = self.layout.ensure_mailbox(mailbox, agent_id)?;
        let tmp = self.layout.ensure_tmp()?;
        let target = dir.join(message.file_name(Utc::now(), self.layout.max_component_len()));

        let bytes = serde_json::to_vec_pretty(message).map_err(|e| BusError::Json {
            path: target.clone(),
            source: e,
        })?;
        write_atomic(&tmp, &target, &bytes, self.sync_directories)?;

        debug!(
            agent = %agent_id,
            mailbox = ?mailbox,
            message_id = %message.message_id(),
            message_type = %message.message_type(),
            "message sent"
        );
        Ok(target)
    }

    /// Whether `agent_id` has already acked `message_id`
    pub fn is_processed(&self, agent_id: &str, message_id: &str) -> Result<bool, BusError> {
        self.processed.contains(agent_id, message_id)
    }

    /// Snapshot of `agent_id`'s mailbox for operators
    pub fn status(&self, agent_id: &str) -> Result<MailboxStatus, BusError> {
        Ok(MailboxStatus {
            pending: list_json_files(&self.layout.inbox_dir(agent_id))?.len(),
            claimed: list_json_files(&self.layout.locks_dir(agent_id))?.len(),
            processed: self.processed.count(agent_id)?,
            quarantined: list_json_files(&self.layout.dlq_dir())?.len(),
        })
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<ClaimKey, PathBuf>> {
        self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim_key(&self, agent_id: &str, message: &Message) -> ClaimKey {
        (
            self.layout.agent_component(agent_id),
            message.message_id().to_string(),
            message.message_type(),
        )
    }
}
