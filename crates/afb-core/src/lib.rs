//! Durable, file-based message bus for an orchestrator and its agent workers
//!
//! Processes that share nothing but a directory exchange typed messages
//! through it, with no broker daemon:
//!
//! - Writes are atomic (temp file + fsync + rename); readers never see half
//!   a message
//! - Consumers claim messages by renaming them into a per-agent lock
//!   directory, so each message goes to exactly one poller
//! - A per-agent append-only log of acked ids suppresses redelivery across
//!   restarts
//! - Malformed or failed messages are quarantined in a DLQ with a reason
//!   sidecar and can be replayed
//!
//! Start with [`bus::MessageBus`].

pub mod bus;
pub mod config;
pub mod home;
pub mod io;
pub mod layout;
pub mod logging;
pub mod schema;
pub mod text;

pub use bus::{DlqEntry, MailboxStatus, MessageBus};
pub use io::BusError;
pub use schema::{Message, MessageError, MessageType};
