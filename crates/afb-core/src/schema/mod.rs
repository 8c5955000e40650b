//! Message schema for the file bus
//!
//! One tagged union, strict on unknown fields. Parsing failures are split
//! into decode errors (not JSON) and validation errors (JSON, wrong shape).

mod message;

pub use message::{
    CompletionStatus, Message, MessageError, MessageType, Priority, RetryPolicy, SCHEMA_VERSION,
    StatusUpdate, TaskAssignment, TaskComplete, TaskStatus, generated_file_suffix,
};
