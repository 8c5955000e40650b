//! Filesystem primitives for the message bus
//!
//! - **Atomic placement**: temp write + fsync + rename, never a partial file
//! - **Durable append**: flushed and fsynced line appends for the processed log
//! - **File locking**: advisory locks with exponential backoff retry
//! - **Digests**: BLAKE3 prefixes that keep truncated names distinct
//!
//! All of these assume one filesystem volume for the whole bus root.

pub mod atomic;
pub mod error;
pub mod hash;
pub mod lock;

pub use atomic::write_atomic;
pub use error::BusError;
