//! On-disk layout of the bus
//!
//! ```text
//! {root}/
//!   inbox/{agent}/       - messages pending an agent's consumption
//!   outbox/{agent}/      - messages an agent has published
//!   locks/{agent}/       - messages claimed by a running consumer
//!   dlq/                 - quarantined messages + `*.reason.txt` sidecars
//!   tmp/                 - staging area for atomic writes
//!   processed/{agent}    - append-only log of acked message ids
//! ```
//!
//! Every agent-derived component goes through [`sanitize_component`].
//! Directories are created lazily on first use. The whole tree must sit on
//! one filesystem volume.

use crate::io::error::BusError;
use crate::text::sanitize_component;
use std::fs;
use std::path::{Path, PathBuf};

const INBOX_DIR: &str = "inbox";
const OUTBOX_DIR: &str = "outbox";
const LOCKS_DIR: &str = "locks";
const DLQ_DIR: &str = "dlq";
const TMP_DIR: &str = "tmp";
const PROCESSED_DIR: &str = "processed";

/// Which per-agent mailbox a message is delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mailbox {
    Inbox,
    Outbox,
}

impl Mailbox {
    fn dir_name(self) -> &'static str {
        match self {
            Mailbox::Inbox => INBOX_DIR,
            Mailbox::Outbox => OUTBOX_DIR,
        }
    }
}

/// Path addressing for one bus root
#[derive(Debug, Clone)]
pub struct BusLayout {
    root: PathBuf,
    max_component_len: usize,
}

impl BusLayout {
    pub fn new(root: impl Into<PathBuf>, max_component_len: usize) -> Self {
        Self {
            root: root.into(),
            max_component_len,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_component_len(&self) -> usize {
        self.max_component_len
    }

    /// Directory name used for `agent_id`
    pub fn agent_component(&self, agent_id: &str) -> String {
        sanitize_component(agent_id, self.max_component_len)
    }

    pub fn mailbox_dir(&self, mailbox: Mailbox, agent_id: &str) -> PathBuf {
        self.root
            .join(mailbox.dir_name())
            .join(self.agent_component(agent_id))
    }

    pub fn inbox_dir(&self, agent_id: &str) -> PathBuf {
        self.mailbox_dir(Mailbox::Inbox, agent_id)
    }

    pub fn outbox_dir(&self, agent_id: &str) -> PathBuf {
        self.mailbox_dir(Mailbox::Outbox, agent_id)
    }

    pub fn locks_dir(&self, agent_id: &str) -> PathBuf {
        self.root
            .join(LOCKS_DIR)
            .join(self.agent_component(agent_id))
    }

    pub fn dlq_dir(&self) -> PathBuf {
        self.root.join(DLQ_DIR)
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.root.join(PROCESSED_DIR)
    }

    /// One message id per line, append-only
    pub fn processed_log(&self, agent_id: &str) -> PathBuf {
        self.processed_dir().join(self.agent_component(agent_id))
    }

    /// Lock file serializing appends to [`BusLayout::processed_log`]
    ///
    /// The leading dot keeps it from colliding with any sanitized agent name.
    pub fn processed_lock(&self, agent_id: &str) -> PathBuf {
        self.processed_dir()
            .join(format!(".{}.lock", self.agent_component(agent_id)))
    }

    pub fn ensure_mailbox(&self, mailbox: Mailbox, agent_id: &str) -> Result<PathBuf, BusError> {
        ensure_dir(self.mailbox_dir(mailbox, agent_id))
    }

    pub fn ensure_locks(&self, agent_id: &str) -> Result<PathBuf, BusError> {
        ensure_dir(self.locks_dir(agent_id))
    }

    pub fn ensure_dlq(&self) -> Result<PathBuf, BusError> {
        ensure_dir(self.dlq_dir())
    }

    pub fn ensure_tmp(&self) -> Result<PathBuf, BusError> {
        ensure_dir(self.tmp_dir())
    }

    pub fn ensure_processed(&self) -> Result<PathBuf, BusError> {
        ensure_dir(self.processed_dir())
    }
}

fn ensure_dir(dir: PathBuf) -> Result<PathBuf, BusError> {
    fs::create_dir_all(&dir).map_err(|e| BusError::io(&dir, e))?;
    Ok(dir)
}

/// `*.json` files directly inside `dir`, sorted by file name
///
/// A missing directory is an empty listing. Dot-files and anything that is
/// not a regular file are skipped.
pub(crate) fn list_json_files(dir: &Path) -> Result<Vec<PathBuf>, BusError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(BusError::io(dir, e)),
    };

    let mut files = Vec::new();
    for entry in entries {
        // Entries can vanish between readdir and stat under concurrent pollers
        let Ok(entry) = entry else { continue };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            files.push(entry.path());
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
