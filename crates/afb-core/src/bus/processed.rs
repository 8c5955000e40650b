//! Per-agent idempotency index
//!
//! Durable form: `processed/{agent}`, one acked message id per line, only
//! ever appended to. In-memory form: a set per agent, built from the log on
//! first access and topped up from the unread tail whenever a lookup misses,
//! so ids acked by another process are still honoured.
//!
//! Appends hold both the agent's in-process mutex and an advisory lock on
//! `processed/.{agent}.lock`. Each agent has its own mutex, so waiting on one
//! agent's file lock never stalls lookups for another.

use crate::io::atomic::append_line_durable;
use crate::io::error::BusError;
use crate::io::lock::acquire_lock;
use crate::layout::BusLayout;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct AgentLog {
    ids: HashSet<String>,
    /// Bytes of the log already folded into `ids`
    offset: u64,
}

impl AgentLog {
    /// Fold any complete lines past `offset` into the set
    fn refresh(&mut self, path: &Path) -> Result<(), BusError> {
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(BusError::io(path, e)),
        };

        let len = file.metadata().map_err(|e| BusError::io(path, e))?.len();
        if len < self.offset {
            // Log was truncated out from under us; rebuild from scratch.
            self.ids.clear();
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(());
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| BusError::io(path, e))?;
        let mut tail = Vec::new();
        file.read_to_end(&mut tail)
            .map_err(|e| BusError::io(path, e))?;

        // A concurrent appender may have written half a line; leave it for later.
        let Some(last_newline) = tail.iter().rposition(|b| *b == b'\n') else {
            return Ok(());
        };
        let complete = &tail[..=last_newline];
        // Ids are stored verbatim; only the line terminator is stripped.
        for id in String::from_utf8_lossy(complete).lines() {
            if !id.is_empty() {
                self.ids.insert(id.to_string());
            }
        }
        self.offset += complete.len() as u64;
        Ok(())
    }
}

/// Idempotency index for every agent on one bus root
#[derive(Debug)]
pub struct ProcessedIndex {
    layout: BusLayout,
    lock_retries: u32,
    agents: Mutex<HashMap<String, Arc<Mutex<AgentLog>>>>,
}

impl ProcessedIndex {
    pub fn new(layout: BusLayout, lock_retries: u32) -> Self {
        Self {
            layout,
            lock_retries,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// The agent's log state; the map lock is held only for the lookup
    fn agent_log(&self, agent_id: &str) -> Arc<Mutex<AgentLog>> {
        let key = self.layout.agent_component(agent_id);
        let mut agents = self.agents.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(agents.entry(key).or_default())
    }

    fn lock_log(log: &Mutex<AgentLog>) -> MutexGuard<'_, AgentLog> {
        log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `message_id` has ever been acked by `agent_id`
    pub fn contains(&self, agent_id: &str, message_id: &str) -> Result<bool, BusError> {
        let path = self.layout.processed_log(agent_id);
        let entry = self.agent_log(agent_id);
        let mut log = Self::lock_log(&entry);

        if log.ids.contains(message_id) {
            return Ok(true);
        }
        log.refresh(&path)?;
        Ok(log.ids.contains(message_id))
    }

    /// Durably record `message_id` as processed by `agent_id`
    ///
    /// Recording an id twice is harmless; the second call does not append.
    pub fn record(&self, agent_id: &str, message_id: &str) -> Result<(), BusError> {
        let path = self.layout.processed_log(agent_id);
        self.layout.ensure_processed()?;

        let entry = self.agent_log(agent_id);
        let mut log = Self::lock_log(&entry);
        let _file_lock = acquire_lock(&self.layout.processed_lock(agent_id), self.lock_retries)?;

        log.refresh(&path)?;
        if log.ids.contains(message_id) {
            return Ok(());
        }

        append_line_durable(&path, message_id)?;
        log.ids.insert(message_id.to_string());
        Ok(())
    }

    /// Number of distinct ids acked by `agent_id`
    pub fn count(&self, agent_id: &str) -> Result<usize, BusError> {
        let path = self.layout.processed_log(agent_id);
        let entry = self.agent_log(agent_id);
        let mut log = Self::lock_log(&entry);
        log.refresh(&path)?;
        Ok(log.ids.len())
    }
}
