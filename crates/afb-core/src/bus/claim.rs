//! Claim/poll engine and ack
//!
//! Renaming `inbox/{agent}/X` to `locks/{agent}/X` is the consumer mutex:
//! exactly one racing poller sees the rename succeed, the rest get
//! `NotFound` and move on.

use super::MessageBus;
use crate::io::BusError;
use crate::io::atomic::rename_file;
use crate::layout::{Mailbox, list_json_files};
use crate::schema::{Message, generated_file_suffix};
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What to do with one freshly claimed file
enum Inspection {
    Deliver(Message),
    Quarantined,
    Duplicate,
}

impl MessageBus {
    /// Claim and return up to `max_messages` new messages for `agent_id`
    ///
    /// Candidates are visited in filename order, which approximates arrival
    /// order. Files another poller claims first are skipped. Malformed files
    /// are quarantined, ids already acked are deleted, and neither counts
    /// toward `max_messages` nor surfaces as an error.
    ///
    /// Returned messages stay claimed until [`MessageBus::ack`] or
    /// [`MessageBus::fail`].
    ///
    /// # Errors
    ///
    /// Filesystem failures propagate. If some messages were already claimed
    /// in this call, those are returned instead and the failure is logged, so
    /// no claim is left without an owner that knows about it.
    pub fn poll(&self, agent_id: &str, max_messages: usize) -> Result<Vec<Message>, BusError> {
        let mut delivered = Vec::new();
        if max_messages == 0 {
            return Ok(delivered);
        }

        let candidates = list_json_files(&self.layout.inbox_dir(agent_id))?;
        if candidates.is_empty() {
            return Ok(delivered);
        }
        let locks_dir = self.layout.ensure_locks(agent_id)?;
        let mut batch_ids = HashSet::new();

        for candidate in candidates {
            if delivered.len() >= max_messages {
                break;
            }
            match self.claim_one(agent_id, &candidate, &locks_dir, &mut batch_ids) {
                Ok(Some(message)) => delivered.push(message),
                Ok(None) => {}
                // Claims already made belong to this caller; returning the
                // error would leave them in locks/ with no owner. A persistent
                // failure reaches the caller unmodified on the next poll.
                Err(e) if !delivered.is_empty() => {
                    warn!(
                        agent = %agent_id,
                        error = %e,
                        claimed = delivered.len(),
                        "poll stopped early; returning messages already claimed"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(delivered)
    }

    fn claim_one(
        &self,
        agent_id: &str,
        candidate: &Path,
        locks_dir: &Path,
        batch_ids: &mut HashSet<String>,
    ) -> Result<Option<Message>, BusError> {
        let Some(file_name) = candidate.file_name() else {
            return Ok(None);
        };
        let claim_path = locks_dir.join(file_name);

        match rename_file(candidate, &claim_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(agent = %agent_id, file = ?file_name, "lost claim race; skipping");
                return Ok(None);
            }
            Err(e) => return Err(BusError::io(candidate, e)),
        }

        let message = match self.inspect_claim(agent_id, &claim_path)? {
            Inspection::Deliver(message) => message,
            Inspection::Quarantined | Inspection::Duplicate => return Ok(None),
        };

        if !batch_ids.insert(message.message_id().to_string()) {
            // Same id twice in one batch: put the copy back so it is judged
            // against the index once the first copy is acked or failed.
            rename_file(&claim_path, candidate).map_err(|e| BusError::io(&claim_path, e))?;
            debug!(
                agent = %agent_id,
                message_id = %message.message_id(),
                "released in-batch duplicate back to inbox"
            );
            return Ok(None);
        }

        self.claims()
            .insert(self.claim_key(agent_id, &message), claim_path);
        debug!(
            agent = %agent_id,
            message_id = %message.message_id(),
            message_type = %message.message_type(),
            "message claimed"
        );
        Ok(Some(message))
    }

    fn inspect_claim(&self, agent_id: &str, claim_path: &Path) -> Result<Inspection, BusError> {
        let bytes = fs::read(claim_path).map_err(|e| BusError::io(claim_path, e))?;

        let message = match Message::parse(&bytes) {
            Ok(message) => message,
            Err(e) => {
                self.quarantine(agent_id, claim_path, &e.to_string())?;
                return Ok(Inspection::Quarantined);
            }
        };

        if self.processed.contains(agent_id, message.message_id())? {
            remove_if_present(claim_path)?;
            debug!(
                agent = %agent_id,
                message_id = %message.message_id(),
                "dropped already-processed message"
            );
            return Ok(Inspection::Duplicate);
        }

        Ok(Inspection::Deliver(message))
    }

    /// Mark `message` processed for `agent_id` and release its claim
    ///
    /// The id is durably appended to the agent's idempotency log before the
    /// claim file is removed, so a crash in between can only leave a claim
    /// that the next poll after requeue drops as a duplicate. Acking a
    /// message whose claim is already gone is not an error.
    pub fn ack(&self, agent_id: &str, message: &Message) -> Result<(), BusError> {
        self.processed.record(agent_id, message.message_id())?;

        for claim in self.take_claims(agent_id, message)? {
            remove_if_present(&claim)?;
        }
        debug!(
            agent = %agent_id,
            message_id = %message.message_id(),
            "message acked"
        );
        Ok(())
    }

    /// Every claim file in `locks/{agent}` holding `message`, dropping it from the registry
    ///
    /// Combines this process's claim registry with a scan of the lock
    /// directory, which also finds claims made by another process or before a
    /// restart. Scanned files are only taken once their contents show the
    /// same message id and type; bus-named files whose suffix differs are
    /// skipped without being read.
    pub(super) fn take_claims(
        &self,
        agent_id: &str,
        message: &Message,
    ) -> Result<Vec<PathBuf>, BusError> {
        let mut found = Vec::new();
        if let Some(path) = self.claims().remove(&self.claim_key(agent_id, message))
            && path.exists()
        {
            found.push(path);
        }

        let suffix = message.file_suffix(self.layout.max_component_len());
        for path in list_json_files(&self.layout.locks_dir(agent_id))? {
            if found.contains(&path) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let candidate = generated_file_suffix(name).is_none_or(|tail| tail == suffix);
            if candidate && claim_holds(&path, message)? {
                found.push(path);
            }
        }
        Ok(found)
    }

    /// Claim files currently held in `locks/{agent}`
    pub fn list_claimed(&self, agent_id: &str) -> Result<Vec<PathBuf>, BusError> {
        list_json_files(&self.layout.locks_dir(agent_id))
    }

    /// Move every claim of `agent_id` back into its inbox
    ///
    /// Operator recovery for consumers that crashed between poll and ack.
    /// Never called by the bus itself: re-delivering a message whose side
    /// effects may already have happened is a human decision. Returns the
    /// number of files moved.
    pub fn requeue_claimed(&self, agent_id: &str) -> Result<usize, BusError> {
        let claimed = self.list_claimed(agent_id)?;
        if claimed.is_empty() {
            return Ok(0);
        }
        let inbox = self.layout.ensure_mailbox(Mailbox::Inbox, agent_id)?;
        let agent_key = self.layout.agent_component(agent_id);

        let mut moved = 0;
        for claim in claimed {
            let Some(name) = claim.file_name() else { continue };
            match rename_file(&claim, &inbox.join(name)) {
                Ok(()) => moved += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(BusError::io(&claim, e)),
            }
        }
        self.claims().retain(|(agent, _, _), _| *agent != agent_key);

        info!(agent = %agent_id, moved, "requeued claimed messages");
        Ok(moved)
    }
}

/// Whether the claim file at `path` holds `message` (same id and type)
fn claim_holds(path: &Path, message: &Message) -> Result<bool, BusError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(BusError::io(path, e)),
    };
    Ok(Message::parse(&bytes).is_ok_and(|held| {
        held.message_id() == message.message_id() && held.message_type() == message.message_type()
    }))
}

pub(super) fn remove_if_present(path: &Path) -> Result<(), BusError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BusError::io(path, e)),
    }
}
