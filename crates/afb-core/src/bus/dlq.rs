//! Dead-letter queue: quarantine, fail, replay
//!
//! Every DLQ entry is a pair:
//!
//! ```text
//! dlq/{random}--{original}.json          - the message bytes, untouched
//! dlq/{random}--{original}.reason.txt    - why it was quarantined
//! ```
//!
//! The random prefix keeps entries from colliding; the original name is
//! kept so replay can restore it.

use super::MessageBus;
use super::claim::remove_if_present;
use crate::io::atomic::rename_file;
use crate::io::{BusError, write_atomic};
use crate::layout::{Mailbox, list_json_files};
use crate::schema::Message;
use chrono::Utc;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const NAME_SEPARATOR: &str = "--";
const REASON_SUFFIX: &str = ".reason.txt";

/// One quarantined message, as seen by an operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqEntry {
    /// The quarantined message file
    pub path: PathBuf,
    /// Its `.reason.txt` sidecar
    pub reason_path: PathBuf,
    /// Sidecar contents, `None` if the sidecar is missing
    pub reason: Option<String>,
    /// File name the message had before quarantine
    pub original_name: String,
}

impl DlqEntry {
    /// First line of the sidecar: the quarantine reason itself
    pub fn summary(&self) -> Option<&str> {
        self.reason.as_deref().and_then(|r| r.lines().next())
    }
}

fn dlq_file_name(original: &str) -> String {
    format!(
        "{}{NAME_SEPARATOR}{original}",
        uuid::Uuid::new_v4().simple()
    )
}

/// Strip the random prefix added by [`dlq_file_name`], if present
fn original_name(dlq_name: &str) -> &str {
    match dlq_name.split_once(NAME_SEPARATOR) {
        Some((prefix, rest))
            if prefix.len() == 32 && prefix.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            rest
        }
        _ => dlq_name,
    }
}

fn reason_path_for(dlq_path: &Path) -> PathBuf {
    let name = dlq_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let stem = name.strip_suffix(".json").unwrap_or(name);
    dlq_path.with_file_name(format!("{stem}{REASON_SUFFIX}"))
}

impl MessageBus {
    /// Move a claimed file into the DLQ with a reason sidecar
    pub(super) fn quarantine(
        &self,
        agent_id: &str,
        claim_path: &Path,
        reason: &str,
    ) -> Result<PathBuf, BusError> {
        let dlq_dir = self.layout.ensure_dlq()?;
        let original = claim_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("message.json")
            .to_string();
        let dlq_path = dlq_dir.join(dlq_file_name(&original));

        // Sidecar first: a DLQ entry never appears without its reason.
        self.write_reason(&dlq_path, agent_id, &original, reason)?;
        if let Err(e) = rename_file(claim_path, &dlq_path) {
            remove_if_present(&reason_path_for(&dlq_path))?;
            return Err(BusError::io(claim_path, e));
        }

        warn!(
            agent = %agent_id,
            file = %original,
            reason = %reason,
            "message quarantined"
        );
        Ok(dlq_path)
    }

    fn write_reason(
        &self,
        dlq_path: &Path,
        agent_id: &str,
        original: &str,
        reason: &str,
    ) -> Result<(), BusError> {
        let body = format!(
            "{reason}\nagent_id: {agent_id}\nsource: {original}\nquarantined_at: {}\n",
            Utc::now().to_rfc3339()
        );
        let tmp = self.layout.ensure_tmp()?;
        write_atomic(
            &tmp,
            &reason_path_for(dlq_path),
            body.as_bytes(),
            self.sync_directories,
        )
    }

    /// Quarantine a claimed message the application could not process
    ///
    /// The claim file moves into the DLQ under a fresh name alongside a
    /// sidecar holding `reason`. If no claim file exists any more (already
    /// failed, or acked elsewhere), the message is serialized into the DLQ so
    /// the failure is still recorded.
    pub fn fail(&self, agent_id: &str, message: &Message, reason: &str) -> Result<(), BusError> {
        let claims = self.take_claims(agent_id, message)?;
        if !claims.is_empty() {
            for claim in claims {
                self.quarantine(agent_id, &claim, reason)?;
            }
            return Ok(());
        }

        let original = message.file_name(Utc::now(), self.layout.max_component_len());
        let dlq_path = self.layout.ensure_dlq()?.join(dlq_file_name(&original));
        let bytes = serde_json::to_vec_pretty(message).map_err(|e| BusError::Json {
            path: dlq_path.clone(),
            source: e,
        })?;
        let tmp = self.layout.ensure_tmp()?;
        self.write_reason(&dlq_path, agent_id, &original, reason)?;
        if let Err(e) = write_atomic(&tmp, &dlq_path, &bytes, self.sync_directories) {
            remove_if_present(&reason_path_for(&dlq_path))?;
            return Err(e);
        }

        warn!(
            agent = %agent_id,
            message_id = %message.message_id(),
            reason = %reason,
            "failed message had no claim file; serialized into DLQ"
        );
        Ok(())
    }

    /// Move up to `limit` DLQ entries back into `agent_id`'s inbox
    ///
    /// Without an agent this is a no-op: routing a malformed or orphaned
    /// message needs an operator's decision. Entries go back under their
    /// original file name through the atomic writer, and their sidecars are
    /// removed. Returns the number of entries replayed.
    pub fn replay(&self, agent_id: Option<&str>, limit: usize) -> Result<usize, BusError> {
        let Some(agent_id) = agent_id else {
            info!("replay requested without a target agent; nothing moved");
            return Ok(0);
        };
        if limit == 0 {
            return Ok(0);
        }

        let entries = list_json_files(&self.layout.dlq_dir())?;
        if entries.is_empty() {
            return Ok(0);
        }
        let inbox = self.layout.ensure_mailbox(Mailbox::Inbox, agent_id)?;
        let tmp = self.layout.ensure_tmp()?;

        let mut replayed = 0;
        for entry in entries {
            if replayed >= limit {
                break;
            }
            let Some(dlq_name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            // Stage the entry first; a concurrent replayer loses this rename.
            let staged = tmp.join(format!("{}.replay", uuid::Uuid::new_v4().simple()));
            match rename_file(&entry, &staged) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(BusError::io(&entry, e)),
            }

            let target = inbox.join(original_name(dlq_name));
            if let Err(e) = self.copy_staged(&staged, &tmp, &target) {
                // Put the entry back beside its sidecar before reporting.
                if let Err(undo) = rename_file(&staged, &entry) {
                    warn!(
                        staged = %staged.display(),
                        error = %undo,
                        "could not return staged DLQ entry"
                    );
                }
                return Err(e);
            }
            remove_if_present(&staged)?;
            remove_if_present(&reason_path_for(&entry))?;

            debug!(agent = %agent_id, file = %dlq_name, "replayed DLQ entry");
            replayed += 1;
        }

        info!(agent = %agent_id, replayed, "DLQ replay finished");
        Ok(replayed)
    }

    fn copy_staged(&self, staged: &Path, tmp: &Path, target: &Path) -> Result<(), BusError> {
        let bytes = fs::read(staged).map_err(|e| BusError::io(staged, e))?;
        write_atomic(tmp, target, &bytes, self.sync_directories)
    }

    /// Every DLQ entry with its reason, sorted by file name
    pub fn list_dlq(&self) -> Result<Vec<DlqEntry>, BusError> {
        let mut entries = Vec::new();
        for path in list_json_files(&self.layout.dlq_dir())? {
            let reason_path = reason_path_for(&path);
            let reason = match fs::read_to_string(&reason_path) {
                Ok(text) => Some(text),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => return Err(BusError::io(&reason_path, e)),
            };
            let original = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| original_name(n).to_string())
                .unwrap_or_default();
            entries.push(DlqEntry {
                path,
                reason_path,
                reason,
                original_name: original,
            });
        }
        Ok(entries)
    }
}
