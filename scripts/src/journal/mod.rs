//! Durable record of completed actions, keyed by run.
//!
//! Results are append-only: once an action id is recorded for a run it is never rewritten,
//! which is what lets a re-run replay finished work instead of submitting it again. Pending
//! markers (a submission whose confirmation was not observed) live beside the results and
//! are cleared once the submission's fate is known.

use std::path::Path;

use alloy::primitives::{Address, Bytes, TxHash, U256};
use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::errors::JournalError;

pub mod embedded;
pub mod file;

pub use self::{embedded::RedbJournal, file::FileJournal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Confirmed,
    Failed,
}

/// Outcome of one completed action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    /// Deploy only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produced_address: Option<Address>,
    /// Invoke only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_data: Option<Bytes>,
    pub submission_ref: TxHash,
    pub cost_paid: U256,
}

impl ActionResult {
    pub fn is_confirmed(&self) -> bool {
        self.status == ActionStatus::Confirmed
    }
}

/// A stored result with its bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub action_id: String,
    /// Append position within the run
    pub seq: u64,
    #[serde(flatten)]
    pub result: ActionResult,
    pub recorded_at: DateTime<Utc>,
}

/// Persistent mapping from action id to result for a single run.
///
/// Backends implement the storage primitives; the append-only rules live in the provided
/// methods so every backend enforces them the same way.
pub trait Journal: Send {
    fn run_id(&self) -> &str;

    /// Stored record for `id`, if any
    fn lookup(&self, id: &str) -> Result<Option<JournalRecord>, JournalError>;

    /// Store a record whose id is not present yet
    fn append(&mut self, record: JournalRecord) -> Result<(), JournalError>;

    /// All records of the run in append order
    fn records(&self) -> Result<Vec<JournalRecord>, JournalError>;

    /// Submission awaiting confirmation for `id`
    fn pending(&self, id: &str) -> Result<Option<TxHash>, JournalError>;

    /// Set or clear the pending submission of `id`
    fn set_pending(&mut self, id: &str, submission: Option<TxHash>) -> Result<(), JournalError>;

    fn has(&self, id: &str) -> Result<bool, JournalError> {
        Ok(self.lookup(id)?.is_some())
    }

    fn get(&self, id: &str) -> Result<ActionResult, JournalError> {
        self.lookup(id)?
            .map(|record| record.result)
            .ok_or_else(|| JournalError::NotFound(id.to_string()))
    }

    /// Append the result of `id`. Recording the same result twice is a no-op, a different
    /// one is a conflict.
    fn record(&mut self, id: &str, result: ActionResult) -> Result<(), JournalError> {
        if let Some(existing) = self.lookup(id)? {
            if existing.result == result {
                return Ok(());
            }
            return Err(JournalError::Conflict(id.to_string()));
        }
        let seq = self.records()?.len() as u64;
        self.append(JournalRecord {
            action_id: id.to_string(),
            seq,
            result,
            recorded_at: Utc::now(),
        })?;
        self.set_pending(id, None)
    }
}

/// Storage used for journals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum JournalBackend {
    /// One JSON document per run
    #[default]
    File,
    /// One embedded database shared by every run
    Redb,
}

/// File name of the shared redb database inside the journal directory
pub const REDB_FILE_NAME: &str = "journal.redb";

/// Open the journal of `run_id` under `dir` with the chosen backend
pub fn open_journal(
    backend: JournalBackend,
    dir: &Path,
    run_id: &str,
) -> Result<Box<dyn Journal>, JournalError> {
    std::fs::create_dir_all(dir)?;
    Ok(match backend {
        JournalBackend::File => Box::new(FileJournal::open(dir, run_id)?),
        JournalBackend::Redb => Box::new(RedbJournal::open(&dir.join(REDB_FILE_NAME), run_id)?),
    })
}

/// Run ids with a journal under `dir`
pub fn list_runs(backend: JournalBackend, dir: &Path) -> Result<Vec<String>, JournalError> {
    match backend {
        JournalBackend::File => FileJournal::runs(dir),
        JournalBackend::Redb => {
            let path = dir.join(REDB_FILE_NAME);
            if !path.exists() {
                return Ok(Vec::new());
            }
            // Any run id works for listing
            RedbJournal::open(&path, "")?.runs()
        }
    }
}
