//! Journal storage in a redb database.
//!
//! # Table design
//!
//! Two tables share the composite key `(run_id, action_id)`:
//! ```text
//! records : (run_id, action_id) -> JSON-encoded JournalRecord
//! pending : (run_id, action_id) -> 32 byte transaction hash
//! ```
//!
//! Every run lives in the same database file, the run id prefix keeps them apart.

use std::{fmt::Display, path::Path};

use alloy::primitives::TxHash;
use redb::{Database, ReadableTable, TableDefinition};

use crate::{
    errors::JournalError,
    journal::{Journal, JournalRecord},
};

const RECORDS: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("records");
const PENDING: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("pending");

fn storage(e: impl Display) -> JournalError {
    JournalError::Storage(e.to_string())
}

/// Journal of one run inside a shared redb database
pub struct RedbJournal {
    db: Database,
    run_id: String,
}

impl RedbJournal {
    /// Open or create the database at `path` and scope it to `run_id`.
    ///
    /// Creates both tables if they don't exist yet, so reads never miss a table.
    pub fn open(path: &Path, run_id: &str) -> Result<Self, JournalError> {
        let db = Database::create(path).map_err(storage)?;
        let wt = db.begin_write().map_err(storage)?;
        wt.open_table(RECORDS).map_err(storage)?;
        wt.open_table(PENDING).map_err(storage)?;
        wt.commit().map_err(storage)?;
        Ok(Self {
            db,
            run_id: run_id.to_string(),
        })
    }

    /// Run ids with at least one record in the database
    pub fn runs(&self) -> Result<Vec<String>, JournalError> {
        let rt = self.db.begin_read().map_err(storage)?;
        let table = rt.open_table(RECORDS).map_err(storage)?;
        let mut runs: Vec<String> = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (key, _) = entry.map_err(storage)?;
            let (run, _) = key.value();
            if runs.last().map(String::as_str) != Some(run) {
                runs.push(run.to_string());
            }
        }
        Ok(runs)
    }
}

impl Journal for RedbJournal {
    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn lookup(&self, id: &str) -> Result<Option<JournalRecord>, JournalError> {
        let rt = self.db.begin_read().map_err(storage)?;
        let table = rt.open_table(RECORDS).map_err(storage)?;
        let Some(value) = table.get((self.run_id.as_str(), id)).map_err(storage)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(value.value())?))
    }

    fn append(&mut self, record: JournalRecord) -> Result<(), JournalError> {
        let value = serde_json::to_vec(&record)?;
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let mut table = wt.open_table(RECORDS).map_err(storage)?;
            let key = (self.run_id.as_str(), record.action_id.as_str());
            if table.get(key).map_err(storage)?.is_some() {
                return Err(JournalError::Conflict(record.action_id));
            }
            table.insert(key, value.as_slice()).map_err(storage)?;
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }

    fn records(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let rt = self.db.begin_read().map_err(storage)?;
        let table = rt.open_table(RECORDS).map_err(storage)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(storage)? {
            let (key, value) = entry.map_err(storage)?;
            if key.value().0 != self.run_id {
                continue;
            }
            let record: JournalRecord = serde_json::from_slice(value.value())?;
            records.push(record);
        }
        records.sort_by_key(|record| record.seq);
        Ok(records)
    }

    fn pending(&self, id: &str) -> Result<Option<TxHash>, JournalError> {
        let rt = self.db.begin_read().map_err(storage)?;
        let table = rt.open_table(PENDING).map_err(storage)?;
        let value = table.get((self.run_id.as_str(), id)).map_err(storage)?;
        Ok(value.and_then(|v| TxHash::try_from(v.value()).ok()))
    }

    fn set_pending(&mut self, id: &str, submission: Option<TxHash>) -> Result<(), JournalError> {
        let wt = self.db.begin_write().map_err(storage)?;
        {
            let mut table = wt.open_table(PENDING).map_err(storage)?;
            let key = (self.run_id.as_str(), id);
            match submission {
                Some(hash) => {
                    table.insert(key, hash.as_slice()).map_err(storage)?;
                }
                None => {
                    table.remove(key).map_err(storage)?;
                }
            }
        }
        wt.commit().map_err(storage)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{ActionResult, ActionStatus};
    use alloy::primitives::{Bytes, U256};
    use tempfile::TempDir;

    fn confirmed(byte: u8) -> ActionResult {
        ActionResult {
            status: ActionStatus::Confirmed,
            produced_address: None,
            return_data: Some(Bytes::from(vec![byte; 4])),
            submission_ref: TxHash::repeat_byte(byte),
            cost_paid: U256::from(byte),
        }
    }

    fn open_tmp(dir: &TempDir, run: &str) -> RedbJournal {
        RedbJournal::open(&dir.path().join("journal.redb"), run).unwrap()
    }

    #[test]
    fn records_survive_reopening_in_append_order() {
        let dir = TempDir::new().unwrap();
        {
            let mut journal = open_tmp(&dir, "suite@v1.chain-1");
            // "zeta" sorts after "alpha" by key, but was appended first
            journal.record("zeta", confirmed(1)).unwrap();
            journal.record("alpha", confirmed(2)).unwrap();
        }

        let journal = open_tmp(&dir, "suite@v1.chain-1");
        let ids: Vec<_> = journal
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.action_id)
            .collect();
        assert_eq!(ids, ["zeta", "alpha"]);
        assert_eq!(journal.get("alpha").unwrap(), confirmed(2));
    }

    #[test]
    fn runs_share_the_file_without_colliding() {
        let dir = TempDir::new().unwrap();
        {
            let mut journal = open_tmp(&dir, "a@v1.chain-1");
            journal.record("token", confirmed(1)).unwrap();
        }
        let mut other = open_tmp(&dir, "b@v1.chain-1");
        assert!(!other.has("token").unwrap());
        other.record("token", confirmed(3)).unwrap();
        assert_eq!(other.runs().unwrap(), ["a@v1.chain-1", "b@v1.chain-1"]);
    }

    #[test]
    fn conflicting_record_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut journal = open_tmp(&dir, "run");
        journal.record("token", confirmed(1)).unwrap();
        journal.record("token", confirmed(1)).unwrap();
        assert!(matches!(
            journal.record("token", confirmed(2)),
            Err(JournalError::Conflict(_))
        ));
    }

    #[test]
    fn pending_markers_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut journal = open_tmp(&dir, "run");
        assert_eq!(journal.pending("token").unwrap(), None);
        journal
            .set_pending("token", Some(TxHash::repeat_byte(5)))
            .unwrap();
        assert_eq!(
            journal.pending("token").unwrap(),
            Some(TxHash::repeat_byte(5))
        );
        journal.set_pending("token", None).unwrap();
        assert_eq!(journal.pending("token").unwrap(), None);
    }
}
