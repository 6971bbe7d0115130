use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use alloy::primitives::TxHash;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::{
    errors::JournalError,
    journal::{Journal, JournalRecord},
};

/// Content of a run's journal file
#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalDocument {
    run_id: String,
    #[serde(default)]
    entries: Vec<JournalRecord>,
    #[serde(default)]
    pending: BTreeMap<String, TxHash>,
}

/// Journal kept as a pretty printed JSON document, `<dir>/<run id>.json`.
///
/// The whole document is rewritten through a temp file and renamed into place on every
/// change, so a crash leaves either the old or the new version on disk.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
    document: JournalDocument,
}

impl FileJournal {
    /// Open the journal of `run_id`, starting empty when no file exists yet
    pub fn open(dir: &Path, run_id: &str) -> Result<Self, JournalError> {
        let path = dir.join(format!("{}.json", file_stem(run_id)));
        let document = if path.exists() {
            let document: JournalDocument = serde_json::from_str(&fs::read_to_string(&path)?)?;
            if document.run_id != run_id {
                return Err(JournalError::Storage(format!(
                    "{} belongs to run '{}', not '{run_id}'",
                    path.display(),
                    document.run_id
                )));
            }
            document
        } else {
            JournalDocument {
                run_id: run_id.to_string(),
                ..Default::default()
            }
        };
        Ok(Self { path, document })
    }

    /// Run ids of every journal document in `dir`
    pub fn runs(dir: &Path) -> Result<Vec<String>, JournalError> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Foreign JSON files are not ours to complain about
            if let Ok(document) =
                serde_json::from_str::<JournalDocument>(&fs::read_to_string(&path)?)
            {
                runs.push(document.run_id);
            }
        }
        runs.sort();
        Ok(runs)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), JournalError> {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(&self.document)?.as_bytes())?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl Journal for FileJournal {
    fn run_id(&self) -> &str {
        &self.document.run_id
    }

    fn lookup(&self, id: &str) -> Result<Option<JournalRecord>, JournalError> {
        Ok(self
            .document
            .entries
            .iter()
            .find(|record| record.action_id == id)
            .cloned())
    }

    fn append(&mut self, record: JournalRecord) -> Result<(), JournalError> {
        if self.lookup(&record.action_id)?.is_some() {
            return Err(JournalError::Conflict(record.action_id));
        }
        self.document.entries.push(record);
        if let Err(e) = self.flush() {
            // keep memory in line with disk
            self.document.entries.pop();
            return Err(e);
        }
        Ok(())
    }

    fn records(&self) -> Result<Vec<JournalRecord>, JournalError> {
        let mut records = self.document.entries.clone();
        records.sort_by_key(|record| record.seq);
        Ok(records)
    }

    fn pending(&self, id: &str) -> Result<Option<TxHash>, JournalError> {
        Ok(self.document.pending.get(id).copied())
    }

    fn set_pending(&mut self, id: &str, submission: Option<TxHash>) -> Result<(), JournalError> {
        let previous = match submission {
            Some(hash) => self.document.pending.insert(id.to_string(), hash),
            None => self.document.pending.remove(id),
        };
        if previous == submission {
            return Ok(());
        }
        if let Err(e) = self.flush() {
            // keep memory in line with disk
            match previous {
                Some(hash) => self.document.pending.insert(id.to_string(), hash),
                None => self.document.pending.remove(id),
            };
            return Err(e);
        }
        Ok(())
    }
}

/// Run ids become file names; anything outside a conservative charset is replaced
fn file_stem(run_id: &str) -> String {
    run_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{ActionResult, ActionStatus};
    use alloy::primitives::{Address, U256};
    use tempfile::TempDir;

    fn confirmed(byte: u8) -> ActionResult {
        ActionResult {
            status: ActionStatus::Confirmed,
            produced_address: Some(Address::repeat_byte(byte)),
            return_data: None,
            submission_ref: TxHash::repeat_byte(byte),
            cost_paid: U256::from(21_000u64),
        }
    }

    #[test]
    fn records_survive_reopening() {
        let dir = TempDir::new().unwrap();
        {
            let mut journal = FileJournal::open(dir.path(), "suite@v1.chain-1").unwrap();
            journal.record("token", confirmed(1)).unwrap();
            journal.record("registry", confirmed(2)).unwrap();
        }

        let journal = FileJournal::open(dir.path(), "suite@v1.chain-1").unwrap();
        assert!(journal.has("token").unwrap());
        assert_eq!(journal.get("registry").unwrap(), confirmed(2));
        let ids: Vec<_> = journal
            .records()
            .unwrap()
            .into_iter()
            .map(|r| r.action_id)
            .collect();
        assert_eq!(ids, ["token", "registry"]);
    }

    #[test]
    fn missing_entry_is_not_found() {
        let dir = TempDir::new().unwrap();
        let journal = FileJournal::open(dir.path(), "run").unwrap();
        assert!(!journal.has("nope").unwrap());
        assert!(matches!(journal.get("nope"), Err(JournalError::NotFound(id)) if id == "nope"));
        // nothing written until the first record
        assert!(!journal.path().exists());
    }

    #[test]
    fn re_recording_same_result_is_idempotent_but_different_conflicts() {
        let dir = TempDir::new().unwrap();
        let mut journal = FileJournal::open(dir.path(), "run").unwrap();
        journal.record("token", confirmed(1)).unwrap();
        journal.record("token", confirmed(1)).unwrap();
        assert!(matches!(
            journal.record("token", confirmed(9)),
            Err(JournalError::Conflict(id)) if id == "token"
        ));
        assert_eq!(journal.records().unwrap().len(), 1);
    }

    #[test]
    fn runs_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let mut first = FileJournal::open(dir.path(), "suite@v1.chain-1").unwrap();
        first.record("token", confirmed(1)).unwrap();
        let mut second = FileJournal::open(dir.path(), "suite@v1.chain-5").unwrap();
        assert!(!second.has("token").unwrap());
        second.record("token", confirmed(2)).unwrap();
        assert_eq!(
            FileJournal::runs(dir.path()).unwrap(),
            ["suite@v1.chain-1", "suite@v1.chain-5"]
        );
    }

    #[test]
    fn pending_marker_is_cleared_by_record() {
        let dir = TempDir::new().unwrap();
        let mut journal = FileJournal::open(dir.path(), "run").unwrap();
        let hash = TxHash::repeat_byte(7);
        journal.set_pending("token", Some(hash)).unwrap();

        let mut reopened = FileJournal::open(dir.path(), "run").unwrap();
        assert_eq!(reopened.pending("token").unwrap(), Some(hash));
        reopened.record("token", confirmed(7)).unwrap();
        assert_eq!(reopened.pending("token").unwrap(), None);
    }

    #[test]
    fn failed_pending_write_leaves_no_marker_in_memory() {
        let dir = TempDir::new().unwrap();
        let journal_dir = dir.path().join("journals");
        let mut journal = FileJournal::open(&journal_dir, "run").unwrap();
        // a plain file where the journal directory should be
        fs::write(&journal_dir, b"").unwrap();

        assert!(journal
            .set_pending("token", Some(TxHash::repeat_byte(7)))
            .is_err());
        assert_eq!(journal.pending("token").unwrap(), None);
    }

    #[test]
    fn sanitises_run_id_into_file_name() {
        assert_eq!(file_stem("a/b c@v1.chain-1"), "a_b_c@v1.chain-1");
    }
}
