//! File layout of the data directory, plus the small single-file stores.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use portalwatch_core::{Baseline, BaselineScope, ProcedureDictionary, TestUsersConfig};
use tracing::info;

use crate::StoreError;
use crate::json_file::{read_json, write_json};

const INCOMING_DIR: &str = "incoming_requests";
const DICTIONARY_FILE: &str = "procedures_cache.json";
const TEST_USERS_FILE: &str = "test_users.json";

/// Root of all persisted state.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn baseline_path(&self, scope: BaselineScope) -> PathBuf {
        let name = match scope {
            BaselineScope::Active => "active_procedures_baseline.json",
            BaselineScope::All => "all_procedures_baseline.json",
        };
        self.root.join(name)
    }

    pub fn incoming_dir(&self) -> PathBuf {
        self.root.join(INCOMING_DIR)
    }

    pub fn snapshot_path(&self, date: NaiveDate) -> PathBuf {
        self.incoming_dir()
            .join(format!("incoming_{}.json", date.format("%Y-%m-%d")))
    }

    pub fn dictionary_path(&self) -> PathBuf {
        self.root.join(DICTIONARY_FILE)
    }

    pub fn test_users_path(&self) -> PathBuf {
        self.root.join(TEST_USERS_FILE)
    }

    /// Load the baseline for `scope`, if one was ever saved.
    pub fn load_baseline(&self, scope: BaselineScope) -> Result<Option<Baseline>, StoreError> {
        read_json(&self.baseline_path(scope))
    }

    /// Replace the baseline for `scope` wholesale.
    pub fn save_baseline(&self, scope: BaselineScope, baseline: &Baseline) -> Result<(), StoreError> {
        let path = self.baseline_path(scope);
        write_json(&path, baseline)?;
        info!(scope = scope.as_str(), count = baseline.count, path = %path.display(), "baseline saved");
        Ok(())
    }

    /// The procedure dictionary, empty if never saved.
    pub fn load_dictionary(&self) -> Result<ProcedureDictionary, StoreError> {
        Ok(read_json(&self.dictionary_path())?.unwrap_or_default())
    }

    pub fn save_dictionary(&self, dictionary: &ProcedureDictionary) -> Result<(), StoreError> {
        write_json(&self.dictionary_path(), dictionary)?;
        info!(titles = dictionary.len(), "procedure dictionary saved");
        Ok(())
    }

    /// Test-origin rules, or the defaults when the file is absent.
    pub fn load_test_users(&self) -> Result<TestUsersConfig, StoreError> {
        Ok(read_json(&self.test_users_path())?.unwrap_or_default())
    }
}
