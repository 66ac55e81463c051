//! Real vs. test-origin classification of incoming records.
//!
//! Rules run in a fixed order against the sanitized `party` text:
//! an unusable case id, then the internal-user suffix, then named test
//! users, then test-support companies. Anything else is real.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::incoming::IncomingRecord;

/// Suffix the portal appends to staff accounts.
pub const DEFAULT_INTERNAL_USER_SUFFIX: &str = "(Εσωτ. χρήστης)";

/// Test-origin rules, as stored in `test_users.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestUsersConfig {
    #[serde(default = "default_suffix")]
    pub internal_user_suffix: String,
    #[serde(default)]
    pub test_users: Vec<String>,
    #[serde(default)]
    pub test_companies: Vec<String>,
}

fn default_suffix() -> String {
    DEFAULT_INTERNAL_USER_SUFFIX.to_string()
}

impl Default for TestUsersConfig {
    fn default() -> Self {
        Self {
            internal_user_suffix: default_suffix(),
            test_users: Vec::new(),
            test_companies: Vec::new(),
        }
    }
}

/// Why a record counts as test traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestReason {
    InvalidCaseId,
    InternalUser,
    TestUser,
    TestCompany,
}

impl TestReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCaseId => "invalid_case_id",
            Self::InternalUser => "internal_user",
            Self::TestUser => "test_user",
            Self::TestCompany => "test_company",
        }
    }
}

/// A record classified as test traffic.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRecord {
    #[serde(flatten)]
    pub record: IncomingRecord,
    pub test_reason: TestReason,
}

/// Real and test records. Together they are exactly the input.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Partition {
    pub real: Vec<IncomingRecord>,
    pub test: Vec<TestRecord>,
}

/// Compiled classification rules. Build once per run.
#[derive(Debug, Clone)]
pub struct RecordClassifier {
    internal_suffix: String,
    test_users: Vec<String>,
    test_companies: Vec<String>,
}

impl RecordClassifier {
    pub fn new(config: &TestUsersConfig) -> Self {
        // Blank entries would match every party.
        let upper = |names: &[String]| -> Vec<String> {
            names
                .iter()
                .map(|n| n.trim().to_uppercase())
                .filter(|n| !n.is_empty())
                .collect()
        };
        Self {
            internal_suffix: config.internal_user_suffix.trim().to_string(),
            test_users: upper(&config.test_users),
            test_companies: upper(&config.test_companies),
        }
    }

    /// `None` for a real record.
    pub fn classify(&self, record: &IncomingRecord) -> Option<TestReason> {
        if record.case_id.trim().is_empty() {
            return Some(TestReason::InvalidCaseId);
        }
        let party = &record.party;
        if !self.internal_suffix.is_empty() && party.contains(&self.internal_suffix) {
            return Some(TestReason::InternalUser);
        }
        let party = party.to_uppercase();
        if self.test_users.iter().any(|u| party.contains(u.as_str())) {
            return Some(TestReason::TestUser);
        }
        if self.test_companies.iter().any(|c| party.contains(c.as_str())) {
            return Some(TestReason::TestCompany);
        }
        None
    }

    pub fn partition(&self, records: impl IntoIterator<Item = IncomingRecord>) -> Partition {
        let mut out = Partition::default();
        for record in records {
            match self.classify(&record) {
                Some(test_reason) => out.test.push(TestRecord {
                    record,
                    test_reason,
                }),
                None => out.real.push(record),
            }
        }
        out
    }

    pub fn stats(&self, records: &[IncomingRecord]) -> RecordStats {
        let mut stats = RecordStats {
            total: records.len(),
            ..RecordStats::default()
        };
        for record in records {
            match self.classify(record) {
                Some(reason) => {
                    stats.test += 1;
                    *stats.test_breakdown.entry(reason).or_default() += 1;
                }
                None => stats.real += 1,
            }
        }
        stats
    }
}

/// Split `records` into real and test-origin.
pub fn classify_records(records: Vec<IncomingRecord>, config: &TestUsersConfig) -> Partition {
    RecordClassifier::new(config).partition(records)
}

/// Counts of real and test records, with test counts per reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordStats {
    pub total: usize,
    pub real: usize,
    pub test: usize,
    pub test_breakdown: BTreeMap<TestReason, usize>,
}
