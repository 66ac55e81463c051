//! Incoming case submissions and dated snapshots of them.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::Keyed;
use crate::value::first_text;

/// A single incoming submission.
///
/// The enrichment fields start empty and are only ever filled, never
/// overwritten (see [`crate::enrich`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingRecord {
    pub case_id: String,
    #[serde(default)]
    pub submitted_at: String,
    #[serde(default)]
    pub party: String,
    #[serde(default)]
    pub doc_id: String,
    #[serde(default)]
    pub protocol_number: String,
    #[serde(default)]
    pub procedure: String,
    #[serde(default)]
    pub directory: String,
    #[serde(default)]
    pub document_category: String,
}

impl Keyed for IncomingRecord {
    fn key(&self) -> &str {
        &self.case_id
    }
}

impl IncomingRecord {
    pub fn new(case_id: impl Into<String>, submitted_at: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            submitted_at: submitted_at.into(),
            party: String::new(),
            doc_id: String::new(),
            protocol_number: String::new(),
            procedure: String::new(),
            directory: String::new(),
            document_category: String::new(),
        }
    }

    /// True when at least one enrichment field is empty and a detail lookup is possible.
    pub fn needs_enrichment(&self) -> bool {
        !self.doc_id.is_empty()
            && EnrichmentField::ALL
                .iter()
                .any(|field| field.get(self).is_empty())
    }

    /// Best-effort parse of `submitted_at`.
    pub fn submitted_at_parsed(&self) -> Option<NaiveDateTime> {
        parse_submitted_at(&self.submitted_at)
    }
}

/// The derived fields filled by detail lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentField {
    ProtocolNumber,
    Procedure,
    Directory,
    DocumentCategory,
}

impl EnrichmentField {
    pub const ALL: [EnrichmentField; 4] = [
        Self::ProtocolNumber,
        Self::Procedure,
        Self::Directory,
        Self::DocumentCategory,
    ];

    pub fn get(self, record: &IncomingRecord) -> &str {
        match self {
            Self::ProtocolNumber => &record.protocol_number,
            Self::Procedure => &record.procedure,
            Self::Directory => &record.directory,
            Self::DocumentCategory => &record.document_category,
        }
    }

    fn slot(self, record: &mut IncomingRecord) -> &mut String {
        match self {
            Self::ProtocolNumber => &mut record.protocol_number,
            Self::Procedure => &mut record.procedure,
            Self::Directory => &mut record.directory,
            Self::DocumentCategory => &mut record.document_category,
        }
    }

    /// Write `value` only if the record's field is empty. Returns whether it wrote.
    pub fn fill(self, record: &mut IncomingRecord, value: &str) -> bool {
        let slot = self.slot(record);
        if !slot.is_empty() || value.trim().is_empty() {
            return false;
        }
        *slot = value.trim().to_string();
        true
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProtocolNumber => "protocol_number",
            Self::Procedure => "procedure",
            Self::Directory => "directory",
            Self::DocumentCategory => "document_category",
        }
    }
}

/// Copy every enrichment field `source` knows into the empty fields of `target`.
pub fn fill_from(target: &mut IncomingRecord, source: &IncomingRecord) -> bool {
    let mut changed = false;
    for field in EnrichmentField::ALL {
        let value = field.get(source).to_string();
        changed |= field.fill(target, &value);
    }
    changed
}

/// A dated set of incoming records, unique by `case_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub count: usize,
    pub records: Vec<IncomingRecord>,
}

impl Snapshot {
    /// Build a snapshot; `count` is always recomputed.
    pub fn new(date: NaiveDate, records: Vec<IncomingRecord>) -> Self {
        Self {
            date,
            count: records.len(),
            records,
        }
    }

    pub fn by_case_id(&self) -> HashMap<&str, &IncomingRecord> {
        self.records
            .iter()
            .filter(|r| !r.case_id.is_empty())
            .map(|r| (r.case_id.as_str(), r))
            .collect()
    }
}

/// Candidate upstream keys for each incoming field, tried in order.
#[derive(Debug, Clone)]
pub struct IncomingFieldMap {
    pub case_id: Vec<String>,
    pub submitted_at: Vec<String>,
    pub party: Vec<String>,
    pub doc_id: Vec<String>,
}

impl Default for IncomingFieldMap {
    fn default() -> Self {
        fn keys(names: &[&str]) -> Vec<String> {
            names.iter().map(|s| s.to_string()).collect()
        }
        Self {
            case_id: keys(&[
                "W007_P_FLD21",
                "Αρ. εγγράφου",
                "αρ. εγγράφου",
                "αρ_εγγράφου",
                "DOCID",
                "docid",
                "CASE_ID",
            ]),
            submitted_at: keys(&[
                "DATE_INSERTED_ISO",
                "W003_DATA_INSERT",
                "DATE_INSERT",
                "SUBMIT_DATE",
            ]),
            party: keys(&["W007_P_FLD13", "party", "customer", "applicant"]),
            doc_id: keys(&["DOCID", "docid"]),
        }
    }
}

/// Outcome of normalizing a batch of raw rows.
#[derive(Debug, Clone, Default)]
pub struct Ingested {
    pub records: Vec<IncomingRecord>,
    /// Rows dropped for lacking a case id.
    pub discarded: usize,
    /// Rows that repeated an earlier case id (the later row won).
    pub duplicates: usize,
}

/// Normalize raw list rows into records.
///
/// Rows without a case id are discarded. A repeated case id replaces the
/// earlier record in place.
pub fn ingest_incoming(rows: &[Value], fields: &IncomingFieldMap) -> Ingested {
    let mut out = Ingested::default();
    let mut position: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(case_id) = first_text(row, &fields.case_id) else {
            out.discarded += 1;
            continue;
        };
        let mut record = IncomingRecord::new(
            case_id,
            first_text(row, &fields.submitted_at).unwrap_or_default(),
        );
        record.party = sanitize_party(&first_text(row, &fields.party).unwrap_or_default());
        record.doc_id = first_text(row, &fields.doc_id).unwrap_or_default();

        match position.get(&record.case_id) {
            Some(&idx) => {
                out.duplicates += 1;
                out.records[idx] = record;
            }
            None => {
                position.insert(record.case_id.clone(), out.records.len());
                out.records.push(record);
            }
        }
    }

    if out.discarded > 0 || out.duplicates > 0 {
        tracing::debug!(
            discarded = out.discarded,
            duplicates = out.duplicates,
            "incoming rows normalized"
        );
    }
    out
}

static TAX_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[-–]?\s*\(?\b\d{9}\b\)?").expect("tax id pattern is valid")
});
static SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("whitespace pattern is valid"));

/// Strip 9-digit tax identifiers (optionally parenthesised or dash-led) and
/// collapse repeated whitespace.
pub fn sanitize_party(raw: &str) -> String {
    let stripped = TAX_ID.replace_all(raw, "");
    SPACES.replace_all(&stripped, " ").trim().to_string()
}

/// Best-effort parse of the timestamp formats the portal emits.
pub fn parse_submitted_at(raw: &str) -> Option<NaiveDateTime> {
    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%d/%m/%Y %H:%M:%S",
        "%d/%m/%Y %H:%M",
    ];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];

    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Sort newest submission first. Unparseable timestamps sort last; ties keep
/// their relative order.
pub fn sort_newest_first(records: &mut [IncomingRecord]) {
    records.sort_by(|a, b| {
        let ka = (a.submitted_at_parsed(), a.submitted_at.as_str());
        let kb = (b.submitted_at_parsed(), b.submitted_at.as_str());
        kb.cmp(&ka)
    });
}
