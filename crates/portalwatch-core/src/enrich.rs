//! Monotonic enrichment of incoming records from detail lookups, and the
//! append-only procedure dictionary those lookups feed.
//!
//! A detail payload is loosely shaped: the wanted field may sit at the top
//! level, inside `data[0]`, or inside `record`, and each value may be a bare
//! scalar or a `{"value": ...}` wrapper. [`ExtractionStrategy`] lists those
//! places in the order they are tried.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::incoming::{EnrichmentField, IncomingRecord};
use crate::procedure::Procedure;
use crate::value::scalar_text;

/// Where in a detail payload to look for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    TopLevel,
    FirstDataRow,
    Record,
}

impl ExtractionStrategy {
    pub const ORDER: [ExtractionStrategy; 3] = [Self::TopLevel, Self::FirstDataRow, Self::Record];

    fn container<'a>(&self, payload: &'a Value) -> Option<&'a Map<String, Value>> {
        match self {
            Self::TopLevel => payload.as_object(),
            Self::FirstDataRow => match payload.get("data")? {
                Value::Array(rows) => rows.first()?.as_object(),
                other => other.as_object(),
            },
            Self::Record => payload.get("record")?.as_object(),
        }
    }

    /// The field's text under this strategy, if present and non-empty.
    pub fn extract(&self, payload: &Value, field: &str) -> Option<String> {
        let raw = self.container(payload)?.get(field)?;
        match raw {
            Value::Object(wrapper) => wrapper.get("value").and_then(scalar_text),
            other => scalar_text(other),
        }
    }
}

/// First non-empty value of `field` across all strategies.
pub fn extract_field(payload: &Value, field: &str) -> Option<String> {
    ExtractionStrategy::ORDER
        .iter()
        .find_map(|strategy| strategy.extract(payload, field))
}

/// Upstream names of the detail fields.
#[derive(Debug, Clone)]
pub struct DetailFieldMap {
    pub protocol_number: String,
    pub procedure: String,
    pub directory: String,
    pub procedure_id: String,
    pub document_category: String,
}

impl Default for DetailFieldMap {
    fn default() -> Self {
        Self {
            protocol_number: "W007_P_FLD61".into(),
            procedure: "W007_P_FLD23".into(),
            directory: "W007_P_FLD17".into(),
            procedure_id: "W003_P_FLD75".into(),
            document_category: "W007_P_FLD30".into(),
        }
    }
}

/// The fields a detail lookup can contribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub protocol_number: Option<String>,
    pub procedure: Option<String>,
    pub directory: Option<String>,
    pub procedure_id: Option<String>,
    pub document_category: Option<String>,
}

impl DetailFields {
    /// Extract from a detail payload. A payload not flagged `success` yields `None`.
    pub fn from_payload(payload: &Value, fields: &DetailFieldMap) -> Option<Self> {
        if payload.get("success").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        Some(Self {
            protocol_number: extract_field(payload, &fields.protocol_number),
            procedure: extract_field(payload, &fields.procedure),
            directory: extract_field(payload, &fields.directory),
            procedure_id: extract_field(payload, &fields.procedure_id),
            document_category: extract_field(payload, &fields.document_category),
        })
    }

    fn get(&self, field: EnrichmentField) -> Option<&str> {
        match field {
            EnrichmentField::ProtocolNumber => self.protocol_number.as_deref(),
            EnrichmentField::Procedure => self.procedure.as_deref(),
            EnrichmentField::Directory => self.directory.as_deref(),
            EnrichmentField::DocumentCategory => self.document_category.as_deref(),
        }
    }
}

/// What one application of a detail did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillOutcome {
    pub fields_filled: usize,
    pub dictionary_changed: bool,
}

/// Fill the record's empty fields from `detail` and feed the dictionary.
///
/// A non-empty field on the record is never replaced.
pub fn apply_detail(
    record: &mut IncomingRecord,
    detail: &DetailFields,
    dictionary: &mut ProcedureDictionary,
    now: DateTime<Utc>,
) -> FillOutcome {
    let mut outcome = FillOutcome::default();

    for field in EnrichmentField::ALL {
        let Some(value) = detail.get(field) else {
            continue;
        };
        if !field.fill(record, value) {
            continue;
        }
        outcome.fields_filled += 1;
        match field {
            EnrichmentField::Procedure => {
                outcome.dictionary_changed |=
                    dictionary.learn(&record.procedure, detail.procedure_id.as_deref(), now);
            }
            EnrichmentField::Directory if !record.procedure.is_empty() => {
                outcome.dictionary_changed |=
                    dictionary.add_directory(&record.procedure, &record.directory);
            }
            _ => {}
        }
    }
    outcome
}

/// Totals for an enrichment run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    pub looked_up: usize,
    pub enriched: usize,
    pub failed: usize,
    pub dictionary_changed: bool,
}

/// Enrich every record that still needs it, one lookup per record.
///
/// `lookup` returns `Ok(None)` when the detail is unavailable; that record is
/// counted as failed and skipped. An `Err` stops the run.
pub fn enrich_records<'a, I, F, E>(
    records: I,
    dictionary: &mut ProcedureDictionary,
    now: DateTime<Utc>,
    mut lookup: F,
) -> Result<EnrichSummary, E>
where
    I: IntoIterator<Item = &'a mut IncomingRecord>,
    F: FnMut(&str) -> Result<Option<DetailFields>, E>,
{
    let mut summary = EnrichSummary::default();
    for record in records {
        if !record.needs_enrichment() {
            continue;
        }
        summary.looked_up += 1;
        let Some(detail) = lookup(&record.doc_id)? else {
            summary.failed += 1;
            tracing::warn!(doc_id = %record.doc_id, case_id = %record.case_id, "detail lookup returned nothing");
            continue;
        };
        let outcome = apply_detail(record, &detail, dictionary, now);
        if outcome.fields_filled > 0 {
            summary.enriched += 1;
        }
        summary.dictionary_changed |= outcome.dictionary_changed;
    }
    Ok(summary)
}

/// Everything known about one procedure title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureCacheEntry {
    #[serde(default)]
    pub procedure_id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub is_active: bool,
    pub first_seen: DateTime<Utc>,
    #[serde(default)]
    pub directories: BTreeSet<String>,
}

impl ProcedureCacheEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            procedure_id: String::new(),
            code: String::new(),
            is_active: false,
            first_seen: now,
            directories: BTreeSet::new(),
        }
    }
}

/// Procedure title to cache entry. Titles are never removed and directory
/// sets never shrink.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcedureDictionary {
    entries: BTreeMap<String, ProcedureCacheEntry>,
}

impl ProcedureDictionary {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, title: &str) -> Option<&ProcedureCacheEntry> {
        self.entries.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ProcedureCacheEntry)> {
        self.entries.iter()
    }

    /// Record a procedure title seen on a record. Inserts it with
    /// `first_seen = now` if new, otherwise backfills a missing procedure id.
    pub fn learn(&mut self, title: &str, procedure_id: Option<&str>, now: DateTime<Utc>) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let procedure_id = procedure_id.map(str::trim).filter(|id| !id.is_empty());
        match self.entries.get_mut(title) {
            Some(entry) => match procedure_id {
                Some(id) if entry.procedure_id.is_empty() => {
                    entry.procedure_id = id.to_string();
                    true
                }
                _ => false,
            },
            None => {
                let mut entry = ProcedureCacheEntry::new(now);
                entry.procedure_id = procedure_id.unwrap_or_default().to_string();
                self.entries.insert(title.to_string(), entry);
                tracing::info!(title, "new procedure title learned");
                true
            }
        }
    }

    /// Add a directory to a known title. Unknown titles are left alone.
    pub fn add_directory(&mut self, title: &str, directory: &str) -> bool {
        let directory = directory.trim();
        if directory.is_empty() {
            return false;
        }
        self.entries
            .get_mut(title.trim())
            .is_some_and(|entry| entry.directories.insert(directory.to_string()))
    }

    /// Fold a catalog fetch in: unseen titles are added, known titles get
    /// their id, code, and active flag refreshed. Returns how many entries changed.
    pub fn observe_catalog(&mut self, procedures: &[Procedure], now: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for proc in procedures {
            let title = proc.dictionary_title().trim();
            if title.is_empty() {
                continue;
            }
            let entry = self
                .entries
                .entry(title.to_string())
                .or_insert_with(|| ProcedureCacheEntry {
                    // Mismatched so the refresh below counts the insert.
                    is_active: !proc.active,
                    ..ProcedureCacheEntry::new(now)
                });
            let mut touched = false;
            if !proc.procedure_number.is_empty() && entry.procedure_id != proc.procedure_number {
                entry.procedure_id = proc.procedure_number.clone();
                touched = true;
            }
            if !proc.code.is_empty() && entry.code != proc.code {
                entry.code = proc.code.clone();
                touched = true;
            }
            if entry.is_active != proc.active {
                entry.is_active = proc.active;
                touched = true;
            }
            if touched {
                changed += 1;
            }
        }
        changed
    }
}
