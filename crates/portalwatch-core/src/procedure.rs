//! Procedure catalog records and persisted baselines.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::changes::Keyed;
use crate::value::{decode_entities, scalar_text};

/// One entry of the administrative procedure catalog.
///
/// `active` is carried as a boolean; on disk it is written as `"YES"`/`"NO"`
/// and read back from either spelling (or the Greek `ΝΑΙ`/`ΟΧΙ`).
/// Keys this type does not know about (from older baseline files) are kept in
/// `extra` so a field-level diff can still see them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedure {
    pub docid: String,
    #[serde(default)]
    pub procedure_number: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, with = "yes_no")]
    pub active: bool,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub audience: String,
    #[serde(default)]
    pub authority: String,
    #[serde(default)]
    pub flow: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Keyed for Procedure {
    fn key(&self) -> &str {
        &self.docid
    }
}

impl Procedure {
    pub fn new(docid: impl Into<String>, active: bool) -> Self {
        Self {
            docid: docid.into(),
            procedure_number: String::new(),
            code: String::new(),
            title: String::new(),
            description: String::new(),
            active,
            status: String::new(),
            audience: String::new(),
            authority: String::new(),
            flow: String::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Flatten the record into `field -> text` for field-level diffing.
    ///
    /// Bookkeeping keys (leading underscore) in `extra` are left out.
    pub fn field_map(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::from([
            ("docid".to_string(), self.docid.clone()),
            ("procedure_number".to_string(), self.procedure_number.clone()),
            ("code".to_string(), self.code.clone()),
            ("title".to_string(), self.title.clone()),
            ("description".to_string(), self.description.clone()),
            ("active".to_string(), yes_no::label(self.active).to_string()),
            ("status".to_string(), self.status.clone()),
            ("audience".to_string(), self.audience.clone()),
            ("authority".to_string(), self.authority.clone()),
            ("flow".to_string(), self.flow.clone()),
        ]);
        for (key, value) in &self.extra {
            if key.starts_with('_') {
                continue;
            }
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            fields.insert(key.clone(), text);
        }
        fields
    }

    /// Build a procedure from a raw list-API row. Rows without a docid are rejected.
    pub fn from_row(row: &Value, fields: &ProcedureFieldMap) -> Option<Self> {
        let text = |key: &str| row.get(key).and_then(scalar_text).unwrap_or_default();

        let docid = text(&fields.docid);
        if docid.is_empty() {
            return None;
        }

        Some(Self {
            docid,
            procedure_number: text(&fields.procedure_number),
            code: text(&fields.code),
            title: text(&fields.title),
            description: decode_entities(&text(&fields.description)),
            active: yes_no::parse(&text(&fields.active)).unwrap_or(false),
            status: text(&fields.status),
            audience: text(&fields.audience),
            authority: text(&fields.authority),
            flow: text(&fields.flow),
            extra: BTreeMap::new(),
        })
    }

    /// Title used to key the procedure dictionary.
    ///
    /// Detail lookups report a procedure by its long description, so that is
    /// preferred over the short title when present.
    pub fn dictionary_title(&self) -> &str {
        if self.description.is_empty() {
            &self.title
        } else {
            &self.description
        }
    }
}

/// Parse every usable row of a catalog list response.
pub fn parse_catalog(rows: &[Value], fields: &ProcedureFieldMap) -> Vec<Procedure> {
    let procedures: Vec<Procedure> = rows
        .iter()
        .filter_map(|row| Procedure::from_row(row, fields))
        .collect();
    let skipped = rows.len() - procedures.len();
    if skipped > 0 {
        tracing::debug!(skipped, "catalog rows without docid dropped");
    }
    procedures
}

/// Only the currently active procedures.
pub fn active_only(procedures: &[Procedure]) -> Vec<Procedure> {
    procedures.iter().filter(|p| p.active).cloned().collect()
}

/// Upstream column names for catalog rows.
#[derive(Debug, Clone)]
pub struct ProcedureFieldMap {
    pub docid: String,
    pub procedure_number: String,
    pub code: String,
    pub title: String,
    pub description: String,
    pub active: String,
    pub status: String,
    pub audience: String,
    pub authority: String,
    pub flow: String,
}

impl Default for ProcedureFieldMap {
    fn default() -> Self {
        Self {
            docid: "DOCID".into(),
            procedure_number: "W003_P_FLD75".into(),
            code: "W003_P_FLD6".into(),
            title: "W003_P_FLD4".into(),
            description: "DESCRIPTION".into(),
            active: "W003_P_FLD3".into(),
            status: "W003_P_FLD24".into(),
            audience: "W003_P_FLD12".into(),
            authority: "W003_P_FLD60".into(),
            flow: "W003_P_FLD5".into(),
        }
    }
}

/// Which slice of the catalog a baseline holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaselineScope {
    /// Only procedures that were active when the baseline was saved.
    Active,
    /// The entire catalog.
    All,
}

impl BaselineScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::All => "all",
        }
    }
}

/// A persisted reference copy of the catalog. Replaced wholesale on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub procedures: Vec<Procedure>,
}

impl Baseline {
    /// Snapshot `procedures` for `scope`. Inactive entries are dropped for
    /// [`BaselineScope::Active`].
    pub fn capture(scope: BaselineScope, procedures: &[Procedure], now: DateTime<Utc>) -> Self {
        let procedures = match scope {
            BaselineScope::Active => active_only(procedures),
            BaselineScope::All => procedures.to_vec(),
        };
        Self {
            timestamp: now,
            count: procedures.len(),
            procedures,
        }
    }
}

/// Serde adapter for the `YES`/`NO` active flag.
pub mod yes_no {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn label(active: bool) -> &'static str {
        if active { "YES" } else { "NO" }
    }

    /// Accepts English and Greek spellings, case-insensitively.
    pub fn parse(raw: &str) -> Option<bool> {
        match raw.trim().to_uppercase().as_str() {
            "YES" | "ΝΑΙ" | "TRUE" | "1" => Some(true),
            "NO" | "ΟΧΙ" | "FALSE" | "0" | "" => Some(false),
            _ => None,
        }
    }

    pub fn serialize<S: Serializer>(active: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(label(*active))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Flag(flag) => Ok(flag),
            Raw::Text(text) => parse(&text)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid active flag: {text}"))),
        }
    }
}
