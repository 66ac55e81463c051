//! Dated incoming-record snapshots, one file per calendar day.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;

use chrono::NaiveDate;
use portalwatch_core::incoming::fill_from;
use portalwatch_core::{IncomingRecord, Snapshot};
use tracing::{info, warn};

use crate::json_file::{read_json, write_json};
use crate::{DataDir, StoreError};

/// Date overrides for picking the comparison snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComparisonOverrides {
    /// Always compare against this date, regardless of adjacency.
    pub force: Option<NaiveDate>,
    /// Used only when no earlier snapshot exists.
    pub fallback: Option<NaiveDate>,
}

/// Where the comparison snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonSource {
    Forced,
    Previous,
    Fallback,
}

impl ComparisonSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forced => "forced",
            Self::Previous => "previous",
            Self::Fallback => "fallback",
        }
    }
}

/// Per-snapshot result of a backfill pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillEntry {
    pub date: NaiveDate,
    pub updated: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub source: NaiveDate,
    pub source_records: usize,
    pub dry_run: bool,
    pub entries: Vec<BackfillEntry>,
}

impl BackfillReport {
    pub fn total_updated(&self) -> usize {
        self.entries.iter().map(|e| e.updated).sum()
    }
}

/// Snapshot files under `<data_dir>/incoming_requests/`.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: DataDir,
}

impl SnapshotStore {
    pub fn new(dir: DataDir) -> Self {
        Self { dir }
    }

    pub fn load(&self, date: NaiveDate) -> Result<Option<Snapshot>, StoreError> {
        read_json(&self.dir.snapshot_path(date))
    }

    /// Overwrite the snapshot for `date`. `count` is recomputed.
    pub fn save(&self, date: NaiveDate, records: Vec<IncomingRecord>) -> Result<Snapshot, StoreError> {
        let snapshot = Snapshot::new(date, records);
        let path = self.dir.snapshot_path(date);
        write_json(&path, &snapshot)?;
        info!(%date, count = snapshot.count, "snapshot saved");
        Ok(snapshot)
    }

    /// Every stored date, ascending. Files whose names do not parse are skipped.
    pub fn list_dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let dir = self.dir.incoming_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };

        let mut dates = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name();
            let Some(date) = name.to_str().and_then(date_from_file_name) else {
                continue;
            };
            dates.push(date);
        }
        dates.sort_unstable();
        dates.dedup();
        Ok(dates)
    }

    /// The nearest stored snapshot strictly before `date`.
    pub fn load_previous(&self, date: NaiveDate) -> Result<Option<Snapshot>, StoreError> {
        let Some(prev) = self.list_dates()?.into_iter().rev().find(|d| *d < date) else {
            return Ok(None);
        };
        self.load(prev)
    }

    pub fn latest(&self) -> Result<Option<Snapshot>, StoreError> {
        match self.list_dates()?.last() {
            Some(date) => self.load(*date),
            None => Ok(None),
        }
    }

    /// Pick the snapshot today's fetch is compared against.
    ///
    /// A forced date wins outright; if it has no snapshot the result is
    /// `None` and the fallback is not consulted. Otherwise the nearest earlier
    /// snapshot is used, then the fallback date.
    pub fn resolve_comparison(
        &self,
        today: NaiveDate,
        overrides: &ComparisonOverrides,
    ) -> Result<Option<(ComparisonSource, Snapshot)>, StoreError> {
        if let Some(forced) = overrides.force {
            info!(%forced, "using forced comparison date");
            let snapshot = self.load(forced)?;
            if snapshot.is_none() {
                warn!(%forced, "no snapshot stored for forced comparison date");
            }
            return Ok(snapshot.map(|s| (ComparisonSource::Forced, s)));
        }
        if let Some(previous) = self.load_previous(today)? {
            return Ok(Some((ComparisonSource::Previous, previous)));
        }
        if let Some(fallback) = overrides.fallback
            && let Some(snapshot) = self.load(fallback)?
        {
            return Ok(Some((ComparisonSource::Fallback, snapshot)));
        }
        Ok(None)
    }

    /// Copy enrichment fields from one snapshot into every other snapshot's
    /// matching cases. Only empty fields are filled. Nothing is written when
    /// `dry_run` is set.
    pub fn backfill(
        &self,
        source: Option<NaiveDate>,
        dry_run: bool,
    ) -> Result<Option<BackfillReport>, StoreError> {
        let dates = self.list_dates()?;
        let Some(source_date) = source.or_else(|| dates.last().copied()) else {
            return Ok(None);
        };
        let source_snapshot = self
            .load(source_date)?
            .ok_or(StoreError::SnapshotNotFound(source_date))?;
        let known: HashMap<&str, &IncomingRecord> = source_snapshot.by_case_id();

        let mut report = BackfillReport {
            source: source_date,
            source_records: known.len(),
            dry_run,
            entries: Vec::new(),
        };
        for date in dates.into_iter().filter(|d| *d != source_date) {
            let Some(mut snapshot) = self.load(date)? else {
                continue;
            };
            let mut updated = 0;
            for record in &mut snapshot.records {
                if let Some(src) = known.get(record.case_id.as_str())
                    && fill_from(record, src)
                {
                    updated += 1;
                }
            }
            if updated > 0 && !dry_run {
                self.save(date, snapshot.records)?;
            }
            report.entries.push(BackfillEntry { date, updated });
        }
        info!(
            source = %source_date,
            updated = report.total_updated(),
            dry_run,
            "backfill finished"
        );
        Ok(Some(report))
    }
}

fn date_from_file_name(name: &str) -> Option<NaiveDate> {
    let stem = name.strip_prefix("incoming_")?.strip_suffix(".json")?;
    NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok()
}
