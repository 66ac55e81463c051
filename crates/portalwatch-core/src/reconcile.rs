//! Reconciling a truncated live fetch with the previous day's snapshot.
//!
//! The list API only returns the most recent window of cases, so a case that
//! is missing from today's fetch has usually just aged out of the window.
//! [`merge_with_previous`] therefore carries every previous case forward
//! unchanged when today's fetch does not mention it.
//!
//! A consequence worth keeping in mind: once merged, `removed` is empty
//! against the snapshot that was merged in. A case can only disappear if it
//! is missing from both the live fetch and the carried-forward snapshot,
//! which this algorithm never produces. `removed` is meaningful when two
//! stored snapshots are compared directly ([`compare_snapshots`]). Whether a
//! case should ever expire after going unseen for a while is not decided
//! here.

use std::collections::{BTreeMap, HashSet};

use crate::changes::{ChangeSet, FieldChange, KeyIndex, Modification};
use crate::incoming::{IncomingRecord, Snapshot, fill_from, sort_newest_first};

/// Merge today's fetched records with the previous snapshot.
///
/// Today's version of a case wins. Cases only present in `previous` are
/// reinserted unchanged. The result is unique by `case_id` and sorted newest
/// first. Without a previous snapshot the fetch is returned as is.
pub fn merge_with_previous(
    current: Vec<IncomingRecord>,
    previous: Option<&Snapshot>,
) -> Vec<IncomingRecord> {
    let Some(previous) = previous else {
        return current;
    };

    let present: HashSet<String> = current.iter().map(|r| r.case_id.clone()).collect();
    let mut merged = current;
    let mut carried: HashSet<&str> = HashSet::new();
    for record in &previous.records {
        if record.case_id.is_empty() || present.contains(&record.case_id) {
            continue;
        }
        if carried.insert(record.case_id.as_str()) {
            merged.push(record.clone());
        }
    }

    let mut merged = dedup_last_wins(merged);
    sort_newest_first(&mut merged);
    tracing::debug!(
        carried = carried.len(),
        total = merged.len(),
        previous_date = %previous.date,
        "merged with previous snapshot"
    );
    merged
}

fn dedup_last_wins(records: Vec<IncomingRecord>) -> Vec<IncomingRecord> {
    let index = KeyIndex::build(records.iter());
    index.iter().map(|(_, r)| r.clone()).collect()
}

/// Copy enrichment fields the previous snapshot already knows onto records
/// that lack them. Returns how many records gained at least one field.
pub fn carry_forward_enrichment(records: &mut [IncomingRecord], previous: &Snapshot) -> usize {
    let known = previous.by_case_id();
    records
        .iter_mut()
        .filter_map(|record| {
            let source = known.get(record.case_id.as_str())?;
            fill_from(record, source).then_some(())
        })
        .count()
}

/// Case ids present in `records` but not in `previous`.
pub fn new_case_ids(records: &[IncomingRecord], previous: Option<&Snapshot>) -> HashSet<String> {
    let known: HashSet<&str> = previous
        .map(|p| p.records.iter().map(|r| r.case_id.as_str()).collect())
        .unwrap_or_default();
    records
        .iter()
        .filter(|r| !known.contains(r.case_id.as_str()))
        .map(|r| r.case_id.clone())
        .collect()
}

/// Diff `current` against the previous snapshot.
///
/// `modified` fires only when `submitted_at` differs. Without a previous
/// snapshot everything is treated as the starting point and nothing is
/// reported.
pub fn compare_incoming(
    current: &[IncomingRecord],
    previous: Option<&Snapshot>,
) -> ChangeSet<IncomingRecord> {
    match previous {
        Some(previous) => diff_records(current, &previous.records),
        None => ChangeSet::default(),
    }
}

/// Diff two stored snapshots directly, without merging.
pub fn compare_snapshots(current: &Snapshot, previous: &Snapshot) -> ChangeSet<IncomingRecord> {
    diff_records(&current.records, &previous.records)
}

fn diff_records(current: &[IncomingRecord], previous: &[IncomingRecord]) -> ChangeSet<IncomingRecord> {
    let current = KeyIndex::build(current);
    let previous = KeyIndex::build(previous);
    let mut changes = ChangeSet::default();

    for (case_id, record) in current.iter() {
        match previous.get(case_id) {
            None => changes.new.push(record.clone()),
            Some(old) if old.submitted_at != record.submitted_at => {
                let field_changes = BTreeMap::from([(
                    "submitted_at".to_string(),
                    FieldChange {
                        old: Some(old.submitted_at.clone()),
                        new: Some(record.submitted_at.clone()),
                    },
                )]);
                changes.modified.push(Modification {
                    old: old.clone(),
                    new: record.clone(),
                    field_changes,
                });
            }
            Some(_) => {}
        }
    }
    for (case_id, old) in previous.iter() {
        if !current.contains(case_id) {
            changes.removed.push(old.clone());
        }
    }
    changes
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct Reconciled {
    /// Today's snapshot contents.
    pub records: Vec<IncomingRecord>,
    /// Differences against the previous snapshot.
    pub changes: ChangeSet<IncomingRecord>,
    /// Records that inherited enrichment from the previous snapshot.
    pub carried_enrichment: usize,
}

/// Merge, carry enrichment forward, and diff in one step.
pub fn reconcile(fetched: Vec<IncomingRecord>, previous: Option<&Snapshot>) -> Reconciled {
    let mut records = merge_with_previous(fetched, previous);
    let carried_enrichment = previous
        .map(|p| carry_forward_enrichment(&mut records, p))
        .unwrap_or(0);
    let changes = compare_incoming(&records, previous);
    Reconciled {
        records,
        changes,
        carried_enrichment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, d).unwrap()
    }

    fn rec(case_id: &str, submitted_at: &str) -> IncomingRecord {
        IncomingRecord::new(case_id, submitted_at)
    }

    #[test]
    fn aged_out_case_is_carried_forward() {
        let day1 = Snapshot::new(day(1), vec![rec("A", "2025-01-01")]);
        let merged = merge_with_previous(vec![], Some(&day1));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].case_id, "A");

        let changes = compare_incoming(&merged, Some(&day1));
        assert!(changes.new.is_empty());
        assert!(changes.removed.is_empty());
        assert!(changes.modified.is_empty());
    }

    #[test]
    fn merge_with_self_is_identity() {
        let records = vec![
            rec("C", "2025-01-03T08:00:00"),
            rec("B", "2025-01-02T08:00:00"),
            rec("A", "2025-01-01T08:00:00"),
        ];
        let snap = Snapshot::new(day(3), records.clone());
        let merged = merge_with_previous(records.clone(), Some(&snap));
        assert_eq!(merged, records);
    }

    #[test]
    fn todays_version_wins_and_result_sorted() {
        let mut old_a = rec("A", "2025-01-01T08:00:00");
        old_a.procedure = "known".into();
        let prev = Snapshot::new(day(1), vec![old_a, rec("B", "2025-01-01T09:00:00")]);
        let today = vec![rec("A", "2025-01-02T08:00:00"), rec("C", "2025-01-02T10:00:00")];

        let merged = merge_with_previous(today, Some(&prev));
        let ids: Vec<&str> = merged.iter().map(|r| r.case_id.as_str()).collect();
        assert_eq!(ids, vec!["C", "A", "B"]);
        assert_eq!(merged[1].submitted_at, "2025-01-02T08:00:00");
        assert_eq!(merged[1].procedure, "");
    }

    #[test]
    fn merged_set_is_superset_of_previous() {
        let prev = Snapshot::new(
            day(1),
            vec![rec("A", "1"), rec("B", "2"), rec("C", "3")],
        );
        let merged = merge_with_previous(vec![rec("B", "2"), rec("D", "4")], Some(&prev));
        let ids: HashSet<&str> = merged.iter().map(|r| r.case_id.as_str()).collect();
        for r in &prev.records {
            assert!(ids.contains(r.case_id.as_str()));
        }
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn removed_is_unobservable_after_merge() {
        // A case vanishing from the live fetch never shows up as removed once
        // the previous snapshot is merged back in.
        let prev = Snapshot::new(day(1), vec![rec("A", "1"), rec("B", "2")]);
        let reconciled = reconcile(vec![rec("B", "2")], Some(&prev));
        assert!(reconciled.changes.removed.is_empty());

        // Comparing the stored snapshots directly still reports it.
        let raw_today = Snapshot::new(day(2), vec![rec("B", "2")]);
        let direct = compare_snapshots(&raw_today, &prev);
        assert_eq!(direct.removed.len(), 1);
        assert_eq!(direct.removed[0].case_id, "A");
    }

    #[test]
    fn modified_only_on_submitted_at() {
        let prev = Snapshot::new(day(1), vec![rec("A", "2025-01-01"), rec("B", "2025-01-01")]);
        let mut b = rec("B", "2025-01-01");
        b.party = "changed party".into();
        let current = vec![rec("A", "2025-01-05"), b, rec("N", "2025-01-05")];

        let changes = compare_incoming(&current, Some(&prev));
        assert_eq!(changes.new.len(), 1);
        assert_eq!(changes.new[0].case_id, "N");
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].new.case_id, "A");
        let change = &changes.modified[0].field_changes["submitted_at"];
        assert_eq!(change.old.as_deref(), Some("2025-01-01"));
        assert_eq!(change.new.as_deref(), Some("2025-01-05"));
    }

    #[test]
    fn first_run_reports_nothing() {
        let reconciled = reconcile(vec![rec("A", "1")], None);
        assert_eq!(reconciled.records.len(), 1);
        assert!(reconciled.changes.is_empty());
    }

    #[test]
    fn enrichment_carried_from_previous() {
        let mut known = rec("A", "1");
        known.protocol_number = "P-1".into();
        known.procedure = "Άδεια".into();
        let prev = Snapshot::new(day(1), vec![known]);

        let mut fresh = rec("A", "1");
        fresh.procedure = "kept".into();
        let mut records = vec![fresh, rec("Z", "2")];
        let filled = carry_forward_enrichment(&mut records, &prev);
        assert_eq!(filled, 1);
        assert_eq!(records[0].protocol_number, "P-1");
        assert_eq!(records[0].procedure, "kept");
        assert_eq!(records[1].protocol_number, "");
    }

    #[test]
    fn diff_buckets_disjoint() {
        let prev = Snapshot::new(day(1), vec![rec("A", "1"), rec("B", "1"), rec("C", "1")]);
        let current = vec![rec("B", "2"), rec("C", "1"), rec("D", "1")];
        let changes = compare_incoming(&current, Some(&prev));
        let mut seen = HashSet::new();
        for id in changes
            .new
            .iter()
            .chain(changes.removed.iter())
            .map(|r| r.case_id.clone())
            .chain(changes.modified.iter().map(|m| m.new.case_id.clone()))
        {
            assert!(seen.insert(id));
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn new_case_ids_against_previous() {
        let prev = Snapshot::new(day(1), vec![rec("A", "1")]);
        let ids = new_case_ids(&[rec("A", "1"), rec("B", "1")], Some(&prev));
        assert_eq!(ids, HashSet::from(["B".to_string()]));
        assert_eq!(new_case_ids(&[rec("A", "1")], None).len(), 1);
    }
}
