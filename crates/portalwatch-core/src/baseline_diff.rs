//! Catalog diff against a stored baseline.
//!
//! Two comparisons exist and they are not interchangeable:
//!
//! - [`compare_active`] looks only at procedures that are, or were, active.
//!   A docid appearing for the first time counts as `new` only when it is
//!   active, and `modified` fires only for active procedures, comparing the
//!   keys present on the current record.
//! - [`compare_all`] reports every docid transition regardless of the active
//!   flag, and compares the union of keys so a dropped field shows up.
//!
//! In both, a flipped active flag wins over any other field difference.

use std::collections::BTreeSet;

use crate::changes::{ChangeSet, KeyIndex, Modification, Transition, field_changes};
use crate::procedure::{Baseline, BaselineScope, Procedure};

#[derive(Clone, Copy)]
enum Mode {
    ActiveOnly,
    Everything,
}

/// Compare against the active-only baseline.
pub fn compare_active(current: &[Procedure], baseline: &Baseline) -> ChangeSet<Procedure> {
    diff(current, &baseline.procedures, Mode::ActiveOnly)
}

/// Compare against the whole-catalog baseline.
pub fn compare_all(current: &[Procedure], baseline: &Baseline) -> ChangeSet<Procedure> {
    diff(current, &baseline.procedures, Mode::Everything)
}

/// Dispatch on the baseline's scope.
pub fn compare_with_baseline(
    scope: BaselineScope,
    current: &[Procedure],
    baseline: &Baseline,
) -> ChangeSet<Procedure> {
    match scope {
        BaselineScope::Active => compare_active(current, baseline),
        BaselineScope::All => compare_all(current, baseline),
    }
}

/// Whole-catalog diff between two in-memory fetches.
pub fn compare_catalogs(previous: &[Procedure], current: &[Procedure]) -> ChangeSet<Procedure> {
    diff(current, previous, Mode::Everything)
}

fn diff(current: &[Procedure], reference: &[Procedure], mode: Mode) -> ChangeSet<Procedure> {
    let current = KeyIndex::build(current);
    let reference = KeyIndex::build(reference);
    let mut changes = ChangeSet::default();

    for (docid, proc) in current.iter() {
        let Some(old) = reference.get(docid) else {
            if proc.active || matches!(mode, Mode::Everything) {
                changes.new.push(proc.clone());
            }
            continue;
        };

        if old.active != proc.active {
            let transition = Transition {
                old: old.clone(),
                new: proc.clone(),
            };
            if proc.active {
                changes.activated.push(transition);
            } else {
                changes.deactivated.push(transition);
            }
            continue;
        }

        if matches!(mode, Mode::ActiveOnly) && !proc.active {
            continue;
        }

        let old_fields = old.field_map();
        let new_fields = proc.field_map();
        let field_changes = match mode {
            Mode::ActiveOnly => field_changes(&old_fields, &new_fields, new_fields.keys()),
            Mode::Everything => {
                let keys: BTreeSet<&String> = old_fields.keys().chain(new_fields.keys()).collect();
                field_changes(&old_fields, &new_fields, keys)
            }
        };
        if !field_changes.is_empty() {
            changes.modified.push(Modification {
                old: old.clone(),
                new: proc.clone(),
                field_changes,
            });
        }
    }

    for (docid, old) in reference.iter() {
        if !current.contains(docid) {
            changes.removed.push(old.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashSet;

    fn proc(docid: &str, active: bool, title: &str) -> Procedure {
        let mut p = Procedure::new(docid, active);
        p.title = title.to_string();
        p
    }

    fn baseline(procedures: Vec<Procedure>) -> Baseline {
        Baseline {
            timestamp: Utc::now(),
            count: procedures.len(),
            procedures,
        }
    }

    #[test]
    fn self_diff_is_empty_for_both_variants() {
        let catalog = vec![
            proc("1", true, "A"),
            proc("2", false, "B"),
            proc("3", true, "C"),
        ];
        let bl = baseline(catalog.clone());
        assert!(compare_active(&catalog, &bl).is_empty());
        assert!(compare_all(&catalog, &bl).is_empty());
    }

    #[test]
    fn removed_when_absent_from_current() {
        let bl = baseline(vec![proc("1", true, "A")]);
        for changes in [compare_active(&[], &bl), compare_all(&[], &bl)] {
            assert_eq!(changes.removed.len(), 1);
            assert_eq!(changes.removed[0].docid, "1");
            assert!(changes.new.is_empty());
            assert!(changes.activated.is_empty());
            assert!(changes.deactivated.is_empty());
            assert!(changes.modified.is_empty());
        }
    }

    #[test]
    fn new_active_procedure_reported_by_both() {
        let bl = baseline(vec![]);
        let current = vec![proc("2", true, "B")];
        let active = compare_active(&current, &bl);
        let all = compare_all(&current, &bl);
        assert_eq!(active.new.len(), 1);
        assert_eq!(active.new[0].docid, "2");
        assert_eq!(active, all);
    }

    #[test]
    fn inactive_newcomer_ignored_by_active_compare_only() {
        let bl = baseline(vec![]);
        let current = vec![proc("7", false, "X")];
        assert!(compare_active(&current, &bl).is_empty());
        assert_eq!(compare_all(&current, &bl).new.len(), 1);
    }

    #[test]
    fn flip_takes_precedence_over_modification() {
        let bl = baseline(vec![proc("1", true, "Old"), proc("2", false, "Old")]);
        let current = vec![proc("1", false, "New"), proc("2", true, "New")];
        for changes in [compare_active(&current, &bl), compare_all(&current, &bl)] {
            assert_eq!(changes.deactivated.len(), 1);
            assert_eq!(changes.deactivated[0].new.docid, "1");
            assert_eq!(changes.activated.len(), 1);
            assert_eq!(changes.activated[0].new.docid, "2");
            assert!(changes.modified.is_empty());
        }
    }

    #[test]
    fn inactive_modification_only_seen_by_all_compare() {
        let bl = baseline(vec![proc("1", false, "Old")]);
        let current = vec![proc("1", false, "New")];
        assert!(compare_active(&current, &bl).is_empty());

        let all = compare_all(&current, &bl);
        assert_eq!(all.modified.len(), 1);
        let change = &all.modified[0].field_changes["title"];
        assert_eq!(change.old.as_deref(), Some("Old"));
        assert_eq!(change.new.as_deref(), Some("New"));
    }

    #[test]
    fn dropped_field_only_detected_with_union_of_keys() {
        let old: Procedure =
            serde_json::from_value(json!({"docid": "1", "active": "YES", "note": "x"})).unwrap();
        let bl = baseline(vec![old]);
        let current = vec![Procedure::new("1", true)];

        assert!(compare_active(&current, &bl).is_empty());

        let all = compare_all(&current, &bl);
        assert_eq!(all.modified.len(), 1);
        let change = &all.modified[0].field_changes["note"];
        assert_eq!(change.old.as_deref(), Some("x"));
        assert_eq!(change.new, None);
    }

    #[test]
    fn buckets_are_key_disjoint() {
        let bl = baseline(vec![
            proc("1", true, "A"),
            proc("2", true, "B"),
            proc("3", false, "C"),
            proc("4", true, "D"),
        ]);
        let current = vec![
            proc("2", true, "B2"),
            proc("3", true, "C"),
            proc("4", true, "D"),
            proc("5", true, "E"),
            proc("5", false, "E"),
        ];
        for changes in [compare_active(&current, &bl), compare_all(&current, &bl)] {
            let mut seen = HashSet::new();
            let keys = changes
                .new
                .iter()
                .chain(changes.removed.iter())
                .map(|p| p.docid.clone())
                .chain(changes.activated.iter().map(|t| t.new.docid.clone()))
                .chain(changes.deactivated.iter().map(|t| t.new.docid.clone()))
                .chain(changes.modified.iter().map(|m| m.new.docid.clone()));
            for key in keys {
                assert!(seen.insert(key.clone()), "docid {key} in two buckets");
            }
        }
    }

    #[test]
    fn scope_dispatch() {
        let bl = baseline(vec![]);
        let current = vec![proc("9", false, "Z")];
        assert!(compare_with_baseline(BaselineScope::Active, &current, &bl).is_empty());
        assert_eq!(compare_with_baseline(BaselineScope::All, &current, &bl).new.len(), 1);
    }
}
