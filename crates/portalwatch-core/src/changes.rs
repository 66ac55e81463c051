//! The change-set shape shared by the catalog diff and the incoming diff.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

/// A record with an opaque, exactly-compared identity key.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// Old and new value of one field. `None` means the field was absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// A record whose active flag flipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition<T> {
    pub old: T,
    pub new: T,
}

/// A record that changed without flipping its active flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Modification<T> {
    pub old: T,
    pub new: T,
    pub field_changes: BTreeMap<String, FieldChange>,
}

/// Classified differences between a reference set and a current set.
///
/// Every key lands in at most one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeSet<T> {
    pub new: Vec<T>,
    pub removed: Vec<T>,
    pub activated: Vec<Transition<T>>,
    pub deactivated: Vec<Transition<T>>,
    pub modified: Vec<Modification<T>>,
}

impl<T> Default for ChangeSet<T> {
    fn default() -> Self {
        Self {
            new: Vec::new(),
            removed: Vec::new(),
            activated: Vec::new(),
            deactivated: Vec::new(),
            modified: Vec::new(),
        }
    }
}

impl<T> ChangeSet<T> {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Number of entries across all buckets.
    pub fn total(&self) -> usize {
        self.new.len()
            + self.removed.len()
            + self.activated.len()
            + self.deactivated.len()
            + self.modified.len()
    }
}

/// Index records by key, keeping first-seen order and last-write-wins values.
pub(crate) struct KeyIndex<'a, T> {
    order: Vec<&'a str>,
    by_key: HashMap<&'a str, &'a T>,
}

impl<'a, T: Keyed> KeyIndex<'a, T> {
    pub(crate) fn build(items: impl IntoIterator<Item = &'a T>) -> Self {
        let mut order = Vec::new();
        let mut by_key = HashMap::new();
        for item in items {
            let key = item.key();
            if key.is_empty() {
                continue;
            }
            if by_key.insert(key, item).is_none() {
                order.push(key);
            }
        }
        Self { order, by_key }
    }

    pub(crate) fn get(&self, key: &str) -> Option<&'a T> {
        self.by_key.get(key).copied()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&'a str, &'a T)> + '_ {
        self.order.iter().map(|key| (*key, self.by_key[key]))
    }
}

/// Field-level differences over the chosen key set.
pub(crate) fn field_changes<'k>(
    old: &BTreeMap<String, String>,
    new: &BTreeMap<String, String>,
    keys: impl IntoIterator<Item = &'k String>,
) -> BTreeMap<String, FieldChange> {
    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            (before != after).then(|| {
                (
                    key.clone(),
                    FieldChange {
                        old: before.cloned(),
                        new: after.cloned(),
                    },
                )
            })
        })
        .collect()
}
