pub mod baseline_diff;
pub mod changes;
pub mod classify;
pub mod enrich;
pub mod health;
pub mod incoming;
pub mod procedure;
pub mod reconcile;
pub mod value;

pub use baseline_diff::{compare_active, compare_all, compare_catalogs, compare_with_baseline};
pub use changes::{ChangeSet, FieldChange, Keyed, Modification, Transition};
pub use classify::{
    Partition, RecordClassifier, RecordStats, TestReason, TestRecord, TestUsersConfig,
    classify_records,
};
pub use enrich::{
    DetailFieldMap, DetailFields, EnrichSummary, ProcedureCacheEntry, ProcedureDictionary,
    apply_detail, enrich_records, extract_field,
};
pub use health::{HealthTracker, HealthTransition, format_downtime};
pub use incoming::{
    EnrichmentField, IncomingFieldMap, IncomingRecord, Ingested, Snapshot, ingest_incoming,
};
pub use procedure::{Baseline, BaselineScope, Procedure, ProcedureFieldMap, parse_catalog};
pub use reconcile::{Reconciled, compare_incoming, compare_snapshots, merge_with_previous, reconcile};
