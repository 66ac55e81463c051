//! Catalog and incoming-request pipelines: fetch from the portal, reconcile
//! with what is stored, persist, and hand back what changed.

use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};
use portalwatch_core::reconcile::{carry_forward_enrichment, new_case_ids};
use portalwatch_core::{
    ChangeSet, DetailFieldMap, DetailFields, EnrichSummary, IncomingFieldMap, IncomingRecord,
    Partition, Procedure, ProcedureFieldMap, RecordClassifier, RecordStats, compare_incoming,
    compare_snapshots, enrich_records, ingest_incoming, merge_with_previous, parse_catalog,
    reconcile,
};
use portalwatch_store::{BackfillReport, ComparisonOverrides, DataDir, SnapshotStore};
use portalwatch_sync::{ListParams, PageSource, PortalSession, SyncError, Transport, fetch_all};
use tracing::{debug, info, warn};

use crate::display::ComparisonLabel;

/// What the pipelines need from the portal.
pub trait Portal: PageSource {
    fn lookup_detail(
        &mut self,
        doc_id: &str,
        fields: &DetailFieldMap,
    ) -> Result<Option<DetailFields>, SyncError>;
}

impl<T: Transport> Portal for PortalSession<T> {
    fn lookup_detail(
        &mut self,
        doc_id: &str,
        fields: &DetailFieldMap,
    ) -> Result<Option<DetailFields>, SyncError> {
        PortalSession::lookup_detail(self, doc_id, fields)
    }
}

// ── Catalog ──

pub struct CatalogFetch {
    pub procedures: Vec<Procedure>,
    /// False when pagination stopped before the reported total.
    pub complete: bool,
    /// Procedure dictionary entries added or refreshed.
    pub dictionary_updates: usize,
}

impl CatalogFetch {
    pub fn active_count(&self) -> usize {
        self.procedures.iter().filter(|p| p.active).count()
    }
}

/// Fetch the whole catalog and fold it into the procedure dictionary.
///
/// `Ok(None)` when the first page could not be fetched.
pub fn fetch_catalog<P: Portal + ?Sized>(
    portal: &mut P,
    params: &ListParams,
    data: &DataDir,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<CatalogFetch>> {
    // 1. Page through the list API.
    let Some(fetched) = fetch_all(portal, params)? else {
        warn!("catalog fetch failed");
        return Ok(None);
    };

    // 2. Normalize rows.
    let procedures = parse_catalog(&fetched.records, &ProcedureFieldMap::default());
    info!(
        rows = fetched.records.len(),
        procedures = procedures.len(),
        complete = fetched.complete,
        "catalog fetched"
    );

    // 3. Learn any titles the dictionary has not seen.
    let mut dictionary = data.load_dictionary().context("loading procedure dictionary")?;
    let dictionary_updates = dictionary.observe_catalog(&procedures, now);
    if dictionary_updates > 0 {
        data.save_dictionary(&dictionary)
            .context("saving procedure dictionary")?;
        info!(entries = dictionary_updates, "procedure dictionary updated");
    }

    Ok(Some(CatalogFetch {
        procedures,
        complete: fetched.complete,
        dictionary_updates,
    }))
}

// ── Incoming requests ──

#[derive(Debug, Clone, Default)]
pub struct IncomingOptions {
    /// Look up every record lacking a procedure or directory, not just new ones.
    pub enrich_all: bool,
    pub overrides: ComparisonOverrides,
}

pub struct IncomingOutcome {
    pub date: NaiveDate,
    pub compared_with: Option<ComparisonLabel>,
    pub changes: ChangeSet<IncomingRecord>,
    /// New records split into real and test-origin.
    pub new_records: Partition,
    /// Real/test counts over the whole saved snapshot.
    pub stats: RecordStats,
    pub enrichment: EnrichSummary,
    pub carried_enrichment: usize,
    pub snapshot_count: usize,
    pub complete: bool,
}

/// Run one incoming-request pass and save today's snapshot.
///
/// `Ok(None)` when the first list page could not be fetched; nothing is
/// written in that case.
pub fn run_incoming_pipeline<P: Portal + ?Sized>(
    portal: &mut P,
    params: &ListParams,
    data: &DataDir,
    options: &IncomingOptions,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> anyhow::Result<Option<IncomingOutcome>> {
    let snapshots = SnapshotStore::new(data.clone());

    // 1. Pick the snapshot to compare against.
    let comparison = snapshots
        .resolve_comparison(today, &options.overrides)
        .context("resolving comparison snapshot")?;
    let (compared_with, previous) = match comparison {
        Some((source, snapshot)) => (
            Some(ComparisonLabel {
                source,
                date: snapshot.date,
            }),
            Some(snapshot),
        ),
        None => (None, None),
    };

    // 2. Fetch every page.
    let Some(fetched) = fetch_all(portal, params)? else {
        warn!("incoming fetch failed");
        return Ok(None);
    };

    // 3. Normalize rows.
    let ingested = ingest_incoming(&fetched.records, &IncomingFieldMap::default());
    info!(
        rows = fetched.records.len(),
        records = ingested.records.len(),
        discarded = ingested.discarded,
        duplicates = ingested.duplicates,
        "incoming requests fetched"
    );

    // 4. Merge with the previous snapshot and carry enrichment forward.
    let reconciled = reconcile(ingested.records, previous.as_ref());
    let mut records = reconciled.records;
    let mut carried_enrichment = reconciled.carried_enrichment;

    // 5. Fold in a snapshot already saved today. Its enrichment is kept and
    //    its enriched cases are not looked up again.
    let mut enriched_today: HashSet<String> = HashSet::new();
    if previous.as_ref().map(|p| p.date) != Some(today)
        && let Some(earlier) = snapshots
            .load(today)
            .with_context(|| format!("loading snapshot for {today}"))?
    {
        records = merge_with_previous(records, Some(&earlier));
        let carried = carry_forward_enrichment(&mut records, &earlier);
        carried_enrichment += carried;
        enriched_today = earlier
            .records
            .iter()
            .filter(|r| !r.procedure.is_empty() && !r.directory.is_empty())
            .map(|r| r.case_id.clone())
            .collect();
        debug!(
            records = earlier.count,
            carried,
            "merged snapshot already saved today"
        );
    }

    // 6. Enrich new records (or every record on a first run) from the detail API.
    let mut targets: HashSet<String> = new_case_ids(&records, previous.as_ref());
    targets.retain(|case_id| !enriched_today.contains(case_id));
    let mut dictionary = data.load_dictionary().context("loading procedure dictionary")?;
    let detail_fields = DetailFieldMap::default();
    let enrichment = enrich_records(
        records
            .iter_mut()
            .filter(|r| {
                if options.enrich_all {
                    r.procedure.is_empty() || r.directory.is_empty()
                } else {
                    targets.contains(&r.case_id)
                }
            }),
        &mut dictionary,
        now,
        |doc_id| portal.lookup_detail(doc_id, &detail_fields),
    )?;
    if enrichment.looked_up > 0 {
        info!(
            looked_up = enrichment.looked_up,
            enriched = enrichment.enriched,
            failed = enrichment.failed,
            "enrichment finished"
        );
    }

    // 7. Diff again so reported records carry their enrichment.
    let changes = compare_incoming(&records, previous.as_ref());

    // 8. Persist the dictionary if detail lookups taught it anything.
    if enrichment.dictionary_changed {
        data.save_dictionary(&dictionary)
            .context("saving procedure dictionary")?;
    }

    // 9. Save today's snapshot.
    let snapshot = snapshots
        .save(today, records)
        .with_context(|| format!("saving snapshot for {today}"))?;

    // 10. Classify.
    let classifier = RecordClassifier::new(&data.load_test_users().context("loading test users")?);
    let new_records = classifier.partition(changes.new.iter().cloned());
    let stats = classifier.stats(&snapshot.records);

    Ok(Some(IncomingOutcome {
        date: today,
        compared_with,
        changes,
        new_records,
        stats,
        enrichment,
        carried_enrichment,
        snapshot_count: snapshot.count,
        complete: fetched.complete,
    }))
}

// ── Stored snapshots ──

pub struct DateComparison {
    pub label: ComparisonLabel,
    pub changes: ChangeSet<IncomingRecord>,
    pub new_records: Partition,
}

/// Diff the snapshot for `date` against the nearest earlier one.
pub fn compare_stored(data: &DataDir, date: NaiveDate) -> anyhow::Result<DateComparison> {
    let snapshots = SnapshotStore::new(data.clone());
    let current = snapshots
        .load(date)?
        .with_context(|| format!("no snapshot stored for {date}"))?;
    let previous = snapshots
        .load_previous(date)?
        .with_context(|| format!("no snapshot earlier than {date}"))?;

    let changes = compare_snapshots(&current, &previous);
    let classifier = RecordClassifier::new(&data.load_test_users()?);
    Ok(DateComparison {
        label: ComparisonLabel {
            source: portalwatch_store::ComparisonSource::Previous,
            date: previous.date,
        },
        new_records: classifier.partition(changes.new.iter().cloned()),
        changes,
    })
}

pub struct Analysis {
    pub stats: RecordStats,
    pub partition: Partition,
}

/// Classify every record of a stored snapshot.
pub fn analyze_snapshot(data: &DataDir, date: NaiveDate) -> anyhow::Result<Analysis> {
    let snapshot = SnapshotStore::new(data.clone())
        .load(date)?
        .with_context(|| format!("no snapshot stored for {date}"))?;
    let classifier = RecordClassifier::new(&data.load_test_users()?);
    Ok(Analysis {
        stats: classifier.stats(&snapshot.records),
        partition: classifier.partition(snapshot.records),
    })
}

pub fn backfill(
    data: &DataDir,
    source: Option<NaiveDate>,
    live: bool,
) -> anyhow::Result<Option<BackfillReport>> {
    Ok(SnapshotStore::new(data.clone()).backfill(source, !live)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::TimeZone;
    use portalwatch_core::{Snapshot, TestUsersConfig};
    use portalwatch_store::write_json;
    use portalwatch_sync::ListPage;
    use serde_json::{Value, json};
    use tempfile::TempDir;

    /// Serves one fixed list and per-document detail payloads.
    #[derive(Default)]
    struct FakePortal {
        rows: Vec<Value>,
        fail_list: bool,
        details: HashMap<String, DetailFields>,
        lookups: Vec<String>,
    }

    impl PageSource for FakePortal {
        fn fetch_page(&mut self, _: &ListParams) -> Result<Option<ListPage>, SyncError> {
            if self.fail_list {
                return Ok(None);
            }
            Ok(Some(ListPage {
                success: true,
                data: self.rows.clone(),
                total: Some(self.rows.len()),
            }))
        }
    }

    impl Portal for FakePortal {
        fn lookup_detail(
            &mut self,
            doc_id: &str,
            _: &DetailFieldMap,
        ) -> Result<Option<DetailFields>, SyncError> {
            self.lookups.push(doc_id.to_string());
            Ok(self.details.get(doc_id).cloned())
        }
    }

    fn incoming_row(case_id: &str, submitted: &str, party: &str, doc_id: &str) -> Value {
        json!({
            "W007_P_FLD21": case_id,
            "DATE_INSERTED_ISO": submitted,
            "W007_P_FLD13": party,
            "DOCID": doc_id,
        })
    }

    fn detail(procedure: &str, directory: &str) -> DetailFields {
        DetailFields {
            protocol_number: Some("P-1".into()),
            procedure: Some(procedure.into()),
            directory: Some(directory.into()),
            procedure_id: Some("900".into()),
            document_category: None,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 2, 8, 0, 0).unwrap()
    }

    fn seed_previous(data: &DataDir, date: NaiveDate, records: Vec<IncomingRecord>) {
        SnapshotStore::new(data.clone()).save(date, records).unwrap();
    }

    #[test]
    fn catalog_fetch_learns_dictionary_titles() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut portal = FakePortal {
            rows: vec![
                json!({"DOCID": "1", "W003_P_FLD4": "Permit", "W003_P_FLD3": "ΝΑΙ", "W003_P_FLD6": "A1"}),
                json!({"DOCID": "2", "W003_P_FLD4": "Licence", "W003_P_FLD3": "ΟΧΙ", "W003_P_FLD6": "B2"}),
                json!({"W003_P_FLD4": "no docid"}),
            ],
            ..FakePortal::default()
        };
        let catalog = fetch_catalog(&mut portal, &ListParams::new(), &data, now())
            .unwrap()
            .unwrap();
        assert_eq!(catalog.procedures.len(), 2);
        assert_eq!(catalog.active_count(), 1);
        assert_eq!(catalog.dictionary_updates, 2);
        assert_eq!(data.load_dictionary().unwrap().len(), 2);

        let again = fetch_catalog(&mut portal, &ListParams::new(), &data, now())
            .unwrap()
            .unwrap();
        assert_eq!(again.dictionary_updates, 0);
    }

    #[test]
    fn failed_fetch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut portal = FakePortal {
            fail_list: true,
            ..FakePortal::default()
        };
        let outcome = run_incoming_pipeline(
            &mut portal,
            &ListParams::new(),
            &data,
            &IncomingOptions::default(),
            day(2),
            now(),
        )
        .unwrap();
        assert!(outcome.is_none());
        assert!(SnapshotStore::new(data).list_dates().unwrap().is_empty());
    }

    #[test]
    fn first_run_enriches_everything_and_reports_nothing() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut portal = FakePortal {
            rows: vec![
                incoming_row("100", "2025-03-02 09:00:00", "ACME", "d100"),
                incoming_row("101", "2025-03-02 10:00:00", "Globex", "d101"),
            ],
            details: HashMap::from([("d100".to_string(), detail("Permit", "North"))]),
            ..FakePortal::default()
        };
        let outcome = run_incoming_pipeline(
            &mut portal,
            &ListParams::new(),
            &data,
            &IncomingOptions::default(),
            day(2),
            now(),
        )
        .unwrap()
        .unwrap();

        assert!(outcome.compared_with.is_none());
        assert!(outcome.changes.is_empty());
        assert_eq!(outcome.enrichment.looked_up, 2);
        assert_eq!(outcome.enrichment.enriched, 1);
        assert_eq!(outcome.enrichment.failed, 1);
        assert_eq!(outcome.snapshot_count, 2);

        let saved = SnapshotStore::new(data.clone()).load(day(2)).unwrap().unwrap();
        let by_id = saved.by_case_id();
        assert_eq!(by_id["100"].procedure, "Permit");
        assert_eq!(by_id["101"].procedure, "");
        assert!(data.load_dictionary().unwrap().get("Permit").is_some());
    }

    #[test]
    fn later_run_enriches_only_new_cases_and_carries_the_rest() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut known = IncomingRecord::new("100", "2025-03-01 09:00:00");
        known.doc_id = "d100".into();
        known.procedure = "Permit".into();
        known.directory = "North".into();
        let mut gone = IncomingRecord::new("99", "2025-02-28 09:00:00");
        gone.doc_id = "d99".into();
        seed_previous(&data, day(1), vec![known, gone]);
        write_json(
            &data.test_users_path(),
            &TestUsersConfig {
                test_users: vec!["TESTER".into()],
                ..TestUsersConfig::default()
            },
        )
        .unwrap();

        let mut portal = FakePortal {
            rows: vec![
                incoming_row("100", "2025-03-01 09:00:00", "ACME", "d100"),
                incoming_row("102", "2025-03-02 11:00:00", "Globex", "d102"),
                incoming_row("103", "2025-03-02 12:00:00", "Tester One", "d103"),
            ],
            details: HashMap::from([("d102".to_string(), detail("Licence", "South"))]),
            ..FakePortal::default()
        };
        let outcome = run_incoming_pipeline(
            &mut portal,
            &ListParams::new(),
            &data,
            &IncomingOptions::default(),
            day(2),
            now(),
        )
        .unwrap()
        .unwrap();

        let label = outcome.compared_with.as_ref().unwrap();
        assert_eq!(label.date, day(1));
        let mut looked_up = portal.lookups.clone();
        looked_up.sort();
        assert_eq!(looked_up, vec!["d102", "d103"]);

        // The record missing from today's fetch is kept, so nothing is removed.
        assert!(outcome.changes.removed.is_empty());
        assert_eq!(outcome.changes.new.len(), 2);
        let enriched = outcome
            .changes
            .new
            .iter()
            .find(|r| r.case_id == "102")
            .unwrap();
        assert_eq!(enriched.directory, "South");

        assert_eq!(outcome.new_records.real.len(), 1);
        assert_eq!(outcome.new_records.test.len(), 1);
        assert_eq!(outcome.stats.total, 4);
        assert_eq!(outcome.stats.test, 1);
    }

    #[test]
    fn same_day_rerun_keeps_earlier_enrichment() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut known = IncomingRecord::new("100", "2025-03-01 09:00:00");
        known.doc_id = "d100".into();
        known.procedure = "Permit".into();
        known.directory = "North".into();
        seed_previous(&data, day(1), vec![known]);

        let rows = vec![
            incoming_row("100", "2025-03-01 09:00:00", "ACME", "d100"),
            incoming_row("102", "2025-03-02 11:00:00", "Globex", "d102"),
        ];
        let mut first = FakePortal {
            rows: rows.clone(),
            details: HashMap::from([("d102".to_string(), detail("Licence", "South"))]),
            ..FakePortal::default()
        };
        run_incoming_pipeline(&mut first, &ListParams::new(), &data, &IncomingOptions::default(), day(2), now())
            .unwrap()
            .unwrap();
        assert_eq!(first.lookups, vec!["d102"]);

        // Second pass on the same day: the detail API has nothing to offer and
        // a case seen earlier today has dropped out of the list window.
        let mut second = FakePortal {
            rows: vec![rows[0].clone()],
            ..FakePortal::default()
        };
        let outcome = run_incoming_pipeline(
            &mut second,
            &ListParams::new(),
            &data,
            &IncomingOptions::default(),
            day(2),
            now(),
        )
        .unwrap()
        .unwrap();

        assert!(second.lookups.is_empty());
        assert_eq!(outcome.compared_with.unwrap().date, day(1));
        assert_eq!(outcome.changes.new.len(), 1);
        assert_eq!(outcome.changes.new[0].procedure, "Licence");

        let saved = SnapshotStore::new(data).load(day(2)).unwrap().unwrap();
        let by_id = saved.by_case_id();
        assert_eq!(saved.count, 2);
        assert_eq!(by_id["102"].procedure, "Licence");
        assert_eq!(by_id["102"].directory, "South");
    }

    #[test]
    fn same_day_rerun_retries_failed_lookups() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        seed_previous(&data, day(1), vec![IncomingRecord::new("100", "2025-03-01 09:00:00")]);

        let rows = vec![incoming_row("102", "2025-03-02 11:00:00", "Globex", "d102")];
        let mut first = FakePortal {
            rows: rows.clone(),
            ..FakePortal::default()
        };
        run_incoming_pipeline(&mut first, &ListParams::new(), &data, &IncomingOptions::default(), day(2), now())
            .unwrap()
            .unwrap();

        let mut second = FakePortal {
            rows,
            details: HashMap::from([("d102".to_string(), detail("Licence", "South"))]),
            ..FakePortal::default()
        };
        let outcome = run_incoming_pipeline(
            &mut second,
            &ListParams::new(),
            &data,
            &IncomingOptions::default(),
            day(2),
            now(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(second.lookups, vec!["d102"]);
        assert_eq!(outcome.enrichment.enriched, 1);
    }

    #[test]
    fn enrich_all_retries_older_gaps() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut bare = IncomingRecord::new("100", "2025-03-01 09:00:00");
        bare.doc_id = "d100".into();
        seed_previous(&data, day(1), vec![bare]);

        let mut portal = FakePortal {
            rows: vec![incoming_row("100", "2025-03-01 09:00:00", "ACME", "d100")],
            details: HashMap::from([("d100".to_string(), detail("Permit", "North"))]),
            ..FakePortal::default()
        };
        let options = IncomingOptions {
            enrich_all: true,
            ..IncomingOptions::default()
        };
        let outcome = run_incoming_pipeline(&mut portal, &ListParams::new(), &data, &options, day(2), now())
            .unwrap()
            .unwrap();
        assert_eq!(portal.lookups, vec!["d100"]);
        assert_eq!(outcome.enrichment.enriched, 1);
    }

    #[test]
    fn compare_stored_needs_both_snapshots() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        seed_previous(&data, day(1), vec![IncomingRecord::new("1", "2025-03-01 09:00:00")]);
        assert!(compare_stored(&data, day(1)).is_err());

        seed_previous(
            &data,
            day(3),
            vec![
                IncomingRecord::new("1", "2025-03-01 09:30:00"),
                IncomingRecord::new("2", "2025-03-03 09:00:00"),
            ],
        );
        let cmp = compare_stored(&data, day(3)).unwrap();
        assert_eq!(cmp.label.date, day(1));
        assert_eq!(cmp.changes.new.len(), 1);
        assert_eq!(cmp.changes.modified.len(), 1);
        assert_eq!(cmp.new_records.real.len(), 1);
    }

    #[test]
    fn analyze_counts_every_record() {
        let dir = TempDir::new().unwrap();
        let data = DataDir::new(dir.path());
        let mut internal = IncomingRecord::new("2", "2025-03-01 10:00:00");
        internal.party = format!("someone{}", portalwatch_core::classify::DEFAULT_INTERNAL_USER_SUFFIX);
        let snapshot = Snapshot::new(day(1), vec![IncomingRecord::new("1", "2025-03-01 09:00:00"), internal]);
        SnapshotStore::new(data.clone()).save(day(1), snapshot.records).unwrap();

        let analysis = analyze_snapshot(&data, day(1)).unwrap();
        assert_eq!(analysis.stats.total, 2);
        assert_eq!(analysis.stats.real, 1);
        assert_eq!(analysis.partition.test.len(), 1);
        assert!(analyze_snapshot(&data, day(9)).is_err());
    }
}
