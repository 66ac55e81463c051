//! Text reports for catalog diffs, incoming-request changes, test analysis
//! and backfills.
//!
//! Every `render_*` function builds the whole report as a `String`;
//! [`print`] writes it to stdout.

use std::fmt::Write;

use chrono::NaiveDate;
use portalwatch_core::{
    Baseline, ChangeSet, EnrichSummary, FieldChange, IncomingRecord, Modification, Partition,
    Procedure, RecordStats, Transition,
};
use portalwatch_store::{BackfillReport, ComparisonSource};

const RULE_WIDTH: usize = 80;
const MAX_VALUE_LEN: usize = 50;

// ── Procedures ──

/// Numbered list of procedures, one per line.
pub fn render_procedure_list(heading: &str, procedures: &[Procedure]) -> String {
    let mut out = String::new();
    banner(&mut out, &format!("{heading} ({})", procedures.len()));
    for (idx, p) in procedures.iter().enumerate() {
        let _ = writeln!(out, "{:>3}. {} [{}] {}", idx + 1, status_mark(p.active), p.code, p.title);
    }
    rule(&mut out, '=');
    out
}

/// Catalog changes against a stored baseline.
pub fn render_baseline_comparison(
    heading: &str,
    changes: &ChangeSet<Procedure>,
    baseline: &Baseline,
) -> String {
    let mut out = String::new();
    banner(&mut out, heading);
    let _ = writeln!(out, "  {:<26} {}", "baseline taken", baseline.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(out, "  {:<26} {}", "procedures in baseline", baseline.count);
    render_catalog_changes(&mut out, changes);
    out
}

/// Catalog changes between two polls of the monitor.
pub fn render_catalog_diff(changes: &ChangeSet<Procedure>) -> String {
    let mut out = String::new();
    banner(&mut out, "CATALOG CHANGES");
    render_catalog_changes(&mut out, changes);
    out
}

fn render_catalog_changes(out: &mut String, changes: &ChangeSet<Procedure>) {
    if changes.is_empty() {
        let _ = writeln!(out, "\nNo changes.");
        rule(out, '=');
        return;
    }
    procedure_section(out, "New", &changes.new);
    transition_section(out, "Activated", &changes.activated, "NO -> YES");
    transition_section(out, "Deactivated", &changes.deactivated, "YES -> NO");
    procedure_section(out, "Removed", &changes.removed);
    if !changes.modified.is_empty() {
        section_header(out, "Modified", changes.modified.len());
        for (idx, m) in changes.modified.iter().enumerate() {
            procedure_line(out, idx, &m.new);
            field_changes(out, m);
        }
    }
    let _ = writeln!(out);
    rule(out, '=');
}

fn procedure_section(out: &mut String, label: &str, procedures: &[Procedure]) {
    if procedures.is_empty() {
        return;
    }
    section_header(out, label, procedures.len());
    for (idx, p) in procedures.iter().enumerate() {
        procedure_line(out, idx, p);
    }
}

fn transition_section(
    out: &mut String,
    label: &str,
    transitions: &[Transition<Procedure>],
    arrow: &str,
) {
    if transitions.is_empty() {
        return;
    }
    section_header(out, label, transitions.len());
    for (idx, t) in transitions.iter().enumerate() {
        procedure_line(out, idx, &t.new);
        let _ = writeln!(out, "     active: {arrow}");
    }
}

fn procedure_line(out: &mut String, idx: usize, p: &Procedure) {
    let _ = writeln!(out, "{:>3}. {} [{}] {}", idx + 1, status_mark(p.active), p.code, p.title);
}

fn field_changes<T>(out: &mut String, modification: &Modification<T>) {
    for (field, FieldChange { old, new }) in &modification.field_changes {
        let _ = writeln!(
            out,
            "     {field}: {} -> {}",
            shorten(old.as_deref()),
            shorten(new.as_deref())
        );
    }
}

// ── Incoming requests ──

/// Header line naming the snapshot today's fetch was compared with.
#[derive(Debug, Clone, Copy)]
pub struct ComparisonLabel {
    pub source: ComparisonSource,
    pub date: NaiveDate,
}

/// Changes in the incoming-request queue, with new records split into real
/// and test-origin.
pub fn render_incoming_changes(
    date: NaiveDate,
    compared_with: Option<&ComparisonLabel>,
    changes: &ChangeSet<IncomingRecord>,
    new_records: &Partition,
) -> String {
    let mut out = String::new();
    banner(&mut out, &format!("INCOMING REQUESTS ({date})"));

    let Some(label) = compared_with else {
        let _ = writeln!(out, "No earlier snapshot found. Today's snapshot is the new starting point.");
        rule(&mut out, '=');
        return out;
    };
    let _ = writeln!(out, "Compared with snapshot {} ({})", label.date, label.source.as_str());
    if changes.is_empty() {
        let _ = writeln!(out, "No changes since that snapshot.");
        rule(&mut out, '=');
        return out;
    }

    if !new_records.real.is_empty() {
        section_header(&mut out, "New requests", new_records.real.len());
        for (idx, record) in new_records.real.iter().enumerate() {
            incoming_card(&mut out, idx, record);
        }
    }
    if !new_records.test.is_empty() {
        section_header(&mut out, "New test requests", new_records.test.len());
        for (idx, test) in new_records.test.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. [t] case {} ({}) {}",
                idx + 1,
                test.record.case_id,
                test.test_reason.as_str(),
                or_dash(&test.record.party)
            );
        }
    }
    if !changes.removed.is_empty() {
        section_header(&mut out, "Removed", changes.removed.len());
        for (idx, record) in changes.removed.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. [-] case {} {} {}",
                idx + 1,
                record.case_id,
                record.submitted_at,
                or_dash(&record.party)
            );
        }
    }
    if !changes.modified.is_empty() {
        section_header(&mut out, "Modified", changes.modified.len());
        for (idx, m) in changes.modified.iter().enumerate() {
            let _ = writeln!(out, "{:>3}. [~] case {} {}", idx + 1, m.new.case_id, or_dash(&m.new.party));
            field_changes(&mut out, m);
        }
    }
    let _ = writeln!(out);
    rule(&mut out, '=');
    out
}

fn incoming_card(out: &mut String, idx: usize, record: &IncomingRecord) {
    let protocol = if record.protocol_number.is_empty() {
        String::new()
    } else {
        format!(" (protocol {})", record.protocol_number)
    };
    let _ = writeln!(
        out,
        "{:>3}. [+] case {}{protocol} | {}",
        idx + 1,
        record.case_id,
        record.submitted_at
    );
    if !record.procedure.is_empty() {
        let _ = writeln!(out, "       {:<12} {}", "procedure", record.procedure);
    }
    if !record.directory.is_empty() {
        let _ = writeln!(out, "       {:<12} {}", "directory", record.directory);
    }
    let _ = writeln!(out, "       {:<12} {}", "party", or_dash(&record.party));
}

/// Real versus test-origin breakdown of one snapshot.
pub fn render_test_analysis(date: NaiveDate, stats: &RecordStats, partition: &Partition) -> String {
    let mut out = String::new();
    banner(&mut out, &format!("TEST REQUEST ANALYSIS ({date})"));
    let _ = writeln!(out, "  {:<26} {}", "total", stats.total);
    let _ = writeln!(out, "  {:<26} {}", "real", stats.real);
    let _ = writeln!(out, "  {:<26} {}", "test", stats.test);
    for (reason, count) in &stats.test_breakdown {
        let _ = writeln!(out, "    {:<24} {}", reason.as_str(), count);
    }
    if !partition.test.is_empty() {
        section_header(&mut out, "Test requests", partition.test.len());
        for (idx, test) in partition.test.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:>3}. case {} {} ({})",
                idx + 1,
                test.record.case_id,
                or_dash(&test.record.party),
                test.test_reason.as_str()
            );
        }
    }
    let _ = writeln!(out);
    rule(&mut out, '=');
    out
}

pub fn render_enrich_summary(summary: &EnrichSummary) -> String {
    format!(
        "Detail lookups: {} attempted, {} enriched, {} failed\n",
        summary.looked_up, summary.enriched, summary.failed
    )
}

pub fn render_backfill(report: &BackfillReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { "dry run" } else { "live" };
    banner(&mut out, &format!("BACKFILL FROM {} ({mode})", report.source));
    let _ = writeln!(out, "  {:<26} {}", "source records", report.source_records);
    for entry in &report.entries {
        let _ = writeln!(out, "  {:<26} {}", entry.date.to_string(), entry.updated);
    }
    let _ = writeln!(out, "  {:<26} {}", "total updated", report.total_updated());
    if report.dry_run && report.total_updated() > 0 {
        let _ = writeln!(out, "\nNothing was written. Re-run with --live to apply.");
    }
    rule(&mut out, '=');
    out
}

pub fn print(report: &str) {
    print!("{report}");
}

// ── Helpers ──

fn banner(out: &mut String, title: &str) {
    let _ = writeln!(out);
    rule(out, '=');
    let _ = writeln!(out, "{title:^RULE_WIDTH$}");
    rule(out, '=');
}

fn section_header(out: &mut String, label: &str, count: usize) {
    let _ = writeln!(out, "\n{label} ({count})");
    rule(out, '-');
}

fn rule(out: &mut String, ch: char) {
    let _ = writeln!(out, "{}", ch.to_string().repeat(RULE_WIDTH));
}

fn status_mark(active: bool) -> &'static str {
    if active { "+" } else { " " }
}

fn or_dash(value: &str) -> &str {
    if value.trim().is_empty() { "-" } else { value }
}

fn shorten(value: Option<&str>) -> String {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return "(empty)".to_string();
    };
    if value.chars().count() <= MAX_VALUE_LEN {
        return value.to_string();
    }
    let cut: String = value.chars().take(MAX_VALUE_LEN).collect();
    format!("{cut}...")
}
