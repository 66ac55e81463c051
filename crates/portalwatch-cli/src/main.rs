mod config;
mod display;
mod monitor;
mod pipeline;

use anyhow::{Context, bail};
use chrono::{Local, Utc};
use clap::Parser;
use portalwatch_core::procedure::active_only;
use portalwatch_core::{Baseline, BaselineScope, compare_active, compare_all};
use portalwatch_store::DataDir;
use portalwatch_sync::{PortalSession, ReqwestTransport};
use tracing_subscriber::EnvFilter;

use config::{Cli, Command, ComparisonArgs, MonitorArgs, PortalArgs, ProceduresArgs};
use monitor::MonitorSettings;
use pipeline::IncomingOptions;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!("portalwatch v{}", env!("CARGO_PKG_VERSION"));
    let data = DataDir::new(&cli.data_dir);

    match cli.command {
        Command::Procedures(args) => cmd_procedures(&cli.portal, &data, &args),
        Command::Incoming {
            enrich_all,
            comparison,
        } => cmd_incoming(&cli.portal, &data, enrich_all, &comparison),
        Command::CompareDate { date } => {
            let cmp = pipeline::compare_stored(&data, date)?;
            display::print(&display::render_incoming_changes(
                date,
                Some(&cmp.label),
                &cmp.changes,
                &cmp.new_records,
            ));
            Ok(())
        }
        Command::Analyze { date } => {
            let analysis = pipeline::analyze_snapshot(&data, date)?;
            display::print(&display::render_test_analysis(
                date,
                &analysis.stats,
                &analysis.partition,
            ));
            Ok(())
        }
        Command::Backfill { source, live } => {
            match pipeline::backfill(&data, source, live)? {
                Some(report) => display::print(&display::render_backfill(&report)),
                None => println!("No snapshots stored under {}", data.incoming_dir().display()),
            }
            Ok(())
        }
        Command::Monitor(args) => cmd_monitor(&cli.portal, &data, &args),
    }
}

fn connect(portal: &PortalArgs) -> anyhow::Result<PortalSession<ReqwestTransport>> {
    let config = portal.portal_config()?;
    let transport = ReqwestTransport::new(&config).context("building HTTP client")?;
    Ok(PortalSession::new(config, transport))
}

fn cmd_procedures(portal: &PortalArgs, data: &DataDir, args: &ProceduresArgs) -> anyhow::Result<()> {
    let params = portal.catalog_params()?;
    let mut session = connect(portal)?;
    let now = Utc::now();

    let Some(catalog) = pipeline::fetch_catalog(&mut session, &params, data, now)? else {
        bail!("could not fetch the procedure catalog");
    };
    let procedures = &catalog.procedures;
    let active = catalog.active_count();
    println!(
        "\nProcedures: {} total, {} active, {} inactive",
        procedures.len(),
        active,
        procedures.len() - active
    );
    if !catalog.complete {
        println!("Warning: the portal stopped paging early; the catalog may be incomplete.");
    }

    if args.list_active {
        display::print(&display::render_procedure_list(
            "ACTIVE PROCEDURES",
            &active_only(procedures),
        ));
    }
    if args.list_all {
        display::print(&display::render_procedure_list("ALL PROCEDURES", procedures));
    }

    if args.save_baseline {
        save_baseline(data, BaselineScope::Active, procedures)?;
    }
    if args.save_all_baseline {
        save_baseline(data, BaselineScope::All, procedures)?;
    }

    if args.compare {
        match data.load_baseline(BaselineScope::Active)? {
            Some(baseline) => display::print(&display::render_baseline_comparison(
                "ACTIVE PROCEDURES VS BASELINE",
                &compare_active(procedures, &baseline),
                &baseline,
            )),
            None => println!("\nNo active baseline found. Run with --save-baseline first."),
        }
    }
    if args.compare_all {
        match data.load_baseline(BaselineScope::All)? {
            Some(baseline) => display::print(&display::render_baseline_comparison(
                "ALL PROCEDURES VS BASELINE",
                &compare_all(procedures, &baseline),
                &baseline,
            )),
            None => println!("\nNo full-catalog baseline found. Run with --save-all-baseline first."),
        }
    }
    Ok(())
}

fn save_baseline(
    data: &DataDir,
    scope: BaselineScope,
    procedures: &[portalwatch_core::Procedure],
) -> anyhow::Result<()> {
    let baseline = Baseline::capture(scope, procedures, Utc::now());
    data.save_baseline(scope, &baseline)
        .with_context(|| format!("saving {} baseline", scope.as_str()))?;
    println!(
        "Saved {} baseline with {} procedures to {}",
        scope.as_str(),
        baseline.count,
        data.baseline_path(scope).display()
    );
    Ok(())
}

fn cmd_incoming(
    portal: &PortalArgs,
    data: &DataDir,
    enrich_all: bool,
    comparison: &ComparisonArgs,
) -> anyhow::Result<()> {
    let params = portal.incoming_params()?;
    let mut session = connect(portal)?;
    let options = IncomingOptions {
        enrich_all,
        overrides: comparison.overrides(),
    };

    let outcome = pipeline::run_incoming_pipeline(
        &mut session,
        &params,
        data,
        &options,
        Local::now().date_naive(),
        Utc::now(),
    )?;
    let Some(outcome) = outcome else {
        println!("\nFetching incoming requests failed.");
        return Ok(());
    };

    if outcome.enrichment.looked_up > 0 {
        display::print(&display::render_enrich_summary(&outcome.enrichment));
    }
    display::print(&display::render_incoming_changes(
        outcome.date,
        outcome.compared_with.as_ref(),
        &outcome.changes,
        &outcome.new_records,
    ));
    println!(
        "Snapshot {} saved with {} records ({} real, {} test).",
        outcome.date, outcome.snapshot_count, outcome.stats.real, outcome.stats.test
    );
    if outcome.carried_enrichment > 0 {
        tracing::debug!(records = outcome.carried_enrichment, "enrichment carried forward");
    }
    if !outcome.complete {
        println!("Warning: the portal stopped paging early; some requests may be missing.");
    }
    Ok(())
}

fn cmd_monitor(portal: &PortalArgs, data: &DataDir, args: &MonitorArgs) -> anyhow::Result<()> {
    let incoming = if args.with_incoming {
        Some((
            portal.incoming_params()?,
            IncomingOptions {
                enrich_all: false,
                overrides: args.comparison.overrides(),
            },
        ))
    } else {
        None
    };
    let settings = MonitorSettings {
        interval: args.interval(),
        max_cycles: args.max_cycles,
        catalog_params: portal.catalog_params()?,
        incoming,
    };
    let mut session = connect(portal)?;
    let shutdown = monitor::install_shutdown_flag()?;

    let stats = monitor::run_monitor(&mut session, data, &settings, &shutdown)?;
    println!(
        "\nMonitor stopped after {} checks ({} failed, {} catalog changes, {} incoming changes).",
        stats.cycles, stats.failed_cycles, stats.catalog_changes, stats.incoming_changes
    );
    Ok(())
}
