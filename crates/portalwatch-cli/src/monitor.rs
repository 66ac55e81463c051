//! Polling loop: fetch the catalog every interval, report differences from
//! the previous poll, and announce portal outages and recoveries once each.
//! With `--with-incoming` a failed incoming pass also counts as an outage.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Local, NaiveDate, Utc};
use portalwatch_core::{HealthTracker, HealthTransition, Procedure, compare_catalogs, format_downtime};
use portalwatch_store::DataDir;
use portalwatch_sync::{ListParams, SyncError};
use tracing::{debug, error, info, warn};

use crate::display;
use crate::pipeline::{IncomingOptions, Portal, fetch_catalog, run_incoming_pipeline};

const SLEEP_TICK: Duration = Duration::from_secs(1);

pub struct MonitorSettings {
    pub interval: Duration,
    pub max_cycles: Option<u64>,
    pub catalog_params: ListParams,
    /// Also run the incoming pipeline each cycle when set.
    pub incoming: Option<(ListParams, IncomingOptions)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub catalog_changes: usize,
    pub incoming_changes: usize,
}

/// Install a Ctrl-C handler that sets the returned flag.
pub fn install_shutdown_flag() -> anyhow::Result<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    })
    .context("installing Ctrl-C handler")?;
    Ok(shutdown)
}

/// Poll until `shutdown` is set, `max_cycles` is reached, or the portal
/// rejects our credentials.
pub fn run_monitor<P: Portal + ?Sized>(
    portal: &mut P,
    data: &DataDir,
    settings: &MonitorSettings,
    shutdown: &AtomicBool,
) -> anyhow::Result<MonitorStats> {
    info!(
        interval_secs = settings.interval.as_secs(),
        with_incoming = settings.incoming.is_some(),
        "monitor started"
    );
    let mut monitor = Monitor::default();

    while !shutdown.load(Ordering::Relaxed) {
        let now = Utc::now();
        monitor.cycle(portal, data, settings, Local::now().date_naive(), now)?;

        if settings
            .max_cycles
            .is_some_and(|max| monitor.stats.cycles >= max)
        {
            info!(cycles = monitor.stats.cycles, "cycle limit reached");
            break;
        }
        if sleep_interruptible(settings.interval, shutdown) {
            break;
        }
    }

    info!(
        cycles = monitor.stats.cycles,
        failed = monitor.stats.failed_cycles,
        "monitor stopped"
    );
    Ok(monitor.stats)
}

#[derive(Default)]
struct Monitor {
    previous: Option<Vec<Procedure>>,
    health: HealthTracker,
    stats: MonitorStats,
}

impl Monitor {
    /// One poll. Only credential problems are returned as errors; anything
    /// else marks the portal down and the loop carries on. The cycle counts
    /// as healthy only when the catalog poll and, if enabled, the incoming
    /// pass both succeed.
    fn cycle<P: Portal + ?Sized>(
        &mut self,
        portal: &mut P,
        data: &DataDir,
        settings: &MonitorSettings,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.stats.cycles += 1;
        debug!(cycle = self.stats.cycles, "checking catalog");
        let mut failure: Option<String> = None;

        match fetch_catalog(portal, &settings.catalog_params, data, now) {
            Ok(Some(catalog)) => {
                if let Some(previous) = &self.previous {
                    let changes = compare_catalogs(previous, &catalog.procedures);
                    if changes.is_empty() {
                        debug!("catalog unchanged");
                    } else {
                        info!(changes = changes.total(), "catalog changed");
                        self.stats.catalog_changes += changes.total();
                        display::print(&display::render_catalog_diff(&changes));
                    }
                } else {
                    info!(procedures = catalog.procedures.len(), "initial catalog captured");
                }
                self.previous = Some(catalog.procedures);
            }
            Ok(None) => failure = Some("catalog fetch failed".to_string()),
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => failure = Some(format!("{e:#}")),
        }

        if let Some((params, options)) = &settings.incoming {
            match run_incoming_pipeline(portal, params, data, options, today, now) {
                Ok(Some(outcome)) => {
                    if !outcome.changes.is_empty() {
                        self.stats.incoming_changes += outcome.changes.total();
                        display::print(&display::render_incoming_changes(
                            outcome.date,
                            outcome.compared_with.as_ref(),
                            &outcome.changes,
                            &outcome.new_records,
                        ));
                    }
                }
                Ok(None) => {
                    warn!("incoming fetch failed this cycle");
                    failure.get_or_insert_with(|| "incoming fetch failed".to_string());
                }
                Err(e) if is_fatal(&e) => return Err(e),
                Err(e) => {
                    let reason = format!("{e:#}");
                    error!(error = %reason, "incoming pipeline failed");
                    failure.get_or_insert(reason);
                }
            }
        }

        match failure {
            Some(reason) => self.failed(now, reason),
            None => self.recovered(now),
        }
        Ok(())
    }

    fn failed(&mut self, now: DateTime<Utc>, reason: String) {
        self.stats.failed_cycles += 1;
        match self.health.observe_failure(now, reason) {
            Some(HealthTransition::WentDown { since, reason }) => {
                warn!(%since, %reason, "portal unreachable");
            }
            _ => debug!("portal still unreachable"),
        }
    }

    fn recovered(&mut self, now: DateTime<Utc>) {
        if let Some(HealthTransition::Recovered { down_since, downtime }) =
            self.health.observe_success(now)
        {
            info!(
                %down_since,
                downtime = %format_downtime(downtime),
                "portal reachable again"
            );
        }
    }
}

/// Credential problems will not fix themselves between polls.
fn is_fatal(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::MissingCredentials | SyncError::AuthenticationFailed(_))
    )
}

/// Sleep for `total`, waking every second to check `shutdown`.
/// Returns true if interrupted.
fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return true;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return false;
        }
        thread::sleep(remaining.min(SLEEP_TICK));
    }
}
