//! Command-line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use portalwatch_store::{ComparisonOverrides, parse_date};
use portalwatch_sync::{Credentials, ListParams, PortalConfig};

#[derive(Parser, Debug)]
#[command(name = "portalwatch", version, about = "Watch a portal's procedure catalog and incoming requests for changes")]
pub struct Cli {
    #[command(flatten)]
    pub portal: PortalArgs,

    /// Directory holding baselines, snapshots, and the procedure dictionary.
    #[arg(long, env = "PORTALWATCH_DATA_DIR", default_value = "data", global = true)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the procedure catalog; list it, save baselines, or compare against them.
    Procedures(ProceduresArgs),
    /// Fetch incoming requests, reconcile with the previous snapshot, and report changes.
    Incoming {
        /// Enrich every record missing a procedure or directory, not only new ones.
        #[arg(long)]
        enrich_all: bool,
        #[command(flatten)]
        comparison: ComparisonArgs,
    },
    /// Compare a stored snapshot with the one before it, without merging.
    CompareDate {
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
    },
    /// Classify a stored snapshot into real and test requests.
    Analyze {
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
    },
    /// Copy enrichment fields from one snapshot into all the others.
    Backfill {
        /// Source snapshot date (default: the latest).
        #[arg(long, value_parser = parse_date)]
        source: Option<NaiveDate>,
        /// Write the changes instead of only reporting them.
        #[arg(long)]
        live: bool,
    },
    /// Poll the catalog until interrupted.
    Monitor(MonitorArgs),
}

#[derive(Args, Debug, Default)]
pub struct ProceduresArgs {
    #[arg(long)]
    pub list_active: bool,
    #[arg(long)]
    pub list_all: bool,
    /// Replace the active-only baseline with the current catalog.
    #[arg(long)]
    pub save_baseline: bool,
    /// Replace the whole-catalog baseline with the current catalog.
    #[arg(long)]
    pub save_all_baseline: bool,
    /// Compare against the active-only baseline.
    #[arg(long)]
    pub compare: bool,
    /// Compare against the whole-catalog baseline.
    #[arg(long)]
    pub compare_all: bool,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Seconds between checks.
    #[arg(long, env = "PORTALWATCH_INTERVAL_SECS", default_value_t = 300)]
    pub interval_secs: u64,
    /// Also run the incoming-request pipeline every cycle.
    #[arg(long)]
    pub with_incoming: bool,
    /// Stop after this many checks.
    #[arg(long)]
    pub max_cycles: Option<u64>,
    #[command(flatten)]
    pub comparison: ComparisonArgs,
}

impl MonitorArgs {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct ComparisonArgs {
    /// Always compare incoming requests against this snapshot date.
    #[arg(long, env = "INCOMING_FORCE_BASELINE_DATE", value_parser = parse_date)]
    pub force_baseline_date: Option<NaiveDate>,
    /// Snapshot date to compare against when no earlier snapshot exists.
    #[arg(long, env = "INCOMING_BASELINE_DATE", value_parser = parse_date)]
    pub baseline_date: Option<NaiveDate>,
}

impl ComparisonArgs {
    pub fn overrides(&self) -> ComparisonOverrides {
        ComparisonOverrides {
            force: self.force_baseline_date,
            fallback: self.baseline_date,
        }
    }
}

#[derive(Args, Debug, Default)]
pub struct PortalArgs {
    /// Portal root, e.g. https://portal.example.gov
    #[arg(long, env = "PORTAL_BASE_URL", global = true)]
    pub base_url: Option<String>,

    #[arg(long, env = "PORTAL_USERNAME", global = true)]
    pub username: Option<String>,

    #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true, global = true)]
    pub password: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "PORTAL_TIMEOUT_SECS", default_value_t = 15, global = true)]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification.
    #[arg(long, env = "PORTAL_ACCEPT_INVALID_CERTS", global = true)]
    pub accept_invalid_certs: bool,

    /// List-API parameter for the catalog query, as KEY=VALUE (repeatable).
    #[arg(long = "catalog-param", env = "PORTAL_CATALOG_PARAMS", value_delimiter = ',', global = true)]
    pub catalog_params: Vec<String>,

    /// Override for the incoming-request query, as KEY=VALUE (repeatable).
    #[arg(long = "incoming-param", env = "PORTAL_INCOMING_PARAMS", value_delimiter = ',', global = true)]
    pub incoming_params: Vec<String>,
}

impl PortalArgs {
    pub fn portal_config(&self) -> anyhow::Result<PortalConfig> {
        let Some(base_url) = self.base_url.as_deref().filter(|u| !u.trim().is_empty()) else {
            bail!("portal base URL is not set (use --base-url or PORTAL_BASE_URL)");
        };
        let mut config = PortalConfig::new(base_url.trim())
            .with_credentials(Credentials::new(self.username.clone(), self.password.clone()));
        config.timeout = Duration::from_secs(self.timeout_secs.max(1));
        config.accept_invalid_certs = self.accept_invalid_certs;
        Ok(config)
    }

    pub fn catalog_params(&self) -> anyhow::Result<ListParams> {
        let params = ListParams::from_pairs(&self.catalog_params)
            .context("invalid --catalog-param")?;
        Ok(ListParams::new()
            .with("start", "0")
            .with("limit", "500")
            .merged(&params))
    }

    pub fn incoming_params(&self) -> anyhow::Result<ListParams> {
        let overrides = ListParams::from_pairs(&self.incoming_params)
            .context("invalid --incoming-param")?;
        Ok(ListParams::incoming_defaults().merged(&overrides))
    }
}
