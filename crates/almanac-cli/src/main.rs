//! `almanac` maintenance binary.
//!
//! Reads `almanac.toml` (or the path given with `--config`) and `ALMANAC_*`
//! environment variables, opens the calendar database, which brings it up
//! to date, and then runs one operator command.

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use almanac_core::{
  MigrationOutcome, OrphanCounts, SchemaVersion, SyncRequest, SyncScheduler, UpgradePath,
};
use almanac_store_sqlite::{CalendarStore, MigrationOptions};
use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Almanac calendar database maintenance")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "almanac.toml")]
  config: PathBuf,

  /// Database file, overriding the configuration.
  #[arg(short, long, value_name = "FILE")]
  database: Option<PathBuf>,

  /// Print results as JSON.
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Bring the database up to the current schema and report what happened.
  Upgrade,
  /// Show the schema version, tables and cache entries.
  Status,
  /// Delete rows that reference missing events.
  Sweep,
  /// Discard all local data and recreate an empty database.
  Rebuild {
    /// Confirm that local data may be discarded.
    #[arg(long)]
    yes: bool,
  },
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
struct EngineConfig {
  #[serde(default = "default_database_path")]
  database_path:  PathBuf,
  /// IANA zone for instance expansion; the host zone when unset.
  #[serde(default)]
  local_timezone: Option<String>,
}

fn default_database_path() -> PathBuf { PathBuf::from("~/.local/share/almanac/calendar.db") }

impl EngineConfig {
  fn migration_options(&self) -> anyhow::Result<MigrationOptions> {
    match &self.local_timezone {
      Some(zone) => MigrationOptions::with_local_timezone(zone.as_str())
        .with_context(|| format!("invalid local_timezone {zone:?}")),
      None => Ok(MigrationOptions::default()),
    }
  }
}

// ─── Sync requests ───────────────────────────────────────────────────────────

/// There is no sync layer in this binary; requests are only reported.
struct LogScheduler;

impl SyncScheduler for LogScheduler {
  fn request_sync(&self, request: SyncRequest) {
    match &request.account {
      Some(account) => info!(
        account = %account.name,
        kind = %account.kind,
        feed = ?request.feed,
        "sync requested"
      ),
      None => info!("sync of every account requested"),
    }
  }
}

// ─── Output ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Status {
  database: PathBuf,
  version:  SchemaVersion,
  opened:   MigrationOutcome,
  tables:   Vec<String>,
  cache:    BTreeMap<String, Option<String>>,
}

fn describe(path: &UpgradePath) -> String {
  match path {
    UpgradePath::Current => "already current".to_owned(),
    UpgradePath::Created => "created a new database".to_owned(),
    UpgradePath::Incremental { steps } => format!("applied {steps} upgrade steps"),
    UpgradePath::Rebuilt { reason } => {
      format!("rebuilt ({reason:?}); local data was discarded")
    }
  }
}

fn print_outcome(outcome: &MigrationOutcome) {
  println!("{} -> {}: {}", outcome.from, outcome.to, describe(&outcome.path));
  print_orphans(&outcome.orphans);
  if !outcome.sync_requests.is_empty() {
    println!("{} sync requests issued", outcome.sync_requests.len());
  }
}

fn print_orphans(orphans: &OrphanCounts) {
  if orphans.is_empty() {
    return;
  }
  println!("removed {} orphaned rows", orphans.total());
  for (table, n) in [
    ("Attendees", orphans.attendees),
    ("Reminders", orphans.reminders),
    ("Instances", orphans.instances),
    ("CalendarAlerts", orphans.alerts),
    ("ExtendedProperties", orphans.extended_properties),
    ("EventsRawTimes", orphans.raw_times),
  ] {
    if n > 0 {
      println!("  {table}: {n}");
    }
  }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  // Load configuration.
  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(config::Environment::with_prefix("ALMANAC"))
    .build()
    .context("failed to read config file")?;

  let engine_cfg: EngineConfig = settings
    .try_deserialize()
    .context("failed to deserialise EngineConfig")?;

  let options = engine_cfg.migration_options()?;
  let database_path = expand_tilde(cli.database.as_ref().unwrap_or(&engine_cfg.database_path));
  if let Some(parent) = database_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }

  if let Command::Rebuild { yes: false } = cli.command {
    anyhow::bail!("rebuild discards every local calendar; pass --yes to continue");
  }

  // Opening the store runs the upgrade.
  let store = CalendarStore::open(&database_path, options, &LogScheduler)
    .await
    .with_context(|| format!("failed to open database at {database_path:?}"))?;

  match cli.command {
    Command::Upgrade => {
      if cli.json {
        print_json(store.outcome())?;
      } else {
        print_outcome(store.outcome());
      }
    }

    Command::Status => {
      let status = Status {
        database: database_path,
        version:  store.version().await?,
        opened:   store.outcome().clone(),
        tables:   store.table_names().await?,
        cache:    store.cache_entries().await?.into_iter().collect(),
      };
      if cli.json {
        print_json(&status)?;
      } else {
        println!("{}: version {}", status.database.display(), status.version);
        println!("on open: {}", describe(&status.opened.path));
        println!("tables: {}", status.tables.join(", "));
        for (key, value) in &status.cache {
          println!("  {key} = {}", value.as_deref().unwrap_or("NULL"));
        }
      }
    }

    Command::Sweep => {
      let orphans = store.sweep_orphans().await?;
      if cli.json {
        print_json(&orphans)?;
      } else if orphans.is_empty() {
        println!("no orphaned rows");
      } else {
        print_orphans(&orphans);
      }
    }

    Command::Rebuild { .. } => {
      let outcome = store.rebuild(&LogScheduler).await?;
      if cli.json {
        print_json(&outcome)?;
      } else {
        print_outcome(&outcome);
      }
    }
  }

  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory as _;

  use super::*;

  fn parse_config(toml: &str) -> EngineConfig {
    config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap()
  }

  #[test]
  fn cli_is_well_formed() { Cli::command().debug_assert(); }

  #[test]
  fn rebuild_needs_confirmation_flag() {
    let cli = Cli::try_parse_from(["almanac", "rebuild", "--yes", "--json"]).unwrap();
    assert!(cli.json);
    assert!(matches!(cli.command, Command::Rebuild { yes: true }));
  }

  #[test]
  fn config_defaults() {
    let cfg = parse_config("");
    assert_eq!(cfg.database_path, default_database_path());
    assert_eq!(cfg.local_timezone, None);
  }

  #[test]
  fn config_zone_is_validated() {
    let cfg = parse_config(r#"local_timezone = "Asia/Tokyo""#);
    assert_eq!(cfg.migration_options().unwrap().local_timezone, "Asia/Tokyo");

    let cfg = parse_config(r#"local_timezone = "Nowhere/Special""#);
    assert!(cfg.migration_options().is_err());
  }

  #[test]
  fn tilde_is_expanded_only_at_the_start() {
    let plain = Path::new("/var/lib/almanac.db");
    assert_eq!(expand_tilde(plain), plain);

    let inner = Path::new("data/~/almanac.db");
    assert_eq!(expand_tilde(inner), inner);

    if let Ok(home) = std::env::var("HOME") {
      assert_eq!(
        expand_tilde(Path::new("~/almanac.db")),
        PathBuf::from(home).join("almanac.db")
      );
    }
  }
}
