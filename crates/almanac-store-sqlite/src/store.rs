//! [`CalendarStore`]: an upgraded calendar database on its own thread.

use std::path::{Path, PathBuf};

use almanac_core::{MigrationOutcome, OrphanCounts, SchemaVersion, SyncScheduler};
use tokio::sync::OnceCell;
use tracing::info;

use crate::{
  DATABASE_VERSION, Result,
  cache,
  driver::{self, MigrationOptions},
  orphans, schema,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A calendar database that has been brought up to [`DATABASE_VERSION`].
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct CalendarStore {
  conn:    tokio_rusqlite::Connection,
  options: MigrationOptions,
  outcome: MigrationOutcome,
}

impl CalendarStore {
  /// Open (or create) the database at `path` and upgrade it.
  ///
  /// Sync requests produced by the upgrade are handed to `scheduler` once the
  /// upgrade has committed.
  pub async fn open<S>(
    path: impl AsRef<Path>,
    options: MigrationOptions,
    scheduler: &S,
  ) -> Result<Self>
  where
    S: SyncScheduler + ?Sized,
  {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, options, scheduler).await
  }

  /// Open and bootstrap a fresh in-memory database.
  pub async fn open_in_memory<S>(options: MigrationOptions, scheduler: &S) -> Result<Self>
  where
    S: SyncScheduler + ?Sized,
  {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, options, scheduler).await
  }

  async fn init<S>(
    conn: tokio_rusqlite::Connection,
    options: MigrationOptions,
    scheduler: &S,
  ) -> Result<Self>
  where
    S: SyncScheduler + ?Sized,
  {
    let pass_options = options.clone();
    let outcome = conn
      .call(move |conn| Ok(driver::upgrade_stored(conn, DATABASE_VERSION, &pass_options)))
      .await??;

    deliver(&outcome, scheduler);
    Ok(Self { conn, options, outcome })
  }

  /// What happened when this store was opened.
  pub fn outcome(&self) -> &MigrationOutcome { &self.outcome }

  pub fn options(&self) -> &MigrationOptions { &self.options }

  /// The underlying connection, for the row-level access layer.
  pub fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  pub async fn version(&self) -> Result<SchemaVersion> {
    let version = self
      .conn
      .call(|conn| Ok(schema::stored_version(conn)?))
      .await?;
    Ok(SchemaVersion(version))
  }

  /// Every cache entry in row order.
  pub async fn cache_entries(&self) -> Result<Vec<(String, Option<String>)>> {
    self.conn.call(|conn| Ok(cache::entries(conn))).await?
  }

  /// Run the orphan sweep outside of an upgrade.
  pub async fn sweep_orphans(&self) -> Result<OrphanCounts> {
    self.conn.call(|conn| Ok(orphans::sweep(conn))).await?
  }

  /// Discard all data and bootstrap an empty schema.
  pub async fn rebuild<S>(&self, scheduler: &S) -> Result<MigrationOutcome>
  where
    S: SyncScheduler + ?Sized,
  {
    let options = self.options.clone();
    let outcome = self
      .conn
      .call(move |conn| Ok(driver::rebuild(conn, DATABASE_VERSION, &options)))
      .await??;
    deliver(&outcome, scheduler);
    Ok(outcome)
  }

  /// Names of every table in the database, sorted.
  pub async fn table_names(&self) -> Result<Vec<String>> {
    let names = self
      .conn
      .call(|conn| Ok(schema::table_names(conn)?))
      .await?;
    Ok(names)
  }
}

fn deliver<S>(outcome: &MigrationOutcome, scheduler: &S)
where
  S: SyncScheduler + ?Sized,
{
  if !outcome.sync_requests.is_empty() {
    info!(count = outcome.sync_requests.len(), "requesting sync");
  }
  for request in &outcome.sync_requests {
    scheduler.request_sync(request.clone());
  }
}

// ─── Shared handle ───────────────────────────────────────────────────────────

/// A database that is opened, and upgraded, exactly once.
///
/// Concurrent callers of [`SharedDatabase::get`] wait for the first one to
/// finish and then all see the same store.
pub struct SharedDatabase<S> {
  path:      Option<PathBuf>,
  options:   MigrationOptions,
  scheduler: S,
  store:     OnceCell<CalendarStore>,
}

impl<S: SyncScheduler> SharedDatabase<S> {
  pub fn new(path: impl Into<PathBuf>, options: MigrationOptions, scheduler: S) -> Self {
    Self { path: Some(path.into()), options, scheduler, store: OnceCell::new() }
  }

  pub fn in_memory(options: MigrationOptions, scheduler: S) -> Self {
    Self { path: None, options, scheduler, store: OnceCell::new() }
  }

  pub async fn get(&self) -> Result<&CalendarStore> {
    self
      .store
      .get_or_try_init(|| async {
        let options = self.options.clone();
        match &self.path {
          Some(path) => CalendarStore::open(path, options, &self.scheduler).await,
          None => CalendarStore::open_in_memory(options, &self.scheduler).await,
        }
      })
      .await
  }

  /// Whether the database has been opened yet.
  pub fn is_open(&self) -> bool { self.store.initialized() }

  pub fn scheduler(&self) -> &S { &self.scheduler }
}
