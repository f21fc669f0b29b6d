//! SQLite engine for the Almanac calendar database.
//!
//! Opening a database brings its schema forward to [`DATABASE_VERSION`]
//! through the historical step chain in [`steps`], repairing data that
//! earlier releases stored incorrectly, and falls back to a lossy rebuild
//! when a step cannot be applied. [`CalendarStore`] wraps [`tokio_rusqlite`]
//! so the work runs on a dedicated thread without blocking the runtime.

mod datetime;
mod store;

pub mod bootstrap;
pub mod cache;
pub mod driver;
pub mod error;
pub mod orphans;
pub mod repair;
pub mod schema;
pub mod steps;
pub mod sync_state;

pub use driver::{MigrationContext, MigrationOptions, upgrade};
pub use error::{Error, Result};
pub use schema::{DATABASE_VERSION, OLDEST_SUPPORTED_VERSION};
pub use store::{CalendarStore, SharedDatabase};

#[cfg(test)]
mod fixtures;
