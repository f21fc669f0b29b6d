//! Synchronisation requests emitted by the engine.
//!
//! The engine never talks to a server. When a bootstrap or a historical
//! upgrade invalidates what is stored locally it produces [`SyncRequest`]s,
//! and whoever owns the database hands them to a [`SyncScheduler`].

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

// ─── Account ─────────────────────────────────────────────────────────────────

/// A remote account that owns one or more calendars.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
  pub name: String,
  /// Account type, e.g. `com.google`.
  pub kind: String,
}

impl Account {
  pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
    Self { name: name.into(), kind: kind.into() }
  }
}

// ─── SyncRequest ─────────────────────────────────────────────────────────────

/// An abstract "please synchronise" effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncRequest {
  /// `None` means every known account.
  pub account:     Option<Account>,
  /// Only push local changes; do not pull.
  pub upload_only: bool,
  /// Restrict the sync to a single remote feed.
  pub feed:        Option<String>,
}

impl SyncRequest {
  /// A two-way sync of every account.
  pub fn all_accounts() -> Self {
    Self { account: None, upload_only: false, feed: None }
  }

  /// A two-way sync of every feed belonging to `account`.
  pub fn for_account(account: Account) -> Self {
    Self { account: Some(account), upload_only: false, feed: None }
  }

  pub fn upload_only(mut self) -> Self {
    self.upload_only = true;
    self
  }

  pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
    self.feed = Some(feed.into());
    self
  }

  /// Requests restricted to one feed are user-visible manual syncs.
  pub fn is_manual(&self) -> bool { self.feed.is_some() }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

/// Receives sync requests once a migration pass has committed.
pub trait SyncScheduler: Send + Sync {
  fn request_sync(&self, request: SyncRequest);
}

impl<T: SyncScheduler + ?Sized> SyncScheduler for Arc<T> {
  fn request_sync(&self, request: SyncRequest) { (**self).request_sync(request) }
}

impl<T: SyncScheduler + ?Sized> SyncScheduler for &T {
  fn request_sync(&self, request: SyncRequest) { (**self).request_sync(request) }
}

/// A scheduler that just remembers what it was asked to do.
#[derive(Debug, Default)]
pub struct RecordingScheduler {
  requests: Mutex<Vec<SyncRequest>>,
}

impl RecordingScheduler {
  pub fn new() -> Self { Self::default() }

  /// Everything requested so far, in order.
  pub fn requests(&self) -> Vec<SyncRequest> {
    self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  /// Drain the recorded requests.
  pub fn take(&self) -> Vec<SyncRequest> {
    std::mem::take(&mut *self.requests.lock().unwrap_or_else(PoisonError::into_inner))
  }
}

impl SyncScheduler for RecordingScheduler {
  fn request_sync(&self, request: SyncRequest) {
    self
      .requests
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .push(request);
  }
}
