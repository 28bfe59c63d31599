//! Reconciliation of the local cache with the backend
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::backend::{key_path, Backend, WatchEvent, KEY_PREFIX};
use crate::cache::KeyCache;
use crate::envelope::KeyEnvelope;
use crate::error::{BackendError, KeyResult};
use crate::key_types::KeyRecord;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters from one synchronization pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Children listed under the key prefix
    pub listed: usize,
    /// Records merged into the cache
    pub loaded: usize,
    /// Entries that could not be read or decoded
    pub skipped: usize,
    /// Entries ignored because they are past expiration
    pub expired: usize,
    /// Cache entries dropped at the end of the pass
    pub evicted: usize,
}

/// Pulls key envelopes from the backend into the cache
pub struct Synchronizer {
    backend: Arc<dyn Backend>,
    cache: Arc<KeyCache>,
    prune_missing: bool,
}

impl Synchronizer {
    pub fn new(backend: Arc<dyn Backend>, cache: Arc<KeyCache>, prune_missing: bool) -> Self {
        Self {
            backend,
            cache,
            prune_missing,
        }
    }

    /// Run one pass at the current time
    pub async fn synchronize(&self) -> KeyResult<SyncReport> {
        self.synchronize_at(Utc::now()).await
    }

    /// Run one pass treating `now` as the current time.
    ///
    /// Only a failure to list the prefix fails the pass; unreadable or
    /// undecodable entries are logged and skipped.
    pub async fn synchronize_at(&self, now: DateTime<Utc>) -> KeyResult<SyncReport> {
        let children = self.backend.list(KEY_PREFIX).await?;

        let mut report = SyncReport {
            listed: children.len(),
            ..SyncReport::default()
        };
        let mut present = HashSet::with_capacity(children.len());

        for kid in &children {
            present.insert(kid.as_str());

            let value = match self.backend.get(&key_path(kid)).await {
                Ok(Some(value)) => value,
                // Deleted since listing
                Ok(None) => continue,
                Err(e) => {
                    warn!(key_id = %kid, error = %e, "Unable to read key from backend, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            let envelope = match KeyEnvelope::from_bytes(&value) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(key_id = %kid, error = %e, "Unable to decode key envelope, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            if envelope.is_expired_at(now) {
                report.expired += 1;
                continue;
            }

            let record = match envelope.open() {
                Ok(record) => record,
                Err(e) => {
                    warn!(key_id = %kid, error = %e, "Unable to decode key, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            if record.id() != kid {
                warn!(
                    key_id = %kid,
                    fingerprint = %record.id(),
                    "Stored key does not match its path, skipping"
                );
                report.skipped += 1;
                continue;
            }

            self.cache.merge(record).await;
            report.loaded += 1;
        }

        let prune_missing = self.prune_missing;
        report.evicted = self
            .cache
            .retain(|record: &KeyRecord| {
                !record.is_expired_at(now) && (!prune_missing || present.contains(record.id()))
            })
            .await;

        debug!(
            backend = self.backend.name(),
            listed = report.listed,
            loaded = report.loaded,
            skipped = report.skipped,
            expired = report.expired,
            evicted = report.evicted,
            "Synchronized key cache"
        );

        Ok(report)
    }

    /// Synchronize whenever the backend reports a change under the key prefix.
    ///
    /// Returns when `cancel` fires or the backend cannot watch. Failed watch
    /// calls are retried after `retry_delay`.
    pub async fn watch(&self, cancel: &CancellationToken, retry_delay: Duration) {
        let mut index = 0;

        loop {
            match self.backend.watch_prefix(KEY_PREFIX, index, cancel).await {
                Ok(WatchEvent::Changed { index: next }) => {
                    // A lower index means the backend state was reset
                    index = if next < index { 0 } else { next };
                    if let Err(e) = self.synchronize().await {
                        warn!(error = %e, "Synchronization after change notification failed");
                    }
                }
                Ok(WatchEvent::Canceled) => {
                    debug!("Key watch canceled");
                    return;
                }
                Err(BackendError::WatchNotSupported) => {
                    info!(
                        backend = self.backend.name(),
                        "Backend cannot watch for changes, relying on polling"
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Key watch failed, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(retry_delay) => {}
                    }
                }
            }
        }
    }
}
