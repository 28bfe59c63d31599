//! Expiration and deletion of keys across cooperating processes
//!
//! Each key moves `usable -> unusable -> deleted` as time passes its
//! expiration and then its grace period. Processes sharing a backend
//! coordinate through an advisory marker holding the earliest time the next
//! sweep should run. The marker is not a lock: two processes can both pass
//! the check, in which case both sweep and the second one finds nothing left
//! to change.
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


use crate::backend::{key_path, Backend, KEY_PREFIX, ROTATION_MARKER_PATH};
use crate::cache::KeyCache;
use crate::envelope::KeyEnvelope;
use crate::error::KeyResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stored form of the rotation marker
#[derive(Debug, Serialize, Deserialize)]
struct RotationMarker {
    /// Epoch seconds before which no sweep should start
    value: i64,
}

/// Counters from one rotation attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotationReport {
    /// Another process holds the marker; nothing was scanned
    pub skipped: bool,
    /// Keys newly marked unusable
    pub retired: usize,
    /// Keys deleted after their grace period
    pub deleted: usize,
    /// Keys left for the next sweep because of an error
    pub failed: usize,
}

/// Retires and deletes expired keys
pub struct RotationScheduler {
    backend: Arc<dyn Backend>,
    cache: Arc<KeyCache>,
    grace_period: Duration,
    lease: Duration,
}

impl RotationScheduler {
    pub fn new(
        backend: Arc<dyn Backend>,
        cache: Arc<KeyCache>,
        grace_period: Duration,
        lease: Duration,
    ) -> Self {
        Self {
            backend,
            cache,
            grace_period,
            lease,
        }
    }

    /// Sweep unless another process swept within the lease
    pub async fn rotate(&self, now: DateTime<Utc>) -> KeyResult<RotationReport> {
        if let Some(next_rotation) = self.read_marker().await {
            if now.timestamp() < next_rotation {
                debug!(next_rotation, "Key rotation already done, skipping");
                return Ok(RotationReport {
                    skipped: true,
                    ..RotationReport::default()
                });
            }
        }

        self.write_marker(now).await;
        self.sweep(now).await
    }

    /// Scan every stored key and apply the expiration state machine.
    ///
    /// Fails only if the key prefix cannot be listed; per-key errors are
    /// logged and counted in `failed`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> KeyResult<RotationReport> {
        let children = self.backend.list(KEY_PREFIX).await?;
        let now_ts = now.timestamp();
        let grace_secs = i64::try_from(self.grace_period.as_secs()).unwrap_or(i64::MAX);
        let mut report = RotationReport::default();

        if children.is_empty() {
            debug!("No key to rotate, skipping");
            return Ok(report);
        }

        for kid in &children {
            let path = key_path(kid);

            let value = match self.backend.get(&path).await {
                Ok(Some(value)) => value,
                // Deleted concurrently
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        key_id = %kid,
                        error = %e,
                        "Unable to retrieve key from backend, skipping"
                    );
                    report.failed += 1;
                    continue;
                }
            };

            let mut envelope = match KeyEnvelope::from_bytes(&value) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(key_id = %kid, error = %e, "Unable to decode key envelope, skipping");
                    report.failed += 1;
                    continue;
                }
            };

            let Some(expires_at) = envelope.expires_at else {
                continue;
            };

            if now_ts > expires_at.saturating_add(grace_secs) {
                if let Err(e) = self.backend.delete(&path).await {
                    warn!(key_id = %kid, error = %e, "Unable to remove key from backend, skipping");
                    report.failed += 1;
                    continue;
                }
                self.cache.remove(kid).await;
                info!(key_id = %kid, "Deleted key after grace period");
                report.deleted += 1;
            } else if now_ts > expires_at && envelope.usable {
                envelope.usable = false;
                let stored = match envelope.to_bytes() {
                    Ok(stored) => stored,
                    Err(e) => {
                        warn!(key_id = %kid, error = %e, "Unable to encode key envelope, skipping");
                        report.failed += 1;
                        continue;
                    }
                };
                if let Err(e) = self.backend.set(&path, &stored).await {
                    warn!(key_id = %kid, error = %e, "Unable to save key in backend, skipping");
                    report.failed += 1;
                    continue;
                }
                self.cache.mark_unusable(kid).await;
                info!(key_id = %kid, "Marked expired key unusable");
                report.retired += 1;
            }
        }

        debug!(
            retired = report.retired,
            deleted = report.deleted,
            failed = report.failed,
            "Key rotation sweep finished"
        );

        Ok(report)
    }

    /// Current marker value; unreadable markers count as absent
    async fn read_marker(&self) -> Option<i64> {
        match self.backend.get(ROTATION_MARKER_PATH).await {
            Ok(Some(value)) => match serde_json::from_slice::<RotationMarker>(&value) {
                Ok(marker) => Some(marker.value),
                Err(e) => {
                    warn!(
                        error = %e,
                        "Unable to decode next rotation date, treating rotation as due"
                    );
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Unable to read next rotation date, treating rotation as due");
                None
            }
        }
    }

    /// Claim the next lease; failure only means other processes may sweep too
    async fn write_marker(&self, now: DateTime<Utc>) {
        let lease_secs = i64::try_from(self.lease.as_secs()).unwrap_or(i64::MAX);
        let marker = RotationMarker {
            value: now.timestamp().saturating_add(lease_secs),
        };

        let result = match serde_json::to_vec(&marker) {
            Ok(value) => self
                .backend
                .set(ROTATION_MARKER_PATH, &value)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(e) = result {
            warn!(error = %e, "Unable to update next rotation date");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::faulty::{Fault, FaultyBackend, Op};
    use crate::backends::MemoryBackend;
    use crate::ed25519;
    use crate::key_types::KeyRecord;
    use chrono::Duration as ChronoDuration;

    const GRACE: Duration = Duration::from_secs(2 * 60 * 60);
    const LEASE: Duration = Duration::from_secs(5 * 60);

    async fn store(backend: &MemoryBackend, record: &KeyRecord) {
        let envelope = KeyEnvelope::seal(record, Utc::now(), false).unwrap();
        backend
            .set(&key_path(record.id()), &envelope.to_bytes().unwrap())
            .await
            .unwrap();
    }

    async fn load(backend: &MemoryBackend, id: &str) -> Option<KeyEnvelope> {
        backend
            .get(&key_path(id))
            .await
            .unwrap()
            .map(|value| KeyEnvelope::from_bytes(&value).unwrap())
    }

    fn scheduler<B: Backend + 'static>(backend: &Arc<B>) -> (RotationScheduler, Arc<KeyCache>) {
        let cache = Arc::new(KeyCache::new());
        let backend: Arc<dyn Backend> = backend.clone();
        (
            RotationScheduler::new(backend, Arc::clone(&cache), GRACE, LEASE),
            cache,
        )
    }

    #[tokio::test]
    async fn test_state_machine() {
        let backend = Arc::new(MemoryBackend::new());
        let now = Utc::now();
        let expires_at = now + ChronoDuration::minutes(1);
        let key = ed25519::generate().unwrap().with_expiration(Some(expires_at));
        let eternal = ed25519::generate().unwrap();
        store(&backend, &key).await;
        store(&backend, &eternal).await;

        let (rotation, cache) = scheduler(&backend);
        cache.put(key.clone()).await;

        // Not expired yet
        let report = rotation.sweep(now).await.unwrap();
        assert_eq!(report, RotationReport::default());
        assert!(load(&backend, key.id()).await.unwrap().usable);

        // Expired, within grace period
        let report = rotation
            .sweep(expires_at + ChronoDuration::minutes(1))
            .await
            .unwrap();
        assert_eq!(report.retired, 1);
        assert!(!load(&backend, key.id()).await.unwrap().usable);
        assert!(!cache.get(key.id()).await.unwrap().is_usable());

        // Past grace period
        let report = rotation
            .sweep(expires_at + ChronoDuration::hours(3))
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
        assert!(load(&backend, key.id()).await.is_none());
        assert!(cache.get(key.id()).await.is_none());

        // Keys without expiration are never touched
        assert!(load(&backend, eternal.id()).await.unwrap().usable);
    }

    #[tokio::test]
    async fn test_retire_preserves_value() {
        let backend = Arc::new(MemoryBackend::new());
        let now = Utc::now();
        let key = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::seconds(5)));
        store(&backend, &key).await;
        let before = load(&backend, key.id()).await.unwrap();

        let (rotation, _cache) = scheduler(&backend);
        rotation.sweep(now).await.unwrap();

        let after = load(&backend, key.id()).await.unwrap();
        assert_eq!(after.value, before.value);
        assert_eq!(after.expires_at, before.expires_at);
        assert!(!after.usable);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let backend = Arc::new(MemoryBackend::new());
        let now = Utc::now();
        let retiring = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::minutes(1)));
        let deleting = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::hours(3)));
        store(&backend, &retiring).await;
        store(&backend, &deleting).await;

        let (rotation, _cache) = scheduler(&backend);
        let first = rotation.sweep(now).await.unwrap();
        assert_eq!(first.retired, 1);
        assert_eq!(first.deleted, 1);
        let state = backend.list(KEY_PREFIX).await.unwrap();

        let second = rotation.sweep(now).await.unwrap();
        assert_eq!(second, RotationReport::default());
        assert_eq!(backend.list(KEY_PREFIX).await.unwrap(), state);
        assert!(!load(&backend, retiring.id()).await.unwrap().usable);
    }

    #[tokio::test]
    async fn test_marker_skips_second_rotation() {
        let backend = Arc::new(MemoryBackend::new());
        let now = Utc::now();
        let key = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::minutes(1)));
        store(&backend, &key).await;

        // Two processes sharing the backend
        let (first, _) = scheduler(&backend);
        let (second, _) = scheduler(&backend);

        let report = first.rotate(now).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.retired, 1);

        let report = second.rotate(now + ChronoDuration::minutes(1)).await.unwrap();
        assert!(report.skipped);

        // Lease over
        let report = second.rotate(now + ChronoDuration::minutes(6)).await.unwrap();
        assert!(!report.skipped);
        assert_eq!(report.retired, 0);
    }

    #[tokio::test]
    async fn test_corrupt_marker_treated_as_due() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(ROTATION_MARKER_PATH, b"garbage").await.unwrap();

        let (rotation, _) = scheduler(&backend);
        let report = rotation.rotate(Utc::now()).await.unwrap();
        assert!(!report.skipped);

        let marker: RotationMarker =
            serde_json::from_slice(&backend.get(ROTATION_MARKER_PATH).await.unwrap().unwrap())
                .unwrap();
        assert!(marker.value > Utc::now().timestamp());
    }

    #[tokio::test]
    async fn test_corrupt_entries_counted_as_failed() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set("jwk/garbage", b"not an envelope").await.unwrap();

        let (rotation, _) = scheduler(&backend);
        let report = rotation.sweep(Utc::now()).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(backend.get("jwk/garbage").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failed_delete_retried_next_sweep() {
        let backend = Arc::new(FaultyBackend::new());
        let now = Utc::now();
        let stale = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::hours(3)));
        let other = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::hours(3)));
        store(backend.inner(), &stale).await;
        store(backend.inner(), &other).await;
        backend.inject(Op::Delete, &key_path(stale.id()), Fault::Fail);

        let (rotation, cache) = scheduler(&backend);
        cache.put(stale.clone()).await;

        let report = rotation.sweep(now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 1);
        assert!(load(backend.inner(), stale.id()).await.is_some());
        assert!(load(backend.inner(), other.id()).await.is_none());
        assert!(cache.get(stale.id()).await.is_some());

        backend.heal(Op::Delete, &key_path(stale.id()));
        let report = rotation.sweep(now).await.unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.deleted, 1);
        assert!(load(backend.inner(), stale.id()).await.is_none());
        assert!(cache.get(stale.id()).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_retire_write_retried_next_sweep() {
        let backend = Arc::new(FaultyBackend::new());
        let now = Utc::now();
        let key = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::minutes(1)));
        store(backend.inner(), &key).await;
        backend.inject(Op::Set, &key_path(key.id()), Fault::Fail);

        let (rotation, cache) = scheduler(&backend);
        cache.put(key.clone()).await;

        let report = rotation.sweep(now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retired, 0);
        assert!(load(backend.inner(), key.id()).await.unwrap().usable);
        assert!(cache.get(key.id()).await.unwrap().is_usable());

        backend.heal(Op::Set, &key_path(key.id()));
        let report = rotation.sweep(now).await.unwrap();
        assert_eq!(report.retired, 1);
        assert!(!load(backend.inner(), key.id()).await.unwrap().usable);
        assert!(!cache.get(key.id()).await.unwrap().is_usable());
    }

    #[tokio::test]
    async fn test_failed_read_counted_and_skipped() {
        let backend = Arc::new(FaultyBackend::new());
        let now = Utc::now();
        let key = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::minutes(1)));
        store(backend.inner(), &key).await;
        backend.inject(Op::Get, &key_path(key.id()), Fault::Fail);

        let (rotation, _) = scheduler(&backend);
        let report = rotation.sweep(now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.retired, 0);
    }

    #[tokio::test]
    async fn test_unwritable_marker_makes_every_attempt_due() {
        let backend = Arc::new(FaultyBackend::new());
        let now = Utc::now();
        let key = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now - ChronoDuration::minutes(1)));
        store(backend.inner(), &key).await;
        backend.inject(Op::Set, ROTATION_MARKER_PATH, Fault::Fail);

        let (rotation, _) = scheduler(&backend);
        let first = rotation.rotate(now).await.unwrap();
        assert!(!first.skipped);
        assert_eq!(first.retired, 1);

        let second = rotation.rotate(now).await.unwrap();
        assert!(!second.skipped);
        assert_eq!(second.retired, 0);
        assert!(backend.inner().get(ROTATION_MARKER_PATH).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreadable_marker_treated_as_due() {
        let backend = Arc::new(FaultyBackend::new());
        let (rotation, _) = scheduler(&backend);
        let now = Utc::now();
        rotation.rotate(now).await.unwrap();

        backend.inject(Op::Get, ROTATION_MARKER_PATH, Fault::Fail);
        assert!(!rotation.rotate(now).await.unwrap().skipped);

        backend.heal(Op::Get, ROTATION_MARKER_PATH);
        assert!(rotation.rotate(now).await.unwrap().skipped);
    }

    #[tokio::test]
    async fn test_unavailable_list_fails_sweep() {
        let backend = Arc::new(FaultyBackend::new());
        backend.inject(Op::List, KEY_PREFIX, Fault::Fail);

        let (rotation, _) = scheduler(&backend);
        assert!(rotation.sweep(Utc::now()).await.is_err());
    }
}
