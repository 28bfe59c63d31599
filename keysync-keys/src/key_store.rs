//! High-level key store interface
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


use crate::backend::{key_path, Backend};
use crate::cache::KeyCache;
use crate::envelope::KeyEnvelope;
use crate::error::{KeyError, KeyResult};
use crate::key_types::{KeyGenerator, KeyRecord};
use crate::options::KeyStoreOptions;
use crate::rotation::{RotationReport, RotationScheduler};
use crate::sync::{SyncReport, Synchronizer};
use chrono::{TimeDelta, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Key store that mirrors a shared backend into a local cache.
///
/// Reads are served from the cache. Writes go to the backend first and are
/// followed by a synchronization pass, so a caller sees its own writes.
pub struct KeyStore {
    backend: Arc<dyn Backend>,
    cache: Arc<KeyCache>,
    synchronizer: Synchronizer,
    rotation: RotationScheduler,
    options: KeyStoreOptions,
    pick_cursor: AtomicUsize,
}

impl KeyStore {
    /// Create a key store and load the current backend state
    pub async fn new(backend: Arc<dyn Backend>, options: KeyStoreOptions) -> KeyResult<Self> {
        let cache = Arc::new(KeyCache::new());
        let synchronizer = Synchronizer::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            options.prune_missing,
        );
        let rotation = RotationScheduler::new(
            Arc::clone(&backend),
            Arc::clone(&cache),
            options.grace_period,
            options.rotation_lease,
        );

        let store = Self {
            backend,
            cache,
            synchronizer,
            rotation,
            options,
            pick_cursor: AtomicUsize::new(0),
        };

        let report = store.synchronize().await?;
        info!(
            backend = store.backend.name(),
            keys = report.loaded,
            "Key store initialized"
        );

        Ok(store)
    }

    pub fn options(&self) -> &KeyStoreOptions {
        &self.options
    }

    /// Produce a new key with `generator`; nothing is stored
    pub fn generate(&self, generator: &dyn KeyGenerator) -> KeyResult<KeyRecord> {
        generator
            .generate()
            .map_err(|e| KeyError::Generation(format!("{:#}", e)))
    }

    /// Persist the public half of each record, then synchronize.
    ///
    /// Stops at the first failure; records written before it stay written.
    pub async fn add(&self, records: &[KeyRecord]) -> KeyResult<()> {
        for record in records {
            self.write_through(record.clone()).await?;
        }
        self.synchronize().await?;
        Ok(())
    }

    /// Like [`add`](Self::add), with every record expiring `ttl` from now
    pub async fn add_with_expiration(&self, records: &[KeyRecord], ttl: Duration) -> KeyResult<()> {
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|e| KeyError::Configuration(format!("Invalid key expiration: {}", e)))?;
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .ok_or_else(|| KeyError::Configuration("Key expiration out of range".to_string()))?;

        for record in records {
            self.write_through(record.clone().with_expiration(Some(expires_at)))
                .await?;
        }
        self.synchronize().await?;
        Ok(())
    }

    async fn write_through(&self, record: KeyRecord) -> KeyResult<()> {
        let envelope = KeyEnvelope::seal(&record, Utc::now(), self.options.compress)?;
        self.backend
            .set(&key_path(record.id()), &envelope.to_bytes()?)
            .await?;

        debug!(key_id = %record.id(), "Stored key");
        // The originating copy keeps its private material locally
        self.cache.put(record).await;
        Ok(())
    }

    /// Cached key by id
    pub async fn get(&self, id: &str) -> KeyResult<KeyRecord> {
        self.cache
            .get(id)
            .await
            .ok_or_else(|| KeyError::NotFound(id.to_string()))
    }

    /// Delete a key from the backend and the cache
    pub async fn remove(&self, id: &str) -> KeyResult<()> {
        if self.cache.get(id).await.is_none() {
            return Err(KeyError::NotFound(id.to_string()));
        }

        self.backend.delete(&key_path(id)).await?;
        self.cache.remove(id).await;
        info!(key_id = %id, "Removed key");

        self.synchronize().await?;
        Ok(())
    }

    /// Every cached key, including private material held by this process
    pub async fn all(&self) -> Vec<KeyRecord> {
        self.cache.list_all().await
    }

    /// Every cached key with private material stripped
    pub async fn only_public_keys(&self) -> Vec<KeyRecord> {
        self.cache.list_public().await
    }

    /// Next usable key in round-robin order
    pub async fn pick(&self) -> KeyResult<KeyRecord> {
        let ids = self.cache.usable_ids(Utc::now()).await;
        if ids.is_empty() {
            return Err(KeyError::NoKeysAvailable);
        }

        let slot = self.pick_cursor.fetch_add(1, Ordering::Relaxed) % ids.len();
        // Removed between the snapshot and the lookup
        self.cache
            .get(&ids[slot])
            .await
            .ok_or(KeyError::NoKeysAvailable)
    }

    /// Reconcile the cache with the backend now
    pub async fn synchronize(&self) -> KeyResult<SyncReport> {
        self.synchronizer.synchronize().await
    }

    /// Run a rotation attempt now
    pub async fn rotate(&self) -> KeyResult<RotationReport> {
        self.rotation.rotate(Utc::now()).await
    }

    /// Synchronize and rotate on every interval until `cancel` fires.
    ///
    /// Meant to run once per process. Errors are logged and retried on the
    /// next tick. With `watch` enabled, backend change notifications trigger
    /// extra synchronization passes.
    pub async fn monitor(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.options.sync_interval.as_secs(),
            watch = self.options.watch,
            "Starting key store monitor"
        );

        tokio::join!(self.poll(&cancel), self.watch(&cancel));

        info!("Key store monitor stopped");
    }

    async fn poll(&self, cancel: &CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; the store synchronized on creation
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // A stalled backend call must not hold up shutdown
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.tick() => {}
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        if let Err(e) = self.synchronize().await {
            warn!(error = %e, "Unable to synchronize key store with backend");
        }

        match self.rotate().await {
            Ok(report) if report.retired > 0 || report.deleted > 0 => {
                info!(
                    retired = report.retired,
                    deleted = report.deleted,
                    "Rotated keys"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Unable to rotate keys"),
        }
    }

    async fn watch(&self, cancel: &CancellationToken) {
        if self.options.watch {
            self.synchronizer
                .watch(cancel, self.options.sync_interval)
                .await;
        }
    }

    /// Release the backend
    pub async fn close(&self) -> KeyResult<()> {
        self.backend.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::KEY_PREFIX;
    use crate::backends::faulty::{Fault, FaultyBackend, Op};
    use crate::backends::MemoryBackend;
    use crate::ed25519::{self, Ed25519Generator};

    async fn store() -> KeyStore {
        KeyStore::new(Arc::new(MemoryBackend::new()), KeyStoreOptions::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_generate_wraps_failure() {
        let store = store().await;
        let failing = || -> anyhow::Result<KeyRecord> { Err(anyhow::anyhow!("entropy exhausted")) };

        match store.generate(&failing) {
            Err(KeyError::Generation(message)) => assert!(message.contains("entropy exhausted")),
            other => panic!("unexpected result: {:?}", other),
        }

        let key = store.generate(&Ed25519Generator).unwrap();
        assert!(key.has_private());
        assert!(store.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_keeps_private_copy_locally() {
        let backend = Arc::new(MemoryBackend::new());
        let store = KeyStore::new(backend.clone(), KeyStoreOptions::default())
            .await
            .unwrap();
        let key = ed25519::generate().unwrap();
        store.add(&[key.clone()]).await.unwrap();

        assert!(store.get(key.id()).await.unwrap().has_private());

        let stored = backend.get(&key_path(key.id())).await.unwrap().unwrap();
        let opened = KeyEnvelope::from_bytes(&stored).unwrap().open().unwrap();
        assert!(!opened.has_private());
    }

    #[tokio::test]
    async fn test_pick_empty() {
        let store = store().await;
        assert!(matches!(store.pick().await, Err(KeyError::NoKeysAvailable)));
    }

    #[tokio::test]
    async fn test_remove_unknown() {
        let store = store().await;
        assert!(matches!(
            store.remove("missing").await,
            Err(KeyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_monitor_stops_during_stalled_pass() {
        let backend = Arc::new(FaultyBackend::new());
        let options = KeyStoreOptions::default().with_interval(Duration::from_millis(10));
        let store = Arc::new(KeyStore::new(backend.clone(), options).await.unwrap());

        // Every pass from now on hangs on its first backend call
        backend.inject(Op::List, KEY_PREFIX, Fault::Stall);

        let cancel = CancellationToken::new();
        let handle = {
            let store = Arc::clone(&store);
            let cancel = cancel.clone();
            tokio::spawn(async move { store.monitor(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor should stop while a pass is stalled")
            .unwrap();
    }
}
