//! Service integration helpers for using the key store in services
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


use crate::backend::Backend;
use crate::backends::{FileBackend, MemoryBackend};
use crate::error::{KeyError, KeyResult};
use crate::key_store::KeyStore;
use crate::key_types::{KeyGenerator, KeyRecord};
use crate::options::KeyStoreOptions;
use keysync_config::{BackendKind, KeysyncConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Map service configuration onto key store options
pub fn options_from_config(config: &KeysyncConfig) -> KeyStoreOptions {
    KeyStoreOptions::default()
        .with_interval(Duration::from_secs(config.sync_interval_secs))
        .with_watch(config.watch)
        .with_compression(config.compress)
        .with_grace_period(Duration::from_secs(config.grace_period_secs))
        .with_rotation_lease(Duration::from_secs(config.rotation_lease_secs))
        .with_prune_missing(config.prune_missing)
}

/// Open the configured backend
pub async fn open_backend(config: &KeysyncConfig) -> KeyResult<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::File => Arc::new(FileBackend::new(&config.storage_path).await?),
    };
    Ok(backend)
}

/// Initialize key store for a service
pub async fn init_key_store(config: &KeysyncConfig) -> KeyResult<Arc<KeyStore>> {
    info!(backend = ?config.backend, path = %config.storage_path, "Initializing key store");

    let backend = open_backend(config).await?;
    let key_store = KeyStore::new(backend, options_from_config(config)).await?;

    Ok(Arc::new(key_store))
}

/// Return a usable key, generating and storing one with `ttl` if there is none
pub async fn ensure_active_key(
    key_store: &KeyStore,
    generator: &dyn KeyGenerator,
    ttl: Duration,
) -> KeyResult<KeyRecord> {
    match key_store.pick().await {
        Err(KeyError::NoKeysAvailable) => {
            let key = key_store.generate(generator)?;
            key_store
                .add_with_expiration(std::slice::from_ref(&key), ttl)
                .await?;
            info!(key_id = %key.id(), ttl_secs = ttl.as_secs(), "Generated new signing key");
            key_store.get(key.id()).await
        }
        other => other,
    }
}
