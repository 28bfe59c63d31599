//! Key store monitor service
//!
//! Usage:
//!   cargo run --bin keysync-monitor
//!
//! Keeps the configured backend's signing keys synchronized and rotated,
//! creating a first key when none is usable. Configuration comes from
//! `KEYSYNC_*` environment variables or a `.env` file.
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


use keysync_config::KeysyncConfig;
use keysync_keys::ed25519::Ed25519Generator;
use keysync_keys::{ensure_active_key, init_key_store};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = KeysyncConfig::from_env()?;
    keysync_logging::init_from_config("keysync-monitor", &config)?;

    let key_store = init_key_store(&config).await?;

    let ttl = Duration::from_secs(config.key_ttl_secs);
    let active = ensure_active_key(&key_store, &Ed25519Generator, ttl).await?;
    info!(key_id = %active.id(), "Active signing key");

    let cancel = CancellationToken::new();
    let monitor_handle = {
        let key_store = key_store.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { key_store.monitor(cancel).await })
    };

    info!("Key store monitor running. Press Ctrl+C to stop.");
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(err) => error!(error = %err, "Unable to listen for shutdown signal"),
    }

    cancel.cancel();
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Monitor task ended abnormally");
    }

    key_store.close().await?;
    info!("Key store monitor stopped");

    Ok(())
}
