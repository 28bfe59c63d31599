//! Storage backend interface
//!
//! Any key/value store that can point-read, upsert, delete and list children
//! under a prefix can hold keys. Implementations shipped with this crate:
//! - In-memory map (tests, single process)
//! - Local filesystem
//!
//! Network stores (Consul, etcd, Vault) implement the same trait outside this crate.
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


use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Prefix under which key envelopes live
pub const KEY_PREFIX: &str = "jwk";

/// Path of the advisory rotation marker
pub const ROTATION_MARKER_PATH: &str = "next_rotation";

/// Backend path of a key envelope
pub fn key_path(key_id: &str) -> String {
    format!("{}/{}", KEY_PREFIX, key_id)
}

/// Outcome of a watch call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEvent {
    /// Something under the prefix changed; resume from `index`
    Changed { index: u64 },
    /// The caller's cancellation token fired first
    Canceled,
}

/// Trait for key/value storage backends
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Read a value; a missing path is `Ok(None)`
    async fn get(&self, path: &str) -> BackendResult<Option<Vec<u8>>>;

    /// Create or replace a value
    async fn set(&self, path: &str, value: &[u8]) -> BackendResult<()>;

    /// Delete a value; a missing path is not an error
    async fn delete(&self, path: &str) -> BackendResult<()>;

    /// Names of the direct children of `prefix`, sorted, never empty strings
    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>>;

    /// Block until something under `prefix` changes after `wait_index`, or `cancel` fires.
    ///
    /// Returned indices never decrease for a given backend instance.
    async fn watch_prefix(
        &self,
        _prefix: &str,
        _wait_index: u64,
        _cancel: &CancellationToken,
    ) -> BackendResult<WatchEvent> {
        Err(BackendError::WatchNotSupported)
    }

    /// Release resources; calling it twice is fine
    async fn close(&self) -> BackendResult<()>;
}

/// Normalize a list prefix to `segment/segment/` form ("" stays "")
pub(crate) fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
