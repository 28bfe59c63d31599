//! In-memory storage backend
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


use crate::backend::{normalize_prefix, Backend, WatchEvent};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Entry {
    value: Vec<u8>,
    modify_index: u64,
}

#[derive(Default)]
struct State {
    entries: BTreeMap<String, Entry>,
    /// Latest deletion index per parent directory, so watchers see removals
    removals: BTreeMap<String, u64>,
    index: u64,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn prefix_index(&self, prefix: &str) -> u64 {
        let live = self
            .entries
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(_, entry)| entry.modify_index);
        let removed = self
            .removals
            .iter()
            .filter(|(dir, _)| dir.starts_with(prefix))
            .map(|(_, index)| *index);
        live.chain(removed).max().unwrap_or(0)
    }
}

/// `jwk/abc` -> `jwk/`, `next_rotation` -> ``
fn parent_dir(path: &str) -> &str {
    path.rfind('/').map_or("", |slash| &path[..=slash])
}

/// Ordered in-process key/value store with change notification.
///
/// Several key stores sharing one `Arc<MemoryBackend>` behave like
/// processes sharing a remote store.
pub struct MemoryBackend {
    state: RwLock<State>,
    changes: watch::Sender<u64>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            state: RwLock::new(State::default()),
            changes,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> BackendResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, path: &str) -> BackendResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        Ok(state.entries.get(path).map(|entry| entry.value.clone()))
    }

    async fn set(&self, path: &str, value: &[u8]) -> BackendResult<()> {
        self.ensure_open()?;
        if path.is_empty() {
            return Err(BackendError::InvalidPath(path.to_string()));
        }

        let mut state = self.state.write().await;
        let modify_index = state.bump();
        state.entries.insert(
            path.to_string(),
            Entry {
                value: value.to_vec(),
                modify_index,
            },
        );
        self.changes.send_replace(modify_index);
        Ok(())
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        if state.entries.remove(path).is_some() {
            let index = state.bump();
            state.removals.insert(parent_dir(path).to_string(), index);
            self.changes.send_replace(index);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        self.ensure_open()?;
        let prefix = normalize_prefix(prefix);
        let state = self.state.read().await;

        let children: BTreeSet<String> = state
            .entries
            .keys()
            .filter_map(|path| path.strip_prefix(prefix.as_str()))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();

        Ok(children.into_iter().collect())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        wait_index: u64,
        cancel: &CancellationToken,
    ) -> BackendResult<WatchEvent> {
        let prefix = normalize_prefix(prefix);
        // Subscribe before reading the index so no change can slip in between
        let mut changes = self.changes.subscribe();

        loop {
            self.ensure_open()?;
            let current = self.state.read().await.prefix_index(&prefix);
            if current > wait_index {
                return Ok(WatchEvent::Changed { index: current });
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(prefix = %prefix, "Watch canceled");
                    return Ok(WatchEvent::Canceled);
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(BackendError::Closed);
                    }
                }
            }
        }
    }

    async fn close(&self) -> BackendResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            // Wake watchers so they observe the closed flag
            let index = self.state.read().await.index;
            self.changes.send_replace(index);
        }
        Ok(())
    }
}
