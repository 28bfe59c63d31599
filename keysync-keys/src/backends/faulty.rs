//! Fault-injecting backend for tests
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


use super::MemoryBackend;
use crate::backend::{Backend, WatchEvent};
use crate::error::{BackendError, BackendResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Get,
    Set,
    Delete,
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Return `BackendError::Unavailable`
    Fail,
    /// Never complete
    Stall,
}

/// Wraps a [`MemoryBackend`] and breaks chosen operations on chosen paths
#[derive(Default)]
pub(crate) struct FaultyBackend {
    inner: MemoryBackend,
    faults: Mutex<HashMap<(Op, String), Fault>>,
}

impl FaultyBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn inner(&self) -> &MemoryBackend {
        &self.inner
    }

    pub(crate) fn inject(&self, op: Op, path: &str, fault: Fault) {
        let mut faults = self.faults.lock().unwrap();
        faults.insert((op, path.to_string()), fault);
    }

    pub(crate) fn heal(&self, op: Op, path: &str) {
        let mut faults = self.faults.lock().unwrap();
        faults.remove(&(op, path.to_string()));
    }

    async fn check(&self, op: Op, path: &str) -> BackendResult<()> {
        let fault = self
            .faults
            .lock()
            .unwrap()
            .get(&(op, path.to_string()))
            .copied();

        match fault {
            None => Ok(()),
            Some(Fault::Fail) => Err(BackendError::Unavailable(format!(
                "{:?} {} refused",
                op, path
            ))),
            Some(Fault::Stall) => std::future::pending().await,
        }
    }
}

#[async_trait]
impl Backend for FaultyBackend {
    fn name(&self) -> &str {
        "faulty"
    }

    async fn get(&self, path: &str) -> BackendResult<Option<Vec<u8>>> {
        self.check(Op::Get, path).await?;
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: &[u8]) -> BackendResult<()> {
        self.check(Op::Set, path).await?;
        self.inner.set(path, value).await
    }

    async fn delete(&self, path: &str) -> BackendResult<()> {
        self.check(Op::Delete, path).await?;
        self.inner.delete(path).await
    }

    async fn list(&self, prefix: &str) -> BackendResult<Vec<String>> {
        self.check(Op::List, prefix).await?;
        self.inner.list(prefix).await
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        wait_index: u64,
        cancel: &CancellationToken,
    ) -> BackendResult<WatchEvent> {
        self.inner.watch_prefix(prefix, wait_index, cancel).await
    }

    async fn close(&self) -> BackendResult<()> {
        self.inner.close().await
    }
}
