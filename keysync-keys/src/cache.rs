//! Local key record cache
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


use crate::key_types::{KeyId, KeyRecord};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// What this process currently believes exists in the backend.
///
/// Every method takes the lock for one whole operation and hands out owned
/// copies, never references into the map.
#[derive(Default)]
pub struct KeyCache {
    records: RwLock<HashMap<KeyId, KeyRecord>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record with the same id
    pub async fn put(&self, record: KeyRecord) {
        let mut records = self.records.write().await;
        records.insert(record.id().to_string(), record);
    }

    /// Insert, or refresh the metadata of an existing record without
    /// discarding private material it already holds
    pub async fn merge(&self, record: KeyRecord) {
        let mut records = self.records.write().await;
        match records.get_mut(record.id()) {
            Some(existing) => existing.refresh_from(record),
            None => {
                records.insert(record.id().to_string(), record);
            }
        }
    }

    pub async fn get(&self, id: &str) -> Option<KeyRecord> {
        let records = self.records.read().await;
        records.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<KeyRecord> {
        let mut records = self.records.write().await;
        records.remove(id)
    }

    /// Flag a cached record unusable; returns false if it is not cached
    pub async fn mark_unusable(&self, id: &str) -> bool {
        let mut records = self.records.write().await;
        match records.remove(id) {
            Some(record) => {
                records.insert(id.to_string(), record.with_usable(false));
                true
            }
            None => false,
        }
    }

    /// Keep only the records matching `keep`; returns how many were dropped
    pub async fn retain<F>(&self, mut keep: F) -> usize
    where
        F: FnMut(&KeyRecord) -> bool,
    {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| keep(record));
        before - records.len()
    }

    /// Snapshot of every record, private material included
    pub async fn list_all(&self) -> Vec<KeyRecord> {
        let records = self.records.read().await;
        records.values().cloned().collect()
    }

    /// Snapshot of every record with private material stripped
    pub async fn list_public(&self) -> Vec<KeyRecord> {
        let records = self.records.read().await;
        records.values().map(KeyRecord::public).collect()
    }

    /// Sorted ids of records that may be used for signing at `now`
    pub async fn usable_ids(&self, now: DateTime<Utc>) -> Vec<KeyId> {
        let records = self.records.read().await;
        let mut ids: Vec<KeyId> = records
            .values()
            .filter(|record| record.is_usable() && !record.is_expired_at(now))
            .map(|record| record.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
