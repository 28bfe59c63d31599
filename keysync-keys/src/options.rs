//! Key store runtime options
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


use std::time::Duration;

/// Default polling interval of the monitor
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(60);

/// Default time an expired key stays readable before deletion
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2 * 60 * 60);

/// Default time other processes skip rotation after one starts a sweep
pub const DEFAULT_ROTATION_LEASE: Duration = Duration::from_secs(5 * 60);

/// Options controlling synchronization and rotation
#[derive(Debug, Clone)]
pub struct KeyStoreOptions {
    /// Polling interval of the monitor loop
    pub sync_interval: Duration,
    /// Also synchronize on backend change notification
    pub watch: bool,
    /// Snappy-compress stored key values
    pub compress: bool,
    /// Time between expiration and deletion
    pub grace_period: Duration,
    /// Rotation marker lease
    pub rotation_lease: Duration,
    /// Evict cached keys whose backend entry is gone
    pub prune_missing: bool,
}

impl Default for KeyStoreOptions {
    fn default() -> Self {
        Self {
            sync_interval: DEFAULT_SYNC_INTERVAL,
            watch: false,
            compress: true,
            grace_period: DEFAULT_GRACE_PERIOD,
            rotation_lease: DEFAULT_ROTATION_LEASE,
            prune_missing: false,
        }
    }
}

impl KeyStoreOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_watch(mut self, watch: bool) -> Self {
        self.watch = watch;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn with_rotation_lease(mut self, rotation_lease: Duration) -> Self {
        self.rotation_lease = rotation_lease;
        self
    }

    pub fn with_prune_missing(mut self, prune_missing: bool) -> Self {
        self.prune_missing = prune_missing;
        self
    }
}
