//! Signing key lifecycle management for keysync
//!
//! Keeps a local cache of signing keys consistent with a shared key/value
//! backend, and retires expired keys across cooperating processes.
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


pub mod backend;
pub mod backends;
pub mod cache;
pub mod ed25519;
pub mod envelope;
pub mod error;
pub mod jwk;
pub mod key_store;
pub mod key_types;
pub mod options;
pub mod rotation;
pub mod service_integration;
pub mod sync;

pub use backend::{Backend, WatchEvent};
pub use error::{BackendError, BackendResult, KeyError, KeyResult};
pub use key_store::KeyStore;
pub use key_types::{Algorithm, KeyGenerator, KeyId, KeyRecord};
pub use options::KeyStoreOptions;
pub use rotation::{RotationReport, RotationScheduler};
pub use service_integration::*;
pub use sync::{SyncReport, Synchronizer};
