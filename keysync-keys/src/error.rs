//! Error types for key management
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


use thiserror::Error;

/// Storage backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Backend is closed")]
    Closed,

    #[error("Watch prefix not supported by this backend")]
    WatchNotSupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Key management errors
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("No keys available")]
    NoKeysAvailable,

    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Key generation error: {0}")]
    Generation(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] snap::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;
