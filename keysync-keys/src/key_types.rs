//! Key type definitions
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


use crate::ed25519;
use crate::error::{KeyError, KeyResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Unique identifier for a key, derived from its public material
pub type KeyId = String;

/// Compute the fingerprint of a public key.
///
/// Unpadded base64url of the SHA-256 digest, so it is safe as a path segment.
pub fn key_id_from_public(public_material: &[u8]) -> KeyId {
    URL_SAFE_NO_PAD.encode(Sha256::digest(public_material))
}

/// Signature scheme of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Ed25519,
}

impl Algorithm {
    /// JOSE curve name
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Ed25519 => "Ed25519",
        }
    }

    /// Check that `private_material` is the counterpart of `public_material`
    fn check_pair(&self, public_material: &[u8], private_material: &[u8]) -> KeyResult<()> {
        match self {
            Algorithm::Ed25519 => ed25519::check_pair(public_material, private_material),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signing key and its lifecycle metadata
#[derive(Clone, PartialEq, Eq)]
pub struct KeyRecord {
    id: KeyId,
    algorithm: Algorithm,
    public_material: Vec<u8>,
    private_material: Option<Zeroizing<Vec<u8>>>,
    issued_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    usable: bool,
}

impl KeyRecord {
    /// Create a public-only record issued now
    pub fn new(algorithm: Algorithm, public_material: Vec<u8>) -> KeyResult<Self> {
        if public_material.is_empty() {
            return Err(KeyError::InvalidFormat(
                "public key material is required".to_string(),
            ));
        }

        Ok(Self {
            id: key_id_from_public(&public_material),
            algorithm,
            public_material,
            private_material: None,
            issued_at: Utc::now(),
            expires_at: None,
            usable: true,
        })
    }

    /// Attach private material, which must match the public half
    pub fn with_private(mut self, private_material: Vec<u8>) -> KeyResult<Self> {
        self.algorithm
            .check_pair(&self.public_material, &private_material)?;
        self.private_material = Some(Zeroizing::new(private_material));
        Ok(self)
    }

    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn with_expiration(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn with_usable(mut self, usable: bool) -> Self {
        self.usable = usable;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn public_material(&self) -> &[u8] {
        &self.public_material
    }

    pub fn private_material(&self) -> Option<&[u8]> {
        self.private_material.as_ref().map(|p| p.as_slice())
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn is_usable(&self) -> bool {
        self.usable
    }

    pub fn has_private(&self) -> bool {
        self.private_material.is_some()
    }

    pub fn has_public(&self) -> bool {
        !self.public_material.is_empty()
    }

    /// Copy of this record without private material
    pub fn public(&self) -> Self {
        Self {
            private_material: None,
            ..self.clone()
        }
    }

    /// A key with no expiration never expires
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    /// Take the lifecycle metadata of `other`, keeping our private material.
    ///
    /// Both records must describe the same key.
    pub(crate) fn refresh_from(&mut self, other: KeyRecord) {
        debug_assert_eq!(self.id, other.id);
        let private_material = self.private_material.take();
        *self = other;
        if self.private_material.is_none() {
            self.private_material = private_material;
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("id", &self.id)
            .field("algorithm", &self.algorithm)
            .field("has_private", &self.has_private())
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("usable", &self.usable)
            .finish()
    }
}

/// Pluggable source of fresh key material
pub trait KeyGenerator: Send + Sync {
    fn generate(&self) -> anyhow::Result<KeyRecord>;
}

impl<F> KeyGenerator for F
where
    F: Fn() -> anyhow::Result<KeyRecord> + Send + Sync,
{
    fn generate(&self) -> anyhow::Result<KeyRecord> {
        self()
    }
}
