//! Ed25519 key material
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


use crate::error::{KeyError, KeyResult};
use crate::key_types::{Algorithm, KeyGenerator, KeyRecord};
use ed25519_dalek::{SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SECRET_KEY_LENGTH};
use rand::rngs::OsRng;

/// Generate a fresh Ed25519 key pair
pub fn generate() -> KeyResult<KeyRecord> {
    let signing_key = SigningKey::generate(&mut OsRng);
    KeyRecord::new(
        Algorithm::Ed25519,
        signing_key.verifying_key().to_bytes().to_vec(),
    )?
    .with_private(signing_key.to_bytes().to_vec())
}

/// [`KeyGenerator`] producing Ed25519 keys
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Generator;

impl KeyGenerator for Ed25519Generator {
    fn generate(&self) -> anyhow::Result<KeyRecord> {
        Ok(generate()?)
    }
}

/// Parse and validate a 32-byte public key
pub(crate) fn verifying_key(public_material: &[u8]) -> KeyResult<VerifyingKey> {
    let bytes: [u8; PUBLIC_KEY_LENGTH] = public_material.try_into().map_err(|_| {
        KeyError::InvalidFormat(format!(
            "invalid ed25519 public key size: {}",
            public_material.len()
        ))
    })?;

    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| KeyError::InvalidFormat(format!("invalid ed25519 public key: {}", e)))
}

/// Check that a 32-byte secret seed derives the given public key
pub(crate) fn check_pair(public_material: &[u8], private_material: &[u8]) -> KeyResult<()> {
    let verifying_key = verifying_key(public_material)?;

    let seed: [u8; SECRET_KEY_LENGTH] = private_material.try_into().map_err(|_| {
        KeyError::InvalidFormat(format!(
            "invalid ed25519 private key size: {}",
            private_material.len()
        ))
    })?;

    if SigningKey::from_bytes(&seed).verifying_key() != verifying_key {
        return Err(KeyError::InvalidFormat(
            "ed25519 private key does not match public key".to_string(),
        ));
    }

    Ok(())
}
