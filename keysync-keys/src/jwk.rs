//! JSON Web Key encoding of key records (RFC 7517, OKP keys per RFC 8037)
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
use crate::key_types::{Algorithm, KeyRecord};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

#[derive(Debug, Serialize, Deserialize)]
struct RawJwk {
    kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kid: Option<String>,
    crv: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "use")]
    public_key_use: Option<String>,
    x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    d: Option<String>,
}

/// Encode a record as a JWK; `d` is only present when the record holds private material
pub fn encode(record: &KeyRecord) -> KeyResult<Vec<u8>> {
    let raw = RawJwk {
        kty: "OKP".to_string(),
        kid: Some(record.id().to_string()),
        crv: record.algorithm().as_str().to_string(),
        public_key_use: Some("sig".to_string()),
        x: URL_SAFE_NO_PAD.encode(record.public_material()),
        d: record.private_material().map(|d| URL_SAFE_NO_PAD.encode(d)),
    };

    Ok(serde_json::to_vec(&raw)?)
}

/// Decode a JWK into a record issued now, with no expiration
pub fn decode(data: &[u8]) -> KeyResult<KeyRecord> {
    let raw: RawJwk = serde_json::from_slice(data)?;

    if raw.kty != "OKP" {
        return Err(KeyError::InvalidFormat(format!(
            "unsupported key type: {}",
            raw.kty
        )));
    }

    let algorithm = match raw.crv.as_str() {
        "Ed25519" => Algorithm::Ed25519,
        other => {
            return Err(KeyError::InvalidFormat(format!(
                "unsupported curve: {}",
                other
            )))
        }
    };

    let public_material = decode_member("x", &raw.x)?;
    match algorithm {
        Algorithm::Ed25519 => {
            ed25519::verifying_key(&public_material)?;
        }
    }

    let mut record = KeyRecord::new(algorithm, public_material)?;

    if let Some(kid) = &raw.kid {
        if kid != record.id() {
            return Err(KeyError::InvalidFormat(format!(
                "kid {} does not match key fingerprint {}",
                kid,
                record.id()
            )));
        }
    }

    if let Some(d) = &raw.d {
        let private_material = Zeroizing::new(decode_member("d", d)?);
        record = record.with_private(private_material.to_vec())?;
    }

    Ok(record)
}

fn decode_member(name: &str, value: &str) -> KeyResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| KeyError::InvalidFormat(format!("invalid base64url in '{}': {}", name, e)))
}
