//! Persisted wrapper around a key record
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
use crate::jwk;
use crate::key_types::KeyRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored form of a key: lifecycle metadata plus the encoded public key.
///
/// `value` is opaque to everything but [`KeyEnvelope::open`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    /// Issue time, epoch seconds
    #[serde(rename = "iat")]
    pub issued_at: i64,
    /// Expiration time, epoch seconds
    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default = "default_usable")]
    pub usable: bool,
    /// Whether `value` is snappy-compressed
    #[serde(default, skip_serializing_if = "is_false")]
    pub snappy: bool,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

fn default_usable() -> bool {
    true
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl KeyEnvelope {
    /// Wrap the public half of `record`, issued at `issued_at`
    pub fn seal(record: &KeyRecord, issued_at: DateTime<Utc>, compress: bool) -> KeyResult<Self> {
        let mut value = jwk::encode(&record.public())?;
        if compress {
            value = snap::raw::Encoder::new().compress_vec(&value)?;
        }

        Ok(Self {
            issued_at: issued_at.timestamp(),
            expires_at: record.expires_at().map(|exp| exp.timestamp()),
            usable: record.is_usable(),
            snappy: compress,
            value,
        })
    }

    /// Decode the wrapped key, applying the envelope metadata
    pub fn open(&self) -> KeyResult<KeyRecord> {
        let payload = if self.snappy {
            snap::raw::Decoder::new().decompress_vec(&self.value)?
        } else {
            self.value.clone()
        };

        let expires_at = self.expires_at.map(timestamp).transpose()?;
        Ok(jwk::decode(&payload)?
            .with_issued_at(timestamp(self.issued_at)?)
            .with_expiration(expires_at)
            .with_usable(self.usable))
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now.timestamp() > expires_at)
    }

    pub fn to_bytes(&self) -> KeyResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> KeyResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

fn timestamp(secs: i64) -> KeyResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| KeyError::InvalidFormat(format!("timestamp out of range: {}", secs)))
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ed25519;
    use chrono::Duration;

    #[test]
    fn test_seal_strips_private_material() {
        let key = ed25519::generate().unwrap();
        let envelope = KeyEnvelope::seal(&key, Utc::now(), false).unwrap();

        let jwk: serde_json::Value = serde_json::from_slice(&envelope.value).unwrap();
        assert!(jwk.get("d").is_none());

        let opened = envelope.open().unwrap();
        assert_eq!(opened.id(), key.id());
        assert!(!opened.has_private());
    }

    #[test]
    fn test_compressed_envelope_opens() {
        let now = Utc::now();
        let key = ed25519::generate()
            .unwrap()
            .with_expiration(Some(now + Duration::hours(1)));
        let envelope = KeyEnvelope::seal(&key, now, true).unwrap();
        assert!(envelope.snappy);

        let bytes = envelope.to_bytes().unwrap();
        let opened = KeyEnvelope::from_bytes(&bytes).unwrap().open().unwrap();
        assert_eq!(opened.id(), key.id());
        assert_eq!(opened.issued_at().timestamp(), now.timestamp());
        assert_eq!(
            opened.expires_at().map(|e| e.timestamp()),
            Some((now + Duration::hours(1)).timestamp())
        );
        assert!(opened.is_usable());
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let key = ed25519::generate().unwrap();
        let value = jwk::encode(&key.public()).unwrap();
        let json = serde_json::json!({
            "iat": 1_700_000_000,
            "value": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &value),
        });

        let envelope = KeyEnvelope::from_bytes(json.to_string().as_bytes()).unwrap();
        assert_eq!(envelope.expires_at, None);
        assert!(envelope.usable);
        assert!(!envelope.snappy);
        assert!(!envelope.is_expired_at(Utc::now()));
    }

    #[test]
    fn test_corrupt_compressed_value_fails() {
        let envelope = KeyEnvelope {
            issued_at: 0,
            expires_at: None,
            usable: true,
            snappy: true,
            value: b"definitely not snappy".to_vec(),
        };
        assert!(envelope.open().is_err());
    }
}
