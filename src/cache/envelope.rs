//! Envelope Module
//!
//! Tagged encoding of cached values. Values are stored as JSON when serde_json
//! can represent them and as MessagePack otherwise; the tag tells the reader
//! which decoder to use.
//!
//! Wire form (shared with the platform's other services):
//! - `{"t":"json","v":<value>}`
//! - `{"t":"pkl","v":"<base64 bytes>"}`

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Envelope ==
/// A value in stored form, tagged with its encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Envelope {
    /// JSON-native value
    #[serde(rename = "json")]
    Json(Value),
    /// MessagePack bytes for values JSON cannot represent
    #[serde(rename = "pkl")]
    Binary(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl Envelope {
    // == Encode ==
    /// Encodes a value, preferring JSON and falling back to MessagePack.
    ///
    /// serde_json writes NaN and infinities as null, so a JSON rendering that
    /// contains null is checked against the MessagePack form, and values
    /// holding non-finite floats are stored in binary.
    ///
    /// Fails only when neither encoder accepts the value.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        match serde_json::to_value(value) {
            Ok(json) if !contains_null(&json) => Ok(Envelope::Json(json)),
            Ok(json) => match rmp_serde::to_vec_named(value) {
                Ok(bytes) if float_scan::has_non_finite(&bytes) => Ok(Envelope::Binary(bytes)),
                _ => Ok(Envelope::Json(json)),
            },
            Err(json_err) => rmp_serde::to_vec_named(value)
                .map(Envelope::Binary)
                .map_err(|bin_err| {
                    CacheError::Serialization(format!(
                        "json: {}; msgpack: {}",
                        json_err, bin_err
                    ))
                }),
        }
    }

    // == Decode ==
    /// Decodes the envelope into `T` using the tagged decoder.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self {
            Envelope::Json(json) => T::deserialize(json)
                .map_err(|e| CacheError::Serialization(format!("json: {}", e))),
            Envelope::Binary(bytes) => rmp_serde::from_slice(bytes)
                .map_err(|e| CacheError::Serialization(format!("msgpack: {}", e))),
        }
    }

    /// True when the value itself is null (`None`, `()`). A NaN is stored in
    /// binary and is not null.
    pub fn is_null(&self) -> bool {
        matches!(self, Envelope::Json(Value::Null))
    }

    // == Wire Format ==
    /// Renders the envelope as the string stored in a remote backend.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    /// Parses a stored string. Unknown tags and malformed payloads are errors;
    /// callers treat them as misses.
    pub fn from_wire(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

fn contains_null(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(items) => items.iter().any(contains_null),
        Value::Object(fields) => fields.values().any(contains_null),
        _ => false,
    }
}

/// Scans a MessagePack payload for NaN or infinite floats.
mod float_scan {
    use std::fmt;

    use serde::de::{Deserialize, Deserializer, Error, MapAccess, SeqAccess, Visitor};

    struct NonFinite(bool);

    pub fn has_non_finite(bytes: &[u8]) -> bool {
        // An unreadable payload is treated as lossy, which keeps it binary.
        rmp_serde::from_slice::<NonFinite>(bytes)
            .map(|found| found.0)
            .unwrap_or(true)
    }

    impl<'de> Deserialize<'de> for NonFinite {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            deserializer.deserialize_any(ScanVisitor)
        }
    }

    struct ScanVisitor;

    impl<'de> Visitor<'de> for ScanVisitor {
        type Value = NonFinite;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("any MessagePack value")
        }

        fn visit_f64<E: Error>(self, v: f64) -> Result<NonFinite, E> {
            Ok(NonFinite(!v.is_finite()))
        }

        fn visit_bool<E: Error>(self, _: bool) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_i64<E: Error>(self, _: i64) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_u64<E: Error>(self, _: u64) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_str<E: Error>(self, _: &str) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_bytes<E: Error>(self, _: &[u8]) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_unit<E: Error>(self) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_none<E: Error>(self) -> Result<NonFinite, E> {
            Ok(NonFinite(false))
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<NonFinite, D::Error> {
            NonFinite::deserialize(d)
        }

        fn visit_newtype_struct<D: Deserializer<'de>>(self, d: D) -> Result<NonFinite, D::Error> {
            NonFinite::deserialize(d)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<NonFinite, A::Error> {
            let mut found = false;
            while let Some(NonFinite(item)) = seq.next_element()? {
                found |= item;
            }
            Ok(NonFinite(found))
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<NonFinite, A::Error> {
            let mut found = false;
            while let Some((NonFinite(k), NonFinite(v))) = map.next_entry()? {
                found |= k || v;
            }
            Ok(NonFinite(found))
        }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
