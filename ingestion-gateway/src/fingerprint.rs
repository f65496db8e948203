//! Content fingerprints for inbound events.
//!
//! The fingerprint is the SHA-256 of the payload serialized as compact JSON
//! with object keys sorted at every depth and numbers written by value, so two
//! submissions that only differ in key order or number spelling hash the same. It is both the dedup key and the Kafka message
//! key. Client-supplied identifiers are never trusted for either.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::event::RawEvent;

pub const DEDUP_KEY_PREFIX: &str = "event:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the dedup record for this event.
    pub fn dedup_key(&self) -> String {
        format!("{DEDUP_KEY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Must run on the payload as submitted, before any enrichment field is added.
pub fn fingerprint(event: &RawEvent) -> Result<EventId, serde_json::Error> {
    let canonical = serde_json::to_vec(&CanonicalObject(event.properties()))?;
    Ok(EventId(hex::encode(Sha256::digest(&canonical))))
}

struct CanonicalObject<'a>(&'a Map<String, Value>);

struct Canonical<'a>(&'a Value);

impl Serialize for CanonicalObject<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // serde_json's Map is only sorted when preserve_order is off, which any
        // crate in the build graph can flip on
        let mut entries: Vec<(&String, &Value)> = self.0.iter().collect();
        entries.sort_unstable_by(|a, b| a.0.cmp(b.0));

        let mut map = serializer.serialize_map(Some(entries.len()))?;
        for (key, value) in entries {
            map.serialize_entry(key, &Canonical(value))?;
        }
        map.end()
    }
}

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Value::Object(object) => CanonicalObject(object).serialize(serializer),
            Value::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            Value::Number(number) => CanonicalNumber(number).serialize(serializer),
            scalar => scalar.serialize(serializer),
        }
    }
}

/// Numbers hash by value, so `1`, `1.0` and `1e0` are the same number.
/// Every number goes through `f64`; integral values inside the exact range
/// are written as integers.
struct CanonicalNumber<'a>(&'a Number);

const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0; // 2^53

impl Serialize for CanonicalNumber<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_f64() {
            Some(value) if value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER => {
                serializer.serialize_i64(value as i64)
            }
            Some(value) => serializer.serialize_f64(value),
            None => self.0.serialize(serializer),
        }
    }
}
