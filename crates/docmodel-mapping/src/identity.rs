//! Identifier generation.

use docmodel_core::{Error, ObjectId, Result, UsageErrorKind, Value};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates, validates and compares entity identifiers.
///
/// One generator instance is shared by every entity in a class hierarchy,
/// and any counters it keeps belong to that instance.
pub trait IdentityGenerator: Send + Sync + fmt::Debug {
    /// Produce a fresh identifier.
    fn generate(&self) -> Value;

    /// Whether `id` is an identifier this generator could have produced.
    fn validate(&self, id: &Value) -> bool;

    /// Parse the string form of an identifier.
    fn parse_id(&self, s: &str) -> Result<Value>;

    /// Render an identifier as a string.
    fn format_id(&self, id: &Value) -> String;

    fn are_equal(&self, a: &Value, b: &Value) -> bool {
        a == b
    }
}

/// 12-byte object ids: seconds, per-instance random bytes, per-instance counter.
#[derive(Debug)]
pub struct ObjectIdGenerator {
    random: [u8; 5],
    counter: AtomicU32,
}

impl ObjectIdGenerator {
    pub fn new() -> Self {
        Self {
            random: rand::random::<[u8; 5]>(),
            counter: AtomicU32::new(rand::random::<u32>() & 0x00FF_FFFF),
        }
    }

    fn now_seconds() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
    }
}

impl Default for ObjectIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGenerator for ObjectIdGenerator {
    fn generate(&self) -> Value {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        Value::ObjectId(ObjectId::from_parts(
            Self::now_seconds(),
            self.random,
            counter,
        ))
    }

    fn validate(&self, id: &Value) -> bool {
        matches!(id, Value::ObjectId(_))
    }

    fn parse_id(&self, s: &str) -> Result<Value> {
        ObjectId::parse_str(s).map(Value::ObjectId)
    }

    fn format_id(&self, id: &Value) -> String {
        id.to_string()
    }
}

/// Monotonic integer ids starting at 1.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicI64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityGenerator for SequentialIdGenerator {
    fn generate(&self) -> Value {
        Value::Int(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn validate(&self, id: &Value) -> bool {
        matches!(id, Value::Int(_))
    }

    fn parse_id(&self, s: &str) -> Result<Value> {
        s.parse::<i64>().map(Value::Int).map_err(|e| {
            Error::usage(
                UsageErrorKind::InvalidIdentifier,
                format!("Invalid sequential id '{}': {}", s, e),
            )
        })
    }

    fn format_id(&self, id: &Value) -> String {
        id.to_string()
    }
}
