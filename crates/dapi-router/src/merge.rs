//! Result merging: folds the partial envelopes of a fan-out into one.
//!
//! Merging is structural and follows contributor order:
//!
//! | contributor value | key absent | key present                                        |
//! |-------------------|------------|----------------------------------------------------|
//! | object            | insert     | merge recursively                                  |
//! | list              | insert     | append elements not already present                |
//! | integer           | insert     | `totalItems` sums, `error` keeps max, else keep    |
//! | string / other    | insert     | keep, unless the priority table says new wins      |

use std::collections::HashSet;

use serde_json::map::Entry;
use serde_json::{Map, Value};
use tracing::warn;

use dapi_core::config::MergeConfig;

const TOTAL_ITEMS_KEY: &str = "totalItems";
const ERROR_KEY: &str = "error";

/// Message pairs where the first should replace the second when both
/// land on the same key.
#[derive(Debug, Clone, Default)]
pub struct MergePolicy {
    priorities: HashSet<(String, String)>,
}

impl MergePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MergeConfig) -> Self {
        config
            .priorities
            .iter()
            .fold(Self::new(), |policy, (winner, loser)| {
                policy.with_priority(winner, loser)
            })
    }

    pub fn with_priority(mut self, winner: &str, loser: &str) -> Self {
        self.priorities
            .insert((winner.to_string(), loser.to_string()));
        self
    }

    /// Whether `new` replaces `existing`.
    pub fn supersedes(&self, new: &str, existing: &str) -> bool {
        self.priorities
            .contains(&(new.to_string(), existing.to_string()))
    }
}

/// Merge every contributor into a fresh accumulator.
///
/// Contributors that are not JSON objects cannot be merged and are skipped.
pub fn merge_results(responses: Vec<Value>, policy: &MergePolicy) -> Map<String, Value> {
    let mut merged = Map::new();
    for response in responses {
        match response {
            Value::Object(fields) => merge_into(&mut merged, fields, policy),
            other => warn!(response = %other, "skipping non-object response in merge"),
        }
    }
    merged
}

fn merge_into(acc: &mut Map<String, Value>, fields: Map<String, Value>, policy: &MergePolicy) {
    for (key, field) in fields {
        match field {
            Value::Object(nested) => merge_object(acc, key, nested, policy),
            Value::Array(items) => merge_list(acc, key, items),
            Value::Number(n) if n.is_i64() || n.is_u64() => merge_integer(acc, key, n),
            other => merge_scalar(acc, key, other, policy),
        }
    }
}

fn merge_object(
    acc: &mut Map<String, Value>,
    key: String,
    nested: Map<String, Value>,
    policy: &MergePolicy,
) {
    match acc.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(Value::Object(nested));
        }
        Entry::Occupied(mut slot) => {
            if let Value::Object(existing) = slot.get_mut() {
                merge_into(existing, nested, policy);
            }
        }
    }
}

fn merge_list(acc: &mut Map<String, Value>, key: String, items: Vec<Value>) {
    match acc.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(Value::Array(items));
        }
        Entry::Occupied(mut slot) => {
            if let Value::Array(existing) = slot.get_mut() {
                let fresh: Vec<Value> = items
                    .into_iter()
                    .filter(|item| !existing.contains(item))
                    .collect();
                existing.extend(fresh);
            }
        }
    }
}

fn merge_integer(acc: &mut Map<String, Value>, key: String, n: serde_json::Number) {
    match acc.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(Value::Number(n));
        }
        Entry::Occupied(mut slot) => {
            let (Some(existing), Some(new)) = (slot.get().as_i64(), n.as_i64()) else {
                return;
            };
            let updated = match slot.key().as_str() {
                TOTAL_ITEMS_KEY => Some(existing.saturating_add(new)),
                ERROR_KEY if new > existing => Some(new),
                _ => None,
            };
            if let Some(value) = updated {
                slot.insert(Value::from(value));
            }
        }
    }
}

fn merge_scalar(acc: &mut Map<String, Value>, key: String, value: Value, policy: &MergePolicy) {
    match acc.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(value);
        }
        Entry::Occupied(mut slot) => {
            let replace = match (&value, slot.get()) {
                (Value::String(new), Value::String(existing)) => policy.supersedes(new, existing),
                _ => false,
            };
            if replace {
                slot.insert(value);
            }
        }
    }
}
