//! Post-merge pagination of `data.items`.
//!
//! Every node returns its own unsliced subset, so after a merge the
//! master re-applies the request's sort, offset and limit to produce what
//! a single non-distributed call would have returned.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use dapi_core::{Arguments, SortOrder, SortSpec};

/// Sort and slice `merged["data"]["items"]` in place, if present.
pub fn paginate_items(merged: &mut Map<String, Value>, arguments: &Arguments, default_limit: usize) {
    let Some(items) = merged
        .get_mut("data")
        .and_then(|data| data.get_mut("items"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    if let Some(raw) = arguments.get("sort") {
        match serde_json::from_value::<SortSpec>(raw.clone()) {
            Ok(sort) => sort_items(items, &sort),
            Err(e) => warn!(error = %e, "ignoring unparsable sort in merged pagination"),
        }
    }

    let offset = usize_arg(arguments, "offset").unwrap_or(0);
    let limit = usize_arg(arguments, "limit").unwrap_or(default_limit);
    debug!(total = items.len(), offset, limit, "paginating merged items");

    let start = offset.min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    items.truncate(end);
    items.drain(..start);
}

fn usize_arg(arguments: &Arguments, key: &str) -> Option<usize> {
    match arguments.get(key)? {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Stable sort by each field in turn. Dotted field names address nested
/// values (`os.name`).
pub fn sort_items(items: &mut [Value], sort: &SortSpec) {
    items.sort_by(|a, b| {
        let ordering = sort
            .fields
            .iter()
            .map(|field| compare_values(lookup(a, field), lookup(b, field)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal);
        match sort.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}

static MISSING: Value = Value::Null;

fn lookup<'a>(item: &'a Value, field: &str) -> &'a Value {
    let pointer = format!("/{}", field.replace('.', "/"));
    item.pointer(&pointer).unwrap_or(&MISSING)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
