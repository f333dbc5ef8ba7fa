//! Keypath access into the data tree
//!
//! Instance data is a `serde_json::Value` tree. Reads walk objects by key and
//! arrays by index (`length` is readable on arrays and strings); writes create
//! missing intermediate containers, choosing an array when the next segment is
//! an index. A write may pad an array with nulls up to [`MAX_INDEX_GAP`]
//! elements past its end; anything further is rejected before the tree is
//! touched.

use serde_json::{Map, Value};

use crate::error::{CoreError, Result};
use crate::keypath::{Keypath, LENGTH};

/// How far past the end of an array a write may reach
pub const MAX_INDEX_GAP: usize = 1024;

/// Read a value, cloning it out of the tree
pub fn lookup(root: &Value, keypath: &Keypath) -> Option<Value> {
    let mut current = root;
    let mut segments = keypath.segments().peekable();

    while let Some(segment) = segments.next() {
        let last = segments.peek().is_none();
        match current {
            Value::Object(map) => current = map.get(segment)?,
            Value::Array(items) => {
                if segment == LENGTH && last {
                    return Some(Value::from(items.len()));
                }
                current = items.get(segment.parse::<usize>().ok()?)?;
            }
            Value::String(s) if segment == LENGTH && last => {
                return Some(Value::from(s.chars().count()));
            }
            _ => return None,
        }
    }

    Some(current.clone())
}

/// Mutable access to an existing value
pub fn lookup_mut<'a>(root: &'a mut Value, keypath: &Keypath) -> Option<&'a mut Value> {
    keypath
        .segments()
        .try_fold(root, |current, segment| match current {
            Value::Object(map) => map.get_mut(segment),
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?),
            _ => None,
        })
}

/// Write a value, creating intermediate containers as needed
///
/// Fails without modifying the tree when an index lies more than
/// [`MAX_INDEX_GAP`] elements past the end of its array.
pub fn assign(root: &mut Value, keypath: &Keypath, value: Value) -> Result<()> {
    check_indices(root, keypath)?;
    let target = keypath.segments().fold(root, slot_mut);
    *target = value;
    Ok(())
}

/// Walk the path `assign` will take, validating every array index on it
fn check_indices(root: &Value, keypath: &Keypath) -> Result<()> {
    let mut current = Some(root);
    let mut walked = Keypath::root();

    for segment in keypath.segments() {
        let numeric = segment.bytes().all(|b| b.is_ascii_digit());
        let len = match current {
            Some(Value::Object(_)) => None,
            Some(Value::Array(items)) if numeric => Some(items.len()),
            // replaced by a fresh container
            _ if numeric => Some(0),
            _ => None,
        };

        if let Some(len) = len {
            let in_range = segment
                .parse::<usize>()
                .is_ok_and(|index| index <= len.saturating_add(MAX_INDEX_GAP));
            if !in_range {
                return Err(CoreError::IndexOutOfRange {
                    keypath: walked.to_string(),
                    index: segment.to_string(),
                    len,
                });
            }
        }

        current = match current {
            Some(Value::Object(map)) => map.get(segment),
            Some(Value::Array(items)) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        walked = walked.join(segment);
    }
    Ok(())
}

fn slot_mut<'a>(current: &'a mut Value, segment: &str) -> &'a mut Value {
    let index = segment.parse::<usize>().ok();

    let reshaped = match (&*current, index) {
        (Value::Object(_), _) | (Value::Array(_), Some(_)) => None,
        (_, Some(_)) => Some(Value::Array(Vec::new())),
        (_, None) => Some(Value::Object(Map::new())),
    };
    if let Some(fresh) = reshaped {
        *current = fresh;
    }

    match (current, index) {
        (Value::Array(items), Some(index)) => {
            if index >= items.len() {
                items.resize(index + 1, Value::Null);
            }
            &mut items[index]
        }
        (Value::Object(map), _) => map.entry(segment.to_string()).or_insert(Value::Null),
        _ => unreachable!("container shape fixed above"),
    }
}
