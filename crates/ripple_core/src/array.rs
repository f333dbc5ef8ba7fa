//! Array-mutation adapter
//!
//! Structural array methods (`splice` and the methods expressible as a splice)
//! move elements in a way that is knowable from the length and the arguments
//! alone. For those, [`new_indices`] produces an index map so bound dependants
//! can follow their element instead of being torn down. `sort` and `reverse`
//! reorder by value, so they yield no map and callers fall back to a full
//! invalidation.

use std::cmp::Ordering;

use serde_json::Value;

/// Old index → new index, `None` when the element was removed
pub type NewIndices = Vec<Option<usize>>;

/// A mutating array method with its arguments
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayMethod {
    Push(Vec<Value>),
    Pop,
    Shift,
    Unshift(Vec<Value>),
    Splice {
        /// Negative values count from the end
        start: i64,
        /// `None` removes everything from `start`
        delete_count: Option<usize>,
        items: Vec<Value>,
    },
    Sort,
    Reverse,
}

/// A splice normalized against a concrete length
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SpliceRange {
    start: usize,
    removed: usize,
    added: usize,
}

impl ArrayMethod {
    /// The method name, as used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            ArrayMethod::Push(_) => "push",
            ArrayMethod::Pop => "pop",
            ArrayMethod::Shift => "shift",
            ArrayMethod::Unshift(_) => "unshift",
            ArrayMethod::Splice { .. } => "splice",
            ArrayMethod::Sort => "sort",
            ArrayMethod::Reverse => "reverse",
        }
    }

    /// Express the method as a splice over an array of `len` elements
    fn splice_range(&self, len: usize) -> Option<SpliceRange> {
        let range = match self {
            ArrayMethod::Push(items) => SpliceRange {
                start: len,
                removed: 0,
                added: items.len(),
            },
            ArrayMethod::Pop => SpliceRange {
                start: len.saturating_sub(1),
                removed: usize::from(len > 0),
                added: 0,
            },
            ArrayMethod::Shift => SpliceRange {
                start: 0,
                removed: usize::from(len > 0),
                added: 0,
            },
            ArrayMethod::Unshift(items) => SpliceRange {
                start: 0,
                removed: 0,
                added: items.len(),
            },
            ArrayMethod::Splice {
                start,
                delete_count,
                items,
            } => {
                let start = clamp_start(*start, len);
                let available = len - start;
                SpliceRange {
                    start,
                    removed: delete_count.map_or(available, |n| n.min(available)),
                    added: items.len(),
                }
            }
            ArrayMethod::Sort | ArrayMethod::Reverse => return None,
        };
        Some(range)
    }

    /// Apply the method to `items`, returning what the method returns
    ///
    /// `push`/`unshift` return the new length, `pop`/`shift` the removed
    /// element (or null), `splice` the removed elements, and `sort`/`reverse`
    /// the reordered array.
    pub fn apply(self, items: &mut Vec<Value>) -> Value {
        match self {
            ArrayMethod::Push(new) => {
                items.extend(new);
                Value::from(items.len())
            }
            ArrayMethod::Pop => items.pop().unwrap_or(Value::Null),
            ArrayMethod::Shift => {
                if items.is_empty() {
                    Value::Null
                } else {
                    items.remove(0)
                }
            }
            ArrayMethod::Unshift(new) => {
                items.splice(0..0, new);
                Value::from(items.len())
            }
            ArrayMethod::Splice {
                start,
                delete_count,
                items: new,
            } => {
                let start = clamp_start(start, items.len());
                let available = items.len() - start;
                let end = start + delete_count.map_or(available, |n| n.min(available));
                Value::Array(items.splice(start..end, new).collect())
            }
            ArrayMethod::Sort => {
                items.sort_by(default_order);
                Value::Array(items.clone())
            }
            ArrayMethod::Reverse => {
                items.reverse();
                Value::Array(items.clone())
            }
        }
    }
}

fn clamp_start(start: i64, len: usize) -> usize {
    if start < 0 {
        len.saturating_sub(start.unsigned_abs() as usize)
    } else {
        (start as usize).min(len)
    }
}

/// Default sort order: by string form, with nulls last
fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => sort_key(a).cmp(&sort_key(b)),
    }
}

fn sort_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Compute the index map for `method` applied to an array of `len` elements
///
/// Returns `None` when the new order depends on element values.
pub fn new_indices(len: usize, method: &ArrayMethod) -> Option<NewIndices> {
    let SpliceRange {
        start,
        removed,
        added,
    } = method.splice_range(len)?;

    let removed_end = start + removed;
    let map = (0..len)
        .map(|i| {
            if i < start {
                Some(i)
            } else if i < removed_end {
                None
            } else {
                Some(i - removed + added)
            }
        })
        .collect();

    Some(map)
}
