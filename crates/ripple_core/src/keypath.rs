//! Normalized keypaths
//!
//! A keypath addresses a location in an instance's data tree. Both dotted and
//! bracketed forms are accepted and normalized to the dotted form:
//!
//! ```rust
//! use ripple_core::Keypath;
//!
//! let kp = Keypath::parse("items[0].name").unwrap();
//! assert_eq!(kp.as_str(), "items.0.name");
//! assert_eq!(kp.parent().unwrap().as_str(), "items.0");
//! ```
//!
//! A keypath with a `*` segment is a pattern and matches every concrete
//! keypath of the same length whose other segments are equal. A wildcard never
//! matches the `length` pseudo-property.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{CoreError, Result};

/// Wildcard segment used by pattern keypaths
pub const WILDCARD: &str = "*";

/// Pseudo-property exposing array and string lengths
pub const LENGTH: &str = "length";

fn segment_matches(pattern: &str, segment: &str) -> bool {
    pattern == segment || (pattern == WILDCARD && segment != LENGTH)
}

/// An immutable, normalized keypath (cheap to clone)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keypath(Arc<str>);

impl Keypath {
    /// The root keypath, addressing the whole data tree
    pub fn root() -> Self {
        Keypath(Arc::from(""))
    }

    /// Parse and normalize a keypath
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::root());
        }

        let mut normalized = String::with_capacity(raw.len());
        let mut segment = String::new();
        let mut chars = raw.chars();

        let invalid = || CoreError::InvalidKeypath(raw.to_string());

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    push_segment(&mut normalized, &segment).ok_or_else(invalid)?;
                    segment.clear();
                }
                '[' => {
                    // `a[0]` is `a.0`; a leading `[0]` is allowed
                    if !segment.is_empty() {
                        push_segment(&mut normalized, &segment).ok_or_else(invalid)?;
                        segment.clear();
                    }
                    let mut index = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == ']' {
                            closed = true;
                            break;
                        }
                        index.push(c);
                    }
                    let index = index.trim();
                    let numeric = !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit());
                    if !closed || !(numeric || index == WILDCARD) {
                        return Err(invalid());
                    }
                    push_segment(&mut normalized, index).ok_or_else(invalid)?;
                    // a bracket may be followed by `.`, `[` or the end
                    match chars.clone().next() {
                        Some('.') => {
                            chars.next();
                            if chars.clone().next().is_none() {
                                return Err(invalid());
                            }
                        }
                        Some('[') | None => {}
                        Some(_) => return Err(invalid()),
                    }
                }
                ']' => return Err(invalid()),
                c if c.is_whitespace() => return Err(invalid()),
                c => segment.push(c),
            }
        }

        if !segment.is_empty() {
            push_segment(&mut normalized, &segment).ok_or_else(invalid)?;
        } else if raw.ends_with('.') {
            return Err(invalid());
        }

        Ok(Keypath(Arc::from(normalized)))
    }

    /// The normalized string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the segments (empty for the root)
    pub fn segments(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.split('.').filter(|s| !s.is_empty())
    }

    /// Number of segments
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The final segment, `None` for the root
    pub fn last(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('.').next()
        }
    }

    /// The parent keypath; the root has none
    pub fn parent(&self) -> Option<Keypath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('.') {
            Some(pos) => Keypath(Arc::from(&self.0[..pos])),
            None => Self::root(),
        })
    }

    /// Ancestors from the immediate parent up to and including the root
    pub fn ancestors(&self) -> impl Iterator<Item = Keypath> {
        std::iter::successors(self.parent(), |kp| kp.parent())
    }

    /// Append a segment
    pub fn join(&self, segment: impl fmt::Display) -> Keypath {
        if self.is_root() {
            Keypath(Arc::from(segment.to_string()))
        } else {
            Keypath(Arc::from(format!("{}.{}", self.0, segment)))
        }
    }

    /// Whether `self` lies strictly below `other`
    pub fn is_descendant_of(&self, other: &Keypath) -> bool {
        if other.is_root() {
            return !self.is_root();
        }
        self.0.len() > other.0.len()
            && self.0.starts_with(other.as_str())
            && self.0.as_bytes()[other.0.len()] == b'.'
    }

    /// Whether `self` equals `other` or lies below it
    pub fn is_within(&self, other: &Keypath) -> bool {
        self == other || self.is_descendant_of(other)
    }

    /// The path of `self` relative to `ancestor`
    ///
    /// Returns the root when both are equal, `None` when `self` is not within
    /// `ancestor`.
    pub fn relative_to(&self, ancestor: &Keypath) -> Option<Keypath> {
        if self == ancestor {
            return Some(Self::root());
        }
        if !self.is_descendant_of(ancestor) {
            return None;
        }
        let start = if ancestor.is_root() { 0 } else { ancestor.0.len() + 1 };
        Some(Keypath(Arc::from(&self.0[start..])))
    }

    /// For a keypath under `array`, the element index and the remaining path
    ///
    /// `items.2.name` under `items` yields `(2, "name")`.
    pub fn index_under<'a>(&'a self, array: &Keypath) -> Option<(usize, &'a str)> {
        if !self.is_descendant_of(array) {
            return None;
        }
        let rest = if array.is_root() {
            &self.0[..]
        } else {
            &self.0[array.0.len() + 1..]
        };
        let (head, tail) = match rest.find('.') {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };
        head.parse().ok().map(|index| (index, tail))
    }

    /// Whether any segment is a wildcard
    pub fn is_pattern(&self) -> bool {
        self.segments().any(|s| s == WILDCARD)
    }

    /// Whether this pattern matches a concrete keypath
    ///
    /// A non-pattern keypath only matches itself.
    pub fn matches(&self, concrete: &Keypath) -> bool {
        if !self.is_pattern() {
            return self == concrete;
        }
        let mut pattern = self.segments();
        let mut target = concrete.segments();
        loop {
            match (pattern.next(), target.next()) {
                (None, None) => return true,
                (Some(p), Some(t)) if segment_matches(p, t) => {}
                _ => return false,
            }
        }
    }

    /// Whether this keypath lies below `concrete` once wildcards are filled in
    ///
    /// `items.*.done` lies below `items` and `items.3`, not below `items.3.done`.
    pub fn matches_below(&self, concrete: &Keypath) -> bool {
        self.depth() > concrete.depth()
            && self
                .segments()
                .zip(concrete.segments())
                .all(|(p, t)| segment_matches(p, t))
    }
}

fn push_segment(out: &mut String, segment: &str) -> Option<()> {
    if segment.is_empty() {
        return None;
    }
    if !out.is_empty() {
        out.push('.');
    }
    out.push_str(segment);
    Some(())
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keypath({:?})", &*self.0)
    }
}

impl FromStr for Keypath {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Keypath::parse(s)
    }
}

impl TryFrom<&str> for Keypath {
    type Error = CoreError;

    fn try_from(s: &str) -> Result<Self> {
        Keypath::parse(s)
    }
}

impl AsRef<str> for Keypath {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Conversion accepted by keypath-addressed APIs
///
/// Implemented for already-normalized [`Keypath`]s and for raw strings, which
/// are parsed on the way in.
pub trait IntoKeypath {
    fn into_keypath(self) -> Result<Keypath>;
}

impl IntoKeypath for Keypath {
    fn into_keypath(self) -> Result<Keypath> {
        Ok(self)
    }
}

impl IntoKeypath for &Keypath {
    fn into_keypath(self) -> Result<Keypath> {
        Ok(self.clone())
    }
}

impl IntoKeypath for &str {
    fn into_keypath(self) -> Result<Keypath> {
        Keypath::parse(self)
    }
}

impl IntoKeypath for String {
    fn into_keypath(self) -> Result<Keypath> {
        Keypath::parse(&self)
    }
}

impl IntoKeypath for &String {
    fn into_keypath(self) -> Result<Keypath> {
        Keypath::parse(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kp(s: &str) -> Keypath {
        Keypath::parse(s).unwrap()
    }

    #[test]
    fn test_normalizes_brackets() {
        assert_eq!(kp("a[0].b").as_str(), "a.0.b");
        assert_eq!(kp("a[ 12 ][3]").as_str(), "a.12.3");
        assert_eq!(kp("[0].x").as_str(), "0.x");
        assert_eq!(kp("a.b.0.c"), kp("a.b[0].c"));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["a..b", ".a", "a.", "a[", "a[x]", "a]b", "a b", "a[0]b"] {
            assert!(Keypath::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_root_and_parents() {
        let root = Keypath::root();
        assert!(root.is_root());
        assert_eq!(kp(""), root);
        assert_eq!(kp("a").parent(), Some(root.clone()));
        assert_eq!(root.parent(), None);

        let ancestors: Vec<_> = kp("a.b.c").ancestors().collect();
        assert_eq!(ancestors, vec![kp("a.b"), kp("a"), root]);
    }

    #[test]
    fn test_descendants() {
        assert!(kp("items.0").is_descendant_of(&kp("items")));
        assert!(!kp("items2").is_descendant_of(&kp("items")));
        assert!(!kp("items").is_descendant_of(&kp("items")));
        assert!(kp("items").is_within(&kp("items")));
        assert!(kp("a").is_descendant_of(&Keypath::root()));
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(kp("a.b.c").relative_to(&kp("a")), Some(kp("b.c")));
        assert_eq!(kp("a").relative_to(&kp("a")), Some(Keypath::root()));
        assert_eq!(kp("a.b").relative_to(&Keypath::root()), Some(kp("a.b")));
        assert_eq!(kp("ab").relative_to(&kp("a")), None);
    }

    #[test]
    fn test_index_under() {
        let items = kp("items");
        assert_eq!(kp("items.2.name").index_under(&items), Some((2, "name")));
        assert_eq!(kp("items.3").index_under(&items), Some((3, "")));
        assert_eq!(kp("items.length").index_under(&items), None);
        assert_eq!(kp("other.1").index_under(&items), None);
    }

    #[test]
    fn test_patterns() {
        let pattern = kp("items.*.done");
        assert!(pattern.is_pattern());
        assert!(pattern.matches(&kp("items.4.done")));
        assert!(!pattern.matches(&kp("items.4")));
        assert!(!pattern.matches(&kp("items.4.done.x")));
        assert!(kp("a.b").matches(&kp("a.b")));
        assert_eq!(kp("items[*]").as_str(), "items.*");
    }

    #[test]
    fn test_wildcard_skips_length() {
        assert!(kp("items.*").matches(&kp("items.0")));
        assert!(!kp("items.*").matches(&kp("items.length")));
        assert!(kp("items.length").matches(&kp("items.length")));
    }

    #[test]
    fn test_matches_below() {
        let pattern = kp("items.*.done");
        assert!(pattern.matches_below(&kp("items")));
        assert!(pattern.matches_below(&kp("items.3")));
        assert!(pattern.matches_below(&Keypath::root()));
        assert!(!pattern.matches_below(&kp("items.3.done")));
        assert!(!pattern.matches_below(&kp("other")));
        assert!(!pattern.matches_below(&kp("items.length")));
    }
}
