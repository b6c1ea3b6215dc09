#![forbid(unsafe_code)]

use ps_core::codec::encode_key_parts;
use ps_core::{KeyPart, Tuple};
use std::ops::Bound;

/// Range-scan bounds over one index.
///
/// Bound tuples may be shorter than the index. Missing trailing slots are padded
/// with `MIN` for `gt`/`gte` and with `MAX` for `lt`/`lte`, so `gte: [x], lte: [x]`
/// covers every key whose first column equals `x`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScanBounds {
    pub gt: Option<Tuple>,
    pub gte: Option<Tuple>,
    pub lt: Option<Tuple>,
    pub lte: Option<Tuple>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl ScanBounds {
    pub fn all() -> Self {
        Self::default()
    }

    /// Every key that starts with `prefix`. A full-length prefix is an equality lookup.
    pub fn prefix(prefix: Tuple) -> Self {
        Self {
            gte: Some(prefix.clone()),
            lte: Some(prefix),
            ..Self::default()
        }
    }

    pub fn gt(mut self, tuple: Tuple) -> Self {
        self.gt = Some(tuple);
        self
    }

    pub fn gte(mut self, tuple: Tuple) -> Self {
        self.gte = Some(tuple);
        self
    }

    pub fn lt(mut self, tuple: Tuple) -> Self {
        self.lt = Some(tuple);
        self
    }

    pub fn lte(mut self, tuple: Tuple) -> Self {
        self.lte = Some(tuple);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Normalizes the bounds for an index of `arity` columns into an encoded key range.
    pub fn key_range(&self, arity: usize) -> KeyRange {
        let lower = tighter_lower(
            self.gte.as_ref().map(|t| Bound::Included(pad(t, arity, KeyPart::Min))),
            self.gt.as_ref().map(|t| Bound::Excluded(pad(t, arity, KeyPart::Min))),
        );
        let upper = tighter_upper(
            self.lte.as_ref().map(|t| Bound::Included(pad(t, arity, KeyPart::Max))),
            self.lt.as_ref().map(|t| Bound::Excluded(pad(t, arity, KeyPart::Max))),
        );
        KeyRange { lower, upper }
    }
}

fn pad(tuple: &Tuple, arity: usize, fill: KeyPart) -> Vec<u8> {
    let mut parts: Vec<KeyPart> = tuple.iter().cloned().map(KeyPart::Value).collect();
    while parts.len() < arity {
        parts.push(fill.clone());
    }
    encode_key_parts(&parts)
}

fn bound_key(bound: &Bound<Vec<u8>>) -> Option<&Vec<u8>> {
    match bound {
        Bound::Included(key) | Bound::Excluded(key) => Some(key),
        Bound::Unbounded => None,
    }
}

fn tighter_lower(a: Option<Bound<Vec<u8>>>, b: Option<Bound<Vec<u8>>>) -> Bound<Vec<u8>> {
    match (a, b) {
        (None, None) => Bound::Unbounded,
        (Some(bound), None) | (None, Some(bound)) => bound,
        (Some(a), Some(b)) => {
            let (ka, kb) = (bound_key(&a), bound_key(&b));
            if ka > kb || (ka == kb && matches!(a, Bound::Excluded(_))) {
                a
            } else {
                b
            }
        }
    }
}

fn tighter_upper(a: Option<Bound<Vec<u8>>>, b: Option<Bound<Vec<u8>>>) -> Bound<Vec<u8>> {
    match (a, b) {
        (None, None) => Bound::Unbounded,
        (Some(bound), None) | (None, Some(bound)) => bound,
        (Some(a), Some(b)) => {
            let (ka, kb) = (bound_key(&a), bound_key(&b));
            if ka < kb || (ka == kb && matches!(a, Bound::Excluded(_))) {
                a
            } else {
                b
            }
        }
    }
}

/// Encoded byte range produced by [`ScanBounds::key_range`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRange {
    pub lower: Bound<Vec<u8>>,
    pub upper: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(low) => key >= low.as_slice(),
            Bound::Excluded(low) => key > low.as_slice(),
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(high) => key <= high.as_slice(),
            Bound::Excluded(high) => key < high.as_slice(),
        };
        above && below
    }

    /// True when no key can satisfy both ends. `BTreeMap::range` panics on such ranges.
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(low), Bound::Included(high)) => low > high,
            (Bound::Included(low), Bound::Excluded(high))
            | (Bound::Excluded(low), Bound::Included(high))
            | (Bound::Excluded(low), Bound::Excluded(high)) => low >= high,
            _ => false,
        }
    }
}
