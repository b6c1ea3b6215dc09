#![forbid(unsafe_code)]

use crate::bounds::ScanBounds;
use ps_core::codec::encode_tuple;
use ps_core::{IndexDef, Row, RowId, Tuple};
use std::collections::{BTreeMap, BTreeSet, btree_map, btree_set};

#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
    pub tuple: Tuple,
    pub ids: BTreeSet<RowId>,
}

/// Sorted tuple -> row-id-set map for one named index.
///
/// Entries are keyed by the order-preserving encoding of their tuple, so map
/// order is tuple order. Entries whose id set empties out are pruned.
#[derive(Clone, Debug)]
pub struct CompositeIndex {
    def: IndexDef,
    entries: BTreeMap<Vec<u8>, IndexEntry>,
    len: usize,
}

impl CompositeIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    /// Number of (tuple, id) pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct tuples.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn insert(&mut self, row: &Row) {
        let tuple = row.key(&self.def.columns);
        let entry = self
            .entries
            .entry(encode_tuple(&tuple))
            .or_insert_with(|| IndexEntry {
                tuple,
                ids: BTreeSet::new(),
            });
        if entry.ids.insert(row.id.clone()) {
            self.len += 1;
        }
    }

    /// Removes `row.id` from the entry at the row's current key.
    pub fn delete(&mut self, row: &Row) -> bool {
        let key = encode_tuple(&row.key(&self.def.columns));
        let btree_map::Entry::Occupied(mut entry) = self.entries.entry(key) else {
            return false;
        };
        let removed = entry.get_mut().ids.remove(&row.id);
        if entry.get().ids.is_empty() {
            entry.remove();
        }
        if removed {
            self.len -= 1;
        }
        removed
    }

    pub fn scan(&self, bounds: &ScanBounds) -> IndexScan<'_> {
        let range = bounds.key_range(self.def.arity());
        let entries = if range.is_empty() || bounds.limit == Some(0) {
            None
        } else {
            Some(self.entries.range((range.lower, range.upper)))
        };
        IndexScan {
            entries,
            current: None,
            reverse: bounds.reverse,
            remaining: bounds.limit,
        }
    }
}

/// Lazy, single-pass walk over the ids of an index in tuple order.
pub struct IndexScan<'a> {
    entries: Option<btree_map::Range<'a, Vec<u8>, IndexEntry>>,
    current: Option<btree_set::Iter<'a, RowId>>,
    reverse: bool,
    remaining: Option<usize>,
}

impl<'a> Iterator for IndexScan<'a> {
    type Item = &'a RowId;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        loop {
            if let Some(ids) = self.current.as_mut() {
                let next = if self.reverse {
                    ids.next_back()
                } else {
                    ids.next()
                };
                if let Some(id) = next {
                    if let Some(remaining) = self.remaining.as_mut() {
                        *remaining -= 1;
                    }
                    return Some(id);
                }
            }
            let entries = self.entries.as_mut()?;
            let (_, entry) = if self.reverse {
                entries.next_back()?
            } else {
                entries.next()?
            };
            self.current = Some(entry.ids.iter());
        }
    }
}
