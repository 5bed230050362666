use crate::{Entry, Error, KindSet, Result, Value};
use fxhash::FxHashMap;

/// StoragePolicy selects the lookup structure backing a Container's
/// value store. The choice is fixed at construction and affects lookup
/// cost only; every policy preserves insertion order and the
/// duplicate-key contract, so wire output is identical across policies.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoragePolicy {
    /// Plain ordered vector: O(1) amortized append, O(n) lookup. Default.
    Ordered,
    /// Ordered vector plus a key index: O(1) average lookup, O(n) remove
    /// (index rebuild). Worth it for containers of ~100 keys and up.
    Indexed,
    /// Ordered vector which rejects payload kinds outside the given set
    /// at the policy boundary with TypeConstraintViolated.
    Restricted(KindSet),
}

impl Default for StoragePolicy {
    fn default() -> Self {
        StoragePolicy::Ordered
    }
}

/// Store is the policy-dispatched value store. All variants implement
/// the same contract:
///
/// - `set` appends, preserving duplicates and insertion order.
/// - `replace` overwrites the first match, appending if there is none.
/// - `get` returns the first match in insertion order.
/// - `remove` drops every match.
/// - iteration is in insertion order.
#[derive(Debug, Clone)]
pub(crate) enum Store {
    Ordered(OrderedStore),
    Indexed(IndexedStore),
    Restricted(RestrictedStore),
}

impl Store {
    pub fn new(policy: StoragePolicy) -> Self {
        match policy {
            StoragePolicy::Ordered => Store::Ordered(OrderedStore::default()),
            StoragePolicy::Indexed => Store::Indexed(IndexedStore::default()),
            StoragePolicy::Restricted(allowed) => Store::Restricted(RestrictedStore {
                allowed,
                entries: Vec::new(),
            }),
        }
    }

    pub fn policy(&self) -> StoragePolicy {
        match self {
            Store::Ordered(_) => StoragePolicy::Ordered,
            Store::Indexed(_) => StoragePolicy::Indexed,
            Store::Restricted(s) => StoragePolicy::Restricted(s.allowed),
        }
    }

    pub fn set(&mut self, entry: Entry) -> Result<()> {
        match self {
            Store::Ordered(s) => {
                s.entries.push(entry);
                Ok(())
            }
            Store::Indexed(s) => {
                s.index
                    .entry(entry.name.clone())
                    .or_default()
                    .push(s.entries.len() as u32);
                s.entries.push(entry);
                Ok(())
            }
            Store::Restricted(s) => {
                s.check(&entry.value)?;
                s.entries.push(entry);
                Ok(())
            }
        }
    }

    pub fn replace(&mut self, entry: Entry) -> Result<()> {
        if let Store::Restricted(s) = self {
            s.check(&entry.value)?;
        }
        match self.get_mut(&entry.name) {
            Some(slot) => {
                *slot = entry.value;
                Ok(())
            }
            None => self.set(entry),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Store::Ordered(s) => linear_get(&s.entries, key),
            Store::Restricted(s) => linear_get(&s.entries, key),
            Store::Indexed(s) => {
                let position = *s.index.get(key)?.first()?;
                Some(&s.entries[position as usize].value)
            }
        }
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Store::Ordered(s) => linear_get_mut(&mut s.entries, key),
            Store::Restricted(s) => linear_get_mut(&mut s.entries, key),
            Store::Indexed(s) => {
                let position = *s.index.get(key)?.first()?;
                Some(&mut s.entries[position as usize].value)
            }
        }
    }

    /// Every value stored under |key|, in insertion order.
    pub fn get_all<'s>(&'s self, key: &str) -> Vec<&'s Value> {
        self.entries()
            .iter()
            .filter(|e| e.name == key)
            .map(|e| &e.value)
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        match self {
            Store::Indexed(s) => s.index.contains_key(key),
            _ => self.entries().iter().any(|e| e.name == key),
        }
    }

    /// Remove every entry named |key|, returning how many were removed.
    pub fn remove(&mut self, key: &str) -> usize {
        match self {
            Store::Ordered(s) => drain_key(&mut s.entries, key),
            Store::Restricted(s) => drain_key(&mut s.entries, key),
            Store::Indexed(s) => {
                if s.index.remove(key).is_none() {
                    return 0;
                }
                let removed = drain_key(&mut s.entries, key);
                s.rebuild_index();
                removed
            }
        }
    }

    pub fn clear(&mut self) {
        match self {
            Store::Ordered(s) => s.entries.clear(),
            Store::Restricted(s) => s.entries.clear(),
            Store::Indexed(s) => {
                s.entries.clear();
                s.index.clear();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn reserve(&mut self, additional: usize) {
        match self {
            Store::Ordered(s) => s.entries.reserve(additional),
            Store::Restricted(s) => s.entries.reserve(additional),
            Store::Indexed(s) => {
                s.entries.reserve(additional);
                s.index.reserve(additional);
            }
        }
    }

    /// The backing entries, in insertion order.
    pub fn entries(&self) -> &[Entry] {
        match self {
            Store::Ordered(s) => &s.entries,
            Store::Indexed(s) => &s.entries,
            Store::Restricted(s) => &s.entries,
        }
    }
}

fn linear_get<'s>(entries: &'s [Entry], key: &str) -> Option<&'s Value> {
    entries.iter().find(|e| e.name == key).map(|e| &e.value)
}

fn linear_get_mut<'s>(entries: &'s mut [Entry], key: &str) -> Option<&'s mut Value> {
    entries
        .iter_mut()
        .find(|e| e.name == key)
        .map(|e| &mut e.value)
}

fn drain_key(entries: &mut Vec<Entry>, key: &str) -> usize {
    let before = entries.len();
    entries.retain(|e| e.name != key);
    before - entries.len()
}

#[derive(Debug, Clone, Default)]
pub(crate) struct OrderedStore {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct IndexedStore {
    entries: Vec<Entry>,
    // Key to its insertion positions, each in insertion order, so that
    // lookups return the first duplicate and iteration stays ordered.
    index: FxHashMap<String, Vec<u32>>,
}

impl IndexedStore {
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (position, entry) in self.entries.iter().enumerate() {
            self.index
                .entry(entry.name.clone())
                .or_default()
                .push(position as u32);
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RestrictedStore {
    allowed: KindSet,
    entries: Vec<Entry>,
}

impl RestrictedStore {
    fn check(&self, value: &Value) -> Result<()> {
        if self.allowed.contains(value.kind()) {
            Ok(())
        } else {
            Err(Error::TypeConstraintViolated {
                kind: value.kind(),
                allowed: self.allowed,
            })
        }
    }
}
