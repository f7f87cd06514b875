//! Densely numbered entity references as mapping keys.

use crate::EntityRef;
use std::marker::PhantomData;

/// A mapping `K -> V` for densely indexed entity references.
///
/// Unlike `PrimaryMap`, a `SecondaryMap` can't be used to allocate entity
/// references; it is used to associate secondary information with entities
/// that were allocated elsewhere (e.g. per-block decode state keyed by a
/// `LabelId` minted by the symbol pool).
///
/// The map does not track whether an entry has been inserted: it behaves as
/// if every key already maps to a default value.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    /// Create a new empty map using `V::default()` for unset entries.
    pub fn new() -> Self {
        Self {
            elems: Vec::new(),
            default: V::default(),
            unused: PhantomData,
        }
    }
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    /// Create a new empty map with an explicit default value.
    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    /// Number of elements actually materialized (not the logical key space).
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// True if no slots have been materialized yet.
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Clear all entries, restoring every key to the default value.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Get the value at `k`, or `None` if it has never been written past
    /// the current backing length (logically this is still the default).
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    fn resize_for(&mut self, index: usize) {
        if index >= self.elems.len() {
            self.elems.resize(index + 1, self.default.clone());
        }
    }

    /// Grow the backing storage so that every key up to `n - 1` is
    /// materialized without waiting for a `get_mut` to touch it.
    pub fn resize(&mut self, n: usize) {
        if n > self.elems.len() {
            self.elems.resize(n, self.default.clone());
        }
    }
}

impl<K, V> Default for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::ops::Index<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        self.elems.get(k.index()).unwrap_or(&self.default)
    }
}

impl<K, V> std::ops::IndexMut<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    fn index_mut(&mut self, k: K) -> &mut V {
        self.resize_for(k.index());
        &mut self.elems[k.index()]
    }
}
