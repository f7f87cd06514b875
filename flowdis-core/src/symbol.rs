//! Component A: the symbol pool. Interns labels by name and/or offset and
//! is the sole authority on name/offset uniqueness.

use std::collections::HashMap;

use flowdis_entity::PrimaryMap;

use crate::error::{CoreError, CoreResult};
use crate::model::{Label, LabelId};

/// Interns [`Label`]s by name and/or offset.
///
/// Invariants enforced by every mutator here: each non-empty name maps to
/// at most one label, each pinned offset maps to at most one label, and
/// unpinning clears the offset index without destroying the label.
#[derive(Debug, Default)]
pub struct SymbolPool {
    labels: PrimaryMap<LabelId, Label>,
    by_name: HashMap<String, LabelId>,
    by_offset: HashMap<u64, LabelId>,
    anon_counter: u64,
}

impl SymbolPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new label with `name` (may be empty) and an optional pinned
    /// `offset`. Fails if the name is already taken or the offset already
    /// pinned to a different label.
    pub fn add(&mut self, name: impl Into<String>, offset: Option<u64>) -> CoreResult<LabelId> {
        let name = name.into();
        if !name.is_empty() && self.by_name.contains_key(&name) {
            return Err(CoreError::SymbolConflict(format!(
                "name {:?} already in use",
                name
            )));
        }
        if let Some(o) = offset {
            if self.by_offset.contains_key(&o) {
                return Err(CoreError::SymbolConflict(format!(
                    "offset {:#x} already pinned",
                    o
                )));
            }
        }
        let id = self.labels.push(Label::new(name.clone(), offset));
        if !name.is_empty() {
            self.by_name.insert(name, id);
        }
        if let Some(o) = offset {
            self.by_offset.insert(o, id);
        }
        Ok(id)
    }

    /// Remove a label entirely, clearing both indices.
    pub fn remove(&mut self, id: LabelId) {
        if let Some(label) = self.labels.get(id) {
            if !label.name.is_empty() {
                self.by_name.remove(&label.name);
            }
            if let Some(o) = label.offset {
                self.by_offset.remove(&o);
            }
        }
        if let Some(label) = self.labels.get_mut(id) {
            label.offset = None;
            label.name = String::new();
        }
    }

    /// Clear the label's pinned offset. The label survives under its
    /// name (if any); the offset index entry is dropped.
    pub fn unpin(&mut self, id: LabelId) -> CoreResult<()> {
        let label = self
            .labels
            .get_mut(id)
            .ok_or_else(|| CoreError::SymbolConflict("unknown label".into()))?;
        if let Some(o) = label.offset.take() {
            self.by_offset.remove(&o);
        }
        Ok(())
    }

    /// Rename a label. Fails if `new_name` is already taken by a
    /// different label.
    pub fn rename(&mut self, id: LabelId, new_name: impl Into<String>) -> CoreResult<()> {
        let new_name = new_name.into();
        if !new_name.is_empty() {
            if let Some(&existing) = self.by_name.get(&new_name) {
                if existing != id {
                    return Err(CoreError::SymbolConflict(format!(
                        "name {:?} already in use",
                        new_name
                    )));
                }
            }
        }
        let old_name = {
            let label = self
                .labels
                .get_mut(id)
                .ok_or_else(|| CoreError::SymbolConflict("unknown label".into()))?;
            std::mem::replace(&mut label.name, new_name.clone())
        };
        if !old_name.is_empty() {
            self.by_name.remove(&old_name);
        }
        if !new_name.is_empty() {
            self.by_name.insert(new_name, id);
        }
        Ok(())
    }

    /// Pin a label to `offset`. Fails if `offset` is already pinned to a
    /// different label.
    pub fn pin(&mut self, id: LabelId, offset: u64) -> CoreResult<()> {
        if let Some(&existing) = self.by_offset.get(&offset) {
            if existing != id {
                return Err(CoreError::SymbolConflict(format!(
                    "offset {:#x} already pinned",
                    offset
                )));
            }
        }
        let label = self
            .labels
            .get_mut(id)
            .ok_or_else(|| CoreError::SymbolConflict("unknown label".into()))?;
        if let Some(old) = label.offset.replace(offset) {
            if old != offset {
                self.by_offset.remove(&old);
            }
        }
        self.by_offset.insert(offset, id);
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Option<LabelId> {
        self.by_name.get(name).copied()
    }

    pub fn get_by_offset(&self, offset: u64) -> Option<LabelId> {
        self.by_offset.get(&offset).copied()
    }

    /// The label for `name`, creating an unpinned one if it doesn't yet
    /// exist.
    pub fn get_or_create_by_name(&mut self, name: &str) -> LabelId {
        if let Some(id) = self.get_by_name(name) {
            return id;
        }
        self.add(name, None).expect("name just checked absent")
    }

    /// The label for `offset`, creating one named `loc_<16-hex>` if it
    /// doesn't yet exist.
    pub fn get_or_create_by_offset(&mut self, offset: u64) -> LabelId {
        if let Some(id) = self.get_by_offset(offset) {
            return id;
        }
        let name = Label::default_name_for_offset(offset);
        // The default name might collide with a pre-existing unpinned
        // label; in that case pin the existing one instead of erroring.
        if let Some(id) = self.get_by_name(&name) {
            let _ = self.pin(id, offset);
            return id;
        }
        self.add(name, Some(offset))
            .expect("offset just checked absent")
    }

    /// Synthesize a fresh, guaranteed-unique anonymous label named
    /// `lbl_gen_XXXXXXXX`.
    pub fn gen_anonymous(&mut self) -> LabelId {
        loop {
            let name = format!("lbl_gen_{:08x}", self.anon_counter);
            self.anon_counter += 1;
            if self.by_name.contains_key(&name) {
                continue;
            }
            return self.add(name, None).expect("checked absent above");
        }
    }

    /// Import every label from `other` that doesn't already exist here by
    /// name/offset; fails on the first genuine conflict.
    pub fn merge(&mut self, other: &SymbolPool) -> CoreResult<()> {
        for (_, label) in other.labels.iter() {
            if label.name.is_empty() && label.offset.is_none() {
                continue;
            }
            let by_name = if label.name.is_empty() {
                None
            } else {
                self.get_by_name(&label.name)
            };
            let by_offset = label.offset.and_then(|o| self.get_by_offset(o));
            match (by_name, by_offset) {
                (None, None) => {
                    self.add(label.name.clone(), label.offset)?;
                }
                (Some(a), Some(b)) if a == b => {}
                _ => {
                    // Already present under at least one key; leave as is.
                }
            }
        }
        Ok(())
    }

    /// Look up a label's data.
    pub fn label(&self, id: LabelId) -> Option<&Label> {
        self.labels.get(id)
    }

    /// Iterate over all interned labels.
    pub fn iter(&self) -> impl Iterator<Item = (LabelId, &Label)> {
        self.labels.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_lookup_both_ways() {
        let mut pool = SymbolPool::new();
        let id = pool.add("start", Some(0x1000)).unwrap();
        assert_eq!(pool.get_by_name("start"), Some(id));
        assert_eq!(pool.get_by_offset(0x1000), Some(id));
    }

    #[test]
    fn conflicting_pin_fails() {
        let mut pool = SymbolPool::new();
        let a = pool.add("a", Some(0x10)).unwrap();
        let b = pool.add("b", None).unwrap();
        assert!(pool.pin(b, 0x10).is_err());
        assert_eq!(pool.get_by_offset(0x10), Some(a));
    }

    #[test]
    fn rename_to_existing_fails() {
        let mut pool = SymbolPool::new();
        pool.add("a", None).unwrap();
        let b = pool.add("b", None).unwrap();
        assert!(pool.rename(b, "a").is_err());
    }

    #[test]
    fn unpin_clears_offset_index_but_keeps_label() {
        let mut pool = SymbolPool::new();
        let id = pool.add("a", Some(0x20)).unwrap();
        pool.unpin(id).unwrap();
        assert_eq!(pool.get_by_offset(0x20), None);
        assert_eq!(pool.get_by_name("a"), Some(id));
    }

    #[test]
    fn get_or_create_by_offset_default_name() {
        let mut pool = SymbolPool::new();
        let id = pool.get_or_create_by_offset(0xdead);
        assert_eq!(pool.label(id).unwrap().name(), "loc_000000000000dead");
    }

    #[test]
    fn gen_anonymous_is_unique() {
        let mut pool = SymbolPool::new();
        let a = pool.gen_anonymous();
        let b = pool.gen_anonymous();
        assert_ne!(a, b);
    }
}
