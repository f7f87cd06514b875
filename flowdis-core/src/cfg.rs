//! Component E: the CFG container. A graph whose edges mirror each
//! block's outgoing constraints, with forward-reference ("pending")
//! support and a label->block index rebuildable from either side.

use std::collections::HashMap;

use flowdis_entity::EntityRef;
use log::debug;

use crate::error::CoreError;
use crate::mnemo::InstructionSet;
use crate::model::{Block, ConstraintKind, LabelId};

/// The generic graph-query surface, overridden here with CFG-specific
/// bookkeeping (pendings, edge/constraint synchronization).
pub trait GraphBase {
    fn successors(&self, label: LabelId) -> Vec<LabelId>;
    fn predecessors(&self, label: LabelId) -> Vec<LabelId>;
    /// Nodes with no successors.
    fn leaves(&self) -> Vec<LabelId>;
}

/// A directed, at-most-one-edge-per-pair graph of [`Block`]s whose edges
/// are synchronized with each block's `bto` constraint set.
#[derive(Default)]
pub struct Cfg {
    blocks: HashMap<LabelId, Block>,
    edges: HashMap<(LabelId, LabelId), ConstraintKind>,
    /// label -> list of (waiting block, constraint kind) awaiting that
    /// label's block to arrive.
    pendings: HashMap<LabelId, Vec<(LabelId, ConstraintKind)>>,
}

impl Cfg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block(&self, label: LabelId) -> Option<&Block> {
        self.blocks.get(&label)
    }

    pub fn block_mut(&mut self, label: LabelId) -> Option<&mut Block> {
        self.blocks.get_mut(&label)
    }

    pub fn contains(&self, label: LabelId) -> bool {
        self.blocks.contains_key(&label)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut Block> {
        self.blocks.values_mut()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn edge_kind(&self, src: LabelId, dst: LabelId) -> Option<ConstraintKind> {
        self.edges.get(&(src, dst)).copied()
    }

    pub fn edges(&self) -> impl Iterator<Item = (LabelId, LabelId, ConstraintKind)> + '_ {
        self.edges.iter().map(|(&(s, d), &k)| (s, d, k))
    }

    /// Add a brand-new edge. Panics (via debug assertion) if it already
    /// exists; use [`Cfg::add_uniq_edge`] for the idempotent variant.
    pub fn add_edge(&mut self, src: LabelId, dst: LabelId, kind: ConstraintKind) {
        debug_assert!(
            !self.edges.contains_key(&(src, dst)),
            "edge already present"
        );
        if let Some(b) = self.blocks.get_mut(&src) {
            b.add_constraint(dst, kind);
        }
        self.edges.insert((src, dst), kind);
    }

    /// Idempotent variant of [`Cfg::add_edge`]: a no-op if the edge
    /// already exists with the same or a stronger kind, otherwise
    /// strengthens it.
    pub fn add_uniq_edge(&mut self, src: LabelId, dst: LabelId, kind: ConstraintKind) {
        let merged = match self.edges.get(&(src, dst)) {
            Some(&existing) => existing.strongest(kind),
            None => kind,
        };
        if let Some(b) = self.blocks.get_mut(&src) {
            b.add_constraint(dst, merged);
        }
        self.edges.insert((src, dst), merged);
    }

    /// Remove the edge (src, dst), also removing the matching constraint
    /// from `src`'s `bto`.
    pub fn del_edge(&mut self, src: LabelId, dst: LabelId) {
        self.edges.remove(&(src, dst));
        if let Some(b) = self.blocks.get_mut(&src) {
            b.bto.retain(|c| c.label != dst);
        }
    }

    /// Insert `block` as a node. Returns `false` (no-op) if a block with
    /// this label is already present.
    pub fn add_node(&mut self, block: Block) -> bool {
        let label = block.label;
        if self.blocks.contains_key(&label) {
            return false;
        }

        // Drain any pendings keyed by this label: a forward reference has
        // just arrived.
        if let Some(waiters) = self.pendings.remove(&label) {
            for (waiter, kind) in waiters {
                self.edges.insert((waiter, label), kind);
            }
        }

        let bto = block.bto.clone();
        self.blocks.insert(label, block);

        for c in bto {
            if self.blocks.contains_key(&c.label) {
                self.edges.insert((label, c.label), c.kind);
            } else {
                self.pendings
                    .entry(c.label)
                    .or_default()
                    .push((label, c.kind));
            }
        }
        true
    }

    /// Remove a node and every edge touching it.
    pub fn del_node(&mut self, label: LabelId) -> Option<Block> {
        let removed = self.blocks.remove(&label);
        self.edges
            .retain(|&(s, d), _| s != label && d != label);
        self.pendings.retain(|_, waiters| {
            waiters.retain(|(w, _)| *w != label);
            !waiters.is_empty()
        });
        self.pendings.remove(&label);
        removed
    }

    /// Import `other`'s nodes first, then its edges (with their
    /// constraint kinds).
    pub fn merge(&mut self, other: Cfg) {
        let edges: Vec<_> = other.edges.iter().map(|(&k, &v)| (k, v)).collect();
        for (_, block) in other.blocks {
            self.add_node(block);
        }
        for ((src, dst), kind) in edges {
            self.add_uniq_edge(src, dst, kind);
        }
    }

    /// Rebuild edges/pendings from each block's `bto`, from scratch.
    ///
    /// Call this after mutating blocks outside of CFG-aware calls (e.g.
    /// after the splitter directly edits `bto`).
    pub fn rebuild_edges(&mut self) {
        self.edges.clear();
        self.pendings.clear();
        let snapshot: Vec<(LabelId, Vec<(LabelId, ConstraintKind)>)> = self
            .blocks
            .values()
            .map(|b| (b.label, b.bto.iter().map(|c| (c.label, c.kind)).collect()))
            .collect();
        for (src, bto) in snapshot {
            for (dst, kind) in bto {
                if self.blocks.contains_key(&dst) {
                    self.edges.insert((src, dst), kind);
                } else {
                    self.pendings.entry(dst).or_default().push((src, kind));
                }
            }
        }
    }

    /// Validate graph-level invariants: no remaining pendings, no `NEXT`
    /// self-loops, no block with more than one incoming `NEXT` edge.
    /// Returns every violation found, rather than failing on the first.
    pub fn sanity_check(&self) -> Vec<CoreError> {
        let mut errors = Vec::new();

        if !self.pendings.is_empty() {
            errors.push(CoreError::SanityFailure(format!(
                "{} pending forward edge(s) remain",
                self.pendings.values().map(Vec::len).sum::<usize>()
            )));
        }

        for (&(src, dst), &kind) in &self.edges {
            if kind == ConstraintKind::Next && src == dst {
                errors.push(CoreError::SanityFailure(format!(
                    "NEXT self-loop on block {}",
                    src
                )));
            }
        }

        let mut next_preds: HashMap<LabelId, u32> = HashMap::new();
        for (&(_, dst), &kind) in &self.edges {
            if kind == ConstraintKind::Next {
                *next_preds.entry(dst).or_insert(0) += 1;
            }
        }
        for (label, count) in next_preds {
            if count > 1 {
                errors.push(CoreError::SanityFailure(format!(
                    "block {} has {} incoming NEXT edges",
                    label, count
                )));
            }
        }

        errors
    }

    /// Assign each instruction a provisional length and accumulate each
    /// block's `size`/`max_size`. Uses trial-encoding where the mnemonic
    /// module can already resolve symbols, falling back to
    /// `max_instruction_len` otherwise.
    pub fn guess_blocks_size(&mut self, mnemo: &dyn InstructionSet) {
        let max_len = mnemo.max_instruction_len() as u64;
        for block in self.blocks.values_mut() {
            if block.is_bad() {
                continue;
            }
            let mut size = 0u64;
            let mut max_size = 0u64;
            for line in &block.lines {
                let (sz, max_sz) = match line {
                    crate::model::Line::Instr(instr) => {
                        let candidates = mnemo.encode(instr.as_ref(), None);
                        let estimate = candidates
                            .iter()
                            .map(Vec::len)
                            .min()
                            .map(|n| n as u64)
                            .unwrap_or(max_len);
                        (estimate, max_len)
                    }
                    crate::model::Line::Raw(raw) => {
                        let n = raw.size() as u64;
                        (n, n)
                    }
                };
                size += sz;
                max_size += max_sz;
            }
            debug!(
                "block {}: guessed size={} max_size={}",
                block.label, size, max_size
            );
            block.size = size;
            block.max_size = max_size;
        }
    }

    /// Iterate every `BadBlock` currently in the graph.
    pub fn bad_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter(|b| b.is_bad())
    }

    /// The predecessors of every bad block. When `strict` is true, only
    /// predecessors reachable via a recorded edge are returned; when
    /// false, any block whose `bto` names a bad block's label is
    /// included even if the edge hasn't been synchronized yet.
    pub fn bad_block_predecessors(&self, strict: bool) -> Vec<LabelId> {
        let bad_labels: Vec<LabelId> = self.bad_blocks().map(|b| b.label).collect();
        let mut preds = Vec::new();
        for &bad in &bad_labels {
            if strict {
                preds.extend(self.predecessors(bad));
            } else {
                for block in self.blocks.values() {
                    if block.bto.iter().any(|c| c.label == bad) {
                        preds.push(block.label);
                    }
                }
            }
        }
        preds.sort_by_key(|l| l.index());
        preds.dedup();
        preds
    }
}

impl GraphBase for Cfg {
    fn successors(&self, label: LabelId) -> Vec<LabelId> {
        self.edges
            .keys()
            .filter(|&&(s, _)| s == label)
            .map(|&(_, d)| d)
            .collect()
    }

    fn predecessors(&self, label: LabelId) -> Vec<LabelId> {
        self.edges
            .keys()
            .filter(|&&(_, d)| d == label)
            .map(|&(s, _)| s)
            .collect()
    }

    fn leaves(&self) -> Vec<LabelId> {
        self.blocks
            .keys()
            .copied()
            .filter(|&l| self.successors(l).is_empty())
            .collect()
    }
}
