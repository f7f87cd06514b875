//! Component G: block chains & placement. Groups fallthrough-linked
//! blocks into chains and places them inside an allowed address interval.

use log::debug;

use crate::cfg::Cfg;
use crate::error::{CoreError, CoreResult};
use crate::interval::{Interval, IntervalSet};
use crate::model::{ConstraintKind, LabelId};
use crate::symbol::SymbolPool;

/// An ordered sequence of blocks linked head-to-tail by `NEXT`.
#[derive(Debug, Clone)]
pub struct Chain {
    pub blocks: Vec<LabelId>,
    /// Index of the pinned block within `blocks`, if any.
    pinned_idx: Option<usize>,
    pub max_size: u64,
    pub offset_min: Option<i128>,
    pub offset_max: Option<i128>,
}

/// A pseudo-chain occupying a forbidden address range during placement.
/// Never holds real blocks; discarded before [`resolve_symbol`] returns.
#[derive(Debug, Clone)]
struct Wedge {
    offset: i128,
    size: u64,
}

enum PlacementItem {
    Chain(Chain),
    Wedge(Wedge),
}

impl PlacementItem {
    fn offset_min(&self) -> i128 {
        match self {
            PlacementItem::Chain(c) => c.offset_min.expect("pinned chain has offset_min"),
            PlacementItem::Wedge(w) => w.offset,
        }
    }

    fn offset_max(&self) -> i128 {
        match self {
            PlacementItem::Chain(c) => c.offset_max.expect("pinned chain has offset_max"),
            PlacementItem::Wedge(w) => w.offset + w.size as i128,
        }
    }
}

impl Chain {
    fn single(label: LabelId) -> Self {
        Self {
            blocks: vec![label],
            pinned_idx: None,
            max_size: 0,
            offset_min: None,
            offset_max: None,
        }
    }

    fn aligned_size(size: u64, alignment: u32) -> u64 {
        let alignment = alignment.max(1) as u64;
        (size + alignment - 1) / alignment * alignment
    }

    /// Detect the chain's pinned block (its label has a concrete offset)
    /// and compute `max_size` as the sum of alignment-padded block sizes.
    /// Fails if more than one block in the chain is pinned.
    fn compute_sizes(&mut self, cfg: &Cfg, pool: &SymbolPool) -> CoreResult<()> {
        let mut pinned_idx = None;
        let mut max_size = 0u64;
        for (i, &label) in self.blocks.iter().enumerate() {
            let block = cfg
                .block(label)
                .expect("chain references a block present in the cfg");
            max_size += Self::aligned_size(block.max_size, block.alignment);
            let is_pinned = pool.label(label).and_then(|l| l.offset()).is_some();
            if is_pinned {
                if pinned_idx.is_some() {
                    return Err(CoreError::PlacementFailure(format!(
                        "chain has more than one pinned block (label {})",
                        label
                    )));
                }
                pinned_idx = Some(i);
            }
        }
        self.pinned_idx = pinned_idx;
        self.max_size = max_size;
        Ok(())
    }

    /// Compute `offset_min`/`offset_max` for a pinned chain: `offset_min`
    /// subtracts the alignment-padded `max_size` of each block preceding
    /// the pinned one (inclusive of index 0);
    /// `offset_max` adds the padded size of each following block.
    fn place(&mut self, cfg: &Cfg, pool: &SymbolPool) -> CoreResult<()> {
        self.compute_sizes(cfg, pool)?;
        let pinned_idx = match self.pinned_idx {
            Some(i) => i,
            None => return Ok(()),
        };
        let pinned_label = self.blocks[pinned_idx];
        let pinned_block = cfg.block(pinned_label).unwrap();
        let pinned_offset = pool
            .label(pinned_label)
            .and_then(|l| l.offset())
            .expect("pinned_idx implies a resolved offset") as i128;

        if pinned_offset % pinned_block.alignment.max(1) as i128 != 0 {
            return Err(CoreError::AlignmentViolation {
                offset: pinned_offset as u64,
                align: pinned_block.alignment,
                label: pinned_label.to_string(),
            });
        }

        let mut before = 0u64;
        for &label in self.blocks[0..pinned_idx].iter().rev() {
            let b = cfg.block(label).unwrap();
            before += Self::aligned_size(b.max_size, b.alignment);
        }
        let mut after = 0u64;
        for &label in self.blocks[pinned_idx + 1..].iter() {
            let b = cfg.block(label).unwrap();
            after += Self::aligned_size(b.max_size, b.alignment);
        }

        self.offset_min = Some(pinned_offset - before as i128);
        self.offset_max = Some(pinned_offset + pinned_block.max_size as i128 + after as i128);
        Ok(())
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned_idx.is_some()
    }
}

/// Walk `cfg`'s blocks and greedily build maximal chains of `NEXT`-linked
/// blocks: each chain follows successive `NEXT` edges until a block has
/// none, or its sole `NEXT` successor already starts a different chain.
pub fn group_constrained_blocks(cfg: &Cfg) -> Vec<Chain> {
    let mut chain_of: std::collections::HashMap<LabelId, usize> = std::collections::HashMap::new();
    let mut chains: Vec<Chain> = Vec::new();

    // Stable order: iterate blocks by their label's insertion index so
    // results are deterministic given a deterministic label allocation
    // order.
    let mut labels: Vec<LabelId> = cfg.blocks().map(|b| b.label).collect();
    labels.sort_by_key(|l| l.as_u32());

    for &label in &labels {
        if chain_of.contains_key(&label) {
            continue;
        }
        // Walk backward to find the head of this block's chain.
        let mut head = label;
        loop {
            let pred = cfg
                .predecessors(head)
                .into_iter()
                .find(|&p| cfg.edge_kind(p, head) == Some(ConstraintKind::Next));
            match pred {
                Some(p) if !chain_of.contains_key(&p) => head = p,
                _ => break,
            }
        }

        let mut chain = Chain::single(head);
        chain_of.insert(head, chains.len());
        loop {
            let tail = *chain.blocks.last().unwrap();
            let next = cfg
                .successors(tail)
                .into_iter()
                .find(|&s| cfg.edge_kind(tail, s) == Some(ConstraintKind::Next));
            match next {
                Some(n) if !chain_of.contains_key(&n) => {
                    chain_of.insert(n, chains.len());
                    chain.blocks.push(n);
                }
                _ => break,
            }
        }
        chains.push(chain);
    }

    chains
}

/// Place `chains` inside `dst_interval`, sorting pinned chains by
/// `offset_min` and packing unpinned chains (largest `max_size` first)
/// into the first gap they fit.
pub fn resolve_symbol(
    cfg: &Cfg,
    pool: &SymbolPool,
    mut chains: Vec<Chain>,
    dst_interval: Option<Interval>,
) -> CoreResult<Vec<Chain>> {
    let dst_interval = dst_interval.unwrap_or_else(Interval::everything);

    for chain in &mut chains {
        chain.place(cfg, pool)?;
    }

    let mut pinned: Vec<PlacementItem> = Vec::new();
    let mut unpinned: Vec<Chain> = Vec::new();
    for chain in chains {
        if chain.is_pinned() {
            pinned.push(PlacementItem::Chain(chain));
        } else {
            unpinned.push(chain);
        }
    }

    // Wedges for the forbidden complement of dst_interval.
    let everything = Interval::everything();
    let mut dst_as_set = IntervalSet::new();
    dst_as_set.add(dst_interval);
    let forbidden = dst_as_set.complement_within(everything);
    for part in forbidden.parts() {
        pinned.push(PlacementItem::Wedge(Wedge {
            offset: part.lo,
            size: (part.hi - part.lo + 1) as u64,
        }));
    }

    // Every pinned chain's interval must lie inside dst_interval.
    for item in &pinned {
        if let PlacementItem::Chain(c) = item {
            let lo = item.offset_min();
            let hi = item.offset_max();
            if lo < dst_interval.lo || hi - 1 > dst_interval.hi {
                return Err(CoreError::PlacementFailure(format!(
                    "pinned chain headed by {} falls outside the destination interval",
                    c.blocks[0]
                )));
            }
        }
    }

    // Sort pinned items by offset_min, unpinned chains largest first.
    pinned.sort_by_key(|item| item.offset_min());
    unpinned.sort_by(|a, b| b.max_size.cmp(&a.max_size));

    // Greedily place each unpinned chain in the first gap it fits.
    let mut placed: Vec<Chain> = Vec::new();
    for mut chain in unpinned {
        let mut gap = None;
        for i in 0..pinned.len().saturating_sub(1) {
            let gap_lo = pinned[i].offset_max();
            let gap_hi = pinned[i + 1].offset_min();
            if gap_lo + chain.max_size as i128 < gap_hi {
                gap = Some((i + 1, gap_lo));
                break;
            }
        }
        let (insert_at, gap_lo) = gap.ok_or_else(|| {
            CoreError::PlacementFailure(format!(
                "cannot find enough space for chain headed by {} (needs {} bytes)",
                chain.blocks[0], chain.max_size
            ))
        })?;
        chain.offset_min = Some(gap_lo);
        chain.offset_max = Some(gap_lo + chain.max_size as i128);
        debug!(
            "placed unpinned chain (head {}) at {:#x}",
            chain.blocks[0], gap_lo as u64
        );
        placed.push(chain.clone());
        pinned.insert(insert_at, PlacementItem::Chain(chain));
    }

    // Return only real chains, discarding wedges.
    for item in pinned {
        if let PlacementItem::Chain(c) = item {
            if !placed.iter().any(|p| p.blocks[0] == c.blocks[0]) {
                placed.push(c);
            }
        }
    }

    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Block;

    #[test]
    fn group_constrained_blocks_follows_next_edges_into_one_chain() {
        let mut pool = SymbolPool::new();
        let a = pool.add("a", Some(0x1000)).unwrap();
        let b = pool.add("b", None).unwrap();
        let c = pool.add("c", None).unwrap();

        let mut cfg = Cfg::new();
        let mut block_a = Block::new(a);
        block_a.add_constraint(b, ConstraintKind::Next);
        let mut block_b = Block::new(b);
        block_b.add_constraint(c, ConstraintKind::To); // not NEXT: chain stops here
        cfg.add_node(block_a);
        cfg.add_node(block_b);
        cfg.add_node(Block::new(c));

        let chains = group_constrained_blocks(&cfg);
        assert_eq!(chains.len(), 2);
        let a_chain = chains.iter().find(|c| c.blocks[0] == a).unwrap();
        assert_eq!(a_chain.blocks, vec![a, b]);
    }

    #[test]
    fn pinned_chain_computes_offset_bounds_around_its_pinned_block() {
        let mut pool = SymbolPool::new();
        let head = pool.add("head", None).unwrap();
        let pinned = pool.add("pinned", Some(0x2000)).unwrap();

        let mut cfg = Cfg::new();
        let mut head_block = Block::new(head);
        head_block.max_size = 4;
        head_block.add_constraint(pinned, ConstraintKind::Next);
        let mut pinned_block = Block::new(pinned);
        pinned_block.max_size = 8;
        cfg.add_node(head_block);
        cfg.add_node(pinned_block);

        let mut chains = group_constrained_blocks(&cfg);
        assert_eq!(chains.len(), 1);
        chains[0].place(&cfg, &pool).unwrap();
        assert_eq!(chains[0].offset_min, Some(0x2000 - 4));
        assert_eq!(chains[0].offset_max, Some(0x2008));
    }

    #[test]
    fn resolve_symbol_rejects_a_pinned_chain_outside_the_destination_interval() {
        let mut pool = SymbolPool::new();
        let outside = pool.add("outside", Some(0x500)).unwrap();
        let mut cfg = Cfg::new();
        let mut block = Block::new(outside);
        block.max_size = 4;
        cfg.add_node(block);

        let chains = group_constrained_blocks(&cfg);
        let dst = Interval::from_half_open_u64(0x1000, 0x2000);
        let result = resolve_symbol(&cfg, &pool, chains, Some(dst));
        assert!(result.is_err());
    }
}
