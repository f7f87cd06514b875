//! Component F: the block splitter. Splits a block at a mid-range target
//! offset discovered after it was already decoded as a single unit.

use log::{debug, warn};

use crate::cfg::Cfg;
use crate::model::{Constraint, ConstraintKind, Line, LabelId};
use crate::policy::Policy;
use crate::symbol::SymbolPool;

/// Split every block in `cfg` at any `candidates` offset that falls
/// strictly inside it, using `pool` to mint the suffix block's label.
///
/// This needs a pool reference, so callers normally hold the pool used to
/// disassemble `cfg` in the first place; `worklist::disassemble_cfg` wires
/// this up automatically.
pub fn split_blocks(cfg: &mut Cfg, candidates: &[u64], pool: &mut SymbolPool, policy: &Policy) {
    for &offset in candidates {
        split_at(cfg, offset, pool, policy);
    }
}

/// Attempt to split whichever block currently contains `offset` strictly
/// inside its range. Returns the suffix block's label on success; `None`
/// if no block contains the offset, the offset lands on an existing
/// block start, or it falls mid-instruction (logged as a warning).
pub fn split_at(
    cfg: &mut Cfg,
    offset: u64,
    pool: &mut SymbolPool,
    policy: &Policy,
) -> Option<LabelId> {
    let owner = cfg
        .blocks()
        .find(|b| {
            !b.is_bad()
                && b.range()
                    .map(|r| offset > r.start && offset < r.end)
                    .unwrap_or(false)
        })
        .map(|b| b.label)?;

    let split_idx = {
        let block = cfg.block(owner)?;
        block.lines.iter().position(|l| l.offset() == Some(offset))
    };

    let split_idx = match split_idx {
        Some(i) => i,
        None => {
            warn!(
                "cannot split block {} at offset {:#x}: not on an instruction boundary",
                owner, offset
            );
            return None;
        }
    };

    let suffix_label = pool.get_or_create_by_offset(offset);
    if cfg.contains(suffix_label) {
        // Someone already materialized a block at this offset (e.g. the
        // worklist decoded it independently); nothing to split.
        return None;
    }

    let mut prefix = cfg.del_node(owner)?;
    let suffix_lines: Vec<Line> = prefix.lines.split_off(split_idx);

    let mut suffix = crate::model::Block::new(suffix_label);
    suffix.alignment = prefix.alignment;
    suffix.lines = suffix_lines;

    let tail_modifies_flow = if policy.splitter_scans_delay_tail {
        tail_alters_flow(&prefix)
    } else {
        false
    };

    if tail_modifies_flow {
        let (next, to): (Vec<Constraint>, Vec<Constraint>) = prefix
            .bto
            .drain(..)
            .partition(|c| c.kind == ConstraintKind::Next);
        suffix.bto = next.into();
        prefix.bto = to.into();
    } else {
        suffix.bto = std::mem::take(&mut prefix.bto);
    }
    prefix.add_constraint(suffix_label, ConstraintKind::Next);

    debug!(
        "split block {} at {:#x} into {} (prefix) / {} (suffix)",
        owner, offset, owner, suffix_label
    );

    cfg.add_node(prefix);
    cfg.add_node(suffix);
    Some(suffix_label)
}


/// Scan the last `delayslot + 1` lines of `block` for a flow-modifying
/// instruction.
fn tail_alters_flow(block: &crate::model::Block) -> bool {
    let delayslot = block
        .lines
        .last()
        .map(|l| match l {
            Line::Instr(i) => i.delayslot(),
            Line::Raw(_) => 0,
        })
        .unwrap_or(0) as usize;
    let window = delayslot + 1;
    let start = block.lines.len().saturating_sub(window);
    block.lines[start..]
        .iter()
        .any(|l| l.splits_flow() || l.breaks_flow())
}
