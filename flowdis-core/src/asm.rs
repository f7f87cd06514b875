//! Component H: the assembly fixpoint. Re-encodes instructions and
//! propagates sizes until label offsets converge, then flattens the
//! result into an absolute-address byte map.

use std::collections::{BTreeMap, HashSet, VecDeque};

use log::debug;

use crate::cfg::Cfg;
use crate::chain::{group_constrained_blocks, resolve_symbol, Chain};
use crate::error::{CoreError, CoreResult};
use crate::interval::Interval;
use crate::mnemo::InstructionSet;
use crate::model::{Expr, Line, LabelId};
use crate::symbol::SymbolPool;

/// Drives the {propagate offsets -> re-encode -> update sizes} fixpoint
/// to convergence.
pub struct AssemblyFixpoint<'a> {
    mnemo: &'a dyn InstructionSet,
    conservative: bool,
}

impl<'a> AssemblyFixpoint<'a> {
    pub fn new(mnemo: &'a dyn InstructionSet, conservative: bool) -> Self {
        Self { mnemo, conservative }
    }

    /// Run the fixpoint to convergence over `chains`, mutating `cfg` and
    /// `pool` in place (offsets get pinned/repinned, instruction bytes get
    /// rewritten).
    pub fn run(&mut self, cfg: &mut Cfg, pool: &mut SymbolPool, chains: &mut [Chain]) -> CoreResult<()> {
        let mut worklist: VecDeque<LabelId> = cfg.blocks().map(|b| b.label).collect();
        let mut queued: HashSet<LabelId> = worklist.iter().copied().collect();

        loop {
            let mut modified = Vec::new();
            for chain in chains.iter() {
                self.fix_blocks(cfg, pool, chain, &mut modified)?;
            }

            for label in &modified {
                if queued.insert(*label) {
                    worklist.push_back(*label);
                }
                for &referrer in cfg
                    .blocks()
                    .filter(|b| references_label(b, *label, pool))
                    .map(|b| b.label)
                    .collect::<Vec<_>>()
                    .iter()
                {
                    if queued.insert(referrer) {
                        worklist.push_back(referrer);
                    }
                }
            }

            if worklist.is_empty() {
                break;
            }

            while let Some(label) = worklist.pop_front() {
                queued.remove(&label);
                self.assemble_block(cfg, pool, label)?;
            }
        }

        Ok(())
    }

    /// Propagate the pinned block's offset backward through predecessors
    /// and forward through successors within one chain.
    fn fix_blocks(
        &self,
        cfg: &mut Cfg,
        pool: &mut SymbolPool,
        chain: &Chain,
        modified: &mut Vec<LabelId>,
    ) -> CoreResult<()> {
        let pinned_idx = match chain.blocks.iter().position(|&l| {
            pool.label(l).and_then(|lbl| lbl.offset()).is_some()
        }) {
            Some(i) => i,
            None => return Ok(()),
        };

        let pinned_label = chain.blocks[pinned_idx];
        let mut cursor_offset = pool.label(pinned_label).unwrap().offset().unwrap();

        // Backward through predecessors.
        for &label in chain.blocks[0..pinned_idx].iter().rev() {
            let block = cfg.block(label).expect("chain block present in cfg");
            let alignment = block.alignment.max(1) as u64;
            let size = block.lines_size().max(block.size);
            let new_offset = (cursor_offset - size) & !(alignment - 1);
            self.maybe_repin(pool, label, new_offset, modified);
            cursor_offset = new_offset;
        }

        // Forward through successors.
        cursor_offset = pool.label(pinned_label).unwrap().offset().unwrap();
        let pinned_block = cfg.block(pinned_label).unwrap();
        let pinned_alignment = pinned_block.alignment.max(1) as u64;
        let _ = pinned_alignment;
        let mut prev_offset = cursor_offset;
        let mut prev_size = pinned_block.lines_size().max(pinned_block.size);
        let mut prev_alignment = pinned_block.alignment.max(1) as u64;

        for &label in chain.blocks[pinned_idx + 1..].iter() {
            let new_offset = round_up(prev_offset + prev_size, prev_alignment);
            self.maybe_repin(pool, label, new_offset, modified);
            let block = cfg.block(label).expect("chain block present in cfg");
            prev_offset = new_offset;
            prev_size = block.lines_size().max(block.size);
            prev_alignment = block.alignment.max(1) as u64;
        }

        Ok(())
    }

    fn maybe_repin(
        &self,
        pool: &mut SymbolPool,
        label: LabelId,
        new_offset: u64,
        modified: &mut Vec<LabelId>,
    ) {
        let current = pool.label(label).and_then(|l| l.offset());
        if current != Some(new_offset) {
            let _ = pool.unpin(label);
            let _ = pool.pin(label, new_offset);
            modified.push(label);
        }
    }

    /// Re-encode every line in `label`'s block, updating `block.size` by
    /// the delta between each instruction's new and old length.
    fn assemble_block(&self, cfg: &mut Cfg, pool: &mut SymbolPool, label: LabelId) -> CoreResult<()> {
        let offset = pool
            .label(label)
            .and_then(|l| l.offset())
            .ok_or_else(|| CoreError::UnresolvedSymbol(format!("block {} has no offset", label)))?;

        let block = match cfg.block_mut(label) {
            Some(b) => b,
            None => return Ok(()),
        };
        if block.is_bad() {
            return Ok(());
        }

        let mut cursor = offset;
        let mut delta: i64 = 0;
        for line in block.lines.iter_mut() {
            match line {
                Line::Raw(raw) => {
                    raw.set_offset(cursor);
                    let mut bytes = Vec::new();
                    for expr in raw.exprs().to_vec() {
                        let value = resolve_expr(&expr, pool)?;
                        let width = ((expr.bits() as usize) + 7) / 8;
                        bytes.extend_from_slice(&value.to_le_bytes()[..width.min(16)]);
                    }
                    if !raw.exprs().is_empty() {
                        raw.set_bytes(bytes);
                    }
                    cursor += raw.size() as u64;
                }
                Line::Instr(instr) => {
                    let old_len = instr.l();
                    instr.set_offset(cursor);
                    instr.fix_dst_offset();
                    let candidates = self.mnemo.encode(instr.as_ref(), Some(&*pool));
                    let chosen = choose_encoding(instr.as_ref(), &candidates, self.conservative);
                    let new_len = chosen.len();
                    instr.set_data(chosen);
                    delta += new_len as i64 - old_len as i64;
                    cursor += new_len as u64;
                }
            }
        }
        block.size = (block.size as i64 + delta).max(0) as u64;
        debug!("assembled block {} at {:#x}, size {}", label, offset, block.size);
        Ok(())
    }
}

fn round_up(value: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    (value + alignment - 1) / alignment * alignment
}

fn references_label(block: &crate::model::Block, label: LabelId, pool: &SymbolPool) -> bool {
    let target_name = match pool.label(label) {
        Some(l) => l.name().to_string(),
        None => return false,
    };
    block.lines.iter().any(|line| match line {
        Line::Raw(raw) => raw
            .exprs()
            .iter()
            .any(|e| matches!(e, Expr::Symbol { name, .. } if *name == target_name)),
        Line::Instr(instr) => instr
            .get_dst_flow(pool)
            .iter()
            .any(|e| matches!(e, Expr::Symbol { name, .. } if *name == target_name)),
    })
}

/// Resolve an expression to a concrete integer against `pool`.
pub fn resolve_expr(expr: &Expr, pool: &SymbolPool) -> CoreResult<i128> {
    match expr {
        Expr::Int { value, .. } => Ok(*value),
        Expr::Symbol { name, .. } => pool
            .get_by_name(name)
            .and_then(|id| pool.label(id))
            .and_then(|l| l.offset())
            .map(|o| o as i128)
            .ok_or_else(|| CoreError::UnresolvedSymbol(name.clone())),
    }
}

/// Conservative encoding: prefer the instruction's original bytes when
/// they appear among the encoder's candidates; otherwise, in conservative
/// mode, prefer a same-length candidate; otherwise take the first.
fn choose_encoding(
    instr: &dyn crate::mnemo::Instruction,
    candidates: &[Vec<u8>],
    conservative: bool,
) -> Vec<u8> {
    if let Some(original) = instr.b() {
        if let Some(found) = candidates.iter().find(|c| c.as_slice() == original) {
            return found.clone();
        }
    }
    if conservative {
        if let Some(same_len) = candidates.iter().find(|c| c.len() == instr.l()) {
            return same_len.clone();
        }
    }
    candidates
        .first()
        .cloned()
        .unwrap_or_else(|| instr.b().map(|b| b.to_vec()).unwrap_or_default())
}

/// Final step: sanity-check, estimate sizes, chain, place, fixpoint, then
/// flatten every block into an `offset -> bytes` map.
pub fn asm_resolve_final(
    cfg: &mut Cfg,
    pool: &mut SymbolPool,
    mnemo: &dyn InstructionSet,
    dst_interval: Option<Interval>,
    conservative: bool,
) -> CoreResult<BTreeMap<u64, Vec<u8>>> {
    let errors = cfg.sanity_check();
    if !errors.is_empty() {
        return Err(errors.into_iter().next().unwrap());
    }

    cfg.guess_blocks_size(mnemo);

    let chains = group_constrained_blocks(cfg);
    let mut chains = resolve_symbol(cfg, pool, chains, dst_interval)?;

    // Pin the head of every chain with its placed offset_min so the
    // fixpoint has a concrete starting point to propagate from.
    for chain in &chains {
        let head = chain.blocks[0];
        if pool.label(head).and_then(|l| l.offset()).is_none() {
            if let Some(om) = chain.offset_min {
                let _ = pool.pin(head, om as u64);
            }
        }
    }

    let mut fixpoint = AssemblyFixpoint::new(mnemo, conservative);
    fixpoint.run(cfg, pool, &mut chains)?;

    let mut out: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
    let mut claimed: BTreeMap<u64, (u64, LabelId)> = BTreeMap::new();

    for block in cfg.blocks() {
        if block.is_bad() {
            continue;
        }
        for line in &block.lines {
            let (offset, bytes) = match line {
                Line::Instr(i) => match (i.offset(), i.data()) {
                    (Some(o), Some(d)) => (o, d.to_vec()),
                    _ => continue,
                },
                Line::Raw(raw) => match (raw.offset(), raw.bytes()) {
                    (Some(o), Some(b)) => (o, b.to_vec()),
                    _ => continue,
                },
            };
            let end = offset + bytes.len() as u64;
            for (&existing_off, &(existing_end, existing_label)) in claimed.range(..end) {
                if existing_end > offset && existing_off < end {
                    return Err(CoreError::OverlapViolation {
                        offset,
                        first: existing_label.to_string(),
                        second: block.label.to_string(),
                    });
                }
            }
            claimed.insert(offset, (end, block.label));
            out.insert(offset, bytes);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Expr;

    #[derive(Debug)]
    struct MockInstr {
        orig: Vec<u8>,
        len: usize,
    }

    impl crate::mnemo::Instruction for MockInstr {
        fn b(&self) -> Option<&[u8]> {
            Some(&self.orig)
        }
        fn l(&self) -> usize {
            self.len
        }
        fn delayslot(&self) -> u32 {
            0
        }
        fn offset(&self) -> Option<u64> {
            None
        }
        fn set_offset(&mut self, _offset: u64) {}
        fn data(&self) -> Option<&[u8]> {
            None
        }
        fn set_data(&mut self, _data: Vec<u8>) {}
        fn breaks_flow(&self) -> bool {
            false
        }
        fn splits_flow(&self) -> bool {
            false
        }
        fn has_dst_flow(&self) -> bool {
            false
        }
        fn is_subcall(&self) -> bool {
            false
        }
        fn dst_to_label(&mut self, _pool: &mut SymbolPool) {}
        fn get_dst_flow(&self, _pool: &SymbolPool) -> Vec<Expr> {
            Vec::new()
        }
        fn resolve_args_with_symbols(&self, _pool: &SymbolPool) -> Vec<Expr> {
            Vec::new()
        }
        fn fix_dst_offset(&mut self) {}
    }

    #[test]
    fn choose_encoding_prefers_original_bytes_when_still_a_candidate() {
        let instr = MockInstr {
            orig: vec![0x01, 0x02],
            len: 2,
        };
        let candidates = vec![vec![0x01, 0x02], vec![0x01, 0x02, 0x03]];
        let chosen = choose_encoding(&instr, &candidates, true);
        assert_eq!(chosen, vec![0x01, 0x02]);
    }

    #[test]
    fn choose_encoding_conservative_prefers_same_length_over_first() {
        let instr = MockInstr {
            orig: vec![0xff, 0xff], // not among the candidates
            len: 3,
        };
        let candidates = vec![vec![0x01, 0x02], vec![0x01, 0x02, 0x03]];
        let chosen = choose_encoding(&instr, &candidates, true);
        assert_eq!(chosen, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn choose_encoding_non_conservative_takes_first_candidate() {
        let instr = MockInstr {
            orig: vec![0xff, 0xff],
            len: 3,
        };
        let candidates = vec![vec![0x01, 0x02], vec![0x01, 0x02, 0x03]];
        let chosen = choose_encoding(&instr, &candidates, false);
        assert_eq!(chosen, vec![0x01, 0x02]);
    }

    #[test]
    fn round_up_pads_to_next_alignment_boundary() {
        assert_eq!(round_up(0x1001, 4), 0x1004);
        assert_eq!(round_up(0x1000, 4), 0x1000);
        assert_eq!(round_up(5, 1), 5);
    }
}
