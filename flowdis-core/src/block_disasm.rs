//! Component C: the single-block disassembler. Decodes one basic block
//! from an offset, honoring delay slots and the stop conditions that
//! terminate a basic block.

use std::collections::HashSet;

use log::{trace, warn};

use crate::error::BadBlockReason;
use crate::mnemo::{ByteSource, InstructionSet};
use crate::model::{Block, ConstraintKind, Expr, Line, LabelId};
use crate::policy::Policy;
use crate::symbol::SymbolPool;

/// The result of disassembling a single basic block: the block itself
/// (possibly a `BadBlock`) and the set of offsets newly discovered for
/// further disassembly.
pub struct SingleBlockResult {
    pub block: Block,
    pub discovered: Vec<u64>,
}

/// Decode one basic block starting at `label`/`start_offset`.
///
/// `job_done` is shared across recursive calls: it guarantees every offset
/// is decoded at most once and is mutated in place here.
///
/// Flow classification (see `mnemo::Instruction`): a plain instruction
/// (`breaks_flow = splits_flow = has_dst_flow = false`) never halts the
/// loop or records a constraint on its own — decoding simply continues
/// into it, the same as any other line. A `splits_flow` instruction
/// (conditional branch, or an un-suppressed subcall) records its branch
/// target(s) via `has_dst_flow` but otherwise also lets decoding carry on
/// into its fallthrough in the same block; the fallthrough edge only gets
/// recorded once *something* actually halts the loop (a stop condition, a
/// decode failure, or a suppressed subcall return). A `breaks_flow`
/// instruction has no fallthrough at all: once any delay slot it carries
/// has drained, the block ends right there, with no `NEXT` constraint.
pub fn disassemble_block(
    mnemo: &dyn InstructionSet,
    bytes: &dyn ByteSource,
    label: LabelId,
    start_offset: u64,
    job_done: &mut HashSet<u64>,
    pool: &mut SymbolPool,
    policy: &Policy,
) -> SingleBlockResult {
    let mut block = Block::new(label);
    let mut offset = start_offset;
    let mut in_delayslot = false;
    let mut delayslot_count: u32 = 0;
    // Whether the delay slot currently draining belongs to an instruction
    // with no fallthrough at all (break the block once drained) or one
    // that still falls through once its delay slot has executed (resume
    // normal decoding once drained).
    let mut delayslot_terminal = false;
    let mut add_next_offset: Option<u64> = None;
    let mut lines_seen: u64 = 0;

    'outer: loop {
        // A drained delay slot either ends the block (no fallthrough ever
        // owed) or simply resumes normal decoding.
        if in_delayslot && delayslot_count == 0 {
            in_delayslot = false;
            if delayslot_terminal {
                break;
            }
        }

        if policy.dont_disassemble.contains(offset)
            || (!block.lines.is_empty() && policy.split_at.contains(&offset))
        {
            block.add_constraint(pool.get_or_create_by_offset(offset), ConstraintKind::Next);
            break;
        }

        if let Some(wd) = policy.lines_wd {
            if lines_seen >= wd {
                warn!("line watchdog exceeded decoding block at {:#x}", offset);
                break;
            }
        }

        if job_done.contains(&offset) {
            block.add_constraint(pool.get_or_create_by_offset(offset), ConstraintKind::Next);
            break;
        }

        let raw = bytes.read(offset, mnemo.max_instruction_len().max(1));
        let decoded = match raw {
            Ok(b) if !b.is_empty() => mnemo.decode(&b, None, offset).ok(),
            _ => None,
        };

        let mut instr = match decoded {
            None => {
                if block.lines.is_empty() {
                    block.make_bad(BadBlockReason::UnableToDisassemble);
                } else {
                    block.add_constraint(
                        pool.get_or_create_by_offset(offset),
                        ConstraintKind::Next,
                    );
                }
                break 'outer;
            }
            Some(instr) => instr,
        };

        if policy.dont_dis_nulstart_block {
            if let Some(b) = instr.b() {
                if !b.is_empty() && b.iter().all(|&x| x == 0) {
                    if block.lines.is_empty() {
                        block.make_bad(BadBlockReason::NullStartingBlock);
                    } else {
                        block.add_constraint(
                            pool.get_or_create_by_offset(offset),
                            ConstraintKind::Next,
                        );
                    }
                    break 'outer;
                }
            }
        }

        let breaks_flow = instr.breaks_flow();
        let splits_flow = instr.splits_flow();
        let has_dst_flow = instr.has_dst_flow();
        let is_subcall = instr.is_subcall();
        let alters_flow = breaks_flow || splits_flow || has_dst_flow;

        // Already inside a delay slot and this filler instruction itself
        // alters flow (a nested branch): defer its fallthrough constraint
        // to after the loop and stop right here, rather than trying to
        // stack a second delay-slot region.
        let defer_next = in_delayslot && alters_flow;

        job_done.insert(offset);
        let instr_len = instr.l() as u64;
        instr.dst_to_label(pool);
        let dsts: Vec<Expr> = instr.get_dst_flow(pool);
        let this_delayslot = instr.delayslot();
        trace!("block {}: decoded at {:#x}, len {}", label, offset, instr_len);
        block.push_line(Line::Instr(instr));
        lines_seen += 1;
        offset += instr_len;

        if in_delayslot && delayslot_count > 0 {
            delayslot_count -= 1;
        }

        if defer_next {
            if has_dst_flow {
                add_dst_constraints(&mut block, pool, &dsts, is_subcall, policy);
            }
            add_next_offset = Some(offset);
            break 'outer;
        }

        if has_dst_flow {
            add_dst_constraints(&mut block, pool, &dsts, is_subcall, policy);
        }

        let suppress_call_return = is_subcall && policy.dont_disassemble_return_of_call;

        if breaks_flow || suppress_call_return {
            // No fallthrough is ever owed from this instruction. If it
            // carries its own delay slot, keep draining it (terminally);
            // otherwise the block ends here.
            if this_delayslot > 0 && !in_delayslot {
                in_delayslot = true;
                delayslot_count = this_delayslot;
                delayslot_terminal = true;
            } else {
                break 'outer;
            }
        } else if splits_flow {
            // Conditional branch, or an un-suppressed subcall: decoding
            // keeps going straight through the fallthrough in this same
            // block. Whatever eventually halts the loop records the NEXT
            // constraint; nothing to do here besides tracking a delay
            // slot this instruction may itself introduce.
            if this_delayslot > 0 && !in_delayslot {
                in_delayslot = true;
                delayslot_count = this_delayslot;
                delayslot_terminal = false;
            }
        } else if this_delayslot > 0 && !in_delayslot {
            // A plain instruction that nonetheless declares its own delay
            // slot (unusual, but the capability surface allows it); its
            // fallthrough is unaffected, so the drained slot resumes
            // normal decoding rather than ending the block.
            in_delayslot = true;
            delayslot_count = this_delayslot;
            delayslot_terminal = false;
        }
    }

    let mut discovered: Vec<u64> = block
        .bto
        .iter()
        .filter_map(|c| pool.label(c.label).and_then(|l| l.offset()))
        .collect();

    if let Some(post_offset) = add_next_offset {
        block.add_constraint(
            pool.get_or_create_by_offset(post_offset),
            ConstraintKind::Next,
        );
        discovered.push(post_offset);
    }

    block.fix_constraints();

    if let Some(cb) = &policy.post_block_callback {
        cb(&block);
    }

    SingleBlockResult { block, discovered }
}

/// Resolve an instruction's destination expressions into `TO` constraints,
/// skipping subcall targets unless `follow_call` is set.
fn add_dst_constraints(
    block: &mut Block,
    pool: &mut SymbolPool,
    dsts: &[Expr],
    is_subcall: bool,
    policy: &Policy,
) {
    for expr in dsts {
        if let Expr::Symbol { name, .. } = expr {
            let dst_label = pool.get_or_create_by_name(name);
            if !is_subcall || policy.follow_call {
                block.add_constraint(dst_label, ConstraintKind::To);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_dst_constraints_suppresses_subcall_target_by_default() {
        let mut pool = SymbolPool::new();
        let mut block = Block::new(pool.get_or_create_by_offset(0));
        let dsts = vec![Expr::Symbol {
            name: "callee".into(),
            bits: 8,
        }];
        let policy = Policy::new();

        add_dst_constraints(&mut block, &mut pool, &dsts, true, &policy);
        assert!(block.bto.is_empty());
    }

    #[test]
    fn add_dst_constraints_follows_subcall_target_when_policy_says_so() {
        let mut pool = SymbolPool::new();
        let mut block = Block::new(pool.get_or_create_by_offset(0));
        let dsts = vec![Expr::Symbol {
            name: "callee".into(),
            bits: 8,
        }];
        let policy = Policy::new().with_follow_call(true);

        add_dst_constraints(&mut block, &mut pool, &dsts, true, &policy);
        assert_eq!(block.bto.len(), 1);
        assert_eq!(block.bto[0].kind, ConstraintKind::To);
    }

    #[test]
    fn add_dst_constraints_always_follows_non_subcall_targets() {
        let mut pool = SymbolPool::new();
        let mut block = Block::new(pool.get_or_create_by_offset(0));
        let dsts = vec![Expr::Symbol {
            name: "target".into(),
            bits: 8,
        }];
        let policy = Policy::new();

        add_dst_constraints(&mut block, &mut pool, &dsts, false, &policy);
        assert_eq!(block.bto.len(), 1);
    }
}
