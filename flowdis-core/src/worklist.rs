//! Component D: the whole-CFG disassembler. A worklist driver that
//! repeatedly invokes the single-block disassembler (component C) and
//! feeds the CFG container (component E).

use std::collections::{HashSet, VecDeque};

use log::debug;

use crate::block_disasm::disassemble_block;
use crate::cfg::Cfg;
use crate::mnemo::{ByteSource, InstructionSet};
use crate::policy::Policy;
use crate::splitter::split_blocks;
use crate::symbol::SymbolPool;

/// Disassemble a whole control-flow graph starting from `start_offset`.
pub fn disassemble_cfg(
    mnemo: &dyn InstructionSet,
    bytes: &dyn ByteSource,
    pool: &mut SymbolPool,
    start_offset: u64,
    policy: &Policy,
) -> Cfg {
    let mut cfg = Cfg::new();
    let mut job_done: HashSet<u64> = HashSet::new();
    let mut worklist: VecDeque<u64> = VecDeque::new();
    let mut queued: HashSet<u64> = HashSet::new();
    let mut blocks_built: u64 = 0;

    worklist.push_back(start_offset);
    queued.insert(start_offset);

    while let Some(offset) = worklist.pop_front() {
        if job_done.contains(&offset) {
            continue;
        }
        if policy.dont_disassemble.contains(offset) {
            continue;
        }
        if let Some(wd) = policy.blocks_wd {
            if blocks_built >= wd {
                debug!("block watchdog tripped after {} blocks", blocks_built);
                break;
            }
        }

        let label = pool.get_or_create_by_offset(offset);
        if cfg.contains(label) {
            continue;
        }

        let result = disassemble_block(mnemo, bytes, label, offset, &mut job_done, pool, policy);
        blocks_built += 1;

        for discovered in &result.discovered {
            if !job_done.contains(discovered) && queued.insert(*discovered) {
                worklist.push_back(*discovered);
            }
        }

        cfg.add_node(result.block);
    }

    let candidates: Vec<u64> = cfg
        .blocks()
        .flat_map(|b| b.bto.iter().map(|c| c.label))
        .filter_map(|label| pool.label(label).and_then(|l| l.offset()))
        .collect();
    split_blocks(&mut cfg, &candidates, pool, policy);

    // A split removes the owning block (`Cfg::del_node`) and re-adds its
    // prefix/suffix halves, which drops any edge a predecessor held into
    // the original block; `add_node` only resyncs the newly inserted
    // block's own `bto`. Resync every block's edges against its `bto` now
    // that splitting is done, the same way `splitter::split_blocks`'s own
    // unit test does after calling it directly.
    cfg.rebuild_edges();

    cfg
}
