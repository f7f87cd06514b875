//! Policy knobs: one configuration record passed by reference to every
//! core operation, rather than threading a dozen loose parameters (design
//! note: "callbacks and policy knobs are grouped into one configuration
//! record; there is no global state").

use std::collections::HashSet;

use crate::model::Block;

/// An element of `dont_disassemble`/`split_at`-style offset sets: either a
/// single offset or a half-open `[lo, hi)` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetSpec {
    Single(u64),
    Range(u64, u64),
}

impl OffsetSpec {
    /// True if `offset` is covered by this spec.
    pub fn contains(&self, offset: u64) -> bool {
        match *self {
            OffsetSpec::Single(o) => o == offset,
            OffsetSpec::Range(lo, hi) => offset >= lo && offset < hi,
        }
    }
}

/// A set of offsets/ranges, queried by simple membership.
#[derive(Debug, Clone, Default)]
pub struct OffsetSet(Vec<OffsetSpec>);

impl OffsetSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, spec: OffsetSpec) -> Self {
        self.0.push(spec);
        self
    }

    pub fn push(&mut self, spec: OffsetSpec) {
        self.0.push(spec);
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.0.iter().any(|s| s.contains(offset))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OffsetSpec> {
        self.0.iter()
    }
}

/// A callback invoked after each block is decoded by the single-block
/// disassembler.
pub type PostBlockCallback<'a> = dyn Fn(&Block) + 'a;

/// The full set of optional knobs the engine exposes.
pub struct Policy<'a> {
    /// Offsets/ranges that are never entered by the recursive decoder.
    pub dont_disassemble: OffsetSet,
    /// Offsets that force block termination (with a `NEXT` edge) once
    /// encountered after a block's first line.
    pub split_at: HashSet<u64>,
    /// When set, call-target addresses are added as `TO` edges in
    /// addition to being recognized as subcalls.
    pub follow_call: bool,
    /// Suppresses the fallthrough edge of subcall instructions (their
    /// return site is not explored as part of this block).
    pub dont_disassemble_return_of_call: bool,
    /// Per-block line watchdog: stop decoding a block (without adding a
    /// constraint) after this many lines.
    pub lines_wd: Option<u64>,
    /// Per-session block watchdog: stop the whole-CFG worklist after this
    /// many blocks have been produced.
    pub blocks_wd: Option<u64>,
    /// Treat an all-zero-byte decoded instruction as a block terminator
    /// with error `NullStartingBlock`.
    pub dont_dis_nulstart_block: bool,
    /// Notified with each block immediately after it is decoded.
    pub post_block_callback: Option<Box<PostBlockCallback<'a>>>,
    /// When `true`, the splitter scans the last `delayslot + 1` lines of a
    /// block for `splits_flow ∨ breaks_flow` to decide how to partition
    /// `bto` across a split. When `false`, the prefix is always treated as
    /// non-flow-modifying, for callers that want that simpler behavior.
    pub splitter_scans_delay_tail: bool,
}

impl<'a> Default for Policy<'a> {
    fn default() -> Self {
        Self {
            dont_disassemble: OffsetSet::new(),
            split_at: HashSet::new(),
            follow_call: false,
            dont_disassemble_return_of_call: false,
            lines_wd: None,
            blocks_wd: None,
            dont_dis_nulstart_block: false,
            post_block_callback: None,
            splitter_scans_delay_tail: true,
        }
    }
}

impl<'a> Policy<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_follow_call(mut self, v: bool) -> Self {
        self.follow_call = v;
        self
    }

    pub fn with_dont_disassemble_return_of_call(mut self, v: bool) -> Self {
        self.dont_disassemble_return_of_call = v;
        self
    }

    pub fn with_lines_wd(mut self, v: u64) -> Self {
        self.lines_wd = Some(v);
        self
    }

    pub fn with_blocks_wd(mut self, v: u64) -> Self {
        self.blocks_wd = Some(v);
        self
    }

    pub fn with_dont_dis_nulstart_block(mut self, v: bool) -> Self {
        self.dont_dis_nulstart_block = v;
        self
    }

    pub fn with_post_block_callback<F>(mut self, f: F) -> Self
    where
        F: Fn(&Block) + 'a,
    {
        self.post_block_callback = Some(Box::new(f));
        self
    }
}
