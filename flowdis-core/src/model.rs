//! Core data model: labels, constraints, raw data, lines and blocks.
//!
//! Cross-structure references are entity IDs rather than shared references
//! (see design note on label identity): a `LabelId` is minted once by the
//! [`crate::symbol::SymbolPool`] and copied everywhere it's needed.

use flowdis_entity::entity_impl;
use smallvec::SmallVec;

use crate::error::BadBlockReason;
use crate::mnemo::Instruction;

/// An opaque reference to a [`Label`] owned by a `SymbolPool`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabelId(u32);
entity_impl!(LabelId, "lbl");

/// A symbolic address: a name, an optional pinned offset, and an optional
/// architecture attribute (used when the same name/offset could be
/// decoded under more than one instruction set mode, e.g. ARM/Thumb).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub(crate) name: String,
    pub(crate) offset: Option<u64>,
    pub(crate) attrib: Option<String>,
}

impl Label {
    pub(crate) fn new(name: String, offset: Option<u64>) -> Self {
        Self {
            name,
            offset,
            attrib: None,
        }
    }

    /// The label's current name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The label's pinned offset, if any.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// The label's architecture attribute, if any.
    pub fn attrib(&self) -> Option<&str> {
        self.attrib.as_deref()
    }

    /// Default name synthesized from a bare offset: `loc_<16 hex digits>`.
    pub fn default_name_for_offset(offset: u64) -> String {
        format!("loc_{:016x}", offset)
    }
}

/// The kind of a directed relation from a block to a destination label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// Logical branch target; carries no placement obligation.
    To,
    /// Physical fallthrough; the target must immediately follow in memory.
    Next,
}

impl ConstraintKind {
    /// `NEXT` is strictly stronger than `TO`: when both converge on the
    /// same destination, `NEXT` wins.
    pub fn strongest(self, other: ConstraintKind) -> ConstraintKind {
        use ConstraintKind::*;
        match (self, other) {
            (Next, _) | (_, Next) => Next,
            (To, To) => To,
        }
    }
}

/// A directed relation from a block to a destination label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraint {
    /// Destination label.
    pub label: LabelId,
    /// Relation kind.
    pub kind: ConstraintKind,
}

impl Constraint {
    pub fn new(label: LabelId, kind: ConstraintKind) -> Self {
        Self { label, kind }
    }
}

/// A single integer-typed expression to be packed into a raw datum at
/// assembly time, little-endian, at the declared bit width.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A plain integer constant of the given bit width.
    Int { bits: u32, value: i128 },
    /// A symbolic identifier; may name a [`Label`] by its current pinned
    /// offset once resolved.
    Symbol { name: String, bits: u32 },
}

impl Expr {
    /// The declared width of this expression, in bits.
    pub fn bits(&self) -> u32 {
        match self {
            Expr::Int { bits, .. } => *bits,
            Expr::Symbol { bits, .. } => *bits,
        }
    }
}

/// An alternative line in a block: pre-encoded bytes, or a list of
/// integer-typed expressions fixed up at assembly time.
#[derive(Debug, Clone, Default)]
pub struct RawDatum {
    bytes: Option<Vec<u8>>,
    exprs: Vec<Expr>,
    offset: Option<u64>,
}

impl RawDatum {
    /// A raw datum holding concrete, already-encoded bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Some(bytes),
            exprs: Vec::new(),
            offset: None,
        }
    }

    /// A raw datum holding expressions to be resolved and packed at
    /// assembly time.
    pub fn from_exprs(exprs: Vec<Expr>) -> Self {
        Self {
            bytes: None,
            exprs,
            offset: None,
        }
    }

    /// This datum's assigned offset, once known.
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Assign this datum's offset (done during assembly placement).
    pub fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    /// The expressions backing this datum, if it isn't plain bytes.
    pub fn exprs(&self) -> &[Expr] {
        &self.exprs
    }

    /// The current concrete bytes, if resolved (or if constructed from
    /// bytes directly).
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }

    /// Overwrite the concrete bytes, e.g. after resolving `exprs` at
    /// assembly time.
    pub fn set_bytes(&mut self, bytes: Vec<u8>) {
        self.bytes = Some(bytes);
    }

    /// Encoded size in bytes, on demand: either the concrete byte count, or
    /// the sum of each expression's declared width.
    pub fn size(&self) -> usize {
        if let Some(b) = &self.bytes {
            return b.len();
        }
        self.exprs
            .iter()
            .map(|e| (e.bits() as usize + 7) / 8)
            .sum()
    }
}

/// One line of a block: either a decoded instruction or a raw datum.
pub enum Line {
    Instr(Box<dyn Instruction>),
    Raw(RawDatum),
}

impl Line {
    /// The encoded size of this line, in bytes.
    pub fn size(&self) -> usize {
        match self {
            Line::Instr(i) => i.l(),
            Line::Raw(r) => r.size(),
        }
    }

    /// The line's starting offset, if it has been assigned one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Line::Instr(i) => i.offset(),
            Line::Raw(r) => r.offset(),
        }
    }

    /// Does this line, by itself, split control flow (have a natural
    /// fallthrough successor)?
    pub fn splits_flow(&self) -> bool {
        matches!(self, Line::Instr(i) if i.splits_flow())
    }

    /// Does this line, by itself, break control flow outright (no
    /// fallthrough successor at all)?
    pub fn breaks_flow(&self) -> bool {
        matches!(self, Line::Instr(i) if i.breaks_flow())
    }
}

impl std::fmt::Debug for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Line::Instr(i) => write!(f, "Instr(l={})", i.l()),
            Line::Raw(r) => write!(f, "Raw(size={})", r.size()),
        }
    }
}

/// A half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

/// The body of a [`Block`]: either a normal sequence of lines, or a
/// malformed/unreachable marker that may not be extended or split further.
#[derive(Debug)]
pub enum BlockBody {
    Normal,
    Bad(BadBlockReason),
}

/// A label, an alignment, an ordered sequence of lines, and the block's
/// outgoing constraints.
///
/// A `BadBlock` is represented as a `Block` whose `body` is
/// `BlockBody::Bad`; it carries no lines and no constraints by
/// construction (enforced by [`Block::push_line`] and
/// [`Block::add_constraint`] returning `false`/no-op on a bad block).
#[derive(Debug)]
pub struct Block {
    pub label: LabelId,
    pub alignment: u32,
    pub lines: Vec<Line>,
    /// Almost every block has at most two outgoing constraints (a NEXT and
    /// a TO, from a conditional branch's fallthrough and target), so this
    /// stays inline rather than allocating.
    pub bto: SmallVec<[Constraint; 2]>,
    pub body: BlockBody,
    /// Assigned during assembly; sum of current line sizes.
    pub size: u64,
    /// Worst-case size used for placement, before symbols are resolved.
    pub max_size: u64,
}

impl Block {
    /// A fresh, empty, normal block.
    pub fn new(label: LabelId) -> Self {
        Self {
            label,
            alignment: 1,
            lines: Vec::new(),
            bto: SmallVec::new(),
            body: BlockBody::Normal,
            size: 0,
            max_size: 0,
        }
    }

    /// A `BadBlock` carrying the given error code.
    pub fn bad(label: LabelId, reason: BadBlockReason) -> Self {
        Self {
            label,
            alignment: 1,
            lines: Vec::new(),
            bto: SmallVec::new(),
            body: BlockBody::Bad(reason),
            size: 0,
            max_size: 0,
        }
    }

    /// Replace this block in place with a `BadBlock`, discarding any lines
    /// and constraints it may have accumulated (used only when the block
    /// is still empty, per the single-block disassembler's algorithm).
    pub fn make_bad(&mut self, reason: BadBlockReason) {
        self.lines.clear();
        self.bto.clear();
        self.body = BlockBody::Bad(reason);
    }

    /// Is this a `BadBlock`?
    pub fn is_bad(&self) -> bool {
        matches!(self.body, BlockBody::Bad(_))
    }

    /// The error code carried by a `BadBlock`, if any.
    pub fn bad_reason(&self) -> Option<BadBlockReason> {
        match self.body {
            BlockBody::Bad(r) => Some(r),
            BlockBody::Normal => None,
        }
    }

    /// Append a line. No-op (returns `false`) on a `BadBlock`.
    pub fn push_line(&mut self, line: Line) -> bool {
        if self.is_bad() {
            return false;
        }
        self.lines.push(line);
        true
    }

    /// Add (or strengthen) an outgoing constraint to `label`. No-op
    /// (returns `false`) on a `BadBlock`. If a constraint to the same
    /// label already exists, keeps the strongest of the two kinds
    /// (`NEXT` beats `TO`).
    pub fn add_constraint(&mut self, label: LabelId, kind: ConstraintKind) -> bool {
        if self.is_bad() {
            return false;
        }
        if let Some(existing) = self.bto.iter_mut().find(|c| c.label == label) {
            existing.kind = existing.kind.strongest(kind);
        } else {
            self.bto.push(Constraint::new(label, kind));
        }
        true
    }

    /// Deduplicate `bto` so at most one constraint per destination label
    /// survives, preferring `NEXT` over `TO` when both were recorded.
    pub fn fix_constraints(&mut self) {
        let mut seen: Vec<Constraint> = Vec::with_capacity(self.bto.len());
        for c in self.bto.drain(..) {
            if let Some(existing) = seen.iter_mut().find(|s| s.label == c.label) {
                existing.kind = existing.kind.strongest(c.kind);
            } else {
                seen.push(c);
            }
        }
        self.bto = seen.into();
    }

    /// The offset range `[first.offset, last.offset + last.size)` covered
    /// by this block's lines, or `None` if the block has no lines with
    /// assigned offsets yet.
    pub fn range(&self) -> Option<Range> {
        let first = self.lines.first()?.offset()?;
        let last = self.lines.last()?;
        let last_off = last.offset()?;
        Some(Range {
            start: first,
            end: last_off + last.size() as u64,
        })
    }

    /// Total encoded size of this block's lines (the sum of each line's
    /// current `size()`), ignoring alignment padding.
    pub fn lines_size(&self) -> u64 {
        self.lines.iter().map(|l| l.size() as u64).sum()
    }
}
