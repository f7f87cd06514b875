//! Capability interfaces the core is generic over: the per-architecture
//! mnemonic module and the byte-source abstraction. The core never depends
//! on a concrete ISA; it only requires these traits.

use crate::model::Expr;
use crate::symbol::SymbolPool;

/// An opaque decoded instruction, as produced by an [`InstructionSet`].
///
/// The core only needs the capabilities listed here; everything else about
/// how an instruction is represented is private to the mnemonic module.
pub trait Instruction: std::fmt::Debug {
    /// Original decoded bytes, if still available (used for conservative
    /// re-encoding).
    fn b(&self) -> Option<&[u8]>;

    /// Current encoded length, in bytes.
    fn l(&self) -> usize;

    /// Architectural delay-slot count *of this instruction* (how many
    /// instructions following it execute unconditionally before a branch
    /// it carries takes effect).
    fn delayslot(&self) -> u32;

    /// This instruction's assigned offset, once known.
    fn offset(&self) -> Option<u64>;

    /// Assign this instruction's offset (done during assembly placement).
    fn set_offset(&mut self, offset: u64);

    /// Final encoded bytes, once assembled.
    fn data(&self) -> Option<&[u8]>;

    /// Overwrite the final encoded bytes.
    fn set_data(&mut self, data: Vec<u8>);

    /// True if this instruction has no fallthrough successor at all once
    /// any delay slot it carries has drained (e.g. an unconditional jump
    /// or return). Plain, non-branching instructions answer `false` here
    /// — they neither break nor split flow, they just advance the cursor.
    fn breaks_flow(&self) -> bool;

    /// True if this instruction is branch-class but still has a natural
    /// fallthrough successor once any delay slot has drained (e.g. a
    /// conditional branch, or a subroutine call whose return site isn't
    /// suppressed). Decoding keeps going straight into that fallthrough in
    /// the same block; mutually exclusive with `breaks_flow`.
    fn splits_flow(&self) -> bool;

    /// True if this instruction has one or more symbolic branch/call
    /// destinations.
    fn has_dst_flow(&self) -> bool;

    /// True if this instruction is a subroutine call (its fallthrough is
    /// the return site, not a second logical successor).
    fn is_subcall(&self) -> bool;

    /// Rewrite this instruction's immediate destination operands as
    /// labels in place, minting labels in `pool` as needed.
    fn dst_to_label(&mut self, pool: &mut SymbolPool);

    /// The list of destination expressions reachable from this
    /// instruction (after `dst_to_label` has run).
    fn get_dst_flow(&self, pool: &SymbolPool) -> Vec<Expr>;

    /// The operand list with any label operands replaced by their pinned
    /// offsets, for use by the encoder.
    fn resolve_args_with_symbols(&self, pool: &SymbolPool) -> Vec<Expr>;

    /// Rebase relative branch operands using this instruction's own
    /// assigned `offset()`.
    fn fix_dst_offset(&mut self);
}

/// An error from the mnemonic module's decoder.
#[derive(Debug, Clone)]
pub struct DecodeError {
    pub reason: String,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

/// The per-architecture mnemonic module: decode, encode, and classify
/// instructions.
pub trait InstructionSet {
    /// Decode one instruction at `offset` from `bytes`, optionally under
    /// an architecture `attrib` (e.g. ARM vs. Thumb mode).
    fn decode(
        &self,
        bytes: &[u8],
        attrib: Option<&str>,
        offset: u64,
    ) -> Result<Box<dyn Instruction>, DecodeError>;

    /// All candidate byte-string encodings of `instr`, in the mnemonic
    /// module's preferred order, resolving any label operands via `pool`.
    fn encode(&self, instr: &dyn Instruction, pool: Option<&SymbolPool>) -> Vec<Vec<u8>>;

    /// Longest possible encoded length for any instruction this ISA can
    /// produce; used as the pessimistic size estimate before symbols are
    /// resolvable.
    fn max_instruction_len(&self) -> usize;

    /// Architectural delay-slot depth of this ISA as a whole (0 for
    /// non-delay-slot architectures); used to seed the single-block
    /// disassembler's `delayslot_count` before the first instruction is
    /// decoded.
    fn delayslot(&self) -> u32;
}

/// A synchronous, random-access byte source: `(offset, length) -> bytes`.
pub trait ByteSource {
    /// Read exactly `length` bytes starting at `offset`.
    fn read(&self, offset: u64, length: usize) -> std::io::Result<Vec<u8>>;
}
