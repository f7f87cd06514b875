//! Error taxonomy for the disassembly/assembly core.

use thiserror::Error;

/// The reason a [`crate::model::Block`] became a `BadBlock` instead of a
/// normal block of decoded lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadBlockReason {
    /// The mnemonic module could not decode anything at the block's
    /// starting offset and the block had no lines yet.
    UnableToDisassemble,
    /// The decoded instruction was entirely zero bytes and
    /// `dont_dis_nulstart_block` forbids starting a block with one.
    NullStartingBlock,
    /// Any other reason a block was abandoned.
    Unknown,
}

impl std::fmt::Display for BadBlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            BadBlockReason::UnableToDisassemble => "unable to disassemble",
            BadBlockReason::NullStartingBlock => "null starting block",
            BadBlockReason::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by core operations.
///
/// Per-line decode/null conditions are *not* represented here: they are
/// handled locally by the single-block disassembler, which turns them into
/// a [`BadBlockReason`] or a terminating `NEXT` constraint rather than
/// propagating an error. Everything in this enum is fatal to the operation
/// that raised it.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A requested split offset did not coincide with an instruction
    /// boundary. Callers receive `None` from the splitter; this variant
    /// exists so the condition can still be logged with detail.
    #[error("offset {offset:#x} falls mid-instruction, cannot split")]
    SplitMidInstruction {
        /// The offset that was requested as a split point.
        offset: u64,
    },

    /// `add`/`rename`/`pin` collided with an existing name or offset.
    #[error("symbol conflict: {0}")]
    SymbolConflict(String),

    /// Expression simplification did not collapse to an integer during
    /// assembly.
    #[error("unresolved symbol: {0}")]
    UnresolvedSymbol(String),

    /// No gap accommodated a chain, or a pinned chain's interval escaped
    /// the destination interval.
    #[error("placement failure: {0}")]
    PlacementFailure(String),

    /// Final flattening found two instructions sharing bytes.
    #[error("overlap at offset {offset:#x} between blocks {first} and {second}")]
    OverlapViolation {
        /// The overlapping offset.
        offset: u64,
        /// Label of the first block claiming the offset.
        first: String,
        /// Label of the second block claiming the offset.
        second: String,
    },

    /// The CFG has pendings, a duplicate `NEXT` predecessor, or a `NEXT`
    /// self-loop.
    #[error("CFG sanity check failed: {0}")]
    SanityFailure(String),

    /// A pinned offset is not a multiple of its block's alignment.
    #[error("offset {offset:#x} violates alignment {align} of block {label}")]
    AlignmentViolation {
        /// The pinned offset.
        offset: u64,
        /// The block's required alignment.
        align: u32,
        /// The block's label, for diagnostics.
        label: String,
    },

    /// The byte source failed to produce bytes for a decode attempt.
    #[error("byte source read failed at offset {offset:#x}: {source}")]
    Io {
        /// The offset the read was attempted at.
        offset: u64,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The mnemonic module failed to decode at an offset.
    #[error("decode failure at offset {offset:#x}: {reason}")]
    DecodeFailure {
        /// The offset decoding was attempted at.
        offset: u64,
        /// A human-readable reason from the mnemonic module.
        reason: String,
    },
}

/// Convenience alias used throughout the core.
pub type CoreResult<T> = Result<T, CoreError>;
