//! A recursive-descent disassembly and reassembly engine.
//!
//! This crate recovers a control-flow graph of basic blocks from a byte
//! source and an architecture-agnostic instruction decoder ([`mnemo`]), and
//! symmetrically lays out, resolves, and re-encodes those blocks at chosen
//! addresses.
//!
//! The pieces, in dependency order (leaves first):
//!
//! - [`symbol`] — the symbol pool (component A): interns [`model::Label`]s
//!   by name and/or offset.
//! - [`model`] — the core data model (component B): labels, constraints,
//!   raw data, lines and blocks.
//! - [`mnemo`] — the capability traits the core is generic over: the
//!   per-architecture mnemonic module and the byte source.
//! - [`interval`] — closed-interval arithmetic used by placement and by
//!   `dont_disassemble` ranges.
//! - [`block_disasm`] — the single-block disassembler (component C).
//! - [`cfg`] — the CFG container (component E).
//! - [`worklist`] — the whole-CFG disassembler (component D).
//! - [`splitter`] — the block splitter (component F).
//! - [`chain`] — block chains and placement (component G).
//! - [`asm`] — the assembly fixpoint (component H).
//! - [`policy`] — the policy-knob record passed by reference to every
//!   disassembly entry point.
//! - [`error`] — the crate's error taxonomy.
//! - [`viz`] — an optional Graphviz exporter for a [`cfg::Cfg`].

pub mod asm;
pub mod block_disasm;
pub mod cfg;
pub mod chain;
pub mod error;
pub mod interval;
pub mod mnemo;
pub mod model;
pub mod policy;
pub mod splitter;
pub mod symbol;
pub mod viz;
pub mod worklist;

pub use asm::{asm_resolve_final, AssemblyFixpoint};
pub use block_disasm::{disassemble_block, SingleBlockResult};
pub use cfg::Cfg;
pub use chain::{group_constrained_blocks, resolve_symbol, Chain};
pub use error::{BadBlockReason, CoreError, CoreResult};
pub use interval::{Interval, IntervalSet};
pub use model::{Block, Constraint, ConstraintKind, Expr, Label, LabelId, Line, RawDatum};
pub use policy::{OffsetSet, OffsetSpec, Policy};
pub use symbol::SymbolPool;
pub use worklist::disassemble_cfg;
