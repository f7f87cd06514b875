//! A tiny two-byte fixture instruction set shared by the integration
//! tests: one opcode byte plus one signed 8-bit PC-relative operand byte.
//! Just enough instruction shapes to exercise every branch-class flow
//! predicate without dragging in a real architecture.

use flowdis_core::mnemo::{ByteSource, DecodeError, Instruction, InstructionSet};
use flowdis_core::model::Expr;
use flowdis_core::symbol::SymbolPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// No operation; a plain, non-branching instruction.
    Nop,
    /// Unconditional jump: no fallthrough at all.
    Jmp(i8),
    /// Conditional branch: has_dst_flow and a fallthrough.
    Jcc(i8),
    /// Subroutine call: has_dst_flow, fallthrough is the return site.
    Call(i8),
    /// Unconditional jump carrying a single delay slot.
    DJmp(i8),
}

impl Op {
    fn opcode_byte(self) -> u8 {
        match self {
            Op::Nop => 0x00,
            Op::Jmp(_) => 0x01,
            Op::Jcc(_) => 0x02,
            Op::Call(_) => 0x03,
            Op::DJmp(_) => 0x04,
        }
    }

    fn rel(self) -> i8 {
        match self {
            Op::Nop => 0,
            Op::Jmp(r) | Op::Jcc(r) | Op::Call(r) | Op::DJmp(r) => r,
        }
    }

    fn breaks_flow(self) -> bool {
        matches!(self, Op::Jmp(_) | Op::DJmp(_))
    }

    fn splits_flow(self) -> bool {
        matches!(self, Op::Jcc(_) | Op::Call(_))
    }

    fn has_dst_flow(self) -> bool {
        matches!(self, Op::Jmp(_) | Op::Jcc(_) | Op::Call(_) | Op::DJmp(_))
    }

    fn is_subcall(self) -> bool {
        matches!(self, Op::Call(_))
    }

    fn delayslot(self) -> u32 {
        match self {
            Op::DJmp(_) => 1,
            _ => 0,
        }
    }

    /// Encode as `[opcode, target_offset - (instr_offset + 2)]`.
    pub fn bytes_for(self, instr_offset: u64, target_offset: u64) -> [u8; 2] {
        let rel = target_offset as i64 - (instr_offset as i64 + 2);
        [self.opcode_byte(), rel as i8 as u8]
    }
}

#[derive(Debug)]
pub struct ToyInstr {
    op: Op,
    orig_bytes: Vec<u8>,
    offset: Option<u64>,
    data: Option<Vec<u8>>,
    target_name: Option<String>,
}

impl Instruction for ToyInstr {
    fn b(&self) -> Option<&[u8]> {
        Some(&self.orig_bytes)
    }

    fn l(&self) -> usize {
        2
    }

    fn delayslot(&self) -> u32 {
        self.op.delayslot()
    }

    fn offset(&self) -> Option<u64> {
        self.offset
    }

    fn set_offset(&mut self, offset: u64) {
        self.offset = Some(offset);
    }

    fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn set_data(&mut self, data: Vec<u8>) {
        self.data = Some(data);
    }

    fn breaks_flow(&self) -> bool {
        self.op.breaks_flow()
    }

    fn splits_flow(&self) -> bool {
        self.op.splits_flow()
    }

    fn has_dst_flow(&self) -> bool {
        self.op.has_dst_flow()
    }

    fn is_subcall(&self) -> bool {
        self.op.is_subcall()
    }

    fn dst_to_label(&mut self, pool: &mut SymbolPool) {
        if !self.op.has_dst_flow() || self.target_name.is_some() {
            return;
        }
        let base = self.offset.unwrap_or(0) + 2;
        let target = (base as i64 + self.op.rel() as i64) as u64;
        let label = pool.get_or_create_by_offset(target);
        self.target_name = pool.label(label).map(|l| l.name().to_string());
    }

    fn get_dst_flow(&self, _pool: &SymbolPool) -> Vec<Expr> {
        match &self.target_name {
            Some(name) => vec![Expr::Symbol {
                name: name.clone(),
                bits: 8,
            }],
            None => Vec::new(),
        }
    }

    fn resolve_args_with_symbols(&self, pool: &SymbolPool) -> Vec<Expr> {
        let name = match &self.target_name {
            Some(n) => n,
            None => return Vec::new(),
        };
        let target_offset = match pool.get_by_name(name).and_then(|id| pool.label(id)).and_then(|l| l.offset()) {
            Some(o) => o,
            None => return Vec::new(),
        };
        let base = self.offset.unwrap_or(0) + 2;
        let rel = target_offset as i64 - base as i64;
        vec![Expr::Int {
            bits: 8,
            value: rel as i128,
        }]
    }

    fn fix_dst_offset(&mut self) {}
}

/// The fixture mnemonic module itself.
pub struct ToyIsa;

impl InstructionSet for ToyIsa {
    fn decode(
        &self,
        bytes: &[u8],
        _attrib: Option<&str>,
        offset: u64,
    ) -> Result<Box<dyn Instruction>, DecodeError> {
        if bytes.len() < 2 {
            return Err(DecodeError {
                reason: "truncated instruction".into(),
            });
        }
        let opcode = bytes[0];
        let operand = bytes[1] as i8;
        let op = match opcode {
            0x00 => Op::Nop,
            0x01 => Op::Jmp(operand),
            0x02 => Op::Jcc(operand),
            0x03 => Op::Call(operand),
            0x04 => Op::DJmp(operand),
            other => {
                return Err(DecodeError {
                    reason: format!("illegal opcode {:#04x}", other),
                })
            }
        };
        Ok(Box::new(ToyInstr {
            op,
            orig_bytes: bytes[..2].to_vec(),
            offset: Some(offset),
            data: None,
            target_name: None,
        }))
    }

    fn encode(&self, instr: &dyn Instruction, pool: Option<&SymbolPool>) -> Vec<Vec<u8>> {
        let opcode = instr.b().map(|b| b[0]).unwrap_or(0x00);
        let pool = match pool {
            Some(p) => p,
            None => return vec![instr.b().map(|b| b.to_vec()).unwrap_or_default()],
        };
        let rel = match instr.resolve_args_with_symbols(pool).first() {
            Some(Expr::Int { value, .. }) => *value as i8,
            _ => instr.b().and_then(|b| b.get(1)).map(|&b| b as i8).unwrap_or(0),
        };
        vec![vec![opcode, rel as u8]]
    }

    fn max_instruction_len(&self) -> usize {
        2
    }

    fn delayslot(&self) -> u32 {
        1
    }
}

/// A byte source backed by a plain in-memory buffer; reads past the end
/// come back empty, which the single-block disassembler treats as a
/// decode failure.
pub struct ByteVec(pub Vec<u8>);

impl ByteSource for ByteVec {
    fn read(&self, offset: u64, length: usize) -> std::io::Result<Vec<u8>> {
        let start = offset as usize;
        if start >= self.0.len() {
            return Ok(Vec::new());
        }
        let end = (start + length).min(self.0.len());
        Ok(self.0[start..end].to_vec())
    }
}
