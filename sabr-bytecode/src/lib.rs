//! The flat bytecode shared by the compiler and the VM.
//!
//! A program is a plain sequence of ops. On the wire each op is one opcode
//! byte, followed by exactly eight little-endian operand bytes iff the
//! opcode belongs to the operand-bearing set; there is no header, no
//! checksum, and no version. Jump operands are byte offsets into this
//! encoding, so [`Bytecode`] tracks the byte position of every op.

pub mod opcode;

use std::fmt::Write as _;

use sabr_foundation::value::Value;
use thiserror::Error;

pub use opcode::Opcode;

/// A single decoded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Op {
    pub opcode: Opcode,
    /// Meaningful iff `opcode.has_operand()`; zero otherwise.
    pub operand: Value,
}

impl Op {
    pub fn new(opcode: Opcode) -> Self {
        Self {
            opcode,
            operand: Value::ZERO,
        }
    }

    pub fn with_operand(opcode: Opcode, operand: Value) -> Self {
        Self { opcode, operand }
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown opcode {byte:#04x} at byte offset {offset}")]
    UnknownOpcode { byte: u8, offset: u64 },
    #[error("bytecode ends in the middle of the operand of the op at byte offset {offset}")]
    Truncated { offset: u64 },
}

/// An op sequence plus the byte offset of every op.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    ops: Vec<Op>,
    positions: Vec<u64>,
    len_bytes: u64,
}

impl Bytecode {
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends an op and returns its index.
    pub fn push(&mut self, op: Op) -> usize {
        let index = self.ops.len();
        self.ops.push(op);
        self.positions.push(self.len_bytes);
        self.len_bytes += op.opcode.encoded_len();
        index
    }

    /// Number of ops emitted so far; the next op gets this index.
    pub fn current_index(&self) -> usize {
        self.ops.len()
    }

    /// Byte offset the next op will be emitted at.
    pub fn current_pos(&self) -> u64 {
        self.len_bytes
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn op(&self, index: usize) -> Op {
        self.ops[index]
    }

    /// Byte offset of the op at `index`.
    pub fn position_of(&self, index: usize) -> u64 {
        self.positions[index]
    }

    /// Maps a byte offset back to an op index, if it is the start of an op.
    pub fn index_of_pos(&self, pos: u64) -> Option<usize> {
        self.positions.binary_search(&pos).ok()
    }

    /// Back-patches the operand of the op at `index`.
    pub fn patch(&mut self, index: usize, operand: Value) {
        debug_assert!(self.ops[index].opcode.has_operand());
        self.ops[index].operand = operand;
    }

    /// Rewrites an op in place. The replacement must have the same encoded
    /// width, or every later byte offset would shift.
    pub fn rewrite(&mut self, index: usize, opcode: Opcode, operand: Value) {
        debug_assert_eq!(
            self.ops[index].opcode.encoded_len(),
            opcode.encoded_len(),
            "rewrite must preserve encoded width"
        );
        self.ops[index] = Op::with_operand(opcode, operand);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.len_bytes as usize);
        for op in &self.ops {
            bytes.push(op.opcode as u8);
            if op.opcode.has_operand() {
                bytes.extend_from_slice(&op.operand.as_bytes());
            }
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut bytecode = Self::new();
        let mut offset = 0usize;
        while offset < bytes.len() {
            let opcode = Opcode::from_byte(bytes[offset]).ok_or(DecodeError::UnknownOpcode {
                byte: bytes[offset],
                offset: offset as u64,
            })?;
            let op = if opcode.has_operand() {
                let operand = bytes
                    .get(offset + 1..offset + 9)
                    .ok_or(DecodeError::Truncated {
                        offset: offset as u64,
                    })?;
                Op::with_operand(
                    opcode,
                    Value::from_bytes(operand.try_into().expect("slice is 8 bytes")),
                )
            } else {
                Op::new(opcode)
            };
            bytecode.push(op);
            offset += opcode.encoded_len() as usize;
        }
        Ok(bytecode)
    }

    /// Renders an `index / byte offset / mnemonic / operand` listing.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (index, op) in self.ops.iter().enumerate() {
            let _ = write!(
                out,
                "{index:5}\t{pos:5}\t{mnemonic:<14}",
                pos = self.positions[index],
                mnemonic = op.opcode.mnemonic(),
            );
            if op.opcode.has_operand() {
                let _ = write!(out, "\t{}", op.operand.as_u64());
            }
            out.push('\n');
        }
        out
    }
}
