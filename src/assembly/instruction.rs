use crate::{assembly::stream::NodeId, metadata::token::Token};

/// Kinds of inline operands a CIL instruction can carry.
///
/// Branch displacements get their own kinds ([`OperandKind::Target8`] /
/// [`OperandKind::Target32`]) because the rewriter treats them as node
/// references rather than numbers: their byte form only exists during decode
/// and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand present
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Unsigned 8-bit immediate
    UInt8,
    /// Unsigned 16-bit immediate
    UInt16,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 32-bit float immediate
    Float32,
    /// 64-bit float immediate
    Float64,
    /// Metadata token
    Token,
    /// 8-bit branch displacement
    Target8,
    /// 32-bit branch displacement
    Target32,
    /// Switch table: target count followed by 32-bit displacements
    Switch,
}

impl OperandKind {
    /// Size of the encoded operand in bytes, or `None` for the variable-size
    /// switch table.
    #[must_use]
    pub const fn size(&self) -> Option<usize> {
        match self {
            OperandKind::None => Some(0),
            OperandKind::Int8 | OperandKind::UInt8 | OperandKind::Target8 => Some(1),
            OperandKind::UInt16 => Some(2),
            OperandKind::Int32
            | OperandKind::Float32
            | OperandKind::Token
            | OperandKind::Target32 => Some(4),
            OperandKind::Int64 | OperandKind::Float64 => Some(8),
            OperandKind::Switch => None,
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum FlowType {
    /// Control continues at the next instruction
    Next,
    /// Control transfers to a callee and returns
    Call,
    /// Unconditional transfer to the branch target
    Branch,
    /// Conditional transfer: target or fall-through
    CondBranch,
    /// Control leaves the method
    Return,
    /// An exception is raised
    Throw,
    /// Control returns from a finally/fault/filter handler
    EndHandler,
}

/// Static metadata for one CIL opcode.
///
/// The full table lives in [`crate::assembly::opcode`]; instructions hold
/// `&'static OpCode` references into it, so opcode identity can be compared by
/// [`OpCode::value`].
#[derive(Debug, PartialEq, Eq)]
pub struct OpCode {
    /// The instruction mnemonic, e.g. `"ldarg.0"`
    pub mnemonic: &'static str,
    /// Encoded value: `0x00NN` for single-byte opcodes, `0xFENN` for prefixed ones
    pub value: u16,
    /// The inline operand kind
    pub operand: OperandKind,
    /// Control-flow behavior
    pub flow: FlowType,
}

impl OpCode {
    /// `true` if the opcode uses the two-byte `0xFE`-prefixed encoding.
    #[must_use]
    pub const fn is_prefixed(&self) -> bool {
        self.value > 0xFF
    }

    /// Size of the opcode bytes themselves (1 or 2).
    #[must_use]
    pub const fn opcode_size(&self) -> usize {
        if self.is_prefixed() {
            2
        } else {
            1
        }
    }
}

/// An immediate value embedded in an instruction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Immediate {
    /// Signed 8-bit immediate value
    Int8(i8),
    /// Unsigned 8-bit immediate value
    UInt8(u8),
    /// Unsigned 16-bit immediate value
    UInt16(u16),
    /// Signed 32-bit immediate value
    Int32(i32),
    /// Signed 64-bit immediate value
    Int64(i64),
    /// 32-bit floating point immediate value
    Float32(f32),
    /// 64-bit floating point immediate value
    Float64(f64),
}

/// A decoded instruction operand.
///
/// Branch targets are node references into the owning stream's arena; they stay
/// valid across arbitrary splicing and are turned back into displacements only
/// during export.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand present
    None,
    /// Immediate value embedded in the instruction
    Immediate(Immediate),
    /// Metadata token reference
    Token(Token),
    /// Branch target node
    Target(NodeId),
    /// Switch table of target nodes
    Switch(Vec<NodeId>),
}

/// One node of the instruction chain: an opcode, its decoded operand, and the
/// chain links.
///
/// The byte offset is only meaningful after [`crate::assembly::InstructionStream::encode`]
/// has run layout; during mutation it is stale and never consulted.
#[derive(Debug)]
pub struct Instruction {
    /// The opcode of this instruction
    pub opcode: &'static OpCode,
    /// The decoded operand
    pub operand: Operand,
    /// Byte offset within the method body; valid only after layout
    pub offset: u32,
    pub(crate) prev: NodeId,
    pub(crate) next: NodeId,
}

impl Instruction {
    /// Node that precedes this one in the chain (sentinel if this is the head).
    #[must_use]
    pub fn prev(&self) -> NodeId {
        self.prev
    }

    /// Node that follows this one in the chain (sentinel if this is the tail).
    #[must_use]
    pub fn next(&self) -> NodeId {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_sizes() {
        assert_eq!(OperandKind::None.size(), Some(0));
        assert_eq!(OperandKind::Int8.size(), Some(1));
        assert_eq!(OperandKind::UInt16.size(), Some(2));
        assert_eq!(OperandKind::Token.size(), Some(4));
        assert_eq!(OperandKind::Target32.size(), Some(4));
        assert_eq!(OperandKind::Int64.size(), Some(8));
        assert_eq!(OperandKind::Switch.size(), None);
    }

    #[test]
    fn opcode_sizes() {
        use crate::assembly::opcode;

        assert_eq!(opcode::NOP.opcode_size(), 1);
        assert!(!opcode::NOP.is_prefixed());
        assert_eq!(opcode::RETHROW.opcode_size(), 2);
        assert!(opcode::RETHROW.is_prefixed());
    }

    #[test]
    fn flow_type_display() {
        assert_eq!(FlowType::CondBranch.to_string(), "CondBranch");
    }
}
