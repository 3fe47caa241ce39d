//! The arena-backed instruction chain.
//!
//! [`InstructionStream`] owns every instruction of one method body in an
//! index-addressed vector. Index 0 is a reserved sentinel whose `next`/`prev`
//! links close the chain into a ring, so head and tail fall out of the same
//! two fields and appending is just "insert before the sentinel".
//!
//! Splicing ([`InstructionStream::insert_before`] /
//! [`InstructionStream::insert_after`]) relinks neighbors in place; existing
//! [`NodeId`]s - including branch targets and exception-region boundaries held
//! elsewhere - stay valid across any number of mutations. Offsets are computed
//! exclusively inside [`InstructionStream::encode`].

use std::collections::HashMap;
use std::fmt;

use crate::{
    assembly::{instruction::Instruction, opcode, opcodes, Immediate, OpCode, Operand, OperandKind},
    file::{Parser, Writer},
    metadata::token::Token,
    Result,
};

/// Index of an instruction node within its stream's arena.
///
/// Node ids are never invalidated: the arena only grows, and unlinking is not
/// an operation the rewriter needs. The reserved id 0 is the sentinel.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The reserved sentinel that marks both ends of the chain.
    pub const SENTINEL: NodeId = NodeId(0);

    /// `true` for the sentinel node.
    #[must_use]
    pub fn is_sentinel(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// Map from original byte offsets to the nodes decoded at them.
///
/// Produced by [`InstructionStream::decode`]; the method-body importer uses it
/// to resolve exception-region boundaries into node references.
pub type OffsetMap = HashMap<u32, NodeId>;

/// The mutable, arena-backed instruction sequence of one method body.
pub struct InstructionStream {
    nodes: Vec<Instruction>,
}

impl InstructionStream {
    /// Create an empty stream containing only the sentinel.
    #[must_use]
    pub fn new() -> Self {
        InstructionStream {
            nodes: vec![Instruction {
                opcode: &opcode::NOP,
                operand: Operand::None,
                offset: 0,
                prev: NodeId::SENTINEL,
                next: NodeId::SENTINEL,
            }],
        }
    }

    /// Number of instructions in the chain (the sentinel is not counted).
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// `true` if the chain holds no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// First instruction of the chain, if any.
    #[must_use]
    pub fn head(&self) -> Option<NodeId> {
        let first = self.nodes[0].next;
        (!first.is_sentinel()).then_some(first)
    }

    /// Last instruction of the chain, if any.
    #[must_use]
    pub fn tail(&self) -> Option<NodeId> {
        let last = self.nodes[0].prev;
        (!last.is_sentinel()).then_some(last)
    }

    /// `true` if `node` names an instruction of this stream.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        !node.is_sentinel() && (node.0 as usize) < self.nodes.len()
    }

    /// Borrow the instruction at `node`.
    ///
    /// # Panics
    /// Panics if `node` does not belong to this stream.
    #[must_use]
    pub fn get(&self, node: NodeId) -> &Instruction {
        &self.nodes[node.0 as usize]
    }

    /// Mutably borrow the instruction at `node`.
    ///
    /// # Panics
    /// Panics if `node` does not belong to this stream.
    pub fn get_mut(&mut self, node: NodeId) -> &mut Instruction {
        &mut self.nodes[node.0 as usize]
    }

    /// Iterate the chain from head to tail, yielding node ids.
    #[must_use]
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            stream: self,
            cur: self.nodes[0].next,
        }
    }

    /// Chain-order positions of every node, for ordering comparisons.
    ///
    /// The sentinel is absent; callers treat it as positive infinity (it marks
    /// "end of chain" in region boundaries).
    #[must_use]
    pub fn order_map(&self) -> HashMap<NodeId, usize> {
        self.iter().enumerate().map(|(i, n)| (n, i)).collect()
    }

    fn alloc(&mut self, opcode: &'static OpCode, operand: Operand) -> NodeId {
        #[allow(clippy::cast_possible_truncation)]
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Instruction {
            opcode,
            operand,
            offset: 0,
            prev: NodeId::SENTINEL,
            next: NodeId::SENTINEL,
        });
        id
    }

    /// Splice a new instruction into the chain directly before `anchor`.
    ///
    /// Every existing reference to `anchor` (branch targets, region boundaries)
    /// remains valid and now sits after the new instruction. Passing the
    /// sentinel appends at the tail.
    pub fn insert_before(
        &mut self,
        anchor: NodeId,
        opcode: &'static OpCode,
        operand: Operand,
    ) -> NodeId {
        let node = self.alloc(opcode, operand);
        let prev = self.nodes[anchor.0 as usize].prev;
        self.nodes[node.0 as usize].prev = prev;
        self.nodes[node.0 as usize].next = anchor;
        self.nodes[prev.0 as usize].next = node;
        self.nodes[anchor.0 as usize].prev = node;
        node
    }

    /// Splice a new instruction into the chain directly after `anchor`.
    ///
    /// Passing the sentinel prepends at the head.
    pub fn insert_after(
        &mut self,
        anchor: NodeId,
        opcode: &'static OpCode,
        operand: Operand,
    ) -> NodeId {
        let next = self.nodes[anchor.0 as usize].next;
        self.insert_before(next, opcode, operand)
    }

    /// Append an instruction at the tail of the chain.
    pub fn push_back(&mut self, opcode: &'static OpCode, operand: Operand) -> NodeId {
        self.insert_before(NodeId::SENTINEL, opcode, operand)
    }

    /// Replace the opcode of an existing node, keeping its operand and links.
    ///
    /// Used to turn `ret` into `leave` once the epilogue scaffolding exists.
    pub fn replace_opcode(&mut self, node: NodeId, opcode: &'static OpCode) {
        self.nodes[node.0 as usize].opcode = opcode;
    }

    /// Replace the operand of an existing node.
    pub fn set_operand(&mut self, node: NodeId, operand: Operand) {
        self.nodes[node.0 as usize].operand = operand;
    }

    /// Decode a raw CIL instruction stream into a chain.
    ///
    /// Compact branch forms are widened to their 4-byte-displacement
    /// equivalents so later splicing can never overflow a displacement. Branch
    /// and switch operands are resolved to node references; a displacement that
    /// does not land on an instruction boundary fails the decode.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown opcodes or unresolvable
    /// branch targets, [`crate::Error::OutOfBounds`] for a truncated stream.
    pub fn decode(bytes: &[u8]) -> Result<(Self, OffsetMap)> {
        let mut stream = Self::new();
        let mut offsets = OffsetMap::new();
        let mut parser = Parser::new(bytes);
        let mut branch_fixups: Vec<(NodeId, i64)> = Vec::new();
        let mut switch_fixups: Vec<(NodeId, Vec<i64>)> = Vec::new();

        while parser.has_more_data() {
            #[allow(clippy::cast_possible_truncation)]
            let start = parser.pos() as u32;

            let first = parser.read_u8()?;
            let op = if first == opcodes::FE_PREFIX {
                opcode::from_prefixed(parser.read_u8()?)
            } else {
                opcode::from_single(first)
            }
            .ok_or_else(|| {
                malformed_error!("Unknown opcode 0x{:02X} at offset {}", first, start)
            })?;

            let node = match op.operand {
                OperandKind::None => stream.push_back(op, Operand::None),
                OperandKind::Int8 => {
                    let imm = Immediate::Int8(parser.read_i8()?);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::UInt8 => {
                    let imm = Immediate::UInt8(parser.read_u8()?);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::UInt16 => {
                    let imm = Immediate::UInt16(parser.read_u16()?);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::Int32 => {
                    let imm = Immediate::Int32(parser.read_i32()?);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::Int64 => {
                    #[allow(clippy::cast_possible_wrap)]
                    let imm = Immediate::Int64(parser.read_u64()? as i64);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::Float32 => {
                    let imm = Immediate::Float32(parser.read_f32()?);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::Float64 => {
                    let imm = Immediate::Float64(parser.read_f64()?);
                    stream.push_back(op, Operand::Immediate(imm))
                }
                OperandKind::Token => {
                    let token = Token::new(parser.read_u32()?);
                    stream.push_back(op, Operand::Token(token))
                }
                OperandKind::Target8 => {
                    let disp = i64::from(parser.read_i8()?);
                    let node =
                        stream.push_back(opcode::widened(op), Operand::Target(NodeId::SENTINEL));
                    branch_fixups.push((node, parser.pos() as i64 + disp));
                    node
                }
                OperandKind::Target32 => {
                    let disp = i64::from(parser.read_i32()?);
                    let node = stream.push_back(op, Operand::Target(NodeId::SENTINEL));
                    branch_fixups.push((node, parser.pos() as i64 + disp));
                    node
                }
                OperandKind::Switch => {
                    let count = parser.read_u32()? as usize;
                    let mut displacements = Vec::with_capacity(count);
                    for _ in 0..count {
                        displacements.push(i64::from(parser.read_i32()?));
                    }
                    let base = parser.pos() as i64;
                    let targets = displacements.iter().map(|d| base + d).collect();
                    let node = stream.push_back(op, Operand::Switch(Vec::new()));
                    switch_fixups.push((node, targets));
                    node
                }
            };

            offsets.insert(start, node);
        }

        let resolve = |target: i64| -> Result<NodeId> {
            let offset = u32::try_from(target)
                .map_err(|_| malformed_error!("Branch target {} out of range", target))?;
            offsets.get(&offset).copied().ok_or_else(|| {
                malformed_error!("Branch target {} is not an instruction boundary", offset)
            })
        };

        for (node, target) in branch_fixups {
            let resolved = resolve(target)?;
            stream.set_operand(node, Operand::Target(resolved));
        }
        for (node, targets) in switch_fixups {
            let resolved = targets
                .into_iter()
                .map(|target| resolve(target))
                .collect::<Result<Vec<_>>>()?;
            stream.set_operand(node, Operand::Switch(resolved));
        }

        Ok((stream, offsets))
    }

    /// Encoded size of one instruction after branch widening.
    fn instruction_size(instr: &Instruction) -> usize {
        let operand_size = match (&instr.operand, instr.opcode.operand) {
            (Operand::Switch(targets), _) => 4 + targets.len() * 4,
            (_, kind) => kind.size().unwrap_or(0),
        };
        instr.opcode.opcode_size() + operand_size
    }

    /// Assign final byte offsets to every instruction.
    ///
    /// Compact branch forms that were spliced in manually are widened here,
    /// keeping export layout single-pass.
    fn layout(&mut self) -> u32 {
        let order: Vec<NodeId> = self.iter().collect();
        let mut offset: u32 = 0;
        for node in order {
            let widened = opcode::widened(self.nodes[node.0 as usize].opcode);
            self.nodes[node.0 as usize].opcode = widened;
            self.nodes[node.0 as usize].offset = offset;
            #[allow(clippy::cast_possible_truncation)]
            {
                offset += Self::instruction_size(&self.nodes[node.0 as usize]) as u32;
            }
        }
        offset
    }

    /// Serialize the chain to raw CIL bytes, computing offsets and patching
    /// every branch displacement.
    ///
    /// This is the only place byte offsets exist; after it returns, the
    /// `offset` field of every node holds its final position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a branch target references a node
    /// that is not part of this stream (a dangling target).
    pub fn encode(&mut self) -> Result<Vec<u8>> {
        let total = self.layout();
        let mut writer = Writer::with_capacity(total as usize);

        let order: Vec<NodeId> = self.iter().collect();
        for node in order {
            let instr = &self.nodes[node.0 as usize];
            if instr.opcode.is_prefixed() {
                writer.write_u8(opcodes::FE_PREFIX);
            }
            #[allow(clippy::cast_possible_truncation)]
            writer.write_u8((instr.opcode.value & 0xFF) as u8);

            let end = i64::from(instr.offset) + Self::instruction_size(instr) as i64;
            match &instr.operand {
                Operand::None => {}
                Operand::Immediate(imm) => match imm {
                    #[allow(clippy::cast_sign_loss)]
                    Immediate::Int8(v) => writer.write_u8(*v as u8),
                    Immediate::UInt8(v) => writer.write_u8(*v),
                    Immediate::UInt16(v) => writer.write_u16(*v),
                    Immediate::Int32(v) => writer.write_i32(*v),
                    #[allow(clippy::cast_sign_loss)]
                    Immediate::Int64(v) => writer.write_u64(*v as u64),
                    Immediate::Float32(v) => writer.write_u32(v.to_bits()),
                    Immediate::Float64(v) => writer.write_u64(v.to_bits()),
                },
                Operand::Token(token) => writer.write_u32(token.value()),
                Operand::Target(target) => {
                    let disp = i64::from(self.target_offset(*target)?) - end;
                    #[allow(clippy::cast_possible_truncation)]
                    writer.write_i32(disp as i32);
                }
                Operand::Switch(targets) => {
                    #[allow(clippy::cast_possible_truncation)]
                    writer.write_u32(targets.len() as u32);
                    for target in targets {
                        let disp = i64::from(self.target_offset(*target)?) - end;
                        #[allow(clippy::cast_possible_truncation)]
                        writer.write_i32(disp as i32);
                    }
                }
            }
        }

        Ok(writer.into_bytes())
    }

    fn target_offset(&self, target: NodeId) -> Result<u32> {
        if !self.contains(target) {
            return Err(malformed_error!("Dangling branch target - node {:?}", target));
        }
        Ok(self.nodes[target.0 as usize].offset)
    }
}

impl Default for InstructionStream {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.iter() {
            writeln!(f, "{}", self.get(node).opcode.mnemonic)?;
        }
        Ok(())
    }
}

/// Iterator over the chain in head-to-tail order.
pub struct Iter<'a> {
    stream: &'a InstructionStream,
    cur: NodeId,
}

impl Iterator for Iter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        if self.cur.is_sentinel() {
            return None;
        }
        let id = self.cur;
        self.cur = self.stream.get(id).next;
        Some(id)
    }
}
