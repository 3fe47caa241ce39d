//! Import, mutation, and export of one CIL method body.
//!
//! [`MethodBody`] owns the three mutable parts of a body - the instruction
//! chain, the local-variable slot table, and the exception-region list - and
//! keeps every cross-reference between them consistent through arbitrary
//! splicing. Import parses the host's tiny/fat header, bytecode, and EH
//! sections into the model; export is the single place where offsets are
//! computed, regions are re-sorted into the loader's required order, and the
//! local-variable signature is re-emitted.
//!
//! # References
//! - ECMA-335 6th Edition, Partition II, Section 25.4 - Method Header Format

use bitflags::bitflags;

use crate::{
    assembly::{InstructionStream, NodeId, OffsetMap},
    file::{Parser, Writer},
    metadata::{
        cache::TokenCache,
        method::{ExceptionRegion, RegionKind, SectionFlags},
        signatures::{encode_local_signature, LocalSig, LocalVar, SignatureParser},
        token::Token,
    },
    Error, Result,
};

bitflags! {
    /// Flags of a method-body header (ECMA-335 II.25.4.4).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BodyFlags: u16 {
        /// Tiny header format
        const TINY_FORMAT = 0x2;
        /// Fat header format
        const FAT_FORMAT = 0x3;
        /// Extra data sections follow the code
        const MORE_SECTS = 0x8;
        /// Locals are zero-initialized on entry
        const INIT_LOCALS = 0x10;
    }
}

/// Size of a fat method header in bytes.
const FAT_HEADER_SIZE: usize = 12;
/// Default operand-stack depth implied by a tiny header.
const TINY_MAX_STACK: u16 = 8;

/// The mutable in-memory model of one method body.
///
/// Created by [`MethodBody::import`] at the start of a rewrite invocation,
/// driven through the mutation primitives by the codegen, serialized once by
/// [`MethodBody::export`], then discarded.
pub struct MethodBody {
    code: InstructionStream,
    locals: Vec<LocalVar>,
    regions: Vec<ExceptionRegion>,
    max_stack: u16,
    init_locals: bool,
}

impl MethodBody {
    /// Peek the `StandAloneSig` token of the local-variable signature without
    /// importing the body.
    ///
    /// The caller resolves the token to a blob through the module's metadata
    /// and passes it to [`MethodBody::import`]. Returns the null token for
    /// tiny-header bodies, which cannot have locals.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImportFailed`] if the header is malformed.
    pub fn local_var_sig_token(raw: &[u8]) -> Result<Token> {
        let mut parser = Parser::new(raw);
        let first = parser.read_u8().map_err(import_error)?;
        match BodyFlags::from_bits_truncate(u16::from(first & 0x3)) {
            BodyFlags::TINY_FORMAT => Ok(Token::new(0)),
            BodyFlags::FAT_FORMAT => {
                parser.seek(8).map_err(import_error)?;
                Ok(Token::new(parser.read_u32().map_err(import_error)?))
            }
            _ => Err(Error::ImportFailed(format!(
                "method header is neither fat nor tiny - 0x{first:02X}"
            ))),
        }
    }

    /// Import a host-provided raw body into the model.
    ///
    /// `locals_blob` is the local-variable signature blob behind the header's
    /// `StandAloneSig` token, resolved by the caller; `None` when the body
    /// declares no locals. Compact branches are widened during decode, and
    /// every branch target and region boundary is resolved to a node reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImportFailed`] if the header, bytecode, EH
    /// sections, or local signature are malformed.
    pub fn import(raw: &[u8], locals_blob: Option<&[u8]>) -> Result<MethodBody> {
        if raw.is_empty() {
            return Err(Error::ImportFailed("body data is empty".to_string()));
        }

        let first = raw[0];
        match BodyFlags::from_bits_truncate(u16::from(first & 0x3)) {
            BodyFlags::TINY_FORMAT => {
                let size_code = (first >> 2) as usize;
                if raw.len() < 1 + size_code {
                    return Err(Error::ImportFailed(
                        "tiny body is shorter than its declared code size".to_string(),
                    ));
                }

                let (code, _) = Self::decode_code(&raw[1..1 + size_code])?;
                Ok(MethodBody {
                    code,
                    locals: Vec::new(),
                    regions: Vec::new(),
                    max_stack: TINY_MAX_STACK,
                    init_locals: false,
                })
            }
            BodyFlags::FAT_FORMAT => Self::import_fat(raw, locals_blob),
            _ => Err(Error::ImportFailed(format!(
                "method header is neither fat nor tiny - 0x{first:02X}"
            ))),
        }
    }

    fn import_fat(raw: &[u8], locals_blob: Option<&[u8]>) -> Result<MethodBody> {
        let mut parser = Parser::new(raw);
        let first_duo = parser.read_u16().map_err(import_error)?;
        let flags = BodyFlags::from_bits_truncate(first_duo & 0x0FFF);
        let size_header = ((first_duo >> 12) * 4) as usize;
        let max_stack = parser.read_u16().map_err(import_error)?;
        let size_code = parser.read_u32().map_err(import_error)? as usize;
        let _local_var_sig_token = parser.read_u32().map_err(import_error)?;

        if size_header < FAT_HEADER_SIZE || raw.len() < size_header + size_code {
            return Err(Error::ImportFailed(
                "fat body is shorter than its declared sizes".to_string(),
            ));
        }

        let code_bytes = &raw[size_header..size_header + size_code];
        let (code, offsets) = Self::decode_code(code_bytes)?;

        let mut regions = Vec::new();
        if flags.contains(BodyFlags::MORE_SECTS) {
            let mut cursor = (size_header + size_code + 3) & !3;
            regions = Self::parse_eh_sections(raw, &mut cursor, &offsets, size_code)?;
        }

        let locals = match locals_blob {
            Some(blob) => SignatureParser::new(blob)
                .parse_local_signature()
                .map_err(import_error)?
                .locals,
            None => Vec::new(),
        };

        Ok(MethodBody {
            code,
            locals,
            regions,
            max_stack,
            init_locals: flags.contains(BodyFlags::INIT_LOCALS),
        })
    }

    fn decode_code(bytes: &[u8]) -> Result<(InstructionStream, OffsetMap)> {
        let (code, offsets) = InstructionStream::decode(bytes).map_err(import_error)?;
        if code.is_empty() {
            return Err(Error::ImportFailed("body has no instructions".to_string()));
        }
        Ok((code, offsets))
    }

    fn parse_eh_sections(
        raw: &[u8],
        cursor: &mut usize,
        offsets: &OffsetMap,
        code_size: usize,
    ) -> Result<Vec<ExceptionRegion>> {
        let mut regions = Vec::new();

        while raw.len() > *cursor + 4 {
            let section = SectionFlags::from_bits_truncate(raw[*cursor]);
            if !section.contains(SectionFlags::EHTABLE) {
                break;
            }

            if section.contains(SectionFlags::FAT_FORMAT) {
                let size = u32::from_le_bytes([
                    raw[*cursor + 1],
                    raw[*cursor + 2],
                    raw[*cursor + 3],
                    0,
                ]) as usize;
                if size < 4 || raw.len() < *cursor + size {
                    return Err(Error::ImportFailed(
                        "fat exception section overruns the body".to_string(),
                    ));
                }

                let mut parser = Parser::new(raw);
                parser.seek(*cursor + 4).map_err(import_error)?;
                for _ in 0..(size - 4) / 24 {
                    let flags = parser.read_u32().map_err(import_error)?;
                    let try_offset = parser.read_u32().map_err(import_error)?;
                    let try_length = parser.read_u32().map_err(import_error)?;
                    let handler_offset = parser.read_u32().map_err(import_error)?;
                    let handler_length = parser.read_u32().map_err(import_error)?;
                    let class_or_filter = parser.read_u32().map_err(import_error)?;
                    regions.push(Self::resolve_region(
                        flags,
                        try_offset,
                        try_length,
                        handler_offset,
                        handler_length,
                        class_or_filter,
                        offsets,
                        code_size,
                    )?);
                }
                *cursor += size;
            } else {
                let size = raw[*cursor + 1] as usize;
                if size < 4 || raw.len() < *cursor + size {
                    return Err(Error::ImportFailed(
                        "small exception section overruns the body".to_string(),
                    ));
                }

                let mut parser = Parser::new(raw);
                parser.seek(*cursor + 4).map_err(import_error)?;
                for _ in 0..(size - 4) / 12 {
                    let flags = u32::from(parser.read_u16().map_err(import_error)?);
                    let try_offset = u32::from(parser.read_u16().map_err(import_error)?);
                    let try_length = u32::from(parser.read_u8().map_err(import_error)?);
                    let handler_offset = u32::from(parser.read_u16().map_err(import_error)?);
                    let handler_length = u32::from(parser.read_u8().map_err(import_error)?);
                    let class_or_filter = parser.read_u32().map_err(import_error)?;
                    regions.push(Self::resolve_region(
                        flags,
                        try_offset,
                        try_length,
                        handler_offset,
                        handler_length,
                        class_or_filter,
                        offsets,
                        code_size,
                    )?);
                }
                *cursor += size;
            }

            if !section.contains(SectionFlags::MORE_SECTS) {
                break;
            }
        }

        Ok(regions)
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_region(
        flags: u32,
        try_offset: u32,
        try_length: u32,
        handler_offset: u32,
        handler_length: u32,
        class_or_filter: u32,
        offsets: &OffsetMap,
        code_size: usize,
    ) -> Result<ExceptionRegion> {
        let kind = RegionKind::from_clause_flags(flags).map_err(import_error)?;

        let node_at = |offset: u32| -> Result<NodeId> {
            offsets.get(&offset).copied().ok_or_else(|| {
                Error::ImportFailed(format!(
                    "exception boundary {offset} is not an instruction boundary"
                ))
            })
        };
        let end_node_at = |offset: u32| -> Result<NodeId> {
            if offset as usize == code_size {
                Ok(NodeId::SENTINEL)
            } else {
                node_at(offset)
            }
        };

        Ok(ExceptionRegion {
            kind,
            try_begin: node_at(try_offset)?,
            try_end: end_node_at(try_offset + try_length)?,
            handler_begin: node_at(handler_offset)?,
            handler_end: end_node_at(handler_offset + handler_length)?,
            class_token: match kind {
                RegionKind::Catch if class_or_filter != 0 => Some(Token::new(class_or_filter)),
                _ => None,
            },
            filter_begin: match kind {
                RegionKind::Filter => Some(node_at(class_or_filter)?),
                _ => None,
            },
        })
    }

    /// The instruction chain.
    #[must_use]
    pub fn instructions(&self) -> &InstructionStream {
        &self.code
    }

    /// The instruction chain, mutably.
    pub fn instructions_mut(&mut self) -> &mut InstructionStream {
        &mut self.code
    }

    /// The local-variable slots, in index order.
    #[must_use]
    pub fn locals(&self) -> &[LocalVar] {
        &self.locals
    }

    /// The exception regions, in insertion order.
    #[must_use]
    pub fn regions(&self) -> &[ExceptionRegion] {
        &self.regions
    }

    /// The exception regions, mutably.
    pub fn regions_mut(&mut self) -> &mut Vec<ExceptionRegion> {
        &mut self.regions
    }

    /// The declared operand-stack depth.
    #[must_use]
    pub fn max_stack(&self) -> u16 {
        self.max_stack
    }

    /// Raise the declared operand-stack depth to at least `depth`.
    pub fn raise_max_stack(&mut self, depth: u16) {
        self.max_stack = self.max_stack.max(depth);
    }

    /// Append a local-variable slot and return its index.
    ///
    /// The serialized signature blob only grows at export. Bodies gain
    /// zero-initialization the moment instrumentation locals exist.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportFailed`] if the slot table is full.
    pub fn alloc_local(&mut self, var: LocalVar) -> Result<u16> {
        let index = u16::try_from(self.locals.len())
            .map_err(|_| Error::ExportFailed("local slot table is full".to_string()))?;
        self.locals.push(var);
        self.init_locals = true;
        Ok(index)
    }

    /// Append an exception region.
    ///
    /// Regions are re-sorted globally at export; insertion order carries no
    /// meaning.
    pub fn add_region(&mut self, region: ExceptionRegion) {
        self.regions.push(region);
    }

    /// Serialize the model back to the host byte layout.
    ///
    /// Offsets are computed here and nowhere else. The emitted header is always
    /// fat, the EH table always uses the fat section encoding, and regions are
    /// sorted by ascending try-begin offset (ties broken by ascending try
    /// extent) as the host loader requires. A new local-variable signature is
    /// emitted through `cache` when slots exist.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportFailed`] for dangling nodes or region
    /// ordering violations, [`crate::Error::EmitFailed`] if the local signature
    /// cannot be emitted.
    pub fn export(&mut self, cache: &TokenCache) -> Result<Vec<u8>> {
        self.validate_regions()?;

        let code_bytes = self
            .code
            .encode()
            .map_err(|e| Error::ExportFailed(e.to_string()))?;
        #[allow(clippy::cast_possible_truncation)]
        let code_size = code_bytes.len() as u32;

        let locals_token = if self.locals.is_empty() {
            Token::new(0)
        } else {
            let blob = encode_local_signature(&LocalSig {
                locals: self.locals.clone(),
            })
            .map_err(|e| Error::ExportFailed(e.to_string()))?;
            cache.standalone_sig(blob)?
        };

        let mut clauses = Vec::with_capacity(self.regions.len());
        for region in &self.regions {
            clauses.push(self.serialize_region(region, code_size)?);
        }
        clauses.sort_by_key(|c| (c.try_offset, c.try_length));

        let mut flags = BodyFlags::FAT_FORMAT;
        if self.init_locals {
            flags |= BodyFlags::INIT_LOCALS;
        }
        if !clauses.is_empty() {
            flags |= BodyFlags::MORE_SECTS;
        }

        let mut writer = Writer::with_capacity(FAT_HEADER_SIZE + code_bytes.len() + 4);
        #[allow(clippy::cast_possible_truncation)]
        writer.write_u16(flags.bits() | ((FAT_HEADER_SIZE as u16 / 4) << 12));
        writer.write_u16(self.max_stack);
        writer.write_u32(code_size);
        writer.write_u32(locals_token.value());
        writer.write_bytes(&code_bytes);

        if !clauses.is_empty() {
            writer.align(4);

            let section_size = 4 + clauses.len() * 24;
            let section_size = u32::try_from(section_size)
                .map_err(|_| Error::ExportFailed("exception table too large".to_string()))?;
            if section_size > 0x00FF_FFFF {
                return Err(Error::ExportFailed("exception table too large".to_string()));
            }

            writer.write_u8((SectionFlags::EHTABLE | SectionFlags::FAT_FORMAT).bits());
            #[allow(clippy::cast_possible_truncation)]
            {
                writer.write_u8((section_size & 0xFF) as u8);
                writer.write_u8(((section_size >> 8) & 0xFF) as u8);
                writer.write_u8(((section_size >> 16) & 0xFF) as u8);
            }

            for clause in &clauses {
                writer.write_u32(clause.flags);
                writer.write_u32(clause.try_offset);
                writer.write_u32(clause.try_length);
                writer.write_u32(clause.handler_offset);
                writer.write_u32(clause.handler_length);
                writer.write_u32(clause.class_or_filter);
            }
        }

        Ok(writer.into_bytes())
    }

    /// Check the region ordering invariant against the current chain.
    fn validate_regions(&self) -> Result<()> {
        let order = self.code.order_map();
        let position = |node: NodeId| -> Result<usize> {
            if node.is_sentinel() {
                return Ok(usize::MAX);
            }
            order.get(&node).copied().ok_or_else(|| {
                Error::ExportFailed("exception region references a dangling node".to_string())
            })
        };

        for region in &self.regions {
            let try_begin = position(region.try_begin)?;
            let try_end = position(region.try_end)?;
            let handler_begin = position(region.handler_begin)?;
            let handler_end = position(region.handler_end)?;

            if region.try_begin.is_sentinel() || region.handler_begin.is_sentinel() {
                return Err(Error::ExportFailed(
                    "exception region begins at the sentinel".to_string(),
                ));
            }
            if !(try_begin < try_end && try_end <= handler_begin && handler_begin < handler_end) {
                return Err(Error::ExportFailed(format!(
                    "exception region ordering violated - try [{try_begin}, {try_end}), handler [{handler_begin}, {handler_end})"
                )));
            }
            if let Some(filter) = region.filter_begin {
                position(filter)?;
            }
        }

        Ok(())
    }

    fn serialize_region(&self, region: &ExceptionRegion, code_size: u32) -> Result<SerializedClause> {
        let offset_of = |node: NodeId| -> u32 {
            if node.is_sentinel() {
                code_size
            } else {
                self.code.get(node).offset
            }
        };

        let try_offset = offset_of(region.try_begin);
        let handler_offset = offset_of(region.handler_begin);
        let class_or_filter = match region.kind {
            RegionKind::Catch => region.class_token.map_or(0, |t| t.value()),
            RegionKind::Filter => {
                let filter = region.filter_begin.ok_or_else(|| {
                    Error::ExportFailed("filter region without a filter node".to_string())
                })?;
                offset_of(filter)
            }
            _ => 0,
        };

        Ok(SerializedClause {
            flags: region.kind.to_clause_flags(),
            try_offset,
            try_length: offset_of(region.try_end) - try_offset,
            handler_offset,
            handler_length: offset_of(region.handler_end) - handler_offset,
            class_or_filter,
        })
    }
}

struct SerializedClause {
    flags: u32,
    try_offset: u32,
    try_length: u32,
    handler_offset: u32,
    handler_length: u32,
    class_or_filter: u32,
}

fn import_error(error: Error) -> Error {
    match error {
        Error::ImportFailed(_) => error,
        other => Error::ImportFailed(other.to_string()),
    }
}
