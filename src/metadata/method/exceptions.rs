//! Exception-handling region descriptors.
//!
//! Regions describe try/catch/filter/finally/fault structure in terms of
//! instruction nodes. Boundaries follow the half-open convention: `try_begin`
//! and `handler_begin` are inclusive, `try_end` and `handler_end` are exclusive
//! (the first node after the range). The sentinel is a valid end marker meaning
//! "end of chain". Offsets only come into existence when the owning body is
//! exported.

use bitflags::bitflags;

use crate::{assembly::NodeId, metadata::token::Token, Result};

bitflags! {
    /// Flags of one method-body extra data section (ECMA-335 II.25.4.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u8 {
        /// The section contains exception handling data
        const EHTABLE = 0x1;
        /// Reserved, shall be 0
        const OPT_ILTABLE = 0x2;
        /// The section uses the fat encoding
        const FAT_FORMAT = 0x40;
        /// Another section follows this one
        const MORE_SECTS = 0x80;
    }
}

/// Kind of an exception-handling region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RegionKind {
    /// A typed catch clause; the region carries the exception class token
    Catch,
    /// A filter clause; the region carries the filter-begin node
    Filter,
    /// A finally clause, run on both normal and exceptional exit
    Finally,
    /// A fault clause, run on exceptional exit only
    Fault,
}

impl RegionKind {
    /// Decode the clause kind from serialized clause flags.
    pub(crate) fn from_clause_flags(flags: u32) -> Result<RegionKind> {
        match flags & 0x7 {
            0x0 => Ok(RegionKind::Catch),
            0x1 => Ok(RegionKind::Filter),
            0x2 => Ok(RegionKind::Finally),
            0x4 => Ok(RegionKind::Fault),
            other => Err(malformed_error!(
                "Invalid exception clause flags - 0x{:X}",
                other
            )),
        }
    }

    /// Encode the clause kind into serialized clause flags.
    #[must_use]
    pub(crate) fn to_clause_flags(self) -> u32 {
        match self {
            RegionKind::Catch => 0x0,
            RegionKind::Filter => 0x1,
            RegionKind::Finally => 0x2,
            RegionKind::Fault => 0x4,
        }
    }
}

/// One exception-handling region of a method body.
///
/// The ordering invariant `try_begin ≺ try_end ≤ handler_begin ≺ handler_end`
/// (in chain order) holds for every region and is re-validated at export.
#[derive(Debug, Clone)]
pub struct ExceptionRegion {
    /// The clause kind
    pub kind: RegionKind,
    /// First node of the protected range (inclusive)
    pub try_begin: NodeId,
    /// First node after the protected range (exclusive; sentinel = end of chain)
    pub try_end: NodeId,
    /// First node of the handler (inclusive)
    pub handler_begin: NodeId,
    /// First node after the handler (exclusive; sentinel = end of chain)
    pub handler_end: NodeId,
    /// Exception class for [`RegionKind::Catch`] regions
    pub class_token: Option<Token>,
    /// First node of the filter expression for [`RegionKind::Filter`] regions
    pub filter_begin: Option<NodeId>,
}

impl ExceptionRegion {
    /// Construct a typed catch region.
    #[must_use]
    pub fn catch(
        class_token: Token,
        try_begin: NodeId,
        try_end: NodeId,
        handler_begin: NodeId,
        handler_end: NodeId,
    ) -> Self {
        ExceptionRegion {
            kind: RegionKind::Catch,
            try_begin,
            try_end,
            handler_begin,
            handler_end,
            class_token: Some(class_token),
            filter_begin: None,
        }
    }

    /// Construct a finally region.
    #[must_use]
    pub fn finally(
        try_begin: NodeId,
        try_end: NodeId,
        handler_begin: NodeId,
        handler_end: NodeId,
    ) -> Self {
        ExceptionRegion {
            kind: RegionKind::Finally,
            try_begin,
            try_end,
            handler_begin,
            handler_end,
            class_token: None,
            filter_begin: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clause_flags_roundtrip() {
        for kind in [
            RegionKind::Catch,
            RegionKind::Filter,
            RegionKind::Finally,
            RegionKind::Fault,
        ] {
            assert_eq!(
                RegionKind::from_clause_flags(kind.to_clause_flags()).unwrap(),
                kind
            );
        }
    }

    #[test]
    fn invalid_clause_flags() {
        assert!(RegionKind::from_clause_flags(0x7).is_err());
    }

    #[test]
    fn constructors() {
        let class = Token::new(0x0100_0001);
        let region = ExceptionRegion::catch(
            class,
            NodeId::SENTINEL,
            NodeId::SENTINEL,
            NodeId::SENTINEL,
            NodeId::SENTINEL,
        );
        assert_eq!(region.kind, RegionKind::Catch);
        assert_eq!(region.class_token, Some(class));

        let region = ExceptionRegion::finally(
            NodeId::SENTINEL,
            NodeId::SENTINEL,
            NodeId::SENTINEL,
            NodeId::SENTINEL,
        );
        assert_eq!(region.kind, RegionKind::Finally);
        assert_eq!(region.class_token, None);
    }
}
