//! Convenient re-exports of the most commonly used types and traits.
//!
//! This module provides a curated selection of the most frequently used types
//! from across the library, allowing for convenient glob imports.
//!
//! # Example
//!
//! ```rust
//! use cilweave::prelude::*;
//!
//! let probe = MethodProbe {
//!     target: ProbeTarget {
//!         assembly: WILDCARD.into(),
//!         type_name: "Svc.Client".into(),
//!         method_name: "Send".into(),
//!         param_types: vec![],
//!     },
//!     handler: ProbeHandler {
//!         assembly: "Probes.Core".into(),
//!         type_name: "Probes.Handler".into(),
//!     },
//! };
//! assert_eq!(probe.target.method_name, "Send");
//! ```

pub use crate::{
    definitions::{MethodProbe, ProbeHandler, ProbeTarget, WILDCARD},
    dispatch::{MethodIdentifier, MethodShape, RewriteRecord, RewriteState},
    engine::{Settings, Weaver},
    host::{
        FunctionControl, MetadataEmit, MetadataRead, MethodEntry, ModuleId, Recompiler,
        RuntimeEventSink,
    },
    metadata::{
        method::{ExceptionRegion, MethodBody, RegionKind},
        signatures::{MethodSig, TypeSig},
        token::Token,
    },
    pipeline::RewriteTicket,
    Error, Result,
};
