//! Low-level blob parsing and emission primitives.
//!
//! Method bodies, signatures, and exception-handling sections all arrive from the host
//! as little-endian byte blobs with ECMA-335 compressed-integer encodings mixed in.
//! This module provides the two building blocks everything else decodes and encodes
//! through:
//!
//! - [`Parser`] - a positioned reader over a borrowed byte slice
//! - [`Writer`] - a growable output buffer with the matching write operations
//!
//! Neither type interprets what it reads; all structural knowledge lives in the
//! signature and method-body layers on top.

mod parser;
mod writer;

pub use parser::Parser;
pub use writer::Writer;
