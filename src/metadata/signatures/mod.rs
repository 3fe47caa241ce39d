//! Structured signature model for method, local-variable, and type signatures.
//!
//! Signatures arrive from the host as ECMA-335 compressed blobs and leave this
//! crate the same way, but in between they live as tagged trees ([`TypeSig`],
//! [`MethodSig`], [`LocalSig`]) so that no layer above this one ever does
//! byte-offset arithmetic on a signature. The [`SignatureParser`] turns blobs
//! into trees (totally: full success or an error, never a partial parse); the
//! encoder functions compile trees back to blobs at the export boundary only.
//!
//! # Example
//!
//! ```rust
//! use cilweave::metadata::signatures::SignatureParser;
//!
//! // static int32 (int32, int32)
//! let blob = [0x00, 0x02, 0x08, 0x08, 0x08];
//! let sig = SignatureParser::new(&blob).parse_method_signature()?;
//! assert!(!sig.has_this);
//! assert_eq!(sig.params.len(), 2);
//! # Ok::<(), cilweave::Error>(())
//! ```

mod encoder;
mod parser;
mod types;

pub use encoder::{
    encode_local_signature, encode_method_ref_signature, encode_method_spec_signature,
    encode_type, encode_type_spec_signature,
};
pub use parser::SignatureParser;
pub use types::{LocalSig, LocalVar, MethodSig, ParamSig, TypeSig};
