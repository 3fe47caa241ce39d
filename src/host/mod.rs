//! The host runtime collaborator surface.
//!
//! Everything the engine needs from the managed runtime is expressed as a trait
//! in this module; the crate never touches the host's physical metadata format,
//! its notification wire format, or its COM plumbing. A host adapter implements
//! [`MetadataRead`], [`MetadataEmit`], [`FunctionControl`], and [`Recompiler`],
//! and drives the engine through the [`RuntimeEventSink`] capability interface.
//!
//! All records are rebuilt from scratch on process start; nothing on this
//! boundary persists.

use std::fmt;
use std::sync::Arc;

use crate::{dispatch::MethodIdentifier, metadata::token::Token, Result};

/// Opaque identity of a loaded module within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module:{:#x}", self.0)
    }
}

/// One method row from a module's member table, as surfaced by [`MetadataRead`].
///
/// Carries exactly the shape information the matcher and the rewriter need:
/// identity, names, the raw signature blob, and the declaring-type traits that
/// drive the unsupported-construct guards.
#[derive(Debug, Clone)]
pub struct MethodEntry {
    /// The method's `MethodDef` token
    pub token: Token,
    /// Token of the declaring type
    pub declaring_type: Token,
    /// Full name of the declaring type, e.g. `"System.Net.Http.HttpClient"`
    pub type_name: String,
    /// The method name
    pub name: String,
    /// The raw method signature blob
    pub signature: Vec<u8>,
    /// The method has no `this` pointer
    pub is_static: bool,
    /// The declaring type is a value type
    pub declaring_is_value_type: bool,
    /// Number of generic parameters on the declaring type
    pub declaring_generic_params: u32,
}

/// Read access to one module's metadata, provided by the host.
///
/// Implementations must be callable from arbitrary threads; the matching stage
/// runs both on caller threads and on the offload worker.
pub trait MetadataRead: Send + Sync {
    /// Name of the assembly this module belongs to.
    fn assembly_name(&self) -> &str;

    /// Enumerate the module's methods for probe matching.
    fn methods(&self) -> Vec<MethodEntry>;

    /// Look up one method by token.
    ///
    /// # Errors
    /// Returns [`crate::Error::LookupFailure`] if the token does not name a
    /// method in this module.
    fn method_entry(&self, token: Token) -> Result<MethodEntry>;

    /// Resolve the full name of a type referenced from a signature.
    ///
    /// # Errors
    /// Returns [`crate::Error::LookupFailure`] if the token cannot be resolved.
    fn type_name(&self, token: Token) -> Result<String>;

    /// Fetch the signature blob behind a `StandAloneSig` token (local-variable
    /// signatures).
    ///
    /// # Errors
    /// Returns [`crate::Error::LookupFailure`] if the token cannot be resolved.
    fn standalone_signature(&self, token: Token) -> Result<Vec<u8>>;
}

/// Symbol emission into one module's metadata, provided by the host.
///
/// Every method is expected to be idempotent on the host side or cheap enough
/// to call repeatedly; the token cache in front of it guarantees each distinct
/// reference is only emitted once per module regardless.
pub trait MetadataEmit: Send + Sync {
    /// Emit (or find) an `AssemblyRef` for the named assembly.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the reference cannot be created,
    /// e.g. the assembly is unresolvable.
    fn assembly_ref(&self, name: &str) -> Result<Token>;

    /// Emit a `TypeRef` scoped to an assembly reference.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the reference cannot be created.
    fn type_ref(&self, scope: Token, name: &str) -> Result<Token>;

    /// Emit a `MemberRef` with the given signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the reference cannot be created.
    fn member_ref(&self, parent: Token, name: &str, signature: &[u8]) -> Result<Token>;

    /// Emit a `MethodSpec` instantiating a generic method.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the reference cannot be created.
    fn method_spec(&self, method: Token, instantiation: &[u8]) -> Result<Token>;

    /// Emit a `TypeSpec` for the given type signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the reference cannot be created.
    fn type_spec(&self, signature: &[u8]) -> Result<Token>;

    /// Emit a `StandAloneSig` row for a local-variable signature blob.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the row cannot be created.
    fn standalone_sig(&self, signature: &[u8]) -> Result<Token>;
}

/// The per-invocation body import/export handle the host supplies for one
/// rewrite.
///
/// A control is attached to exactly one method's dispatch record for the
/// duration of one rewrite invocation and discarded afterwards.
pub trait FunctionControl: Send {
    /// Fetch the method's current raw body bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImportFailed`] if the body is unavailable.
    fn body(&self) -> Result<Vec<u8>>;

    /// Replace the method's body with newly produced bytes.
    ///
    /// This is the single mutation the host ever observes from a rewrite.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportFailed`] if the host assembler rejects the
    /// body (inconsistent stack depth, bad offsets).
    fn replace_body(&mut self, body: &[u8]) -> Result<()>;
}

/// The host's recompilation API.
pub trait Recompiler: Send + Sync {
    /// Request recompilation of a batch of methods, returning how many were
    /// accepted.
    ///
    /// # Errors
    /// Returns an error if the host rejects the batch as a whole.
    fn request_recompilation(&self, methods: &[MethodIdentifier]) -> Result<usize>;

    /// Ask the host to restore the original bodies of a batch of methods.
    ///
    /// # Errors
    /// Returns an error if the host rejects the request.
    fn request_revert(&self, methods: &[MethodIdentifier]) -> Result<()>;
}

/// Capability interface for host runtime notifications.
///
/// A host adapter holds one or more sinks in an ordered collection and
/// broadcasts every event to each of them; the engine is one such sink.
/// Implementations must tolerate being called on arbitrary runtime threads.
pub trait RuntimeEventSink: Send + Sync {
    /// A module finished loading and its metadata services are available.
    fn module_loaded(
        &self,
        module: ModuleId,
        reader: Arc<dyn MetadataRead>,
        emit: Arc<dyn MetadataEmit>,
    );

    /// A module is about to unload; all references into it must be dropped.
    fn module_unloading(&self, module: ModuleId);

    /// A method is about to be compiled. `safe_to_block` indicates whether the
    /// current thread may perform blocking work.
    fn method_compilation_started(&self, method: MethodIdentifier, safe_to_block: bool);
}
