//! The token/symbol cache: a memoized resolver from semantic signature keys to
//! emitted metadata tokens.
//!
//! Every reference the codegen needs in the instrumented module - assembly
//! references, type references to the probe support types, member references to
//! the begin/end entry points, generic instantiations - is resolved through one
//! [`TokenCache`] per module. Resolution is deterministic and idempotent:
//! resolving the same key twice returns the same token without re-emitting, and
//! the per-key shard locking of the underlying map extends that guarantee to
//! concurrent rewrites of different methods in the same module.
//!
//! Entries are append-only for the lifetime of the module's metadata; the cache
//! is discarded wholesale when the module unloads.

use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{host::MetadataEmit, metadata::token::Token, Result};

/// A normalized semantic identity for one emitted metadata reference.
///
/// Signature-carrying keys store the encoded blob, which makes key equality
/// exactly "would emit the same reference".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SymbolKey {
    /// An `AssemblyRef`, by assembly name
    AssemblyRef(String),
    /// A `TypeRef`, by resolution scope and full type name
    TypeRef {
        /// The resolution scope (an assembly reference)
        scope: Token,
        /// Full name of the type
        name: String,
    },
    /// A `MemberRef`, by parent, member name, and signature blob
    MemberRef {
        /// The owning type (`TypeRef` or `TypeSpec`)
        parent: Token,
        /// The member name
        name: String,
        /// The encoded member signature
        signature: Vec<u8>,
    },
    /// A `MethodSpec`, by generic method and instantiation blob
    MethodSpec {
        /// The generic method being instantiated
        method: Token,
        /// The encoded instantiation signature
        instantiation: Vec<u8>,
    },
    /// A `TypeSpec`, by type signature blob
    TypeSpec(Vec<u8>),
    /// A `StandAloneSig` row, by local-variable signature blob
    StandaloneSig(Vec<u8>),
}

/// Memoized resolve-or-emit cache in front of one module's [`MetadataEmit`]
/// service.
pub struct TokenCache {
    emit: Arc<dyn MetadataEmit>,
    entries: DashMap<SymbolKey, Token>,
}

impl TokenCache {
    /// Create an empty cache in front of the given emission service.
    #[must_use]
    pub fn new(emit: Arc<dyn MetadataEmit>) -> Self {
        TokenCache {
            emit,
            entries: DashMap::new(),
        }
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nothing has been emitted through this cache yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a semantic key to its token, emitting on first use.
    ///
    /// The key's shard stays locked while the underlying emission runs, so two
    /// threads racing on the same key can never emit twice. On emission failure
    /// the cache is left unmodified and the error propagates, aborting the
    /// current method's rewrite only.
    ///
    /// # Errors
    /// Returns [`crate::Error::EmitFailed`] if the metadata store refuses the
    /// reference.
    pub fn resolve(&self, key: SymbolKey) -> Result<Token> {
        if let Some(cached) = self.entries.get(&key) {
            return Ok(*cached);
        }

        match self.entries.entry(key) {
            Entry::Occupied(entry) => Ok(*entry.get()),
            Entry::Vacant(entry) => {
                let token = Self::emit_key(self.emit.as_ref(), entry.key())?;
                entry.insert(token);
                Ok(token)
            }
        }
    }

    fn emit_key(emit: &dyn MetadataEmit, key: &SymbolKey) -> Result<Token> {
        match key {
            SymbolKey::AssemblyRef(name) => emit.assembly_ref(name),
            SymbolKey::TypeRef { scope, name } => emit.type_ref(*scope, name),
            SymbolKey::MemberRef {
                parent,
                name,
                signature,
            } => emit.member_ref(*parent, name, signature),
            SymbolKey::MethodSpec {
                method,
                instantiation,
            } => emit.method_spec(*method, instantiation),
            SymbolKey::TypeSpec(signature) => emit.type_spec(signature),
            SymbolKey::StandaloneSig(signature) => emit.standalone_sig(signature),
        }
    }

    /// Resolve an `AssemblyRef` by name.
    ///
    /// # Errors
    /// See [`TokenCache::resolve`].
    pub fn assembly_ref(&self, name: &str) -> Result<Token> {
        self.resolve(SymbolKey::AssemblyRef(name.to_string()))
    }

    /// Resolve a `TypeRef` by scope and full name.
    ///
    /// # Errors
    /// See [`TokenCache::resolve`].
    pub fn type_ref(&self, scope: Token, name: &str) -> Result<Token> {
        self.resolve(SymbolKey::TypeRef {
            scope,
            name: name.to_string(),
        })
    }

    /// Resolve a `MemberRef` by parent, name, and signature blob.
    ///
    /// # Errors
    /// See [`TokenCache::resolve`].
    pub fn member_ref(&self, parent: Token, name: &str, signature: Vec<u8>) -> Result<Token> {
        self.resolve(SymbolKey::MemberRef {
            parent,
            name: name.to_string(),
            signature,
        })
    }

    /// Resolve a `MethodSpec` by method and instantiation blob.
    ///
    /// # Errors
    /// See [`TokenCache::resolve`].
    pub fn method_spec(&self, method: Token, instantiation: Vec<u8>) -> Result<Token> {
        self.resolve(SymbolKey::MethodSpec {
            method,
            instantiation,
        })
    }

    /// Resolve a `TypeSpec` by signature blob.
    ///
    /// # Errors
    /// See [`TokenCache::resolve`].
    pub fn type_spec(&self, signature: Vec<u8>) -> Result<Token> {
        self.resolve(SymbolKey::TypeSpec(signature))
    }

    /// Resolve a `StandAloneSig` row by signature blob.
    ///
    /// # Errors
    /// See [`TokenCache::resolve`].
    pub fn standalone_sig(&self, signature: Vec<u8>) -> Result<Token> {
        self.resolve(SymbolKey::StandaloneSig(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Emission fake that hands out sequential tokens and counts calls.
    struct CountingEmit {
        calls: AtomicU32,
        fail: bool,
    }

    impl CountingEmit {
        fn new() -> Self {
            CountingEmit {
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            CountingEmit {
                calls: AtomicU32::new(0),
                fail: true,
            }
        }

        fn next(&self, table: u8) -> Result<Token> {
            if self.fail {
                return Err(Error::EmitFailed("metadata store refused".into()));
            }
            let row = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(Token::new((u32::from(table) << 24) | row))
        }
    }

    impl MetadataEmit for CountingEmit {
        fn assembly_ref(&self, _name: &str) -> Result<Token> {
            self.next(crate::metadata::token::table::ASSEMBLY_REF)
        }
        fn type_ref(&self, _scope: Token, _name: &str) -> Result<Token> {
            self.next(crate::metadata::token::table::TYPE_REF)
        }
        fn member_ref(&self, _parent: Token, _name: &str, _sig: &[u8]) -> Result<Token> {
            self.next(crate::metadata::token::table::MEMBER_REF)
        }
        fn method_spec(&self, _method: Token, _inst: &[u8]) -> Result<Token> {
            self.next(crate::metadata::token::table::METHOD_SPEC)
        }
        fn type_spec(&self, _sig: &[u8]) -> Result<Token> {
            self.next(crate::metadata::token::table::TYPE_SPEC)
        }
        fn standalone_sig(&self, _sig: &[u8]) -> Result<Token> {
            self.next(crate::metadata::token::table::STANDALONE_SIG)
        }
    }

    #[test]
    fn resolve_is_idempotent() {
        let emit = Arc::new(CountingEmit::new());
        let cache = TokenCache::new(emit.clone());

        let first = cache.assembly_ref("Probes.Core").unwrap();
        let second = cache.assembly_ref("Probes.Core").unwrap();
        assert_eq!(first, second);
        assert_eq!(emit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn distinct_keys_emit_distinct_tokens() {
        let emit = Arc::new(CountingEmit::new());
        let cache = TokenCache::new(emit);

        let scope = cache.assembly_ref("Probes.Core").unwrap();
        let a = cache.type_ref(scope, "ProbeState").unwrap();
        let b = cache.type_ref(scope, "ProbeReturn`1").unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn member_ref_keyed_by_signature() {
        let emit = Arc::new(CountingEmit::new());
        let cache = TokenCache::new(emit.clone());

        let parent = Token::new(0x0100_0001);
        let a = cache.member_ref(parent, "BeginInvocation", vec![0x10, 0x01]).unwrap();
        let b = cache.member_ref(parent, "BeginInvocation", vec![0x10, 0x02]).unwrap();
        let c = cache.member_ref(parent, "BeginInvocation", vec![0x10, 0x01]).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
        assert_eq!(emit.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_emission_leaves_cache_unmodified() {
        let cache = TokenCache::new(Arc::new(CountingEmit::failing()));
        assert!(matches!(
            cache.assembly_ref("Unresolvable"),
            Err(Error::EmitFailed(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_resolution_emits_once() {
        let emit = Arc::new(CountingEmit::new());
        let cache = Arc::new(TokenCache::new(emit.clone()));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                scope.spawn(move || cache.assembly_ref("Probes.Core").unwrap());
            }
        });

        assert_eq!(emit.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }
}
