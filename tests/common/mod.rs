//! In-memory host fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use cilweave::{
    dispatch::MethodIdentifier,
    host::{FunctionControl, MetadataEmit, MetadataRead, MethodEntry, Recompiler},
    metadata::token::{table, Token},
    Error, Result,
};

/// One module's metadata surface: a method table for matching, type names for
/// signature rendering, and a recording symbol-emission service.
pub struct FakeModule {
    assembly: String,
    methods: Vec<MethodEntry>,
    type_names: HashMap<Token, String>,
    next_row: AtomicU32,
    emissions: AtomicU32,
    signatures: Mutex<HashMap<Token, Vec<u8>>>,
    method_specs: Mutex<Vec<Vec<u8>>>,
}

impl FakeModule {
    pub fn new(assembly: &str) -> Self {
        FakeModule {
            assembly: assembly.to_string(),
            methods: Vec::new(),
            type_names: HashMap::new(),
            next_row: AtomicU32::new(1),
            emissions: AtomicU32::new(0),
            signatures: Mutex::new(HashMap::new()),
            method_specs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_method(mut self, entry: MethodEntry) -> Self {
        self.methods.push(entry);
        self
    }

    pub fn with_type_name(mut self, token: Token, name: &str) -> Self {
        self.type_names.insert(token, name.to_string());
        self
    }

    pub fn emission_count(&self) -> u32 {
        self.emissions.load(Ordering::SeqCst)
    }

    pub fn signature_blob(&self, token: Token) -> Option<Vec<u8>> {
        self.signatures.lock().unwrap().get(&token).cloned()
    }

    /// Instantiation blobs of every emitted `MethodSpec`, in emission order.
    pub fn method_spec_blobs(&self) -> Vec<Vec<u8>> {
        self.method_specs.lock().unwrap().clone()
    }

    fn next(&self, table_id: u8) -> Token {
        self.emissions.fetch_add(1, Ordering::SeqCst);
        let row = self.next_row.fetch_add(1, Ordering::SeqCst);
        Token::new((u32::from(table_id) << 24) | row)
    }
}

impl MetadataRead for FakeModule {
    fn assembly_name(&self) -> &str {
        &self.assembly
    }

    fn methods(&self) -> Vec<MethodEntry> {
        self.methods.clone()
    }

    fn method_entry(&self, token: Token) -> Result<MethodEntry> {
        self.methods
            .iter()
            .find(|m| m.token == token)
            .cloned()
            .ok_or_else(|| Error::LookupFailure(token.to_string()))
    }

    fn type_name(&self, token: Token) -> Result<String> {
        self.type_names
            .get(&token)
            .cloned()
            .ok_or_else(|| Error::LookupFailure(token.to_string()))
    }

    fn standalone_signature(&self, token: Token) -> Result<Vec<u8>> {
        self.signature_blob(token)
            .ok_or_else(|| Error::LookupFailure(token.to_string()))
    }
}

impl MetadataEmit for FakeModule {
    fn assembly_ref(&self, _name: &str) -> Result<Token> {
        Ok(self.next(table::ASSEMBLY_REF))
    }

    fn type_ref(&self, _scope: Token, _name: &str) -> Result<Token> {
        Ok(self.next(table::TYPE_REF))
    }

    fn member_ref(&self, _parent: Token, _name: &str, _signature: &[u8]) -> Result<Token> {
        Ok(self.next(table::MEMBER_REF))
    }

    fn method_spec(&self, _method: Token, instantiation: &[u8]) -> Result<Token> {
        self.method_specs
            .lock()
            .unwrap()
            .push(instantiation.to_vec());
        Ok(self.next(table::METHOD_SPEC))
    }

    fn type_spec(&self, _signature: &[u8]) -> Result<Token> {
        Ok(self.next(table::TYPE_SPEC))
    }

    fn standalone_sig(&self, signature: &[u8]) -> Result<Token> {
        let token = self.next(table::STANDALONE_SIG);
        self.signatures
            .lock()
            .unwrap()
            .insert(token, signature.to_vec());
        Ok(token)
    }
}

/// Records every submitted batch.
#[derive(Default)]
pub struct RecordingRecompiler {
    pub batches: Mutex<Vec<Vec<MethodIdentifier>>>,
}

impl RecordingRecompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<Vec<MethodIdentifier>> {
        self.batches.lock().unwrap().clone()
    }
}

impl Recompiler for RecordingRecompiler {
    fn request_recompilation(&self, methods: &[MethodIdentifier]) -> Result<usize> {
        self.batches.lock().unwrap().push(methods.to_vec());
        Ok(methods.len())
    }

    fn request_revert(&self, _methods: &[MethodIdentifier]) -> Result<()> {
        Ok(())
    }
}

/// A function control backed by a byte vector, exposing the replaced body
/// through shared state so tests can inspect it after the engine consumed the
/// control.
pub struct SharedControl {
    body: Vec<u8>,
    replaced: Arc<Mutex<Option<Vec<u8>>>>,
}

impl SharedControl {
    pub fn new(body: Vec<u8>) -> (Self, Arc<Mutex<Option<Vec<u8>>>>) {
        let replaced = Arc::new(Mutex::new(None));
        (
            SharedControl {
                body,
                replaced: Arc::clone(&replaced),
            },
            replaced,
        )
    }
}

impl FunctionControl for SharedControl {
    fn body(&self) -> Result<Vec<u8>> {
        Ok(self.body.clone())
    }

    fn replace_body(&mut self, body: &[u8]) -> Result<()> {
        *self.replaced.lock().unwrap() = Some(body.to_vec());
        Ok(())
    }
}

/// A `MethodEntry` builder for the common shapes the scenarios need.
pub fn method_entry(
    token: u32,
    type_name: &str,
    name: &str,
    signature: &[u8],
    is_static: bool,
    value_type: bool,
) -> MethodEntry {
    MethodEntry {
        token: Token::new(token),
        declaring_type: Token::new(0x0200_0001),
        type_name: type_name.to_string(),
        name: name.to_string(),
        signature: signature.to_vec(),
        is_static,
        declaring_is_value_type: value_type,
        declaring_generic_params: 0,
    }
}

/// Tiny-header raw body wrapping the given code bytes.
pub fn tiny_body(code: &[u8]) -> Vec<u8> {
    assert!(code.len() < 64);
    let mut raw = vec![((code.len() as u8) << 2) | 0x02];
    raw.extend_from_slice(code);
    raw
}
