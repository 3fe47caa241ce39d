//! Shared functionality which is used in unit tests across the crate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::{host::MetadataEmit, metadata::token::Token, Result};

/// In-memory stand-in for a module's symbol-emission service.
///
/// Hands out sequential tokens in the right table, counts emissions so tests
/// can assert idempotence, and remembers standalone-signature blobs so exported
/// bodies can be re-imported.
pub(crate) struct FakeHost {
    next_row: AtomicU32,
    emissions: AtomicU32,
    signatures: Mutex<HashMap<Token, Vec<u8>>>,
}

impl FakeHost {
    pub(crate) fn new() -> Self {
        FakeHost {
            next_row: AtomicU32::new(1),
            emissions: AtomicU32::new(0),
            signatures: Mutex::new(HashMap::new()),
        }
    }

    fn next(&self, table: u8) -> Token {
        self.emissions.fetch_add(1, Ordering::SeqCst);
        let row = self.next_row.fetch_add(1, Ordering::SeqCst);
        Token::new((u32::from(table) << 24) | row)
    }

    /// Total number of emissions performed, across all tables.
    pub(crate) fn emission_count(&self) -> u32 {
        self.emissions.load(Ordering::SeqCst)
    }

    /// The blob behind an emitted `StandAloneSig` token.
    pub(crate) fn signature_blob(&self, token: Token) -> Option<Vec<u8>> {
        self.signatures.lock().unwrap().get(&token).cloned()
    }
}

impl MetadataEmit for FakeHost {
    fn assembly_ref(&self, _name: &str) -> Result<Token> {
        Ok(self.next(crate::metadata::token::table::ASSEMBLY_REF))
    }

    fn type_ref(&self, _scope: Token, _name: &str) -> Result<Token> {
        Ok(self.next(crate::metadata::token::table::TYPE_REF))
    }

    fn member_ref(&self, _parent: Token, _name: &str, _signature: &[u8]) -> Result<Token> {
        Ok(self.next(crate::metadata::token::table::MEMBER_REF))
    }

    fn method_spec(&self, _method: Token, _instantiation: &[u8]) -> Result<Token> {
        Ok(self.next(crate::metadata::token::table::METHOD_SPEC))
    }

    fn type_spec(&self, _signature: &[u8]) -> Result<Token> {
        Ok(self.next(crate::metadata::token::table::TYPE_SPEC))
    }

    fn standalone_sig(&self, signature: &[u8]) -> Result<Token> {
        let token = self.next(crate::metadata::token::table::STANDALONE_SIG);
        self.signatures
            .lock()
            .unwrap()
            .insert(token, signature.to_vec());
        Ok(token)
    }
}
