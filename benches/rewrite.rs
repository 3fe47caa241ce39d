use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use criterion::{criterion_group, criterion_main, Criterion};

use cilweave::{
    codegen::{instrument, RewriteContext},
    definitions::{MethodProbe, ProbeHandler, ProbeTarget},
    dispatch::MethodShape,
    host::MetadataEmit,
    metadata::{
        cache::TokenCache,
        method::MethodBody,
        signatures::SignatureParser,
        token::{table, Token},
    },
    Result, Settings,
};

struct BenchEmit {
    next_row: AtomicU32,
    signatures: Mutex<HashMap<Token, Vec<u8>>>,
}

impl BenchEmit {
    fn new() -> Self {
        BenchEmit {
            next_row: AtomicU32::new(1),
            signatures: Mutex::new(HashMap::new()),
        }
    }

    fn next(&self, table_id: u8) -> Token {
        let row = self.next_row.fetch_add(1, Ordering::Relaxed);
        Token::new((u32::from(table_id) << 24) | row)
    }
}

impl MetadataEmit for BenchEmit {
    fn assembly_ref(&self, _name: &str) -> Result<Token> {
        Ok(self.next(table::ASSEMBLY_REF))
    }
    fn type_ref(&self, _scope: Token, _name: &str) -> Result<Token> {
        Ok(self.next(table::TYPE_REF))
    }
    fn member_ref(&self, _parent: Token, _name: &str, _signature: &[u8]) -> Result<Token> {
        Ok(self.next(table::MEMBER_REF))
    }
    fn method_spec(&self, _method: Token, _instantiation: &[u8]) -> Result<Token> {
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

fn bench_rewrite(c: &mut Criterion) {
    let cache = TokenCache::new(Arc::new(BenchEmit::new()));
    let settings = Settings::default();
    let probe = MethodProbe {
        target: ProbeTarget {
            assembly: "_".into(),
            type_name: "Svc.Worker".into(),
            method_name: "Bar".into(),
            param_types: vec!["System.Int32".into(), "System.Int32".into()],
        },
        handler: ProbeHandler {
            assembly: "Probes.Core".into(),
            type_name: "Probes.Handler".into(),
        },
    };
    let signature = SignatureParser::new(&[0x20, 0x02, 0x08, 0x08, 0x08])
        .parse_method_signature()
        .unwrap();
    let shape = MethodShape {
        is_static: false,
        declaring_type: Token::new(0x0200_0001),
        declaring_is_value_type: false,
        declaring_generic_params: 0,
    };

    // instance int Bar(int, int) { return a + b; }
    let raw = [0x12_u8, 0x03, 0x04, 0x58, 0x2A];

    c.bench_function("instrument_and_export", |b| {
        b.iter(|| {
            let mut body = MethodBody::import(&raw, None).unwrap();
            instrument(
                &mut body,
                &RewriteContext {
                    signature: &signature,
                    shape,
                    probe: &probe,
                    cache: &cache,
                    settings: &settings,
                },
            )
            .unwrap();
            body.export(&cache).unwrap()
        });
    });

    c.bench_function("import_only", |b| {
        b.iter(|| MethodBody::import(&raw, None).unwrap());
    });
}

criterion_group!(benches, bench_rewrite);
criterion_main!(benches);
