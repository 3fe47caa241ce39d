//! The rewrite dispatch table: per-module, per-method records tracking rewrite
//! state.
//!
//! A [`RewriteRecord`] exists at most once per [`MethodIdentifier`] and carries
//! the parsed signature, the method's shape traits, the list of matched probes,
//! and - only while a rewrite is in flight - the host's function-control
//! handle. The per-method state machine is
//!
//! ```text
//! Registered -> ControlAttached -> RewriteApplied
//!                     ^                  |
//!                     +----- revert -----+
//! ```
//!
//! with module unload discarding every record of a module atomically under the
//! process-wide module-table lock.
//!
//! Records for one module live in a lock-free ordered map keyed by method
//! token; the module metadata services and the token cache ride along in the
//! same [`ModuleTable`] so a rewrite resolves everything through a single
//! lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crossbeam_skiplist::SkipMap;

use crate::{
    definitions::MethodProbe,
    host::{FunctionControl, MetadataEmit, MetadataRead, ModuleId},
    metadata::{cache::TokenCache, signatures::MethodSig, token::Token},
    Error, Result,
};

/// The process-unique key of one method: module identity plus method token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodIdentifier {
    /// The owning module
    pub module: ModuleId,
    /// The method's `MethodDef` token within that module
    pub method: Token,
}

impl fmt::Display for MethodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module, self.method)
    }
}

/// Shape traits of a method that drive the codegen guards.
#[derive(Debug, Clone, Copy)]
pub struct MethodShape {
    /// The method has no `this` pointer
    pub is_static: bool,
    /// Token of the declaring type
    pub declaring_type: Token,
    /// The declaring type is a value type
    pub declaring_is_value_type: bool,
    /// Number of generic parameters on the declaring type
    pub declaring_generic_params: u32,
}

/// Per-method rewrite state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RewriteState {
    /// Matched by at least one probe; no rewrite in flight
    Registered,
    /// A function-control handle is attached; a rewrite is in flight
    ControlAttached,
    /// The instrumented body has been exported to the host
    RewriteApplied,
}

struct RecordInner {
    state: RewriteState,
    probes: Vec<Arc<MethodProbe>>,
    control: Option<Box<dyn FunctionControl>>,
}

/// The dispatch record of one method.
///
/// Identity, signature, and shape are immutable; probes, state, and the
/// in-flight control handle live behind one mutex. The control-handle slot
/// enforces the at-most-one-in-flight-rewrite guarantee per method.
pub struct RewriteRecord {
    identifier: MethodIdentifier,
    signature: MethodSig,
    shape: MethodShape,
    inner: Mutex<RecordInner>,
}

impl RewriteRecord {
    /// Create a record in the `Registered` state with no probes attached.
    #[must_use]
    pub fn new(identifier: MethodIdentifier, signature: MethodSig, shape: MethodShape) -> Self {
        RewriteRecord {
            identifier,
            signature,
            shape,
            inner: Mutex::new(RecordInner {
                state: RewriteState::Registered,
                probes: Vec::new(),
                control: None,
            }),
        }
    }

    /// The method this record tracks.
    #[must_use]
    pub fn identifier(&self) -> MethodIdentifier {
        self.identifier
    }

    /// The parsed method signature.
    #[must_use]
    pub fn signature(&self) -> &MethodSig {
        &self.signature
    }

    /// The method's shape traits.
    #[must_use]
    pub fn shape(&self) -> MethodShape {
        self.shape
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RecordInner>> {
        self.inner.lock().map_err(|_| Error::LockError)
    }

    /// Current rewrite state.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the record mutex is poisoned.
    pub fn state(&self) -> Result<RewriteState> {
        Ok(self.lock()?.state)
    }

    /// Attach a newly matched probe.
    ///
    /// Returns `false` if an equal probe was already attached; previously
    /// attached probes are never discarded.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the record mutex is poisoned.
    pub fn attach_probe(&self, probe: Arc<MethodProbe>) -> Result<bool> {
        let mut inner = self.lock()?;
        if inner.probes.iter().any(|p| **p == *probe) {
            return Ok(false);
        }
        inner.probes.push(probe);
        Ok(true)
    }

    /// Snapshot of the attached probes.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the record mutex is poisoned.
    pub fn probes(&self) -> Result<Vec<Arc<MethodProbe>>> {
        Ok(self.lock()?.probes.clone())
    }

    /// Attach the host's function-control handle for one rewrite invocation.
    ///
    /// # Errors
    /// Returns [`crate::Error::ControlBusy`] if a control is already attached -
    /// the host never observes two rewrites racing on the same method.
    pub fn attach_control(&self, control: Box<dyn FunctionControl>) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.control.is_some() {
            return Err(Error::ControlBusy(self.identifier.to_string()));
        }
        inner.control = Some(control);
        inner.state = RewriteState::ControlAttached;
        Ok(())
    }

    /// Fetch the method's current body through the attached control.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImportFailed`] if no control is attached or the
    /// host cannot provide the body.
    pub fn control_body(&self) -> Result<Vec<u8>> {
        let inner = self.lock()?;
        inner
            .control
            .as_ref()
            .ok_or_else(|| Error::ImportFailed("no function control attached".to_string()))?
            .body()
    }

    /// Export the rewritten body through the attached control and finish the
    /// invocation: state moves to `RewriteApplied`, the control is released.
    ///
    /// # Errors
    /// Returns [`crate::Error::ExportFailed`] if no control is attached or the
    /// host assembler rejects the body; the control is released either way.
    pub fn apply_rewrite(&self, body: &[u8]) -> Result<()> {
        let mut inner = self.lock()?;
        let mut control = inner
            .control
            .take()
            .ok_or_else(|| Error::ExportFailed("no function control attached".to_string()))?;
        match control.replace_body(body) {
            Ok(()) => {
                inner.state = RewriteState::RewriteApplied;
                Ok(())
            }
            Err(e) => {
                inner.state = RewriteState::Registered;
                Err(e)
            }
        }
    }

    /// Abandon the in-flight rewrite, releasing the control and returning the
    /// record to `Registered`. The original body is retained by the host.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the record mutex is poisoned.
    pub fn abort_rewrite(&self) -> Result<()> {
        let mut inner = self.lock()?;
        inner.control = None;
        if inner.state == RewriteState::ControlAttached {
            inner.state = RewriteState::Registered;
        }
        Ok(())
    }

    /// Record a host-requested de-instrumentation: `RewriteApplied` moves back
    /// to `ControlAttached` so the next control can re-apply or drop the
    /// instrumentation.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if no rewrite has been applied.
    pub fn revert(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.state != RewriteState::RewriteApplied {
            return Err(Error::Error(format!(
                "cannot revert {} from state {}",
                self.identifier, inner.state
            )));
        }
        inner.state = RewriteState::ControlAttached;
        Ok(())
    }
}

/// Per-module dispatch state: the record map plus the module's metadata
/// services and token cache.
pub struct ModuleTable {
    id: ModuleId,
    reader: Arc<dyn MetadataRead>,
    cache: TokenCache,
    records: SkipMap<Token, Arc<RewriteRecord>>,
}

impl ModuleTable {
    /// Create the dispatch state for a freshly loaded module.
    #[must_use]
    pub fn new(id: ModuleId, reader: Arc<dyn MetadataRead>, emit: Arc<dyn MetadataEmit>) -> Self {
        ModuleTable {
            id,
            reader,
            cache: TokenCache::new(emit),
            records: SkipMap::new(),
        }
    }

    /// The module identity.
    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }

    /// The module's metadata read service.
    #[must_use]
    pub fn reader(&self) -> &Arc<dyn MetadataRead> {
        &self.reader
    }

    /// The module's token cache.
    #[must_use]
    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Look up the record for a method token.
    #[must_use]
    pub fn record(&self, method: Token) -> Option<Arc<RewriteRecord>> {
        self.records.get(&method).map(|entry| entry.value().clone())
    }

    /// Look up or lazily create the record for a method.
    ///
    /// Uniqueness per identifier is guaranteed: concurrent callers racing on
    /// the same token observe the same record.
    pub fn get_or_create_record(
        &self,
        method: Token,
        signature: MethodSig,
        shape: MethodShape,
    ) -> Arc<RewriteRecord> {
        if let Some(entry) = self.records.get(&method) {
            return entry.value().clone();
        }

        let identifier = MethodIdentifier {
            module: self.id,
            method,
        };
        self.records
            .get_or_insert(
                method,
                Arc::new(RewriteRecord::new(identifier, signature, shape)),
            )
            .value()
            .clone()
    }

    /// Number of records in this module.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Snapshot of all records, in token order.
    #[must_use]
    pub fn records(&self) -> Vec<Arc<RewriteRecord>> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

/// The process-wide dispatch table: one [`ModuleTable`] per loaded module.
///
/// The module map's mutex is the lock the concurrency model names: it is held
/// for every lookup-or-create and across unload eviction, so a rewrite can
/// never resolve a module that is concurrently being discarded.
pub struct DispatchTable {
    modules: Mutex<HashMap<ModuleId, Arc<ModuleTable>>>,
}

impl DispatchTable {
    /// Create an empty dispatch table.
    #[must_use]
    pub fn new() -> Self {
        DispatchTable {
            modules: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ModuleId, Arc<ModuleTable>>>> {
        self.modules.lock().map_err(|_| Error::LockError)
    }

    /// Register a freshly loaded module.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the module-table mutex is
    /// poisoned.
    pub fn insert_module(&self, table: Arc<ModuleTable>) -> Result<()> {
        self.lock()?.insert(table.id(), table);
        Ok(())
    }

    /// Discard a module and every record in it, atomically.
    ///
    /// Any rewrite still pending against the module fails fast on its next
    /// lookup.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the module-table mutex is
    /// poisoned.
    pub fn remove_module(&self, id: ModuleId) -> Result<Option<Arc<ModuleTable>>> {
        Ok(self.lock()?.remove(&id))
    }

    /// Look up a loaded module.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the module-table mutex is
    /// poisoned.
    pub fn module(&self, id: ModuleId) -> Result<Option<Arc<ModuleTable>>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    /// Snapshot of all loaded modules.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the module-table mutex is
    /// poisoned.
    pub fn modules(&self) -> Result<Vec<Arc<ModuleTable>>> {
        Ok(self.lock()?.values().cloned().collect())
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{ProbeHandler, ProbeTarget};
    use crate::test::FakeHost;

    struct NoopReader;

    impl MetadataRead for NoopReader {
        fn assembly_name(&self) -> &str {
            "Test.Assembly"
        }
        fn methods(&self) -> Vec<crate::host::MethodEntry> {
            Vec::new()
        }
        fn method_entry(&self, token: Token) -> Result<crate::host::MethodEntry> {
            Err(Error::LookupFailure(token.to_string()))
        }
        fn type_name(&self, token: Token) -> Result<String> {
            Err(Error::LookupFailure(token.to_string()))
        }
        fn standalone_signature(&self, token: Token) -> Result<Vec<u8>> {
            Err(Error::LookupFailure(token.to_string()))
        }
    }

    struct NoopControl;

    impl FunctionControl for NoopControl {
        fn body(&self) -> Result<Vec<u8>> {
            Ok(vec![0x06, 0x2A])
        }
        fn replace_body(&mut self, _body: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn sample_record() -> RewriteRecord {
        RewriteRecord::new(
            MethodIdentifier {
                module: ModuleId(1),
                method: Token::new(0x0600_0001),
            },
            MethodSig::default(),
            MethodShape {
                is_static: true,
                declaring_type: Token::new(0x0200_0001),
                declaring_is_value_type: false,
                declaring_generic_params: 0,
            },
        )
    }

    fn sample_probe(name: &str) -> Arc<MethodProbe> {
        Arc::new(MethodProbe {
            target: ProbeTarget {
                assembly: "_".into(),
                type_name: "T".into(),
                method_name: name.into(),
                param_types: Vec::new(),
            },
            handler: ProbeHandler {
                assembly: "Probes.Core".into(),
                type_name: "Probes.Handler".into(),
            },
        })
    }

    #[test]
    fn probe_accumulation_dedupes() {
        let record = sample_record();
        assert!(record.attach_probe(sample_probe("A")).unwrap());
        assert!(record.attach_probe(sample_probe("B")).unwrap());
        assert!(!record.attach_probe(sample_probe("A")).unwrap());
        assert_eq!(record.probes().unwrap().len(), 2);
    }

    #[test]
    fn control_exclusion() {
        let record = sample_record();
        record.attach_control(Box::new(NoopControl)).unwrap();
        assert_eq!(record.state().unwrap(), RewriteState::ControlAttached);
        assert!(matches!(
            record.attach_control(Box::new(NoopControl)),
            Err(Error::ControlBusy(_))
        ));
    }

    #[test]
    fn state_machine_happy_path() {
        let record = sample_record();
        assert_eq!(record.state().unwrap(), RewriteState::Registered);

        record.attach_control(Box::new(NoopControl)).unwrap();
        assert_eq!(record.control_body().unwrap(), vec![0x06, 0x2A]);
        record.apply_rewrite(&[0x2A]).unwrap();
        assert_eq!(record.state().unwrap(), RewriteState::RewriteApplied);

        // The control is released; another rewrite can attach.
        record.revert().unwrap();
        assert_eq!(record.state().unwrap(), RewriteState::ControlAttached);
        record.attach_control(Box::new(NoopControl)).unwrap();
    }

    #[test]
    fn abort_returns_to_registered() {
        let record = sample_record();
        record.attach_control(Box::new(NoopControl)).unwrap();
        record.abort_rewrite().unwrap();
        assert_eq!(record.state().unwrap(), RewriteState::Registered);
        assert!(record.control_body().is_err());
    }

    #[test]
    fn revert_requires_applied_state() {
        let record = sample_record();
        assert!(record.revert().is_err());
    }

    #[test]
    fn module_table_record_uniqueness() {
        let table = ModuleTable::new(
            ModuleId(7),
            Arc::new(NoopReader),
            Arc::new(FakeHost::new()),
        );

        let token = Token::new(0x0600_0010);
        let shape = MethodShape {
            is_static: false,
            declaring_type: Token::new(0x0200_0001),
            declaring_is_value_type: false,
            declaring_generic_params: 0,
        };
        let a = table.get_or_create_record(token, MethodSig::default(), shape);
        let b = table.get_or_create_record(token, MethodSig::default(), shape);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.record_count(), 1);
        assert_eq!(a.identifier().module, ModuleId(7));
    }

    #[test]
    fn dispatch_table_unload_discards_records() {
        let dispatch = DispatchTable::new();
        let table = Arc::new(ModuleTable::new(
            ModuleId(3),
            Arc::new(NoopReader),
            Arc::new(FakeHost::new()),
        ));
        dispatch.insert_module(table).unwrap();
        assert!(dispatch.module(ModuleId(3)).unwrap().is_some());

        let removed = dispatch.remove_module(ModuleId(3)).unwrap();
        assert!(removed.is_some());
        assert!(dispatch.module(ModuleId(3)).unwrap().is_none());
    }
}
