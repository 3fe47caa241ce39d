//! The engine context: explicit attach-time wiring of dispatch table, probe
//! registry, offload worker, and host services.
//!
//! A [`Weaver`] is created once when the host attaches and torn down explicitly
//! at shutdown; collaborators receive it by reference instead of reaching
//! through ambient global state, which keeps embedding (and tests) hermetic.
//! It implements [`RuntimeEventSink`], so a host adapter can broadcast module
//! and compilation events straight into it.
//!
//! # Rewrite flow
//!
//! 1. [`Weaver::register_probes`] stores definitions (idempotently by id).
//! 2. [`Weaver::request_rewrite`] / module-load notifications run the matching
//!    stage and submit `(module, method)` batches to the host [`Recompiler`].
//! 3. The host later calls back per method with a function-control handle;
//!    [`Weaver::rewrite_requested`] imports the body, runs the codegen, and
//!    exports the instrumented body through the control.
//!
//! Every failure in step 3 is scoped to that one method: the control is
//! released, the record returns to its registered state, and the method simply
//! runs uninstrumented.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::{
    codegen::{instrument, RewriteContext},
    definitions::MethodProbe,
    dispatch::{DispatchTable, MethodIdentifier, ModuleTable, RewriteRecord},
    host::{FunctionControl, MetadataEmit, MetadataRead, ModuleId, Recompiler, RuntimeEventSink},
    metadata::method::MethodBody,
    pipeline::{self, OffloadWorker, RewriteTicket},
    Error, Result,
};

/// Engine configuration, constructed by the embedder and injected at attach
/// time.
///
/// There is no in-crate environment parsing; the embedder decides where these
/// values come from.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Allow instrumentation of methods with by-reference parameters.
    pub byref_probes: bool,
    /// Assembly that resolves `System.Exception` and `System.Object` in
    /// instrumented modules.
    pub corlib_assembly: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            byref_probes: false,
            corlib_assembly: "System.Runtime".to_string(),
        }
    }
}

/// The instrumentation engine.
///
/// Owns the dispatch table, the probe registry, and the background offload
/// worker; borrows the host's recompilation API. One instance per process
/// attach.
pub struct Weaver {
    settings: Settings,
    recompiler: Arc<dyn Recompiler>,
    dispatch: DispatchTable,
    registry: Mutex<HashMap<String, Vec<Arc<MethodProbe>>>>,
    worker: OffloadWorker,
}

impl Weaver {
    /// Create the engine at host attach time.
    ///
    /// # Errors
    /// Returns [`crate::Error::IoError`] if the offload worker thread cannot
    /// be spawned.
    pub fn attach(recompiler: Arc<dyn Recompiler>, settings: Settings) -> Result<Weaver> {
        Ok(Weaver {
            settings,
            recompiler,
            dispatch: DispatchTable::new(),
            registry: Mutex::new(HashMap::new()),
            worker: OffloadWorker::start()?,
        })
    }

    /// The engine settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Tear the engine down: stop the worker and drop every module record.
    ///
    /// Pending offloaded work completes first. Called explicitly at host
    /// shutdown; dropping the engine has the same effect.
    pub fn detach(&self) {
        self.worker.shutdown();
        if let Ok(tables) = self.dispatch.modules() {
            for table in tables {
                let _ = self.dispatch.remove_module(table.id());
            }
        }
    }

    /// Register a batch of probes under an id, idempotently.
    ///
    /// Returns `false` (and does nothing) if the id is already registered, so
    /// repeated registration performs no duplicate dispatch-table work.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry mutex is poisoned.
    pub fn register_probes(&self, id: &str, probes: Vec<MethodProbe>) -> Result<bool> {
        let mut registry = self.registry.lock().map_err(|_| Error::LockError)?;
        if registry.contains_key(id) {
            debug!("probe batch {id} already registered");
            return Ok(false);
        }
        registry.insert(id.to_string(), probes.into_iter().map(Arc::new).collect());
        Ok(true)
    }

    /// Snapshot of every registered probe across all ids.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the registry mutex is poisoned.
    pub fn registered_probes(&self) -> Result<Vec<Arc<MethodProbe>>> {
        let registry = self.registry.lock().map_err(|_| Error::LockError)?;
        Ok(registry.values().flatten().cloned().collect())
    }

    /// Match `probes` against the given loaded modules and submit the combined
    /// batch to the host, on the calling thread.
    ///
    /// # Errors
    /// Returns an error only if the host rejects the submission; per-candidate
    /// failures are recovered inside the matching stage.
    pub fn request_rewrite(
        &self,
        modules: &[ModuleId],
        probes: &[Arc<MethodProbe>],
    ) -> Result<usize> {
        let tables = self.tables_for(modules)?;
        pipeline::request_rewrite(&tables, probes, self.recompiler.as_ref())
    }

    /// Asynchronous form of [`Weaver::request_rewrite`]: the scan and
    /// submission run on the offload worker, and the returned ticket resolves
    /// to the submitted count.
    ///
    /// # Errors
    /// Returns [`crate::Error::Error`] if the worker has shut down.
    pub fn request_rewrite_async(
        &self,
        modules: &[ModuleId],
        probes: &[Arc<MethodProbe>],
    ) -> Result<RewriteTicket> {
        let tables = self.tables_for(modules)?;
        pipeline::request_rewrite_async(
            &self.worker,
            tables,
            probes.to_vec(),
            Arc::clone(&self.recompiler),
        )
    }

    fn tables_for(&self, modules: &[ModuleId]) -> Result<Vec<Arc<ModuleTable>>> {
        let mut tables = Vec::with_capacity(modules.len());
        for module in modules {
            if let Some(table) = self.dispatch.module(*module)? {
                tables.push(table);
            } else {
                debug!("{module} is not loaded, skipping");
            }
        }
        Ok(tables)
    }

    /// The host's per-method rewrite callback: attach the control, produce the
    /// instrumented body, and export it.
    ///
    /// On failure the control is released, the record returns to `Registered`,
    /// and the error is returned after logging - the method runs uninstrumented
    /// and nothing else is affected.
    ///
    /// # Errors
    /// Propagates the rewrite-scoped error taxonomy
    /// ([`crate::Error::UnsupportedConstruct`], [`crate::Error::EmitFailed`],
    /// [`crate::Error::ImportFailed`], [`crate::Error::ExportFailed`],
    /// [`crate::Error::LookupFailure`], [`crate::Error::ControlBusy`]).
    pub fn rewrite_requested(
        &self,
        method: MethodIdentifier,
        control: Box<dyn FunctionControl>,
    ) -> Result<()> {
        let table = self
            .dispatch
            .module(method.module)?
            .ok_or_else(|| Error::LookupFailure(format!("{} is not loaded", method.module)))?;
        let record = table
            .record(method.method)
            .ok_or_else(|| Error::LookupFailure(format!("no rewrite record for {method}")))?;

        record.attach_control(control)?;
        match self.perform_rewrite(&table, &record) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("rewrite of {method} failed, leaving it uninstrumented - {e}");
                let _ = record.abort_rewrite();
                Err(e)
            }
        }
    }

    fn perform_rewrite(&self, table: &ModuleTable, record: &RewriteRecord) -> Result<()> {
        let probe = record
            .probes()?
            .into_iter()
            .next()
            .ok_or_else(|| Error::LookupFailure("record has no attached probes".to_string()))?;

        let raw = record.control_body()?;
        let locals_token = MethodBody::local_var_sig_token(&raw)?;
        let locals_blob = if locals_token.is_null() {
            None
        } else {
            Some(
                table
                    .reader()
                    .standalone_signature(locals_token)
                    .map_err(|e| Error::ImportFailed(e.to_string()))?,
            )
        };

        let mut body = MethodBody::import(&raw, locals_blob.as_deref())?;
        instrument(
            &mut body,
            &RewriteContext {
                signature: record.signature(),
                shape: record.shape(),
                probe: probe.as_ref(),
                cache: table.cache(),
                settings: &self.settings,
            },
        )?;
        let exported = body.export(table.cache())?;

        record.apply_rewrite(&exported)?;
        debug!("applied rewrite for {}", record.identifier());
        Ok(())
    }

    /// Record a host-requested de-instrumentation of a method.
    ///
    /// # Errors
    /// Returns [`crate::Error::LookupFailure`] if the method has no record, or
    /// the record's state error if no rewrite was applied.
    pub fn rewrite_reverted(&self, method: MethodIdentifier) -> Result<()> {
        let table = self
            .dispatch
            .module(method.module)?
            .ok_or_else(|| Error::LookupFailure(format!("{} is not loaded", method.module)))?;
        let record = table
            .record(method.method)
            .ok_or_else(|| Error::LookupFailure(format!("no rewrite record for {method}")))?;
        record.revert()
    }

    /// The number of loaded modules currently tracked.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the module-table mutex is
    /// poisoned.
    pub fn module_count(&self) -> Result<usize> {
        Ok(self.dispatch.modules()?.len())
    }

    /// Look up the dispatch record for a method, if one exists.
    ///
    /// # Errors
    /// Returns [`crate::Error::LockError`] if the module-table mutex is
    /// poisoned.
    pub fn record(&self, method: MethodIdentifier) -> Result<Option<Arc<RewriteRecord>>> {
        Ok(self
            .dispatch
            .module(method.module)?
            .and_then(|table| table.record(method.method)))
    }
}

impl RuntimeEventSink for Weaver {
    fn module_loaded(
        &self,
        module: ModuleId,
        reader: Arc<dyn MetadataRead>,
        emit: Arc<dyn MetadataEmit>,
    ) {
        let table = Arc::new(ModuleTable::new(module, reader, emit));
        if let Err(e) = self.dispatch.insert_module(Arc::clone(&table)) {
            warn!("failed to register {module} - {e}");
            return;
        }
        debug!("{module} loaded");

        // Match already-registered definitions against the new module off the
        // callback thread; load notifications must not block.
        let probes = match self.registered_probes() {
            Ok(probes) if !probes.is_empty() => probes,
            Ok(_) => return,
            Err(e) => {
                warn!("cannot read probe registry - {e}");
                return;
            }
        };
        let recompiler = Arc::clone(&self.recompiler);
        let enqueued = self.worker.enqueue(move || {
            match pipeline::request_rewrite(&[table], &probes, recompiler.as_ref()) {
                Ok(count) => debug!("module load matching submitted {count} method(s)"),
                Err(e) => warn!("module load matching failed - {e}"),
            }
        });
        if let Err(e) = enqueued {
            warn!("cannot offload module load matching - {e}");
        }
    }

    fn module_unloading(&self, module: ModuleId) {
        match self.dispatch.remove_module(module) {
            Ok(Some(table)) => {
                debug!("{module} unloaded, {} record(s) discarded", table.record_count());
            }
            Ok(None) => {}
            Err(e) => warn!("failed to evict {module} - {e}"),
        }
    }

    fn method_compilation_started(&self, method: MethodIdentifier, safe_to_block: bool) {
        let record = match self.record(method) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("cannot look up {method} - {e}");
                return;
            }
        };
        if record.state().ok() != Some(crate::dispatch::RewriteState::Registered) {
            return;
        }

        if safe_to_block {
            if let Err(e) = self.recompiler.request_recompilation(&[method]) {
                warn!("recompilation request for {method} failed - {e}");
            }
        } else {
            let recompiler = Arc::clone(&self.recompiler);
            let enqueued = self.worker.enqueue(move || {
                if let Err(e) = recompiler.request_recompilation(&[method]) {
                    warn!("recompilation request for {method} failed - {e}");
                }
            });
            if let Err(e) = enqueued {
                warn!("cannot offload recompilation request for {method} - {e}");
            }
        }
    }
}

impl Drop for Weaver {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{ProbeHandler, ProbeTarget};

    struct NullRecompiler;

    impl Recompiler for NullRecompiler {
        fn request_recompilation(&self, methods: &[MethodIdentifier]) -> Result<usize> {
            Ok(methods.len())
        }
        fn request_revert(&self, _methods: &[MethodIdentifier]) -> Result<()> {
            Ok(())
        }
    }

    fn sample_probes() -> Vec<MethodProbe> {
        vec![MethodProbe {
            target: ProbeTarget {
                assembly: "_".into(),
                type_name: "Svc.Client".into(),
                method_name: "Send".into(),
                param_types: Vec::new(),
            },
            handler: ProbeHandler {
                assembly: "Probes.Core".into(),
                type_name: "Probes.Handler".into(),
            },
        }]
    }

    #[test]
    fn registration_is_idempotent() {
        let weaver = Weaver::attach(Arc::new(NullRecompiler), Settings::default()).unwrap();
        assert!(weaver.register_probes("http", sample_probes()).unwrap());
        assert!(!weaver.register_probes("http", sample_probes()).unwrap());
        assert_eq!(weaver.registered_probes().unwrap().len(), 1);
    }

    #[test]
    fn request_rewrite_skips_unloaded_modules() {
        let weaver = Weaver::attach(Arc::new(NullRecompiler), Settings::default()).unwrap();
        let probes: Vec<_> = sample_probes().into_iter().map(Arc::new).collect();
        let count = weaver.request_rewrite(&[ModuleId(42)], &probes).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn rewrite_requested_without_record_is_lookup_failure() {
        let weaver = Weaver::attach(Arc::new(NullRecompiler), Settings::default()).unwrap();
        struct NoControl;
        impl FunctionControl for NoControl {
            fn body(&self) -> Result<Vec<u8>> {
                Ok(Vec::new())
            }
            fn replace_body(&mut self, _body: &[u8]) -> Result<()> {
                Ok(())
            }
        }

        let method = MethodIdentifier {
            module: ModuleId(1),
            method: crate::metadata::token::Token::new(0x0600_0001),
        };
        assert!(matches!(
            weaver.rewrite_requested(method, Box::new(NoControl)),
            Err(Error::LookupFailure(_))
        ));
    }
}
