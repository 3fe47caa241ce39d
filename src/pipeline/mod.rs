//! The recompilation request pipeline: match probes against loaded modules and
//! submit rewrite batches to the host.
//!
//! Two stages, per the engine's concurrency model:
//!
//! - **Matching** scans module member tables for probe targets and
//!   creates/updates dispatch records. It runs either on the calling thread
//!   (fanned out across modules with `rayon`) or on the offload worker when the
//!   caller must not block.
//! - **Submission** hands `(module, method)` batches to the host's
//!   recompilation API, synchronously or through the worker with a
//!   [`RewriteTicket`] completion future.

pub mod matcher;
mod worker;

pub use worker::OffloadWorker;

use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver};
use log::debug;
use rayon::prelude::*;

use crate::{
    definitions::MethodProbe,
    dispatch::{MethodIdentifier, ModuleTable},
    host::Recompiler,
    Error, Result,
};

/// Completion future of an asynchronous match-and-submit request.
///
/// Resolves to the number of methods submitted for recompilation once the
/// offload worker has processed the request.
pub struct RewriteTicket {
    rx: Receiver<Result<usize>>,
}

impl RewriteTicket {
    /// Block until the request completes and return the submitted count.
    ///
    /// # Errors
    /// Propagates the pipeline's error, or [`crate::Error::Error`] if the
    /// worker shut down before completing the request.
    pub fn wait(self) -> Result<usize> {
        self.rx
            .recv()
            .map_err(|_| Error::Error("offload worker dropped the request".to_string()))?
    }
}

/// Match `probes` against each module and submit one combined batch to the
/// host's recompilation API, on the calling thread.
///
/// Matching fans out across modules; per-candidate failures inside a module are
/// recovered there and never abort the batch.
///
/// # Errors
/// Returns an error only if the host rejects the submission as a whole.
pub fn request_rewrite(
    tables: &[Arc<ModuleTable>],
    probes: &[Arc<MethodProbe>],
    recompiler: &dyn Recompiler,
) -> Result<usize> {
    if probes.is_empty() || tables.is_empty() {
        return Ok(0);
    }

    let batch: Vec<MethodIdentifier> = tables
        .par_iter()
        .flat_map(|table| matcher::match_module(table, probes))
        .collect();

    if batch.is_empty() {
        return Ok(0);
    }

    debug!("submitting {} methods for recompilation", batch.len());
    recompiler.request_recompilation(&batch)
}

/// Enqueue a match-and-submit request on the offload worker and return its
/// completion ticket.
///
/// Use this from runtime callback threads that must not block on member-table
/// scans.
///
/// # Errors
/// Returns [`crate::Error::Error`] if the worker has shut down.
pub fn request_rewrite_async(
    worker: &OffloadWorker,
    tables: Vec<Arc<ModuleTable>>,
    probes: Vec<Arc<MethodProbe>>,
    recompiler: Arc<dyn Recompiler>,
) -> Result<RewriteTicket> {
    let (tx, rx) = bounded(1);
    worker.enqueue(move || {
        let result = request_rewrite(&tables, &probes, recompiler.as_ref());
        let _ = tx.send(result);
    })?;
    Ok(RewriteTicket { rx })
}
