// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # cilweave
//!
//! A CIL bytecode instrumentation engine: `cilweave` rewrites compiled method
//! bodies of a managed runtime so that original execution is wrapped in
//! begin/end instrumentation calls (an around-advice pattern), driven by a
//! recompilation-request pipeline that decides which methods to rewrite and
//! guarantees each method is rewritten safely exactly once per activation.
//!
//! ## Architecture
//!
//! Leaf-first, the crate is organized as:
//!
//! - [`file`] - little-endian blob parsing and emission primitives
//! - [`metadata`] - tokens, structured signatures, the method-body model, and
//!   the token/symbol cache that idempotently emits references into the
//!   instrumented module
//! - [`assembly`] - the CIL opcode table and the arena-backed instruction
//!   chain whose branch targets are node references until export
//! - [`codegen`] - the begin/try/catch/finally/end transformation itself
//! - [`dispatch`] - per-module, per-method rewrite records and their state
//!   machine
//! - [`pipeline`] - probe matching over module member tables, the background
//!   offload worker, and recompilation submission
//! - [`host`] - the trait surface of the host runtime (metadata access,
//!   symbol emission, body import/export, recompilation control)
//! - [`engine`] - the [`Weaver`] context wiring everything together
//!
//! The host's physical metadata encoding, its notification wire format, and
//! its native plumbing are out of scope: they stay behind the [`host`] traits.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cilweave::prelude::*;
//! use std::sync::Arc;
//!
//! // recompiler: Arc<dyn Recompiler> provided by the host adapter
//! let weaver = Weaver::attach(recompiler, Settings::default())?;
//! weaver.register_probes(
//!     "http-client",
//!     vec![MethodProbe {
//!         target: ProbeTarget {
//!             assembly: "_".into(),
//!             type_name: "System.Net.Http.HttpClient".into(),
//!             method_name: "Send".into(),
//!             param_types: vec!["_".into(), "System.Threading.CancellationToken".into()],
//!         },
//!         handler: ProbeHandler {
//!             assembly: "Probes.Core".into(),
//!             type_name: "Probes.Http.ClientHandler".into(),
//!         },
//!     }],
//! )?;
//!
//! // The host adapter forwards module-load and rewrite callbacks:
//! // weaver.module_loaded(module, reader, emit);
//! // weaver.rewrite_requested(method, control)?;
//! # Ok::<(), cilweave::Error>(())
//! ```
//!
//! ## Failure posture
//!
//! Every failure is caught at the smallest possible scope - one candidate, one
//! method, one module - and logged through the `log` facade. A failure never
//! aborts a registration batch, the offload worker, or other in-flight
//! rewrites; the affected method simply runs uninstrumented, and the guarded
//! begin/end calls inside an instrumented body fall through to the original
//! code if the instrumentation itself throws.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests across the crate
#[cfg(test)]
pub(crate) mod test;

pub mod assembly;
pub mod codegen;
pub mod definitions;
pub mod dispatch;
pub mod engine;
pub mod file;
pub mod host;
pub mod metadata;
pub mod pipeline;
pub mod prelude;

/// `cilweave` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is
/// always [`Error`]. Used consistently throughout the crate for all fallible
/// operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `cilweave` Error type
///
/// The main error type for all operations in this crate, covering blob
/// parsing, probe matching, metadata emission, and body import/export.
pub use error::Error;

/// The instrumentation engine context and its configuration.
///
/// See [`engine::Weaver`] for the rewrite flow.
pub use engine::{Settings, Weaver};
