//! The mutable method-body model: instruction chain, local-variable slots, and
//! exception-handling regions.
//!
//! A [`MethodBody`] is created by importing one host-provided raw body at the
//! start of a rewrite invocation, mutated in place by the codegen, exported
//! exactly once, and discarded - it never persists across invocations.
//!
//! # Key Types
//!
//! - [`MethodBody`] - import / mutate / export of one body
//! - [`ExceptionRegion`] / [`RegionKind`] - structural try/handler descriptors
//!   whose boundaries are instruction nodes, not offsets

mod body;
mod exceptions;

pub use body::{BodyFlags, MethodBody};
pub use exceptions::{ExceptionRegion, RegionKind, SectionFlags};
