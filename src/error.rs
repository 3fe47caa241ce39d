use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into two groups. Low-level parsing failures
/// ([`Error::Malformed`], [`Error::OutOfBounds`], [`Error::RecursionLimit`]) are raised by the
/// blob and instruction decoders and are usually wrapped into one of the rewrite-scoped
/// variants before they reach a caller. The rewrite-scoped variants map one-to-one onto the
/// failure taxonomy of the instrumentation engine:
///
/// - [`Error::LookupFailure`] - a type/member/signature could not be resolved; the candidate
///   method is skipped
/// - [`Error::SignatureMismatch`] - a candidate does not match a probe target; skipped
/// - [`Error::UnsupportedConstruct`] - the method shape cannot be instrumented safely; the
///   original body is retained
/// - [`Error::EmitFailed`] - the symbol cache could not emit a new metadata reference
/// - [`Error::ImportFailed`] / [`Error::ExportFailed`] - a method body could not be read from
///   or written back to the host
///
/// Every failure is scoped to a single method (or a single candidate); no variant aborts a
/// registration batch, the offload worker, or other in-flight rewrites.
#[derive(Error, Debug)]
pub enum Error {
    /// The input data is damaged and could not be parsed.
    ///
    /// Raised by the blob parser and instruction decoder when a structure does not
    /// conform to the expected encoding. The error carries the source location where
    /// the malformation was detected for debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing input data.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Recursion limit reached.
    ///
    /// Signature parsing enforces a maximum nesting depth to protect against
    /// stack exhaustion on crafted blobs. The associated value shows the limit
    /// that was reached.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// A type, member, or signature could not be resolved.
    ///
    /// Recovered locally: the candidate method is skipped and matching continues.
    #[error("Failed to resolve a metadata entity - {0}")]
    LookupFailure(String),

    /// A candidate method's signature does not match a probe target.
    ///
    /// Recovered locally: the candidate is skipped and matching continues.
    #[error("Signature does not match the probe target - {0}")]
    SignatureMismatch(String),

    /// The method uses a construct the rewriter cannot instrument safely.
    ///
    /// Static methods on value types, generic-struct receivers, and by-reference
    /// parameters without the by-reference feature flag fall into this category.
    /// The original body is retained unmodified and only this method is skipped.
    #[error("Method uses a construct that cannot be instrumented - {0}")]
    UnsupportedConstruct(String),

    /// The token cache could not emit a new metadata reference.
    ///
    /// The cache remains unmodified; the rewrite of the current method is aborted.
    #[error("Failed to emit a metadata reference - {0}")]
    EmitFailed(String),

    /// A raw method body could not be imported into the in-memory model.
    ///
    /// Aborts the rewrite of the current method only.
    #[error("Failed to import method body - {0}")]
    ImportFailed(String),

    /// The rewritten model could not be serialized back to the host layout.
    ///
    /// Aborts the rewrite of the current method only; the original body is never
    /// corrupted because export is the sole mutation point visible to the host.
    #[error("Failed to export method body - {0}")]
    ExportFailed(String),

    /// A function-control handle is already attached for this method.
    ///
    /// The dispatch table guarantees at most one in-flight rewrite per method;
    /// a second attach attempt while one is pending is refused.
    #[error("A function control is already attached - {0}")]
    ControlBusy(String),

    /// Failed to lock target.
    ///
    /// This error occurs when thread synchronization fails, typically when a
    /// mutex was poisoned by a panicking thread.
    #[error("Failed to lock target")]
    LockError,

    /// Thread spawn or other I/O error.
    #[error("{0}")]
    IoError(#[from] std::io::Error),

    /// Generic error for miscellaneous failures.
    ///
    /// Used for errors that don't fit into other categories, such as enqueueing
    /// onto a worker that has already shut down.
    #[error("{0}")]
    Error(String),
}
