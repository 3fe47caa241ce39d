//! Instrumentation probe descriptors.
//!
//! A [`MethodProbe`] binds a target method pattern to the instrumentation
//! handler type whose begin/end entry points the rewriter will call around the
//! original body. Probes are registered in batches under an id (idempotently)
//! and matched against module member tables by the pipeline.

use std::fmt;

/// The target half of a probe: which methods to instrument.
///
/// Names are matched exactly; each entry of `param_types` is either a full
/// type name (e.g. `"System.Int32"`) or the wildcard [`WILDCARD`] meaning
/// "don't care". The parameter list length must match exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Assembly the declaring type lives in ([`WILDCARD`] matches any)
    pub assembly: String,
    /// Full name of the declaring type
    pub type_name: String,
    /// Name of the method
    pub method_name: String,
    /// Full type names of the declared parameters, in order
    pub param_types: Vec<String>,
}

/// The wildcard marker usable in [`ProbeTarget`] positions that support it.
pub const WILDCARD: &str = "_";

/// The handler half of a probe: where the instrumentation entry points live.
///
/// The handler type is expected to expose static `BeginInvocation` /
/// `EndInvocation` / `LogException` members with the conventional shapes; the
/// support types `ProbeState` and `ProbeReturn`\`1 live in the same assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHandler {
    /// Assembly that carries the handler and support types
    pub assembly: String,
    /// Full name of the handler type
    pub type_name: String,
}

/// One instrumentation definition: a target pattern plus its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodProbe {
    /// Which methods to instrument
    pub target: ProbeTarget,
    /// Which handler to call around them
    pub handler: ProbeHandler,
}

impl fmt::Display for MethodProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}::{}({}) -> {}",
            self.target.type_name,
            self.target.method_name,
            self.target.param_types.join(","),
            self.handler.type_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let probe = MethodProbe {
            target: ProbeTarget {
                assembly: "System.Net.Http".into(),
                type_name: "System.Net.Http.HttpClient".into(),
                method_name: "Send".into(),
                param_types: vec!["_".into(), "System.Threading.CancellationToken".into()],
            },
            handler: ProbeHandler {
                assembly: "Probes.Core".into(),
                type_name: "Probes.Http.ClientHandler".into(),
            },
        };
        assert_eq!(
            probe.to_string(),
            "System.Net.Http.HttpClient::Send(_,System.Threading.CancellationToken) -> Probes.Http.ClientHandler"
        );
    }
}
