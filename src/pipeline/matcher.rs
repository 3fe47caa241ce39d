//! The matching stage: scan a module's member table for probe targets.
//!
//! Matching renders each candidate's parameter types to full names and compares
//! them against the probe target, with [`crate::definitions::WILDCARD`] meaning
//! "don't care" for a parameter position. Every failure is recovered locally -
//! an unparsable signature or unresolvable type name skips that candidate and
//! the scan continues.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::{
    definitions::{MethodProbe, WILDCARD},
    dispatch::{MethodIdentifier, MethodShape, ModuleTable},
    host::{MetadataRead, MethodEntry},
    metadata::signatures::{MethodSig, SignatureParser, TypeSig},
    Error, Result,
};

/// Render a parsed type to the full-name form probe targets use.
///
/// Primitives map to their `System.*` names, token-bearing types resolve
/// through the module reader, composites recurse (`T[]`, `T&`, `T*`,
/// `Base[A,B]`), and generic parameters render as `!n` / `!!n`.
///
/// # Errors
/// Returns [`crate::Error::LookupFailure`] if a referenced type name cannot be
/// resolved.
pub fn type_display_name(sig: &TypeSig, reader: &dyn MetadataRead) -> Result<String> {
    Ok(match sig {
        TypeSig::Unknown => "<unknown>".to_string(),
        TypeSig::Void => "System.Void".to_string(),
        TypeSig::Boolean => "System.Boolean".to_string(),
        TypeSig::Char => "System.Char".to_string(),
        TypeSig::I1 => "System.SByte".to_string(),
        TypeSig::U1 => "System.Byte".to_string(),
        TypeSig::I2 => "System.Int16".to_string(),
        TypeSig::U2 => "System.UInt16".to_string(),
        TypeSig::I4 => "System.Int32".to_string(),
        TypeSig::U4 => "System.UInt32".to_string(),
        TypeSig::I8 => "System.Int64".to_string(),
        TypeSig::U8 => "System.UInt64".to_string(),
        TypeSig::R4 => "System.Single".to_string(),
        TypeSig::R8 => "System.Double".to_string(),
        TypeSig::I => "System.IntPtr".to_string(),
        TypeSig::U => "System.UIntPtr".to_string(),
        TypeSig::String => "System.String".to_string(),
        TypeSig::Object => "System.Object".to_string(),
        TypeSig::TypedByRef => "System.TypedReference".to_string(),
        TypeSig::Class(token) | TypeSig::ValueType(token) => reader.type_name(*token)?,
        TypeSig::SzArray(inner) => format!("{}[]", type_display_name(inner, reader)?),
        TypeSig::ByRef(inner) => format!("{}&", type_display_name(inner, reader)?),
        TypeSig::Ptr(inner) => format!("{}*", type_display_name(inner, reader)?),
        TypeSig::Pinned(inner) => type_display_name(inner, reader)?,
        TypeSig::GenericInst { base, args } => {
            let mut rendered = Vec::with_capacity(args.len());
            for arg in args {
                rendered.push(type_display_name(arg, reader)?);
            }
            format!(
                "{}[{}]",
                type_display_name(base, reader)?,
                rendered.join(",")
            )
        }
        TypeSig::Var(index) => format!("!{index}"),
        TypeSig::MVar(index) => format!("!!{index}"),
    })
}

/// Check one candidate against one probe target.
///
/// A candidate whose names do not match is simply not a match; a candidate
/// whose names match but whose argument count or types differ is reported as
/// [`crate::Error::SignatureMismatch`] so the caller can log the skip.
///
/// # Errors
/// - [`crate::Error::SignatureMismatch`] if the names match but the parameter
///   list does not
/// - [`crate::Error::LookupFailure`] if a parameter type name cannot be
///   resolved
///
/// Both are recovered locally: the candidate is skipped, the scan continues.
pub fn matches_target(
    probe: &MethodProbe,
    assembly_name: &str,
    entry: &MethodEntry,
    signature: &MethodSig,
    reader: &dyn MetadataRead,
) -> Result<bool> {
    let target = &probe.target;

    if target.assembly != WILDCARD && target.assembly != assembly_name {
        return Ok(false);
    }
    if target.type_name != entry.type_name || target.method_name != entry.name {
        return Ok(false);
    }
    if target.param_types.len() != signature.params.len() {
        return Err(Error::SignatureMismatch(format!(
            "{}::{} has {} parameter(s), target expects {}",
            entry.type_name,
            entry.name,
            signature.params.len(),
            target.param_types.len()
        )));
    }

    for (index, (expected, param)) in target.param_types.iter().zip(&signature.params).enumerate()
    {
        if expected == WILDCARD {
            continue;
        }
        let mut actual = type_display_name(&param.sig, reader)?;
        if param.by_ref {
            actual.push('&');
        }
        if *expected != actual {
            return Err(Error::SignatureMismatch(format!(
                "{}::{} parameter {index} is {actual}, target expects {expected}",
                entry.type_name, entry.name
            )));
        }
    }

    Ok(true)
}

/// Scan one module for all candidates matched by `probes`, creating or
/// updating dispatch records, and return the batch of identifiers to submit
/// for recompilation.
///
/// Candidates whose signatures fail to parse or resolve are skipped with a log
/// line; a failure never aborts the scan.
#[must_use]
pub fn match_module(table: &ModuleTable, probes: &[Arc<MethodProbe>]) -> Vec<MethodIdentifier> {
    let reader = table.reader().clone();
    let assembly_name = reader.assembly_name().to_string();

    let mut batch = Vec::new();
    let mut seen = HashSet::new();

    for entry in reader.methods() {
        let signature = match SignatureParser::new(&entry.signature).parse_method_signature() {
            Ok(signature) => signature,
            Err(e) => {
                debug!(
                    "skipping {}::{} - unparsable signature: {e}",
                    entry.type_name, entry.name
                );
                continue;
            }
        };

        for probe in probes {
            match matches_target(probe, &assembly_name, &entry, &signature, reader.as_ref()) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(
                        "skipping {}::{} for {probe} - {e}",
                        entry.type_name, entry.name
                    );
                    continue;
                }
            }

            let record =
                table.get_or_create_record(entry.token, signature.clone(), shape_of(&entry));
            match record.attach_probe(Arc::clone(probe)) {
                Ok(true) => debug!("matched {probe} -> {}", record.identifier()),
                Ok(false) => {}
                Err(e) => {
                    warn!("failed to attach {probe} to {} - {e}", record.identifier());
                    continue;
                }
            }

            if seen.insert(entry.token) {
                batch.push(record.identifier());
            }
        }
    }

    batch
}

fn shape_of(entry: &MethodEntry) -> MethodShape {
    MethodShape {
        is_static: entry.is_static,
        declaring_type: entry.declaring_type,
        declaring_is_value_type: entry.declaring_is_value_type,
        declaring_generic_params: entry.declaring_generic_params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{signatures::ParamSig, token::Token};
    use crate::{Error, Result};

    struct NameReader;

    impl MetadataRead for NameReader {
        fn assembly_name(&self) -> &str {
            "Test.Assembly"
        }
        fn methods(&self) -> Vec<MethodEntry> {
            Vec::new()
        }
        fn method_entry(&self, token: Token) -> Result<MethodEntry> {
            Err(Error::LookupFailure(token.to_string()))
        }
        fn type_name(&self, token: Token) -> Result<String> {
            match token.value() {
                0x0100_0001 => Ok("System.Net.Http.HttpRequestMessage".to_string()),
                0x0100_0002 => Ok("System.Collections.Generic.List`1".to_string()),
                _ => Err(Error::LookupFailure(token.to_string())),
            }
        }
        fn standalone_signature(&self, token: Token) -> Result<Vec<u8>> {
            Err(Error::LookupFailure(token.to_string()))
        }
    }

    #[test]
    fn primitive_names() {
        let reader = NameReader;
        assert_eq!(
            type_display_name(&TypeSig::I4, &reader).unwrap(),
            "System.Int32"
        );
        assert_eq!(
            type_display_name(&TypeSig::String, &reader).unwrap(),
            "System.String"
        );
    }

    #[test]
    fn composite_names() {
        let reader = NameReader;
        assert_eq!(
            type_display_name(&TypeSig::SzArray(Box::new(TypeSig::U1)), &reader).unwrap(),
            "System.Byte[]"
        );
        let inst = TypeSig::GenericInst {
            base: Box::new(TypeSig::Class(Token::new(0x0100_0002))),
            args: vec![TypeSig::I4],
        };
        assert_eq!(
            type_display_name(&inst, &reader).unwrap(),
            "System.Collections.Generic.List`1[System.Int32]"
        );
        assert_eq!(type_display_name(&TypeSig::MVar(1), &reader).unwrap(), "!!1");
    }

    #[test]
    fn unresolvable_token_is_lookup_failure() {
        let reader = NameReader;
        assert!(matches!(
            type_display_name(&TypeSig::Class(Token::new(0x0100_00FF)), &reader),
            Err(Error::LookupFailure(_))
        ));
    }

    fn entry(type_name: &str, name: &str) -> MethodEntry {
        MethodEntry {
            token: Token::new(0x0600_0001),
            declaring_type: Token::new(0x0200_0001),
            type_name: type_name.to_string(),
            name: name.to_string(),
            signature: Vec::new(),
            is_static: false,
            declaring_is_value_type: false,
            declaring_generic_params: 0,
        }
    }

    fn probe(type_name: &str, method: &str, params: &[&str]) -> MethodProbe {
        MethodProbe {
            target: crate::definitions::ProbeTarget {
                assembly: WILDCARD.to_string(),
                type_name: type_name.to_string(),
                method_name: method.to_string(),
                param_types: params.iter().map(ToString::to_string).collect(),
            },
            handler: crate::definitions::ProbeHandler {
                assembly: "Probes.Core".to_string(),
                type_name: "Probes.Handler".to_string(),
            },
        }
    }

    fn sig_of(params: &[TypeSig]) -> MethodSig {
        MethodSig {
            has_this: true,
            params: params
                .iter()
                .map(|sig| ParamSig {
                    by_ref: false,
                    sig: sig.clone(),
                })
                .collect(),
            ..MethodSig::default()
        }
    }

    #[test]
    fn wildcard_parameter_matches_anything() {
        let reader = NameReader;
        let probe = probe("Svc.Client", "Send", &["_", "System.Int32"]);
        let entry = entry("Svc.Client", "Send");
        let signature = sig_of(&[TypeSig::String, TypeSig::I4]);
        assert!(matches_target(&probe, "Test.Assembly", &entry, &signature, &reader).unwrap());
    }

    #[test]
    fn parameter_count_mismatch_is_reported() {
        let reader = NameReader;
        let probe = probe("Svc.Client", "Send", &["_"]);
        let entry = entry("Svc.Client", "Send");
        let signature = sig_of(&[TypeSig::String, TypeSig::I4]);
        assert!(matches!(
            matches_target(&probe, "Test.Assembly", &entry, &signature, &reader),
            Err(Error::SignatureMismatch(_))
        ));
    }

    #[test]
    fn parameter_type_mismatch_is_reported() {
        let reader = NameReader;
        let probe = probe("Svc.Client", "Send", &["System.String"]);
        let entry = entry("Svc.Client", "Send");
        let signature = sig_of(&[TypeSig::I4]);
        assert!(matches!(
            matches_target(&probe, "Test.Assembly", &entry, &signature, &reader),
            Err(Error::SignatureMismatch(_))
        ));
    }

    #[test]
    fn names_must_match_exactly() {
        let reader = NameReader;
        let probe = probe("Svc.Client", "Send", &[]);
        let signature = sig_of(&[]);
        assert!(
            !matches_target(&probe, "Test.Assembly", &entry("Svc.Client", "send"), &signature, &reader)
                .unwrap()
        );
        assert!(
            !matches_target(&probe, "Test.Assembly", &entry("Svc.Clients", "Send"), &signature, &reader)
                .unwrap()
        );
    }

    #[test]
    fn assembly_filter() {
        let reader = NameReader;
        let mut p = probe("Svc.Client", "Send", &[]);
        p.target.assembly = "Other.Assembly".to_string();
        let signature = sig_of(&[]);
        assert!(
            !matches_target(&p, "Test.Assembly", &entry("Svc.Client", "Send"), &signature, &reader)
                .unwrap()
        );
    }

    #[test]
    fn byref_parameter_rendering() {
        let reader = NameReader;
        let probe = probe("Svc.Client", "TryParse", &["System.Int32&"]);
        let entry = entry("Svc.Client", "TryParse");
        let signature = MethodSig {
            has_this: false,
            params: vec![ParamSig {
                by_ref: true,
                sig: TypeSig::I4,
            }],
            ..MethodSig::default()
        };
        assert!(matches_target(&probe, "Test.Assembly", &entry, &signature, &reader).unwrap());
    }
}
