//! Signature encoders: compile structured signature trees to ECMA-335 blobs.
//!
//! Encoding happens exclusively at the export boundary - local-variable
//! signatures when a rewritten body is serialized, member-ref / method-spec /
//! type-spec blobs when the token cache emits a new reference. Nothing above
//! this module ever writes signature bytes by hand.

use crate::{
    file::Writer,
    metadata::{
        signatures::{LocalSig, MethodSig, ParamSig, TypeSig},
        CALLING_CONVENTION, ELEMENT_TYPE,
    },
    Result,
};

/// Encode a single type into `writer` according to ECMA-335 II.23.2.12.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for [`TypeSig::Unknown`] or a token that
/// cannot be coded as `TypeDefOrRefOrSpec`.
pub fn encode_type(sig: &TypeSig, writer: &mut Writer) -> Result<()> {
    match sig {
        TypeSig::Unknown => Err(malformed_error!("Cannot encode an unknown type")),
        TypeSig::Void => {
            writer.write_u8(ELEMENT_TYPE::VOID);
            Ok(())
        }
        TypeSig::Boolean => {
            writer.write_u8(ELEMENT_TYPE::BOOLEAN);
            Ok(())
        }
        TypeSig::Char => {
            writer.write_u8(ELEMENT_TYPE::CHAR);
            Ok(())
        }
        TypeSig::I1 => {
            writer.write_u8(ELEMENT_TYPE::I1);
            Ok(())
        }
        TypeSig::U1 => {
            writer.write_u8(ELEMENT_TYPE::U1);
            Ok(())
        }
        TypeSig::I2 => {
            writer.write_u8(ELEMENT_TYPE::I2);
            Ok(())
        }
        TypeSig::U2 => {
            writer.write_u8(ELEMENT_TYPE::U2);
            Ok(())
        }
        TypeSig::I4 => {
            writer.write_u8(ELEMENT_TYPE::I4);
            Ok(())
        }
        TypeSig::U4 => {
            writer.write_u8(ELEMENT_TYPE::U4);
            Ok(())
        }
        TypeSig::I8 => {
            writer.write_u8(ELEMENT_TYPE::I8);
            Ok(())
        }
        TypeSig::U8 => {
            writer.write_u8(ELEMENT_TYPE::U8);
            Ok(())
        }
        TypeSig::R4 => {
            writer.write_u8(ELEMENT_TYPE::R4);
            Ok(())
        }
        TypeSig::R8 => {
            writer.write_u8(ELEMENT_TYPE::R8);
            Ok(())
        }
        TypeSig::I => {
            writer.write_u8(ELEMENT_TYPE::I);
            Ok(())
        }
        TypeSig::U => {
            writer.write_u8(ELEMENT_TYPE::U);
            Ok(())
        }
        TypeSig::String => {
            writer.write_u8(ELEMENT_TYPE::STRING);
            Ok(())
        }
        TypeSig::Object => {
            writer.write_u8(ELEMENT_TYPE::OBJECT);
            Ok(())
        }
        TypeSig::TypedByRef => {
            writer.write_u8(ELEMENT_TYPE::TYPEDBYREF);
            Ok(())
        }
        TypeSig::Class(token) => {
            writer.write_u8(ELEMENT_TYPE::CLASS);
            writer.write_compressed_token(*token)
        }
        TypeSig::ValueType(token) => {
            writer.write_u8(ELEMENT_TYPE::VALUETYPE);
            writer.write_compressed_token(*token)
        }
        TypeSig::SzArray(inner) => {
            writer.write_u8(ELEMENT_TYPE::SZARRAY);
            encode_type(inner, writer)
        }
        TypeSig::ByRef(inner) => {
            writer.write_u8(ELEMENT_TYPE::BYREF);
            encode_type(inner, writer)
        }
        TypeSig::Ptr(inner) => {
            writer.write_u8(ELEMENT_TYPE::PTR);
            encode_type(inner, writer)
        }
        TypeSig::GenericInst { base, args } => {
            writer.write_u8(ELEMENT_TYPE::GENERICINST);
            encode_type(base, writer)?;
            writer.write_compressed_uint(u32::try_from(args.len()).map_err(|_| {
                malformed_error!("Generic instantiation has too many arguments")
            })?)?;
            for arg in args {
                encode_type(arg, writer)?;
            }
            Ok(())
        }
        TypeSig::Var(index) => {
            writer.write_u8(ELEMENT_TYPE::VAR);
            writer.write_compressed_uint(*index)
        }
        TypeSig::MVar(index) => {
            writer.write_u8(ELEMENT_TYPE::MVAR);
            writer.write_compressed_uint(*index)
        }
        TypeSig::Pinned(inner) => {
            writer.write_u8(ELEMENT_TYPE::PINNED);
            encode_type(inner, writer)
        }
    }
}

fn encode_param(param: &ParamSig, writer: &mut Writer) -> Result<()> {
    if param.by_ref {
        writer.write_u8(ELEMENT_TYPE::BYREF);
    }
    encode_type(&param.sig, writer)
}

/// Encode a local-variable signature blob (`LocalVarSig`, II.23.2.6).
///
/// # Errors
/// Returns an error if a slot's type cannot be encoded or the slot count
/// exceeds the compressed-integer range.
pub fn encode_local_signature(sig: &LocalSig) -> Result<Vec<u8>> {
    let mut writer = Writer::with_capacity(2 + sig.locals.len() * 2);
    writer.write_u8(CALLING_CONVENTION::LOCAL_SIG);
    writer.write_compressed_uint(
        u32::try_from(sig.locals.len())
            .map_err(|_| malformed_error!("Too many local variables"))?,
    )?;

    for local in &sig.locals {
        if local.pinned {
            writer.write_u8(ELEMENT_TYPE::PINNED);
        }
        if local.by_ref {
            writer.write_u8(ELEMENT_TYPE::BYREF);
        }
        encode_type(&local.sig, &mut writer)?;
    }

    Ok(writer.into_bytes())
}

/// Encode a member-ref method signature blob (`MethodRefSig`, II.23.2.2).
///
/// Used by the token cache when emitting references to instrumentation entry
/// points; the probe methods are never vararg, so only the default and generic
/// conventions are produced.
///
/// # Errors
/// Returns an error if a parameter or return type cannot be encoded.
pub fn encode_method_ref_signature(sig: &MethodSig) -> Result<Vec<u8>> {
    let mut writer = Writer::with_capacity(4 + sig.params.len() * 2);

    let mut convention = CALLING_CONVENTION::DEFAULT;
    if sig.has_this {
        convention |= CALLING_CONVENTION::HASTHIS;
    }
    if sig.generic_params > 0 {
        convention |= CALLING_CONVENTION::GENERIC;
    }
    writer.write_u8(convention);

    if sig.generic_params > 0 {
        writer.write_compressed_uint(sig.generic_params)?;
    }
    writer.write_compressed_uint(
        u32::try_from(sig.params.len()).map_err(|_| malformed_error!("Too many parameters"))?,
    )?;

    encode_param(&sig.return_type, &mut writer)?;
    for param in &sig.params {
        encode_param(param, &mut writer)?;
    }

    Ok(writer.into_bytes())
}

/// Encode a method-spec instantiation blob (`MethodSpec`, II.23.2.15).
///
/// # Errors
/// Returns an error if an argument type cannot be encoded.
pub fn encode_method_spec_signature(args: &[TypeSig]) -> Result<Vec<u8>> {
    let mut writer = Writer::with_capacity(2 + args.len() * 2);
    writer.write_u8(CALLING_CONVENTION::GENERICINST);
    writer.write_compressed_uint(
        u32::try_from(args.len())
            .map_err(|_| malformed_error!("Too many instantiation arguments"))?,
    )?;
    for arg in args {
        encode_type(arg, &mut writer)?;
    }
    Ok(writer.into_bytes())
}

/// Encode a type-spec signature blob (`TypeSpec`, II.23.2.14).
///
/// # Errors
/// Returns an error if the type cannot be encoded.
pub fn encode_type_spec_signature(sig: &TypeSig) -> Result<Vec<u8>> {
    let mut writer = Writer::with_capacity(4);
    encode_type(sig, &mut writer)?;
    Ok(writer.into_bytes())
}
