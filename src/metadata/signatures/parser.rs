use crate::{
    file::Parser,
    metadata::{
        signatures::{LocalSig, LocalVar, MethodSig, ParamSig, TypeSig},
        CALLING_CONVENTION, ELEMENT_TYPE,
    },
    Error::RecursionLimit,
    Result,
};

/// Maximum recursion depth for signature parsing
const MAX_RECURSION_DEPTH: usize = 50;

/// Signature parser for the blob encodings this crate consumes: method
/// signatures, local-variable signatures, and standalone types.
///
/// Parsing is total - the parser either consumes a structurally valid signature
/// or fails with an error, never yielding a partially-filled model. Custom
/// modifiers (`modopt`/`modreq`) are structurally validated and skipped; the
/// rewriter has no use for them.
///
/// # Example
///
/// ```rust
/// use cilweave::metadata::signatures::SignatureParser;
///
/// // instance string (object)
/// let blob = [0x20, 0x01, 0x0E, 0x1C];
/// let sig = SignatureParser::new(&blob).parse_method_signature()?;
/// assert!(sig.has_this);
/// assert_eq!(sig.params.len(), 1);
/// # Ok::<(), cilweave::Error>(())
/// ```
///
/// Do not re-use a parser instance for multiple signatures.
pub struct SignatureParser<'a> {
    parser: Parser<'a>,
    depth: usize,
}

impl<'a> SignatureParser<'a> {
    /// Create a new `SignatureParser` over a signature blob.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        SignatureParser {
            parser: Parser::new(data),
            depth: 0,
        }
    }

    /// Parse a single type from the signature blob.
    fn parse_type(&mut self) -> Result<TypeSig> {
        self.depth += 1;
        if self.depth >= MAX_RECURSION_DEPTH {
            return Err(RecursionLimit(MAX_RECURSION_DEPTH));
        }

        let result = self.parse_type_inner();
        self.depth -= 1;
        result
    }

    fn parse_type_inner(&mut self) -> Result<TypeSig> {
        let current_byte = self.parser.read_u8()?;
        match current_byte {
            ELEMENT_TYPE::VOID => Ok(TypeSig::Void),
            ELEMENT_TYPE::BOOLEAN => Ok(TypeSig::Boolean),
            ELEMENT_TYPE::CHAR => Ok(TypeSig::Char),
            ELEMENT_TYPE::I1 => Ok(TypeSig::I1),
            ELEMENT_TYPE::U1 => Ok(TypeSig::U1),
            ELEMENT_TYPE::I2 => Ok(TypeSig::I2),
            ELEMENT_TYPE::U2 => Ok(TypeSig::U2),
            ELEMENT_TYPE::I4 => Ok(TypeSig::I4),
            ELEMENT_TYPE::U4 => Ok(TypeSig::U4),
            ELEMENT_TYPE::I8 => Ok(TypeSig::I8),
            ELEMENT_TYPE::U8 => Ok(TypeSig::U8),
            ELEMENT_TYPE::R4 => Ok(TypeSig::R4),
            ELEMENT_TYPE::R8 => Ok(TypeSig::R8),
            ELEMENT_TYPE::I => Ok(TypeSig::I),
            ELEMENT_TYPE::U => Ok(TypeSig::U),
            ELEMENT_TYPE::STRING => Ok(TypeSig::String),
            ELEMENT_TYPE::OBJECT => Ok(TypeSig::Object),
            ELEMENT_TYPE::CLASS => Ok(TypeSig::Class(self.parser.read_compressed_token()?)),
            ELEMENT_TYPE::VALUETYPE => {
                Ok(TypeSig::ValueType(self.parser.read_compressed_token()?))
            }
            ELEMENT_TYPE::SZARRAY => {
                self.skip_custom_mods()?;
                Ok(TypeSig::SzArray(Box::new(self.parse_type()?)))
            }
            ELEMENT_TYPE::BYREF => Ok(TypeSig::ByRef(Box::new(self.parse_type()?))),
            ELEMENT_TYPE::PTR => {
                self.skip_custom_mods()?;
                Ok(TypeSig::Ptr(Box::new(self.parse_type()?)))
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek = self.parser.peek_u8()?;
                if peek != ELEMENT_TYPE::CLASS && peek != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - next byte is not CLASS or VALUETYPE - {}",
                        peek
                    ));
                }

                let base = self.parse_type()?;
                let arg_count = self.parser.read_compressed_uint()?;

                let mut args = Vec::with_capacity(arg_count as usize);
                for _ in 0..arg_count {
                    args.push(self.parse_type()?);
                }

                Ok(TypeSig::GenericInst {
                    base: Box::new(base),
                    args,
                })
            }
            ELEMENT_TYPE::VAR => Ok(TypeSig::Var(self.parser.read_compressed_uint()?)),
            ELEMENT_TYPE::MVAR => Ok(TypeSig::MVar(self.parser.read_compressed_uint()?)),
            ELEMENT_TYPE::TYPEDBYREF => Ok(TypeSig::TypedByRef),
            ELEMENT_TYPE::PINNED => Ok(TypeSig::Pinned(Box::new(self.parse_type()?))),
            _ => Err(malformed_error!(
                "Unsupported ELEMENT_TYPE - {}",
                current_byte
            )),
        }
    }

    /// Skip custom modifiers (`CMOD_OPT` / `CMOD_REQD`), validating their structure.
    fn skip_custom_mods(&mut self) -> Result<()> {
        while self.parser.has_more_data() {
            let next = self.parser.peek_u8()?;
            if next != ELEMENT_TYPE::CMOD_OPT && next != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.parser.advance_by(1)?;
            self.parser.read_compressed_token()?;
        }
        Ok(())
    }

    /// Parse a parameter including custom modifiers (the return type counts as
    /// a parameter).
    fn parse_param(&mut self) -> Result<ParamSig> {
        self.skip_custom_mods()?;

        let mut by_ref = false;
        if self.parser.peek_u8()? == ELEMENT_TYPE::BYREF {
            self.parser.advance_by(1)?;
            by_ref = true;
        }

        Ok(ParamSig {
            by_ref,
            sig: self.parse_type()?,
        })
    }

    /// Parse a method signature from the blob - `MethodDefSig` or `MethodRefSig`.
    ///
    /// # Errors
    /// Returns an error if the blob is truncated, uses an unsupported calling
    /// convention, or contains an invalid type encoding.
    pub fn parse_method_signature(&mut self) -> Result<MethodSig> {
        let convention = self.parser.read_u8()?;

        let has_this = convention & CALLING_CONVENTION::HASTHIS != 0;
        let explicit_this = convention & CALLING_CONVENTION::EXPLICITTHIS != 0;
        let is_generic = convention & CALLING_CONVENTION::GENERIC != 0;
        let kind = convention & 0x0F;

        if kind != CALLING_CONVENTION::DEFAULT && kind != CALLING_CONVENTION::VARARG {
            return Err(malformed_error!(
                "Unsupported calling convention - 0x{:02X}",
                convention
            ));
        }

        let generic_params = if is_generic {
            self.parser.read_compressed_uint()?
        } else {
            0
        };

        let param_count = self.parser.read_compressed_uint()?;
        let return_type = self.parse_param()?;

        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            if self.parser.has_more_data() && self.parser.peek_u8()? == ELEMENT_TYPE::SENTINEL {
                // Vararg sentinel: the trailing arguments are call-site specific
                // and never part of a probe target.
                break;
            }
            params.push(self.parse_param()?);
        }

        Ok(MethodSig {
            has_this,
            explicit_this,
            vararg: kind == CALLING_CONVENTION::VARARG,
            generic_params,
            return_type,
            params,
        })
    }

    /// Parse a local-variable signature from the blob - `LocalVarSig`.
    ///
    /// # Errors
    /// Returns an error if the blob does not start with the `LOCAL_SIG`
    /// convention byte or contains an invalid type encoding.
    pub fn parse_local_signature(&mut self) -> Result<LocalSig> {
        let convention = self.parser.read_u8()?;
        if convention != CALLING_CONVENTION::LOCAL_SIG {
            return Err(malformed_error!(
                "Not a local variable signature - 0x{:02X}",
                convention
            ));
        }

        let count = self.parser.read_compressed_uint()?;
        let mut locals = Vec::with_capacity(count as usize);
        for _ in 0..count {
            self.skip_custom_mods()?;

            let mut pinned = false;
            if self.parser.peek_u8()? == ELEMENT_TYPE::PINNED {
                self.parser.advance_by(1)?;
                pinned = true;
            }

            let mut by_ref = false;
            if self.parser.peek_u8()? == ELEMENT_TYPE::BYREF {
                self.parser.advance_by(1)?;
                by_ref = true;
            }

            locals.push(LocalVar {
                by_ref,
                pinned,
                sig: self.parse_type()?,
            });
        }

        Ok(LocalSig { locals })
    }

    /// Parse a standalone type from the blob - `TypeSpec` signatures.
    ///
    /// # Errors
    /// Returns an error if the blob contains an invalid type encoding.
    pub fn parse_type_signature(&mut self) -> Result<TypeSig> {
        self.parse_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::token::Token;

    #[test]
    fn static_method_two_ints() {
        // static int32 (int32, int32)
        let blob = [0x00, 0x02, 0x08, 0x08, 0x08];
        let sig = SignatureParser::new(&blob).parse_method_signature().unwrap();
        assert!(!sig.has_this);
        assert_eq!(sig.generic_params, 0);
        assert_eq!(sig.param_count(), 2);
        assert_eq!(sig.return_type.sig, TypeSig::I4);
        assert_eq!(sig.params[0].sig, TypeSig::I4);
    }

    #[test]
    fn instance_method_void() {
        // instance void ()
        let blob = [0x20, 0x00, 0x01];
        let sig = SignatureParser::new(&blob).parse_method_signature().unwrap();
        assert!(sig.has_this);
        assert!(sig.return_type.sig.is_void());
        assert!(sig.params.is_empty());
    }

    #[test]
    fn generic_method() {
        // static !!0 <1>(!!0)
        let blob = [0x10, 0x01, 0x01, 0x1E, 0x00, 0x1E, 0x00];
        let sig = SignatureParser::new(&blob).parse_method_signature().unwrap();
        assert_eq!(sig.generic_params, 1);
        assert_eq!(sig.return_type.sig, TypeSig::MVar(0));
        assert_eq!(sig.params[0].sig, TypeSig::MVar(0));
    }

    #[test]
    fn byref_parameter() {
        // static void (int32&)
        let blob = [0x00, 0x01, 0x01, 0x10, 0x08];
        let sig = SignatureParser::new(&blob).parse_method_signature().unwrap();
        assert!(sig.params[0].by_ref);
        assert_eq!(sig.params[0].sig, TypeSig::I4);
    }

    #[test]
    fn class_and_valuetype_params() {
        // static void (class 0x01000002, valuetype 0x02000003)
        // class coded: (2 << 2) | 1 = 0x09, valuetype coded: (3 << 2) | 0 = 0x0C
        let blob = [0x00, 0x02, 0x01, 0x12, 0x09, 0x11, 0x0C];
        let sig = SignatureParser::new(&blob).parse_method_signature().unwrap();
        assert_eq!(sig.params[0].sig, TypeSig::Class(Token::new(0x0100_0002)));
        assert_eq!(
            sig.params[1].sig,
            TypeSig::ValueType(Token::new(0x0200_0003))
        );
    }

    #[test]
    fn generic_instantiation_param() {
        // static void (class GenericInst(class 0x01000001)<int32>)
        let blob = [0x00, 0x01, 0x01, 0x15, 0x12, 0x05, 0x01, 0x08];
        let sig = SignatureParser::new(&blob).parse_method_signature().unwrap();
        match &sig.params[0].sig {
            TypeSig::GenericInst { base, args } => {
                assert_eq!(**base, TypeSig::Class(Token::new(0x0100_0001)));
                assert_eq!(args.as_slice(), &[TypeSig::I4]);
            }
            other => panic!("expected GenericInst, got {other:?}"),
        }
    }

    #[test]
    fn local_signature() {
        // locals: int32, pinned string, int64&
        let blob = [0x07, 0x03, 0x08, 0x45, 0x0E, 0x10, 0x0A];
        let sig = SignatureParser::new(&blob).parse_local_signature().unwrap();
        assert_eq!(sig.locals.len(), 3);
        assert_eq!(sig.locals[0].sig, TypeSig::I4);
        assert!(sig.locals[1].pinned);
        assert_eq!(sig.locals[1].sig, TypeSig::String);
        assert!(sig.locals[2].by_ref);
        assert_eq!(sig.locals[2].sig, TypeSig::I8);
    }

    #[test]
    fn local_signature_wrong_convention() {
        let blob = [0x00, 0x00, 0x01];
        assert!(SignatureParser::new(&blob).parse_local_signature().is_err());
    }

    #[test]
    fn truncated_blob() {
        let blob = [0x00, 0x02, 0x08];
        assert!(SignatureParser::new(&blob).parse_method_signature().is_err());
    }

    #[test]
    fn recursion_limit() {
        // Deeply nested szarray beyond the depth limit
        let mut blob = vec![0x00, 0x01, 0x01];
        blob.extend(std::iter::repeat(ELEMENT_TYPE::SZARRAY).take(64));
        blob.push(ELEMENT_TYPE::I4);
        assert!(matches!(
            SignatureParser::new(&blob).parse_method_signature(),
            Err(RecursionLimit(_))
        ));
    }
}
