use crate::metadata::token::Token;

/// Represents a parsed type in a signature.
///
/// This is the structured form of an `ELEMENT_TYPE` encoding: a tagged tree that
/// can be inspected, composed (the codegen builds new instantiation types out of
/// parsed ones), and compiled back to bytes at the export boundary.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TypeSig {
    /// Not defined
    #[default]
    Unknown,
    /// void
    Void,
    /// bool
    Boolean,
    /// char
    Char,
    /// signed 8bit integer
    I1,
    /// unsigned 8bit integer
    U1,
    /// signed 16bit integer
    I2,
    /// unsigned 16bit integer
    U2,
    /// signed 32bit integer
    I4,
    /// unsigned 32bit integer
    U4,
    /// signed 64bit integer
    I8,
    /// unsigned 64bit integer
    U8,
    /// 32bit floating-point
    R4,
    /// 64bit floating-point
    R8,
    /// signed integer, sized to executing platform
    I,
    /// unsigned integer, sized to executing platform
    U,
    /// System.String
    String,
    /// System.Object
    Object,
    /// A reference type, identified by a `TypeDef`/`TypeRef`/`TypeSpec` token
    Class(Token),
    /// A value type, identified by a `TypeDef`/`TypeRef`/`TypeSpec` token
    ValueType(Token),
    /// Single-dimension, zero-based array of the inner type
    SzArray(Box<TypeSig>),
    /// Managed pointer to the inner type
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer to the inner type
    Ptr(Box<TypeSig>),
    /// A generic type instantiation: `base` must be [`TypeSig::Class`] or
    /// [`TypeSig::ValueType`], `args` are the concrete type arguments
    GenericInst {
        /// The open generic type being instantiated
        base: Box<TypeSig>,
        /// The type arguments, in declaration order
        args: Vec<TypeSig>,
    },
    /// Generic parameter of the declaring type (`!n`)
    Var(u32),
    /// Generic parameter of the method (`!!n`)
    MVar(u32),
    /// System.TypedReference
    TypedByRef,
    /// A pinned type (local-variable signatures only)
    Pinned(Box<TypeSig>),
}

impl TypeSig {
    /// `true` for the `void` type.
    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, TypeSig::Void)
    }

    /// `true` if a value of this type must be boxed before it can be stored
    /// into an `object[]` slot.
    ///
    /// Generic parameters count as boxable: a `box` instruction on a reference
    /// type instantiation is defined to be a no-op, so boxing unconditionally
    /// is correct for both instantiation kinds.
    #[must_use]
    pub fn needs_box(&self) -> bool {
        matches!(
            self,
            TypeSig::Boolean
                | TypeSig::Char
                | TypeSig::I1
                | TypeSig::U1
                | TypeSig::I2
                | TypeSig::U2
                | TypeSig::I4
                | TypeSig::U4
                | TypeSig::I8
                | TypeSig::U8
                | TypeSig::R4
                | TypeSig::R8
                | TypeSig::I
                | TypeSig::U
                | TypeSig::ValueType(_)
                | TypeSig::Var(_)
                | TypeSig::MVar(_)
        ) || matches!(self, TypeSig::GenericInst { base, .. } if matches!(**base, TypeSig::ValueType(_)))
    }
}

/// A single parameter (or return type) of a method signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamSig {
    /// Parameter is passed by reference
    pub by_ref: bool,
    /// The type of the parameter
    pub sig: TypeSig,
}

/// A parsed method signature (ECMA-335 II.23.2.1).
///
/// Parsing is total: a `MethodSig` either describes the complete blob or the
/// parse failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MethodSig {
    /// The method takes a `this` pointer
    pub has_this: bool,
    /// The `this` pointer is explicit in the parameter list
    pub explicit_this: bool,
    /// The method uses the vararg calling convention
    pub vararg: bool,
    /// Number of generic parameters declared by the method
    pub generic_params: u32,
    /// The return type
    pub return_type: ParamSig,
    /// The declared parameters, in order
    pub params: Vec<ParamSig>,
}

impl MethodSig {
    /// Number of declared parameters (the receiver is not counted).
    #[must_use]
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

/// A single local-variable slot in a local-variable signature.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalVar {
    /// The slot holds a managed pointer
    pub by_ref: bool,
    /// The slot is pinned for the duration of the method
    pub pinned: bool,
    /// The type of the slot
    pub sig: TypeSig,
}

/// A parsed local-variable signature (ECMA-335 II.23.2.6).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalSig {
    /// The local-variable slots, in index order
    pub locals: Vec<LocalVar>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn void_detection() {
        assert!(TypeSig::Void.is_void());
        assert!(!TypeSig::I4.is_void());
    }

    #[test]
    fn boxing_policy() {
        assert!(TypeSig::I4.needs_box());
        assert!(TypeSig::ValueType(Token::new(0x0200_0001)).needs_box());
        assert!(TypeSig::MVar(0).needs_box());
        assert!(!TypeSig::String.needs_box());
        assert!(!TypeSig::Object.needs_box());
        assert!(!TypeSig::Class(Token::new(0x0100_0001)).needs_box());
        assert!(!TypeSig::SzArray(Box::new(TypeSig::I4)).needs_box());

        let value_inst = TypeSig::GenericInst {
            base: Box::new(TypeSig::ValueType(Token::new(0x0100_0001))),
            args: vec![TypeSig::I4],
        };
        assert!(value_inst.needs_box());

        let class_inst = TypeSig::GenericInst {
            base: Box::new(TypeSig::Class(Token::new(0x0100_0001))),
            args: vec![TypeSig::I4],
        };
        assert!(!class_inst.needs_box());
    }
}
