//! Instrumentation codegen: the begin/try/catch/finally/end transformation.
//!
//! Given a method's parsed signature, its shape traits, and a matched probe,
//! [`instrument`] drives the body model to produce the final instrumented
//! layout:
//!
//! ```text
//! try {                               // outer finally        (R4)
//!   try {                            // outer catch          (R2)
//!     try {                          // begin guard          (R1)
//!       state = BeginInvocation<TTarget, ...>(instance, args...)
//!       leave ORIGINAL
//!     } catch (Exception) { LogException(ex); leave ORIGINAL }
//!     ORIGINAL:
//!       ...original body, each `ret` -> [stloc retval] + leave EPILOGUE...
//!   } catch (Exception) { stloc ex; rethrow }
//! } finally {
//!   try {                            // end guard            (R3)
//!     wrapped = EndInvocation<TTarget, TReturn>(instance, retval, ex, state)
//!     retval = wrapped.GetValue()
//!     leave END
//!   } catch (Exception) { LogException(ex); leave END }
//!   END: endfinally
//! }
//! EPILOGUE: [ldloc retval] ret       // the single terminal return
//! ```
//!
//! A failure in either guard falls through to the original method body - the
//! instrumentation never blocks the instrumented application. Unsupported
//! shapes are rejected before any mutation, so the original body is retained
//! bit-for-bit whenever this module returns an error.
//!
//! Argument marshaling picks one of two strategies by declared parameter
//! count: below [`FASTPATH_COUNT`] each argument is loaded directly and the
//! begin call is specialized per concrete argument-type list; at or above it,
//! the arguments are boxed into one `object[]`.

use log::debug;

use crate::{
    assembly::{opcode, Immediate, InstructionStream, NodeId, OpCode, Operand},
    definitions::MethodProbe,
    dispatch::MethodShape,
    engine::Settings,
    metadata::{
        cache::TokenCache,
        method::{ExceptionRegion, MethodBody},
        signatures::{
            encode_method_ref_signature, encode_method_spec_signature, encode_type_spec_signature,
            LocalVar, MethodSig, ParamSig, TypeSig,
        },
        token::Token,
    },
    Error, Result,
};

/// Parameter-count boundary between the direct-load fast path and the
/// boxed-array slow path.
pub const FASTPATH_COUNT: usize = 9;

// Member and support-type names on the probe handler surface.
const BEGIN_METHOD: &str = "BeginInvocation";
const END_METHOD: &str = "EndInvocation";
const LOG_EXCEPTION_METHOD: &str = "LogException";
const GET_VALUE_METHOD: &str = "GetValue";
const STATE_TYPE: &str = "ProbeState";
const RETURN_TYPE: &str = "ProbeReturn`1";
const EXCEPTION_TYPE: &str = "System.Exception";
const OBJECT_TYPE: &str = "System.Object";

/// Everything one rewrite invocation needs besides the body itself.
pub struct RewriteContext<'a> {
    /// The target method's parsed signature
    pub signature: &'a MethodSig,
    /// The target method's shape traits
    pub shape: MethodShape,
    /// The probe driving this rewrite
    pub probe: &'a MethodProbe,
    /// The owning module's token cache
    pub cache: &'a TokenCache,
    /// Engine settings
    pub settings: &'a Settings,
}

/// Per-argument marshaling plan for the boxed-array slow path.
enum SlowArg {
    /// `ldarg; stelem.ref` - already a reference
    Reference,
    /// `ldarg; box <token>; stelem.ref`
    Box(Token),
    /// `ldarg; ldind.ref; stelem.ref` - by-reference parameter over a reference type
    DerefReference,
    /// `ldarg; ldobj <token>; box <token>; stelem.ref`
    DerefBox(Token),
}

/// Every token the transformation emits, resolved up front so that an
/// emission failure aborts before the body is touched.
struct Symbols {
    state_type: Token,
    exception_type: Token,
    object_type: Option<Token>,
    begin_spec: Token,
    end_spec: Token,
    log_exception: Token,
    get_value: Option<Token>,
    wrapped_local: Option<TypeSig>,
    slow_args: Option<Vec<SlowArg>>,
}

/// Rewrite `body` into the instrumented around-advice layout.
///
/// No mutation happens until every guard has passed and every metadata
/// reference has been emitted; on any error the model - and therefore the
/// body the host sees - is unchanged.
///
/// # Errors
/// - [`crate::Error::UnsupportedConstruct`] for shapes the scheme cannot
///   instrument (static methods on value types, generic-struct receivers,
///   by-reference returns, by-reference parameters without the feature flag)
/// - [`crate::Error::EmitFailed`] if a metadata reference cannot be emitted
pub fn instrument(body: &mut MethodBody, ctx: &RewriteContext<'_>) -> Result<()> {
    check_supported(ctx)?;
    let symbols = resolve_symbols(ctx)?;

    let return_sig = ctx.signature.return_type.sig.clone();
    let non_void = !return_sig.is_void();
    let param_count = ctx.signature.params.len();

    // Locals: captured return value (non-void only), opaque state, wrapped
    // return descriptor (non-void only), captured exception.
    let local_return = if non_void {
        Some(body.alloc_local(LocalVar {
            by_ref: false,
            pinned: false,
            sig: return_sig.clone(),
        })?)
    } else {
        None
    };
    let local_state = body.alloc_local(LocalVar {
        by_ref: false,
        pinned: false,
        sig: TypeSig::ValueType(symbols.state_type),
    })?;
    let local_wrapped = match &symbols.wrapped_local {
        Some(sig) => Some(body.alloc_local(LocalVar {
            by_ref: false,
            pinned: false,
            sig: sig.clone(),
        })?),
        None => None,
    };
    let local_exception = body.alloc_local(LocalVar {
        by_ref: false,
        pinned: false,
        sig: TypeSig::Class(symbols.exception_type),
    })?;

    let shape = ctx.shape;
    let stream = body.instructions_mut();
    let orig_head = stream
        .head()
        .ok_or_else(|| Error::ImportFailed("body has no instructions".to_string()))?;
    let orig_tail = stream
        .tail()
        .ok_or_else(|| Error::ImportFailed("body has no instructions".to_string()))?;

    // Relocate original returns: store the value, then leave to the shared
    // epilogue (patched once the epilogue exists). The original stream is
    // otherwise untouched and stays reachable.
    let original_rets: Vec<NodeId> = stream
        .iter()
        .filter(|n| stream.get(*n).opcode.value == opcode::RET.value)
        .collect();
    for ret in &original_rets {
        if let Some(local) = local_return {
            let (op, operand) = store_local(local);
            stream.insert_before(*ret, op, operand);
        }
        stream.replace_opcode(*ret, &opcode::LEAVE);
        stream.set_operand(*ret, Operand::Target(NodeId::SENTINEL));
    }

    // Appended scaffolding after the original tail: outer-catch handler,
    // finally body with the guarded end call, epilogue.
    let mut tail = Splicer::appending(stream, orig_tail);

    // Outer catch handler: capture and rethrow.
    let oc_first = tail.emit_pair(store_local(local_exception));
    tail.emit(&opcode::RETHROW, Operand::None);

    // Finally body: guarded end call.
    let finally_first = tail.emit_pair(receiver_load(shape));
    if let Some((op, operand)) = receiver_deref(shape) {
        tail.emit(op, operand);
    }
    if let Some(local) = local_return {
        tail.emit_pair(load_local(local));
    }
    tail.emit_pair(load_local(local_exception));
    tail.emit_pair(load_local(local_state));
    tail.emit(&opcode::CALL, Operand::Token(symbols.end_spec));
    if let (Some(wrapped), Some(get_value), Some(ret_local)) =
        (local_wrapped, symbols.get_value, local_return)
    {
        tail.emit_pair(store_local(wrapped));
        tail.emit_pair(load_local_address(wrapped));
        tail.emit(&opcode::CALL, Operand::Token(get_value));
        tail.emit_pair(store_local(ret_local));
    }
    let end_try_leave = tail.emit(&opcode::LEAVE, Operand::Target(NodeId::SENTINEL));

    // End-call guard handler.
    let end_catch_first = tail.emit(&opcode::CALL, Operand::Token(symbols.log_exception));
    let end_catch_leave = tail.emit(&opcode::LEAVE, Operand::Target(NodeId::SENTINEL));

    let end_finally = tail.emit(&opcode::ENDFINALLY, Operand::None);

    // Epilogue: reload the captured return value and emit the single terminal
    // return.
    let epilogue_first = match local_return {
        Some(local) => {
            let node = tail.emit_pair(load_local(local));
            tail.emit(&opcode::RET, Operand::None);
            node
        }
        None => tail.emit(&opcode::RET, Operand::None),
    };

    stream.set_operand(end_try_leave, Operand::Target(end_finally));
    stream.set_operand(end_catch_leave, Operand::Target(end_finally));
    for ret in &original_rets {
        stream.set_operand(*ret, Operand::Target(epilogue_first));
    }

    // Prologue: guarded begin call, spliced in front of the original head so
    // that every existing reference to it stays valid.
    let mut front = Splicer::prepending(stream, orig_head);

    let prologue_first = front.emit_pair(receiver_load(shape));
    if let Some((op, operand)) = receiver_deref(shape) {
        front.emit(op, operand);
    }

    let arg_base = u16::from(!shape.is_static);
    match &symbols.slow_args {
        None => {
            for index in 0..param_count {
                front.emit_pair(load_argument(arg_base + as_u16(index)));
            }
        }
        Some(plans) => {
            let object_type = symbols
                .object_type
                .ok_or_else(|| Error::EmitFailed("object type was not resolved".to_string()))?;
            front.emit_pair(load_const_i4(as_i32(plans.len())));
            front.emit(&opcode::NEWARR, Operand::Token(object_type));
            for (index, plan) in plans.iter().enumerate() {
                front.emit(&opcode::DUP, Operand::None);
                front.emit_pair(load_const_i4(as_i32(index)));
                front.emit_pair(load_argument(arg_base + as_u16(index)));
                match plan {
                    SlowArg::Reference => {}
                    SlowArg::Box(token) => {
                        front.emit(&opcode::BOX, Operand::Token(*token));
                    }
                    SlowArg::DerefReference => {
                        front.emit(&opcode::LDIND_REF, Operand::None);
                    }
                    SlowArg::DerefBox(token) => {
                        front.emit(&opcode::LDOBJ, Operand::Token(*token));
                        front.emit(&opcode::BOX, Operand::Token(*token));
                    }
                }
                front.emit(&opcode::STELEM_REF, Operand::None);
            }
        }
    }

    front.emit(&opcode::CALL, Operand::Token(symbols.begin_spec));
    front.emit_pair(store_local(local_state));
    front.emit(&opcode::LEAVE, Operand::Target(orig_head));

    // Begin-call guard handler: log and fall through to the original body.
    let begin_catch_first = front.emit(&opcode::CALL, Operand::Token(symbols.log_exception));
    front.emit(&opcode::LEAVE, Operand::Target(orig_head));

    // Imported regions that ended at the original end-of-chain now end where
    // the appended scaffolding begins.
    for region in body.regions_mut() {
        if region.try_end.is_sentinel() {
            region.try_end = oc_first;
        }
        if region.handler_end.is_sentinel() {
            region.handler_end = oc_first;
        }
    }

    // The four synthesized regions; export re-sorts them together with any
    // pre-existing ones.
    body.add_region(ExceptionRegion::catch(
        symbols.exception_type,
        prologue_first,
        begin_catch_first,
        begin_catch_first,
        orig_head,
    ));
    body.add_region(ExceptionRegion::catch(
        symbols.exception_type,
        finally_first,
        end_catch_first,
        end_catch_first,
        end_finally,
    ));
    body.add_region(ExceptionRegion::catch(
        symbols.exception_type,
        prologue_first,
        oc_first,
        oc_first,
        finally_first,
    ));
    body.add_region(ExceptionRegion::finally(
        prologue_first,
        finally_first,
        finally_first,
        epilogue_first,
    ));

    let marshal_depth = if symbols.slow_args.is_some() {
        5
    } else {
        as_u16(param_count) + 1
    };
    body.raise_max_stack(marshal_depth.max(4));

    debug!(
        "instrumented {param_count} parameter(s) via {} path for {}",
        if symbols.slow_args.is_some() {
            "slow"
        } else {
            "fast"
        },
        ctx.probe
    );

    Ok(())
}

/// Directional emit cursor over a stream: appends after a moving tail or
/// prepends in front of a fixed anchor.
struct Splicer<'a> {
    stream: &'a mut InstructionStream,
    anchor: NodeId,
    appending: bool,
}

impl<'a> Splicer<'a> {
    fn appending(stream: &'a mut InstructionStream, after: NodeId) -> Self {
        Splicer {
            stream,
            anchor: after,
            appending: true,
        }
    }

    fn prepending(stream: &'a mut InstructionStream, before: NodeId) -> Self {
        Splicer {
            stream,
            anchor: before,
            appending: false,
        }
    }

    fn emit(&mut self, op: &'static OpCode, operand: Operand) -> NodeId {
        if self.appending {
            self.anchor = self.stream.insert_after(self.anchor, op, operand);
            self.anchor
        } else {
            self.stream.insert_before(self.anchor, op, operand)
        }
    }

    fn emit_pair(&mut self, pair: (&'static OpCode, Operand)) -> NodeId {
        self.emit(pair.0, pair.1)
    }
}

/// Reject method shapes this scheme cannot instrument safely, before any
/// mutation or emission.
fn check_supported(ctx: &RewriteContext<'_>) -> Result<()> {
    let shape = ctx.shape;
    if shape.is_static && shape.declaring_is_value_type {
        return Err(Error::UnsupportedConstruct(
            "static method on a value type cannot supply a receiver".to_string(),
        ));
    }
    if shape.declaring_is_value_type && shape.declaring_generic_params > 0 {
        return Err(Error::UnsupportedConstruct(
            "generic struct receiver has no concrete type spec".to_string(),
        ));
    }
    if ctx.signature.return_type.by_ref {
        return Err(Error::UnsupportedConstruct(
            "by-reference return type".to_string(),
        ));
    }
    for (index, param) in ctx.signature.params.iter().enumerate() {
        if param.by_ref && !ctx.settings.byref_probes {
            return Err(Error::UnsupportedConstruct(format!(
                "by-reference parameter {index} without by-reference support"
            )));
        }
        if matches!(param.sig, TypeSig::TypedByRef | TypeSig::Ptr(_)) {
            return Err(Error::UnsupportedConstruct(format!(
                "parameter {index} has an unmarshalable type"
            )));
        }
    }
    Ok(())
}

/// The `TTarget` instantiation for the begin/end calls.
fn receiver_sig(shape: MethodShape) -> TypeSig {
    if shape.declaring_is_value_type {
        TypeSig::ValueType(shape.declaring_type)
    } else if shape.declaring_generic_params > 0 {
        TypeSig::GenericInst {
            base: Box::new(TypeSig::Class(shape.declaring_type)),
            args: (0..shape.declaring_generic_params)
                .map(TypeSig::Var)
                .collect(),
        }
    } else {
        TypeSig::Class(shape.declaring_type)
    }
}

fn param_sig(sig: TypeSig) -> ParamSig {
    ParamSig { by_ref: false, sig }
}

/// Resolve every metadata reference the transformation will emit.
fn resolve_symbols(ctx: &RewriteContext<'_>) -> Result<Symbols> {
    let cache = ctx.cache;
    let probe_assembly = cache.assembly_ref(&ctx.probe.handler.assembly)?;
    let corlib = cache.assembly_ref(&ctx.settings.corlib_assembly)?;
    let handler = cache.type_ref(probe_assembly, &ctx.probe.handler.type_name)?;
    let state_type = cache.type_ref(probe_assembly, STATE_TYPE)?;
    let exception_type = cache.type_ref(corlib, EXCEPTION_TYPE)?;

    let receiver = receiver_sig(ctx.shape);
    let return_sig = &ctx.signature.return_type.sig;
    let non_void = !return_sig.is_void();
    let param_count = ctx.signature.params.len();
    let fast_path = param_count < FASTPATH_COUNT;

    // BeginInvocation<TTarget, TArg...>(TTarget, TArg...) -> ProbeState, or the
    // object[] form beyond the fast-path boundary.
    let (begin_ref_sig, begin_inst) = if fast_path {
        let mut params = Vec::with_capacity(param_count + 1);
        params.push(param_sig(TypeSig::MVar(0)));
        let mut inst = Vec::with_capacity(param_count + 1);
        inst.push(receiver.clone());
        for (index, param) in ctx.signature.params.iter().enumerate() {
            params.push(ParamSig {
                by_ref: param.by_ref,
                sig: TypeSig::MVar(as_u32(index) + 1),
            });
            inst.push(param.sig.clone());
        }
        (
            MethodSig {
                has_this: false,
                explicit_this: false,
                vararg: false,
                generic_params: as_u32(param_count) + 1,
                return_type: param_sig(TypeSig::ValueType(state_type)),
                params,
            },
            inst,
        )
    } else {
        (
            MethodSig {
                has_this: false,
                explicit_this: false,
                vararg: false,
                generic_params: 1,
                return_type: param_sig(TypeSig::ValueType(state_type)),
                params: vec![
                    param_sig(TypeSig::MVar(0)),
                    param_sig(TypeSig::SzArray(Box::new(TypeSig::Object))),
                ],
            },
            vec![receiver.clone()],
        )
    };
    let begin_ref = cache.member_ref(
        handler,
        BEGIN_METHOD,
        encode_method_ref_signature(&begin_ref_sig)?,
    )?;
    let begin_spec = cache.method_spec(begin_ref, encode_method_spec_signature(&begin_inst)?)?;

    // EndInvocation<TTarget[, TReturn]>(TTarget, [TReturn,] Exception, ProbeState),
    // specialized per return type; the non-void form yields the wrapped-return
    // descriptor.
    let (end_ref_sig, end_inst, wrapped_local) = if non_void {
        let wrapped_type = cache.type_ref(probe_assembly, RETURN_TYPE)?;
        let wrapped_sig = TypeSig::GenericInst {
            base: Box::new(TypeSig::ValueType(wrapped_type)),
            args: vec![return_sig.clone()],
        };
        (
            MethodSig {
                has_this: false,
                explicit_this: false,
                vararg: false,
                generic_params: 2,
                return_type: param_sig(TypeSig::GenericInst {
                    base: Box::new(TypeSig::ValueType(wrapped_type)),
                    args: vec![TypeSig::MVar(1)],
                }),
                params: vec![
                    param_sig(TypeSig::MVar(0)),
                    param_sig(TypeSig::MVar(1)),
                    param_sig(TypeSig::Class(exception_type)),
                    param_sig(TypeSig::ValueType(state_type)),
                ],
            },
            vec![receiver.clone(), return_sig.clone()],
            Some(wrapped_sig),
        )
    } else {
        (
            MethodSig {
                has_this: false,
                explicit_this: false,
                vararg: false,
                generic_params: 1,
                return_type: param_sig(TypeSig::Void),
                params: vec![
                    param_sig(TypeSig::MVar(0)),
                    param_sig(TypeSig::Class(exception_type)),
                    param_sig(TypeSig::ValueType(state_type)),
                ],
            },
            vec![receiver],
            None,
        )
    };
    let end_ref = cache.member_ref(
        handler,
        END_METHOD,
        encode_method_ref_signature(&end_ref_sig)?,
    )?;
    let end_spec = cache.method_spec(end_ref, encode_method_spec_signature(&end_inst)?)?;

    // LogException(Exception) on the handler type.
    let log_sig = MethodSig {
        has_this: false,
        explicit_this: false,
        vararg: false,
        generic_params: 0,
        return_type: param_sig(TypeSig::Void),
        params: vec![param_sig(TypeSig::Class(exception_type))],
    };
    let log_exception = cache.member_ref(
        handler,
        LOG_EXCEPTION_METHOD,
        encode_method_ref_signature(&log_sig)?,
    )?;

    // ProbeReturn<TReturn>.GetValue(), called on the wrapped-return local to
    // refresh the captured return value.
    let get_value = match &wrapped_local {
        Some(wrapped_sig) => {
            let parent = cache.type_spec(encode_type_spec_signature(wrapped_sig)?)?;
            let get_sig = MethodSig {
                has_this: true,
                explicit_this: false,
                vararg: false,
                generic_params: 0,
                return_type: param_sig(TypeSig::Var(0)),
                params: Vec::new(),
            };
            Some(cache.member_ref(
                parent,
                GET_VALUE_METHOD,
                encode_method_ref_signature(&get_sig)?,
            )?)
        }
        None => None,
    };

    let (object_type, slow_args) = if fast_path {
        (None, None)
    } else {
        let mut plans = Vec::with_capacity(param_count);
        for param in &ctx.signature.params {
            plans.push(slow_arg_plan(param, cache)?);
        }
        (Some(cache.type_ref(corlib, OBJECT_TYPE)?), Some(plans))
    };

    Ok(Symbols {
        state_type,
        exception_type,
        object_type,
        begin_spec,
        end_spec,
        log_exception,
        get_value,
        wrapped_local,
        slow_args,
    })
}

/// Pick the slow-path marshaling plan for one parameter.
fn slow_arg_plan(param: &ParamSig, cache: &TokenCache) -> Result<SlowArg> {
    if param.by_ref {
        if param.sig.needs_box() {
            let token = boxing_token(&param.sig, cache)?;
            return Ok(SlowArg::DerefBox(token));
        }
        return Ok(SlowArg::DerefReference);
    }
    if param.sig.needs_box() {
        return Ok(SlowArg::Box(boxing_token(&param.sig, cache)?));
    }
    Ok(SlowArg::Reference)
}

/// The token a `box` / `ldobj` instruction needs for a given type.
fn boxing_token(sig: &TypeSig, cache: &TokenCache) -> Result<Token> {
    match sig {
        TypeSig::ValueType(token) | TypeSig::Class(token) => Ok(*token),
        other => cache.type_spec(encode_type_spec_signature(other)?),
    }
}

/// First instruction that puts the receiver on the stack for the begin/end
/// calls.
fn receiver_load(shape: MethodShape) -> (&'static OpCode, Operand) {
    if shape.is_static {
        (&opcode::LDNULL, Operand::None)
    } else {
        (&opcode::LDARG_0, Operand::None)
    }
}

/// Follow-up load for value-type receivers: `ldarg.0` pushed the managed
/// pointer, `ldobj` materializes the value.
fn receiver_deref(shape: MethodShape) -> Option<(&'static OpCode, Operand)> {
    if !shape.is_static && shape.declaring_is_value_type {
        Some((&opcode::LDOBJ, Operand::Token(shape.declaring_type)))
    } else {
        None
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_u16(value: usize) -> u16 {
    value as u16
}

#[allow(clippy::cast_possible_truncation)]
fn as_u32(value: usize) -> u32 {
    value as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn as_i32(value: usize) -> i32 {
    value as i32
}

fn load_argument(index: u16) -> (&'static OpCode, Operand) {
    match index {
        0 => (&opcode::LDARG_0, Operand::None),
        1 => (&opcode::LDARG_1, Operand::None),
        2 => (&opcode::LDARG_2, Operand::None),
        3 => (&opcode::LDARG_3, Operand::None),
        4..=255 => (
            &opcode::LDARG_S,
            Operand::Immediate(Immediate::UInt8(index.to_le_bytes()[0])),
        ),
        _ => (
            &opcode::LDARG,
            Operand::Immediate(Immediate::UInt16(index)),
        ),
    }
}

fn load_local(index: u16) -> (&'static OpCode, Operand) {
    match index {
        0 => (&opcode::LDLOC_0, Operand::None),
        1 => (&opcode::LDLOC_1, Operand::None),
        2 => (&opcode::LDLOC_2, Operand::None),
        3 => (&opcode::LDLOC_3, Operand::None),
        4..=255 => (
            &opcode::LDLOC_S,
            Operand::Immediate(Immediate::UInt8(index.to_le_bytes()[0])),
        ),
        _ => (
            &opcode::LDLOC,
            Operand::Immediate(Immediate::UInt16(index)),
        ),
    }
}

fn store_local(index: u16) -> (&'static OpCode, Operand) {
    match index {
        0 => (&opcode::STLOC_0, Operand::None),
        1 => (&opcode::STLOC_1, Operand::None),
        2 => (&opcode::STLOC_2, Operand::None),
        3 => (&opcode::STLOC_3, Operand::None),
        4..=255 => (
            &opcode::STLOC_S,
            Operand::Immediate(Immediate::UInt8(index.to_le_bytes()[0])),
        ),
        _ => (
            &opcode::STLOC,
            Operand::Immediate(Immediate::UInt16(index)),
        ),
    }
}

fn load_local_address(index: u16) -> (&'static OpCode, Operand) {
    if index <= 255 {
        (
            &opcode::LDLOCA_S,
            Operand::Immediate(Immediate::UInt8(index.to_le_bytes()[0])),
        )
    } else {
        (
            &opcode::LDLOCA,
            Operand::Immediate(Immediate::UInt16(index)),
        )
    }
}

fn load_const_i4(value: i32) -> (&'static OpCode, Operand) {
    match value {
        -1 => (&opcode::LDC_I4_M1, Operand::None),
        0 => (&opcode::LDC_I4_0, Operand::None),
        1 => (&opcode::LDC_I4_1, Operand::None),
        2 => (&opcode::LDC_I4_2, Operand::None),
        3 => (&opcode::LDC_I4_3, Operand::None),
        4 => (&opcode::LDC_I4_4, Operand::None),
        5 => (&opcode::LDC_I4_5, Operand::None),
        6 => (&opcode::LDC_I4_6, Operand::None),
        7 => (&opcode::LDC_I4_7, Operand::None),
        8 => (&opcode::LDC_I4_8, Operand::None),
        -128..=127 => (
            &opcode::LDC_I4_S,
            Operand::Immediate(Immediate::Int8(value.to_le_bytes()[0] as i8)),
        ),
        _ => (
            &opcode::LDC_I4,
            Operand::Immediate(Immediate::Int32(value)),
        ),
    }
}
