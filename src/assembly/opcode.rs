//! The CIL opcode metadata table.
//!
//! One [`OpCode`] constant per instruction, generated together with the decode
//! lookups so the table and the decoder can never drift apart. Instructions hold
//! `&'static OpCode` references into this module.
//!
//! # Example
//!
//! ```rust
//! use cilweave::assembly::opcode;
//!
//! let op = opcode::from_single(0x2A).unwrap();
//! assert_eq!(op.mnemonic, "ret");
//! let prefixed = opcode::from_prefixed(0x1A).unwrap();
//! assert_eq!(prefixed.mnemonic, "rethrow");
//! ```

use super::instruction::{FlowType, OpCode, OperandKind};
use super::opcodes as bytes;

macro_rules! opcode_table {
    (
        single { $( $name:ident => ($byte:path, $mn:literal, $operand:ident, $flow:ident); )* }
        prefixed { $( $pname:ident => ($pbyte:path, $pmn:literal, $poperand:ident, $pflow:ident); )* }
    ) => {
        $(
            #[doc = concat!("The `", $mn, "` instruction.")]
            pub const $name: OpCode = OpCode {
                mnemonic: $mn,
                value: $byte as u16,
                operand: OperandKind::$operand,
                flow: FlowType::$flow,
            };
        )*
        $(
            #[doc = concat!("The `", $pmn, "` instruction (`0xFE`-prefixed).")]
            pub const $pname: OpCode = OpCode {
                mnemonic: $pmn,
                value: 0xFE00 | ($pbyte as u16),
                operand: OperandKind::$poperand,
                flow: FlowType::$pflow,
            };
        )*

        /// Look up a single-byte opcode by its encoding.
        #[must_use]
        pub fn from_single(byte: u8) -> Option<&'static OpCode> {
            match byte {
                $( x if x == $byte => Some(&$name), )*
                _ => None,
            }
        }

        /// Look up a `0xFE`-prefixed opcode by its second byte.
        #[must_use]
        pub fn from_prefixed(byte: u8) -> Option<&'static OpCode> {
            match byte {
                $( x if x == $pbyte => Some(&$pname), )*
                _ => None,
            }
        }
    };
}

opcode_table! {
    single {
        NOP => (bytes::NOP, "nop", None, Next);
        BREAK => (bytes::BREAK, "break", None, Next);
        LDARG_0 => (bytes::LDARG_0, "ldarg.0", None, Next);
        LDARG_1 => (bytes::LDARG_1, "ldarg.1", None, Next);
        LDARG_2 => (bytes::LDARG_2, "ldarg.2", None, Next);
        LDARG_3 => (bytes::LDARG_3, "ldarg.3", None, Next);
        LDLOC_0 => (bytes::LDLOC_0, "ldloc.0", None, Next);
        LDLOC_1 => (bytes::LDLOC_1, "ldloc.1", None, Next);
        LDLOC_2 => (bytes::LDLOC_2, "ldloc.2", None, Next);
        LDLOC_3 => (bytes::LDLOC_3, "ldloc.3", None, Next);
        STLOC_0 => (bytes::STLOC_0, "stloc.0", None, Next);
        STLOC_1 => (bytes::STLOC_1, "stloc.1", None, Next);
        STLOC_2 => (bytes::STLOC_2, "stloc.2", None, Next);
        STLOC_3 => (bytes::STLOC_3, "stloc.3", None, Next);
        LDARG_S => (bytes::LDARG_S, "ldarg.s", UInt8, Next);
        LDARGA_S => (bytes::LDARGA_S, "ldarga.s", UInt8, Next);
        STARG_S => (bytes::STARG_S, "starg.s", UInt8, Next);
        LDLOC_S => (bytes::LDLOC_S, "ldloc.s", UInt8, Next);
        LDLOCA_S => (bytes::LDLOCA_S, "ldloca.s", UInt8, Next);
        STLOC_S => (bytes::STLOC_S, "stloc.s", UInt8, Next);
        LDNULL => (bytes::LDNULL, "ldnull", None, Next);
        LDC_I4_M1 => (bytes::LDC_I4_M1, "ldc.i4.m1", None, Next);
        LDC_I4_0 => (bytes::LDC_I4_0, "ldc.i4.0", None, Next);
        LDC_I4_1 => (bytes::LDC_I4_1, "ldc.i4.1", None, Next);
        LDC_I4_2 => (bytes::LDC_I4_2, "ldc.i4.2", None, Next);
        LDC_I4_3 => (bytes::LDC_I4_3, "ldc.i4.3", None, Next);
        LDC_I4_4 => (bytes::LDC_I4_4, "ldc.i4.4", None, Next);
        LDC_I4_5 => (bytes::LDC_I4_5, "ldc.i4.5", None, Next);
        LDC_I4_6 => (bytes::LDC_I4_6, "ldc.i4.6", None, Next);
        LDC_I4_7 => (bytes::LDC_I4_7, "ldc.i4.7", None, Next);
        LDC_I4_8 => (bytes::LDC_I4_8, "ldc.i4.8", None, Next);
        LDC_I4_S => (bytes::LDC_I4_S, "ldc.i4.s", Int8, Next);
        LDC_I4 => (bytes::LDC_I4, "ldc.i4", Int32, Next);
        LDC_I8 => (bytes::LDC_I8, "ldc.i8", Int64, Next);
        LDC_R4 => (bytes::LDC_R4, "ldc.r4", Float32, Next);
        LDC_R8 => (bytes::LDC_R8, "ldc.r8", Float64, Next);
        DUP => (bytes::DUP, "dup", None, Next);
        POP => (bytes::POP, "pop", None, Next);
        JMP => (bytes::JMP, "jmp", Token, Return);
        CALL => (bytes::CALL, "call", Token, Call);
        CALLI => (bytes::CALLI, "calli", Token, Call);
        RET => (bytes::RET, "ret", None, Return);
        BR_S => (bytes::BR_S, "br.s", Target8, Branch);
        BRFALSE_S => (bytes::BRFALSE_S, "brfalse.s", Target8, CondBranch);
        BRTRUE_S => (bytes::BRTRUE_S, "brtrue.s", Target8, CondBranch);
        BEQ_S => (bytes::BEQ_S, "beq.s", Target8, CondBranch);
        BGE_S => (bytes::BGE_S, "bge.s", Target8, CondBranch);
        BGT_S => (bytes::BGT_S, "bgt.s", Target8, CondBranch);
        BLE_S => (bytes::BLE_S, "ble.s", Target8, CondBranch);
        BLT_S => (bytes::BLT_S, "blt.s", Target8, CondBranch);
        BNE_UN_S => (bytes::BNE_UN_S, "bne.un.s", Target8, CondBranch);
        BGE_UN_S => (bytes::BGE_UN_S, "bge.un.s", Target8, CondBranch);
        BGT_UN_S => (bytes::BGT_UN_S, "bgt.un.s", Target8, CondBranch);
        BLE_UN_S => (bytes::BLE_UN_S, "ble.un.s", Target8, CondBranch);
        BLT_UN_S => (bytes::BLT_UN_S, "blt.un.s", Target8, CondBranch);
        BR => (bytes::BR, "br", Target32, Branch);
        BRFALSE => (bytes::BRFALSE, "brfalse", Target32, CondBranch);
        BRTRUE => (bytes::BRTRUE, "brtrue", Target32, CondBranch);
        BEQ => (bytes::BEQ, "beq", Target32, CondBranch);
        BGE => (bytes::BGE, "bge", Target32, CondBranch);
        BGT => (bytes::BGT, "bgt", Target32, CondBranch);
        BLE => (bytes::BLE, "ble", Target32, CondBranch);
        BLT => (bytes::BLT, "blt", Target32, CondBranch);
        BNE_UN => (bytes::BNE_UN, "bne.un", Target32, CondBranch);
        BGE_UN => (bytes::BGE_UN, "bge.un", Target32, CondBranch);
        BGT_UN => (bytes::BGT_UN, "bgt.un", Target32, CondBranch);
        BLE_UN => (bytes::BLE_UN, "ble.un", Target32, CondBranch);
        BLT_UN => (bytes::BLT_UN, "blt.un", Target32, CondBranch);
        SWITCH => (bytes::SWITCH, "switch", Switch, CondBranch);
        LDIND_I1 => (bytes::LDIND_I1, "ldind.i1", None, Next);
        LDIND_U1 => (bytes::LDIND_U1, "ldind.u1", None, Next);
        LDIND_I2 => (bytes::LDIND_I2, "ldind.i2", None, Next);
        LDIND_U2 => (bytes::LDIND_U2, "ldind.u2", None, Next);
        LDIND_I4 => (bytes::LDIND_I4, "ldind.i4", None, Next);
        LDIND_U4 => (bytes::LDIND_U4, "ldind.u4", None, Next);
        LDIND_I8 => (bytes::LDIND_I8, "ldind.i8", None, Next);
        LDIND_I => (bytes::LDIND_I, "ldind.i", None, Next);
        LDIND_R4 => (bytes::LDIND_R4, "ldind.r4", None, Next);
        LDIND_R8 => (bytes::LDIND_R8, "ldind.r8", None, Next);
        LDIND_REF => (bytes::LDIND_REF, "ldind.ref", None, Next);
        STIND_REF => (bytes::STIND_REF, "stind.ref", None, Next);
        STIND_I1 => (bytes::STIND_I1, "stind.i1", None, Next);
        STIND_I2 => (bytes::STIND_I2, "stind.i2", None, Next);
        STIND_I4 => (bytes::STIND_I4, "stind.i4", None, Next);
        STIND_I8 => (bytes::STIND_I8, "stind.i8", None, Next);
        STIND_R4 => (bytes::STIND_R4, "stind.r4", None, Next);
        STIND_R8 => (bytes::STIND_R8, "stind.r8", None, Next);
        ADD => (bytes::ADD, "add", None, Next);
        SUB => (bytes::SUB, "sub", None, Next);
        MUL => (bytes::MUL, "mul", None, Next);
        DIV => (bytes::DIV, "div", None, Next);
        DIV_UN => (bytes::DIV_UN, "div.un", None, Next);
        REM => (bytes::REM, "rem", None, Next);
        REM_UN => (bytes::REM_UN, "rem.un", None, Next);
        AND => (bytes::AND, "and", None, Next);
        OR => (bytes::OR, "or", None, Next);
        XOR => (bytes::XOR, "xor", None, Next);
        SHL => (bytes::SHL, "shl", None, Next);
        SHR => (bytes::SHR, "shr", None, Next);
        SHR_UN => (bytes::SHR_UN, "shr.un", None, Next);
        NEG => (bytes::NEG, "neg", None, Next);
        NOT => (bytes::NOT, "not", None, Next);
        CONV_I1 => (bytes::CONV_I1, "conv.i1", None, Next);
        CONV_I2 => (bytes::CONV_I2, "conv.i2", None, Next);
        CONV_I4 => (bytes::CONV_I4, "conv.i4", None, Next);
        CONV_I8 => (bytes::CONV_I8, "conv.i8", None, Next);
        CONV_R4 => (bytes::CONV_R4, "conv.r4", None, Next);
        CONV_R8 => (bytes::CONV_R8, "conv.r8", None, Next);
        CONV_U4 => (bytes::CONV_U4, "conv.u4", None, Next);
        CONV_U8 => (bytes::CONV_U8, "conv.u8", None, Next);
        CALLVIRT => (bytes::CALLVIRT, "callvirt", Token, Call);
        CPOBJ => (bytes::CPOBJ, "cpobj", Token, Next);
        LDOBJ => (bytes::LDOBJ, "ldobj", Token, Next);
        LDSTR => (bytes::LDSTR, "ldstr", Token, Next);
        NEWOBJ => (bytes::NEWOBJ, "newobj", Token, Call);
        CASTCLASS => (bytes::CASTCLASS, "castclass", Token, Next);
        ISINST => (bytes::ISINST, "isinst", Token, Next);
        CONV_R_UN => (bytes::CONV_R_UN, "conv.r.un", None, Next);
        UNBOX => (bytes::UNBOX, "unbox", Token, Next);
        THROW => (bytes::THROW, "throw", None, Throw);
        LDFLD => (bytes::LDFLD, "ldfld", Token, Next);
        LDFLDA => (bytes::LDFLDA, "ldflda", Token, Next);
        STFLD => (bytes::STFLD, "stfld", Token, Next);
        LDSFLD => (bytes::LDSFLD, "ldsfld", Token, Next);
        LDSFLDA => (bytes::LDSFLDA, "ldsflda", Token, Next);
        STSFLD => (bytes::STSFLD, "stsfld", Token, Next);
        STOBJ => (bytes::STOBJ, "stobj", Token, Next);
        CONV_OVF_I1_UN => (bytes::CONV_OVF_I1_UN, "conv.ovf.i1.un", None, Next);
        CONV_OVF_I2_UN => (bytes::CONV_OVF_I2_UN, "conv.ovf.i2.un", None, Next);
        CONV_OVF_I4_UN => (bytes::CONV_OVF_I4_UN, "conv.ovf.i4.un", None, Next);
        CONV_OVF_I8_UN => (bytes::CONV_OVF_I8_UN, "conv.ovf.i8.un", None, Next);
        CONV_OVF_U1_UN => (bytes::CONV_OVF_U1_UN, "conv.ovf.u1.un", None, Next);
        CONV_OVF_U2_UN => (bytes::CONV_OVF_U2_UN, "conv.ovf.u2.un", None, Next);
        CONV_OVF_U4_UN => (bytes::CONV_OVF_U4_UN, "conv.ovf.u4.un", None, Next);
        CONV_OVF_U8_UN => (bytes::CONV_OVF_U8_UN, "conv.ovf.u8.un", None, Next);
        CONV_OVF_I_UN => (bytes::CONV_OVF_I_UN, "conv.ovf.i.un", None, Next);
        CONV_OVF_U_UN => (bytes::CONV_OVF_U_UN, "conv.ovf.u.un", None, Next);
        BOX => (bytes::BOX, "box", Token, Next);
        NEWARR => (bytes::NEWARR, "newarr", Token, Next);
        LDLEN => (bytes::LDLEN, "ldlen", None, Next);
        LDELEMA => (bytes::LDELEMA, "ldelema", Token, Next);
        LDELEM_I1 => (bytes::LDELEM_I1, "ldelem.i1", None, Next);
        LDELEM_U1 => (bytes::LDELEM_U1, "ldelem.u1", None, Next);
        LDELEM_I2 => (bytes::LDELEM_I2, "ldelem.i2", None, Next);
        LDELEM_U2 => (bytes::LDELEM_U2, "ldelem.u2", None, Next);
        LDELEM_I4 => (bytes::LDELEM_I4, "ldelem.i4", None, Next);
        LDELEM_U4 => (bytes::LDELEM_U4, "ldelem.u4", None, Next);
        LDELEM_I8 => (bytes::LDELEM_I8, "ldelem.i8", None, Next);
        LDELEM_I => (bytes::LDELEM_I, "ldelem.i", None, Next);
        LDELEM_R4 => (bytes::LDELEM_R4, "ldelem.r4", None, Next);
        LDELEM_R8 => (bytes::LDELEM_R8, "ldelem.r8", None, Next);
        LDELEM_REF => (bytes::LDELEM_REF, "ldelem.ref", None, Next);
        STELEM_I => (bytes::STELEM_I, "stelem.i", None, Next);
        STELEM_I1 => (bytes::STELEM_I1, "stelem.i1", None, Next);
        STELEM_I2 => (bytes::STELEM_I2, "stelem.i2", None, Next);
        STELEM_I4 => (bytes::STELEM_I4, "stelem.i4", None, Next);
        STELEM_I8 => (bytes::STELEM_I8, "stelem.i8", None, Next);
        STELEM_R4 => (bytes::STELEM_R4, "stelem.r4", None, Next);
        STELEM_R8 => (bytes::STELEM_R8, "stelem.r8", None, Next);
        STELEM_REF => (bytes::STELEM_REF, "stelem.ref", None, Next);
        LDELEM => (bytes::LDELEM, "ldelem", Token, Next);
        STELEM => (bytes::STELEM, "stelem", Token, Next);
        UNBOX_ANY => (bytes::UNBOX_ANY, "unbox.any", Token, Next);
        CONV_OVF_I1 => (bytes::CONV_OVF_I1, "conv.ovf.i1", None, Next);
        CONV_OVF_U1 => (bytes::CONV_OVF_U1, "conv.ovf.u1", None, Next);
        CONV_OVF_I2 => (bytes::CONV_OVF_I2, "conv.ovf.i2", None, Next);
        CONV_OVF_U2 => (bytes::CONV_OVF_U2, "conv.ovf.u2", None, Next);
        CONV_OVF_I4 => (bytes::CONV_OVF_I4, "conv.ovf.i4", None, Next);
        CONV_OVF_U4 => (bytes::CONV_OVF_U4, "conv.ovf.u4", None, Next);
        CONV_OVF_I8 => (bytes::CONV_OVF_I8, "conv.ovf.i8", None, Next);
        CONV_OVF_U8 => (bytes::CONV_OVF_U8, "conv.ovf.u8", None, Next);
        REFANYVAL => (bytes::REFANYVAL, "refanyval", Token, Next);
        CKFINITE => (bytes::CKFINITE, "ckfinite", None, Next);
        MKREFANY => (bytes::MKREFANY, "mkrefany", Token, Next);
        LDTOKEN => (bytes::LDTOKEN, "ldtoken", Token, Next);
        CONV_U2 => (bytes::CONV_U2, "conv.u2", None, Next);
        CONV_U1 => (bytes::CONV_U1, "conv.u1", None, Next);
        CONV_I => (bytes::CONV_I, "conv.i", None, Next);
        CONV_OVF_I => (bytes::CONV_OVF_I, "conv.ovf.i", None, Next);
        CONV_OVF_U => (bytes::CONV_OVF_U, "conv.ovf.u", None, Next);
        ADD_OVF => (bytes::ADD_OVF, "add.ovf", None, Next);
        ADD_OVF_UN => (bytes::ADD_OVF_UN, "add.ovf.un", None, Next);
        MUL_OVF => (bytes::MUL_OVF, "mul.ovf", None, Next);
        MUL_OVF_UN => (bytes::MUL_OVF_UN, "mul.ovf.un", None, Next);
        SUB_OVF => (bytes::SUB_OVF, "sub.ovf", None, Next);
        SUB_OVF_UN => (bytes::SUB_OVF_UN, "sub.ovf.un", None, Next);
        ENDFINALLY => (bytes::ENDFINALLY, "endfinally", None, EndHandler);
        LEAVE => (bytes::LEAVE, "leave", Target32, Branch);
        LEAVE_S => (bytes::LEAVE_S, "leave.s", Target8, Branch);
        STIND_I => (bytes::STIND_I, "stind.i", None, Next);
        CONV_U => (bytes::CONV_U, "conv.u", None, Next);
    }
    prefixed {
        ARGLIST => (bytes::FE_ARGLIST, "arglist", None, Next);
        CEQ => (bytes::FE_CEQ, "ceq", None, Next);
        CGT => (bytes::FE_CGT, "cgt", None, Next);
        CGT_UN => (bytes::FE_CGT_UN, "cgt.un", None, Next);
        CLT => (bytes::FE_CLT, "clt", None, Next);
        CLT_UN => (bytes::FE_CLT_UN, "clt.un", None, Next);
        LDFTN => (bytes::FE_LDFTN, "ldftn", Token, Next);
        LDVIRTFTN => (bytes::FE_LDVIRTFTN, "ldvirtftn", Token, Next);
        LDARG => (bytes::FE_LDARG, "ldarg", UInt16, Next);
        LDARGA => (bytes::FE_LDARGA, "ldarga", UInt16, Next);
        STARG => (bytes::FE_STARG, "starg", UInt16, Next);
        LDLOC => (bytes::FE_LDLOC, "ldloc", UInt16, Next);
        LDLOCA => (bytes::FE_LDLOCA, "ldloca", UInt16, Next);
        STLOC => (bytes::FE_STLOC, "stloc", UInt16, Next);
        LOCALLOC => (bytes::FE_LOCALLOC, "localloc", None, Next);
        ENDFILTER => (bytes::FE_ENDFILTER, "endfilter", None, EndHandler);
        UNALIGNED => (bytes::FE_UNALIGNED, "unaligned.", UInt8, Next);
        VOLATILE => (bytes::FE_VOLATILE, "volatile.", None, Next);
        TAIL => (bytes::FE_TAIL, "tail.", None, Next);
        INITOBJ => (bytes::FE_INITOBJ, "initobj", Token, Next);
        CONSTRAINED => (bytes::FE_CONSTRAINED, "constrained.", Token, Next);
        CPBLK => (bytes::FE_CPBLK, "cpblk", None, Next);
        INITBLK => (bytes::FE_INITBLK, "initblk", None, Next);
        RETHROW => (bytes::FE_RETHROW, "rethrow", None, Throw);
        SIZEOF => (bytes::FE_SIZEOF, "sizeof", Token, Next);
        REFANYTYPE => (bytes::FE_REFANYTYPE, "refanytype", None, Next);
        READONLY => (bytes::FE_READONLY, "readonly.", None, Next);
    }
}

/// Map a compact branch form to its 4-byte-displacement equivalent.
///
/// Returns the opcode unchanged if it has no compact form. The importer widens
/// every branch it decodes so that splicing can never overflow an 8-bit
/// displacement.
#[must_use]
pub fn widened(op: &'static OpCode) -> &'static OpCode {
    match op.value {
        x if x == BR_S.value => &BR,
        x if x == BRFALSE_S.value => &BRFALSE,
        x if x == BRTRUE_S.value => &BRTRUE,
        x if x == BEQ_S.value => &BEQ,
        x if x == BGE_S.value => &BGE,
        x if x == BGT_S.value => &BGT,
        x if x == BLE_S.value => &BLE,
        x if x == BLT_S.value => &BLT,
        x if x == BNE_UN_S.value => &BNE_UN,
        x if x == BGE_UN_S.value => &BGE_UN,
        x if x == BGT_UN_S.value => &BGT_UN,
        x if x == BLE_UN_S.value => &BLE_UN,
        x if x == BLT_UN_S.value => &BLT_UN,
        x if x == LEAVE_S.value => &LEAVE,
        _ => op,
    }
}
