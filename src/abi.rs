//! LP64D argument classification.
//!
//! Scalar float/double arguments consume fa0..fa7; everything else
//! (including long double, blocks and all variadic arguments) consumes
//! a0..a7. A long double takes an even-aligned GPR pair. Arguments
//! past the eighth register of their class go to the stack.
//!
//! Variadic float arguments must already be promoted to double by the
//! caller; the machinize pass rejects bare floats in variadic
//! position.

use crate::ir::{Op, Type};
use crate::regs::{HardReg, A0, FA0};

/// Classify one argument, advancing the register counters. Returns the
/// assigned register (None for a stack argument) and the move opcode
/// used to transfer a value of this type.
pub fn arg_reg(
    arg_type: Type,
    vararg_p: bool,
    int_arg_num: &mut usize,
    fp_arg_num: &mut usize,
) -> (Option<HardReg>, Op) {
    if !vararg_p && (arg_type == Type::F || arg_type == Type::D) {
        let reg = if *fp_arg_num <= 7 {
            Some(FA0 + *fp_arg_num as HardReg)
        } else {
            None
        };
        *fp_arg_num += 1;
        (reg, if arg_type == Type::F { Op::Fmov } else { Op::Dmov })
    } else {
        // including LD, BLK, RBLK
        if arg_type == Type::Ld && *int_arg_num % 2 != 0 {
            *int_arg_num += 1;
        }
        let reg = if *int_arg_num <= 7 {
            Some(A0 + *int_arg_num as HardReg)
        } else {
            None
        };
        *int_arg_num += 1;
        if arg_type != Type::Ld {
            (reg, Op::Mov)
        } else {
            *int_arg_num += 1;
            (reg, Op::Ldmov)
        }
    }
}

/// Extension opcode required to widen a sub-word value to 64 bits
/// before it enters an argument register
pub fn ext_code(ty: Type) -> Option<Op> {
    match ty {
        Type::I8 => Some(Op::Ext8),
        Type::U8 => Some(Op::Uext8),
        Type::I16 => Some(Op::Ext16),
        Type::U16 => Some(Op::Uext16),
        Type::I32 => Some(Op::Ext32),
        Type::U32 => Some(Op::Uext32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{A7, FA0};

    fn classify(types: &[(Type, bool)]) -> Vec<Option<HardReg>> {
        let (mut ints, mut fps) = (0, 0);
        types
            .iter()
            .map(|&(ty, vararg_p)| arg_reg(ty, vararg_p, &mut ints, &mut fps).0)
            .collect()
    }

    #[test]
    fn check_int_sequence() {
        let regs = classify(&[(Type::I64, false); 9]);
        for (i, r) in regs.iter().enumerate().take(8) {
            assert_eq!(*r, Some(A0 + i as HardReg));
        }
        assert_eq!(regs[8], None);
    }

    #[test]
    fn check_fp_sequence() {
        let regs = classify(&[(Type::D, false); 9]);
        for (i, r) in regs.iter().enumerate().take(8) {
            assert_eq!(*r, Some(FA0 + i as HardReg));
        }
        assert_eq!(regs[8], None);
    }

    #[test]
    fn check_classes_are_independent() {
        // int args do not consume fp regs and vice versa
        let regs = classify(&[
            (Type::I64, false),
            (Type::D, false),
            (Type::I64, false),
            (Type::F, false),
        ]);
        assert_eq!(regs, vec![Some(A0), Some(FA0), Some(A0 + 1), Some(FA0 + 1)]);
    }

    #[test]
    fn check_long_double_even_pair() {
        // i64 leaves the counter odd; ld must skip to a2/a3
        let regs = classify(&[(Type::I64, false), (Type::Ld, false), (Type::I64, false)]);
        assert_eq!(regs, vec![Some(A0), Some(A0 + 2), Some(A0 + 4)]);
    }

    #[test]
    fn check_long_double_overflow_to_stack() {
        let mut types = vec![(Type::I64, false); 7];
        types.push((Type::Ld, false)); // would need a8/a9
        let regs = classify(&types);
        assert_eq!(regs[7], None);
    }

    #[test]
    fn check_variadic_double_in_gprs() {
        let regs = classify(&[(Type::P, false), (Type::I64, true), (Type::D, true)]);
        assert_eq!(regs, vec![Some(A0), Some(A0 + 1), Some(A0 + 2)]);
    }

    #[test]
    fn check_mov_codes() {
        let (mut i, mut f) = (0, 0);
        assert_eq!(arg_reg(Type::F, false, &mut i, &mut f).1, Op::Fmov);
        assert_eq!(arg_reg(Type::D, false, &mut i, &mut f).1, Op::Dmov);
        assert_eq!(arg_reg(Type::Ld, false, &mut i, &mut f).1, Op::Ldmov);
        assert_eq!(arg_reg(Type::I32, false, &mut i, &mut f).1, Op::Mov);
        assert_eq!(arg_reg(Type::D, true, &mut i, &mut f).1, Op::Mov);
        assert_eq!(i, 4); // i32 + ld pair + variadic double
    }

    #[test]
    fn check_gpr_exhaustion_boundary() {
        // ld at a7: even-align pushes to 8 -> stack
        let regs = classify(&[
            (Type::I64, false),
            (Type::I64, false),
            (Type::I64, false),
            (Type::I64, false),
            (Type::I64, false),
            (Type::I64, false),
            (Type::I64, false),
            (Type::Ld, false),
        ]);
        assert_eq!(regs[7], None);
    }

    #[test]
    fn check_ext_codes() {
        assert_eq!(ext_code(Type::I8), Some(Op::Ext8));
        assert_eq!(ext_code(Type::U16), Some(Op::Uext16));
        assert_eq!(ext_code(Type::U32), Some(Op::Uext32));
        assert_eq!(ext_code(Type::I64), None);
        assert_eq!(ext_code(Type::D), None);
    }
}
