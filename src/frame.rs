//! Stack frame synthesis.
//!
//! Frame layout, higher addresses first (sp points at the last
//! reserved slot once the prologue has run):
//!
//! ```txt
//! | ...            |  previous function stack (16-byte aligned)
//! |----------------|
//! | gr save area   |  vararg functions: int arg regs a<n>..a7
//! |----------------|
//! | saved regs     |  callee-saved regs used in the func (known
//! |                |  only after register allocation)
//! |----------------|
//! | slots assigned |  absent for small functions
//! |   to pseudos   |
//! |----------------|
//! | previous       |  sp right after the call; kept only for vararg
//! | stack start    |  or stack-arg functions, at sp+16
//! |----------------|
//! | RA             |  at sp+8
//! |----------------|
//! | old FP         |  new fp points here
//! |----------------|
//! | small aggr     |
//! | save area      |  optional
//! |----------------|
//! | alloca areas   |  optional, dynamic
//! |----------------|
//! | args passed on |  built and torn down around each call
//! |   the stack    |
//! ```
//!
//! Slots and saved-register areas are multiples of 16 bytes. A
//! function needing none of this (leaf, no alloca, no saves, no
//! varargs, no stack slots, RA dead) gets no prologue at all.

use log::debug;

use crate::ir::{Func, Insn, Op, Operand, Type};
use crate::regs::{
    call_used_hard_reg_p, HardReg, HardRegSet, A0, A7, F0, FP, LINK_HARD_REG, MAX_HARD_REG, SP,
    T1, T2,
};
use crate::utils::round_up16;
use crate::CodeGen;

fn mov(dst: Operand, src: Operand) -> Insn {
    Insn::new(Op::Mov, vec![dst, src])
}

fn saved_reg_p(used_hard_regs: &HardRegSet, reg: HardReg) -> bool {
    !call_used_hard_reg_p(reg, Type::I64) && used_hard_regs.contains(reg) && reg != FP
}

/// Store hard_reg at [base + disp]
fn isave(seq: &mut Vec<Insn>, disp: i64, base: HardReg, hard_reg: HardReg) {
    seq.push(mov(
        Operand::hard_reg_mem(Type::I64, disp, base),
        Operand::HardReg(hard_reg),
    ));
}

/// Pick the base register for the callee-save area. Offsets that
/// cannot fit the 12-bit displacement are folded into T2 first.
fn saved_regs_base(seq: &mut Vec<Insn>, offset: u64) -> (HardReg, i64) {
    if offset + u64::from(MAX_HARD_REG) * 8 < (1 << 11) {
        (FP, offset as i64)
    } else {
        seq.push(mov(Operand::HardReg(T2), Operand::Int(offset as i64)));
        seq.push(Insn::new(
            Op::Add,
            vec![
                Operand::HardReg(T2),
                Operand::HardReg(T2),
                Operand::HardReg(FP),
            ],
        ));
        (T2, 0)
    }
}

pub(crate) fn make_prolog_epilog(
    gen: &mut CodeGen,
    func: &mut Func,
    used_hard_regs: &HardRegSet,
    stack_slots_num: usize,
) {
    let saved_iregs_num = (0..F0).filter(|&r| saved_reg_p(used_hard_regs, r)).count();
    let saved_fregs_num = (F0..=MAX_HARD_REG)
        .filter(|&r| saved_reg_p(used_hard_regs, r))
        .count();
    if gen.leaf_p
        && !gen.alloca_p
        && saved_iregs_num == 0
        && saved_fregs_num == 0
        && !func.vararg_p
        && stack_slots_num == 0
        && !gen.block_arg_func_p
        && gen.small_aggregate_save_area == 0
        && !used_hard_regs.contains(LINK_HARD_REG)
    {
        return;
    }

    let sp_op = Operand::HardReg(SP);
    let fp_op = Operand::HardReg(FP);
    let mut prolog: Vec<Insn> = Vec::new();

    let mut frame_size: u64 = 0;
    if func.vararg_p && gen.non_vararg_int_args_num < 8 {
        // space for the vararg int regs a<n>..a7
        frame_size = u64::from(8 - gen.non_vararg_int_args_num) * 8;
    }
    for r in 0..=MAX_HARD_REG {
        if !call_used_hard_reg_p(r, Type::I64) && used_hard_regs.contains(r) {
            frame_size += 8;
        }
    }
    if frame_size % 16 != 0 {
        frame_size = round_up16(frame_size);
    }
    let frame_size_after_saved_regs = frame_size;
    frame_size += stack_slots_num as u64 * 8;
    if frame_size % 16 != 0 {
        frame_size = round_up16(frame_size);
    }
    let save_prev_stack_p = func.vararg_p || gen.block_arg_func_p;
    if save_prev_stack_p {
        // the first insn: capture the incoming stack pointer in t1
        prolog.push(mov(Operand::HardReg(T1), sp_op.clone()));
        frame_size += 16;
    }
    frame_size += 16; // ra/fp
    if frame_size < (1 << 11) {
        prolog.push(Insn::new(
            Op::Sub,
            vec![sp_op.clone(), sp_op.clone(), Operand::Int(frame_size as i64)],
        ));
    } else {
        prolog.push(mov(Operand::HardReg(T2), Operand::Int(frame_size as i64)));
        prolog.push(Insn::new(
            Op::Sub,
            vec![sp_op.clone(), sp_op.clone(), Operand::HardReg(T2)],
        ));
    }
    if save_prev_stack_p {
        // mem[sp + 16] = t1
        prolog.push(mov(
            Operand::hard_reg_mem(Type::I64, 16, SP),
            Operand::HardReg(T1),
        ));
    }
    prolog.push(mov(
        Operand::hard_reg_mem(Type::I64, 8, SP),
        Operand::HardReg(LINK_HARD_REG),
    ));
    prolog.push(mov(
        Operand::hard_reg_mem(Type::I64, 0, SP),
        fp_op.clone(),
    ));
    prolog.push(mov(fp_op.clone(), sp_op.clone()));
    if func.vararg_p && gen.non_vararg_int_args_num < 8 {
        // spill the vararg int regs
        let reg_save_area_size = 8 * (8 - i64::from(gen.non_vararg_int_args_num));
        let mut start = frame_size as i64 - reg_save_area_size;
        let mut base = SP;
        if start + reg_save_area_size >= (1 << 11) {
            prolog.push(mov(Operand::HardReg(T1), Operand::Int(start)));
            prolog.push(Insn::new(
                Op::Add,
                vec![
                    Operand::HardReg(T1),
                    Operand::HardReg(T1),
                    sp_op.clone(),
                ],
            ));
            start = 0;
            base = T1;
        }
        for r in (A0 + gen.non_vararg_int_args_num as HardReg)..=A7 {
            isave(&mut prolog, start, base, r);
            start += 8;
        }
    }
    // saving callee saved hard registers
    let save_area_offset = frame_size - frame_size_after_saved_regs;
    let (base_reg, mut offset) = saved_regs_base(&mut prolog, save_area_offset);
    for r in 0..=MAX_HARD_REG {
        if saved_reg_p(used_hard_regs, r) {
            assert!(offset < (1 << 11));
            if r < F0 {
                prolog.push(mov(
                    Operand::hard_reg_mem(Type::I64, offset, base_reg),
                    Operand::HardReg(r),
                ));
            } else {
                prolog.push(Insn::new(
                    Op::Dmov,
                    vec![
                        Operand::hard_reg_mem(Type::D, offset, base_reg),
                        Operand::HardReg(r),
                    ],
                ));
            }
            offset += 8;
        }
    }
    if gen.small_aggregate_save_area != 0 {
        if gen.small_aggregate_save_area % 16 != 0 {
            gen.small_aggregate_save_area = round_up16(gen.small_aggregate_save_area);
        }
        prolog.push(Insn::new(
            Op::Sub,
            vec![
                sp_op.clone(),
                sp_op.clone(),
                Operand::Int(gen.small_aggregate_save_area as i64),
            ],
        ));
    }
    debug!(
        "prolog for {}: frame size {frame_size}, {saved_iregs_num}+{saved_fregs_num} saved regs",
        func.name
    );
    func.insns.splice(0..0, prolog);

    // epilogue, before the final return. A trailing jump means an
    // infinite loop was left after constant propagation; there is
    // nothing to return from.
    let tail = func.insns.last().expect("function body is empty");
    if tail.code == Op::Jmp {
        return;
    }
    assert_eq!(tail.code, Op::Ret);
    let mut epilog: Vec<Insn> = Vec::new();
    let (base_reg, mut offset) = saved_regs_base(&mut epilog, save_area_offset);
    for r in 0..=MAX_HARD_REG {
        if saved_reg_p(used_hard_regs, r) {
            assert!(offset < (1 << 11));
            if r < F0 {
                epilog.push(mov(
                    Operand::HardReg(r),
                    Operand::hard_reg_mem(Type::I64, offset, base_reg),
                ));
            } else {
                epilog.push(Insn::new(
                    Op::Dmov,
                    vec![
                        Operand::HardReg(r),
                        Operand::hard_reg_mem(Type::D, offset, base_reg),
                    ],
                ));
            }
            offset += 8;
        }
    }
    // restore ra, sp, fp
    epilog.push(mov(
        Operand::HardReg(LINK_HARD_REG),
        Operand::hard_reg_mem(Type::I64, 8, FP),
    ));
    if frame_size < (1 << 11) {
        epilog.push(Insn::new(
            Op::Add,
            vec![sp_op.clone(), fp_op.clone(), Operand::Int(frame_size as i64)],
        ));
    } else {
        epilog.push(mov(Operand::HardReg(T1), Operand::Int(frame_size as i64)));
        epilog.push(Insn::new(
            Op::Add,
            vec![sp_op.clone(), fp_op.clone(), Operand::HardReg(T1)],
        ));
    }
    epilog.push(mov(fp_op, Operand::hard_reg_mem(Type::I64, 0, FP)));
    let ret_pos = func.insns.len() - 1;
    func.insns.splice(ret_pos..ret_pos, epilog);
}
