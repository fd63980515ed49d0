//! ABI lowering: rewrite a function body so every calling-convention
//! obligation is explicit.
//!
//! After this pass all argument and result traffic is spelled out as
//! moves through hard registers or stack memory, long double
//! operations have become builtin calls, sub-word compares operate on
//! widened values, and fused floating compare-branches are split into
//! a compare plus a branch-on-true. The pass also records the
//! per-function properties (leaf, alloca, block args, vararg GPR
//! count) that prologue synthesis needs.
//!
//! The pass rebuilds the instruction vector: for each source
//! instruction it emits any preparatory instructions, then the
//! (possibly rewritten) instruction, then any follow-up instructions.

use log::debug;

use crate::abi::{arg_reg, ext_code};
use crate::builtins;
use crate::ir::{Func, HardRegMem, Insn, Mem, Module, Op, Operand, Proto, Reg, Type};
use crate::regs::{HardReg, A0, FA0, FP, FT1, SP, T0, T1};
use crate::utils::round_up16;
use crate::{CodeGen, GenError};

/// Unspec code of the synthetic fmv.x.w transfer
pub const FMVXW_CODE: i64 = 0;
/// Unspec code of the synthetic fmv.x.d transfer
pub const FMVXD_CODE: i64 = 1;

fn mov_code_for(ty: Type) -> Op {
    match ty {
        Type::F => Op::Fmov,
        Type::D => Op::Dmov,
        Type::Ld => Op::Ldmov,
        _ => Op::Mov,
    }
}

fn mem_type_for(ty: Type) -> Type {
    match ty {
        Type::F | Type::D | Type::Ld => ty,
        _ => Type::I64,
    }
}

/// Split a fused floating compare-and-branch into its compare opcode
fn split_branch_code(code: Op) -> Option<Op> {
    Some(match code {
        Op::Fbeq => Op::Feq,
        Op::Fbne => Op::Fne,
        Op::Fblt => Op::Flt,
        Op::Fbge => Op::Fge,
        Op::Fbgt => Op::Fgt,
        Op::Fble => Op::Fle,
        Op::Dbeq => Op::Deq,
        Op::Dbne => Op::Dne,
        Op::Dblt => Op::Dlt,
        Op::Dbge => Op::Dge,
        Op::Dbgt => Op::Dgt,
        Op::Dble => Op::Dle,
        Op::Ldbeq => Op::Ldeq,
        Op::Ldbne => Op::Ldne,
        Op::Ldblt => Op::Ldlt,
        Op::Ldbge => Op::Ldge,
        Op::Ldbgt => Op::Ldgt,
        Op::Ldble => Op::Ldle,
        _ => return None,
    })
}

/// Extension needed to run a 32-bit compare at full width
fn short_cmp_ext(code: Op) -> Option<Op> {
    match code {
        Op::Eqs
        | Op::Nes
        | Op::Beqs
        | Op::Bnes
        | Op::Lts
        | Op::Les
        | Op::Gts
        | Op::Ges
        | Op::Blts
        | Op::Bles
        | Op::Bgts
        | Op::Bges => Some(Op::Ext32),
        Op::Ults
        | Op::Ules
        | Op::Ugts
        | Op::Uges
        | Op::Ublts
        | Op::Ubles
        | Op::Ubgts
        | Op::Ubges => Some(Op::Uext32),
        _ => None,
    }
}

pub(crate) fn machinize(
    gen: &mut CodeGen,
    module: &mut Module,
    func: &mut Func,
) -> Result<(), GenError> {
    debug!("machinize {}", func.name);
    gen.block_arg_func_p = false;
    gen.small_aggregate_save_area = 0;
    let mut out: Vec<Insn> = Vec::with_capacity(func.insns.len());

    machinize_args(gen, func, &mut out);

    gen.alloca_p = false;
    gen.leaf_p = true;
    let insns = std::mem::take(&mut func.insns);
    for insn in insns {
        lower_insn(gen, module, func, insn, &mut out)?;
    }
    func.insns = out;
    Ok(())
}

/// Materialize the formal arguments into their virtual registers:
/// moves from argument registers, loads from the caller's stack area,
/// and in-frame copies of small by-value aggregates.
fn machinize_args(gen: &mut CodeGen, func: &mut Func, out: &mut Vec<Insn>) {
    let mut int_arg_num = 0usize;
    let mut fp_arg_num = 0usize;
    let mut mem_size: i64 = 0;
    for i in 0..func.nargs() {
        // argument extension was already done during simplification
        let var = func.vars[i].clone();
        let ty = var.ty;
        let vreg = Func::arg_reg(i);
        let qwords = (var.size + 7) / 8;
        if ty.is_blk() && qwords <= 2 {
            if ty == Type::BlkEven {
                int_arg_num = (int_arg_num + 1) / 2 * 2;
            }
            if (ty == Type::BlkFp && fp_arg_num < 8) || (ty != Type::BlkFp && int_arg_num < 8) {
                let mov_code = if ty == Type::BlkFp { Op::Dmov } else { Op::Mov };
                let mem_type = if ty == Type::BlkFp { Type::D } else { Type::I64 };
                let base_arg_reg = if ty == Type::BlkFp { FA0 } else { A0 };
                let arg_reg_num = if ty == Type::BlkFp { fp_arg_num } else { int_arg_num };

                gen.small_aggregate_save_area += qwords * 8;
                assert!(gen.small_aggregate_save_area < (1 << 11));
                out.push(Insn::new(
                    Op::Sub,
                    vec![
                        Operand::Reg(vreg),
                        Operand::HardReg(FP),
                        Operand::Int(gen.small_aggregate_save_area as i64),
                    ],
                ));
                if qwords == 0 {
                    continue;
                }
                out.push(Insn::new(
                    mov_code,
                    vec![
                        Operand::mem(mem_type, 0, vreg),
                        Operand::HardReg(base_arg_reg + arg_reg_num as HardReg),
                    ],
                ));
                if qwords == 2 {
                    if arg_reg_num < 7 {
                        out.push(Insn::new(
                            mov_code,
                            vec![
                                Operand::mem(mem_type, 8, vreg),
                                Operand::HardReg(base_arg_reg + arg_reg_num as HardReg + 1),
                            ],
                        ));
                    } else {
                        // second half came on the caller's stack
                        seed_prev_sp(gen, out);
                        let treg = if ty == Type::BlkFp { FT1 } else { T1 };
                        out.push(Insn::new(
                            mov_code,
                            vec![
                                Operand::HardReg(treg),
                                Operand::hard_reg_mem(mem_type, mem_size, T0),
                            ],
                        ));
                        out.push(Insn::new(
                            mov_code,
                            vec![Operand::mem(mem_type, 8, vreg), Operand::HardReg(treg)],
                        ));
                        mem_size += 8;
                    }
                }
                if ty == Type::BlkFp {
                    fp_arg_num += qwords as usize;
                } else {
                    int_arg_num += qwords as usize;
                }
            } else {
                // fully on the stack: the register holds the address
                seed_prev_sp(gen, out);
                out.push(Insn::new(
                    Op::Add,
                    vec![
                        Operand::Reg(vreg),
                        Operand::HardReg(T0),
                        Operand::Int(mem_size),
                    ],
                ));
                mem_size += qwords as i64 * 8;
            }
            continue;
        }
        let (areg, mov_code) = arg_reg(ty, false, &mut int_arg_num, &mut fp_arg_num);
        if let Some(r) = areg {
            out.push(Insn::new(
                mov_code,
                vec![Operand::Reg(vreg), Operand::HardReg(r)],
            ));
        } else {
            // the value (or the block address) is on the caller's stack
            seed_prev_sp(gen, out);
            out.push(Insn::new(
                mov_code_for(ty),
                vec![
                    Operand::Reg(vreg),
                    Operand::hard_reg_mem(mem_type_for(ty), mem_size, T0),
                ],
            ));
            mem_size += if ty == Type::Ld { 16 } else { 8 };
        }
    }
    gen.non_vararg_int_args_num = int_arg_num as u32;
}

/// On first use load T0 with the previous stack start saved at FP+16
fn seed_prev_sp(gen: &mut CodeGen, out: &mut Vec<Insn>) {
    if !gen.block_arg_func_p {
        gen.block_arg_func_p = true;
        out.push(Insn::new(
            Op::Mov,
            vec![
                Operand::HardReg(T0),
                Operand::hard_reg_mem(Type::I64, 16, FP),
            ],
        ));
    }
}

fn lower_insn(
    gen: &mut CodeGen,
    module: &mut Module,
    func: &mut Func,
    mut insn: Insn,
    out: &mut Vec<Insn>,
) -> Result<(), GenError> {
    let code = insn.code;
    if let Some(cmp_code) = split_branch_code(code) {
        let temp = func.new_temp_reg(Type::I64);
        let cmp = Insn::new(
            cmp_code,
            vec![
                Operand::Reg(temp),
                insn.ops[1].clone(),
                insn.ops[2].clone(),
            ],
        );
        lower_insn(gen, module, func, cmp, out)?;
        out.push(Insn::new(
            Op::Bt,
            vec![insn.ops[0].clone(), Operand::Reg(temp)],
        ));
        return Ok(());
    }
    if let Some(ext) = short_cmp_ext(code) {
        let temp1 = func.new_temp_reg(Type::I64);
        let temp2 = func.new_temp_reg(Type::I64);
        out.push(Insn::new(
            ext,
            vec![Operand::Reg(temp1), insn.ops[1].clone()],
        ));
        out.push(Insn::new(
            ext,
            vec![Operand::Reg(temp2), insn.ops[2].clone()],
        ));
        insn.ops[1] = Operand::Reg(temp1);
        insn.ops[2] = Operand::Reg(temp2);
    }
    if let Some(b) = builtins::get_builtin(module, code) {
        if code == Op::VaArg || code == Op::VaBlockArg {
            // mov func_reg, import; [mov reg3, type;]
            // call proto, func_reg, res, va, reg3[, ncase]
            let res_op = insn.ops[0].clone();
            let va_op = insn.ops[1].clone();
            assert!(matches!(res_op, Operand::Reg(_)) && matches!(va_op, Operand::Reg(_)));
            let func_reg = func.new_temp_reg(Type::I64);
            out.push(Insn::new(
                Op::Mov,
                vec![Operand::Reg(func_reg), Operand::Ref(b.import)],
            ));
            let op3 = if code == Op::VaArg {
                let Operand::Mem(m) = insn.ops[2] else {
                    panic!("va_arg type operand must be a memory reference");
                };
                let reg3 = func.new_temp_reg(Type::I64);
                out.push(Insn::new(
                    Op::Mov,
                    vec![Operand::Reg(reg3), Operand::Int(m.ty.code() as i64)],
                ));
                Operand::Reg(reg3)
            } else {
                insn.ops[2].clone()
            };
            let mut ops = vec![
                Operand::Ref(b.proto),
                Operand::Reg(func_reg),
                res_op,
                va_op,
                op3,
            ];
            if code == Op::VaBlockArg {
                ops.push(insn.ops[3].clone());
            }
            let call = Insn::new(Op::Call, ops);
            return lower_insn(gen, module, func, call, out);
        }
        // mov freg, import; call proto, freg, res, op[, op2]
        let res_op = insn.ops[0].clone();
        let op1 = insn.ops[1].clone();
        assert!(matches!(res_op, Operand::Reg(_)) && matches!(op1, Operand::Reg(_)));
        let freg = func.new_temp_reg(Type::I64);
        out.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(freg), Operand::Ref(b.import)],
        ));
        let mut ops = vec![Operand::Ref(b.proto), Operand::Reg(freg), res_op, op1];
        if b.nargs == 2 {
            ops.push(insn.ops[2].clone());
        }
        let call = Insn::new(Op::Call, ops);
        return lower_insn(gen, module, func, call, out);
    }
    match code {
        Op::VaStart => {
            assert!(func.vararg_p);
            let Operand::Reg(va_reg) = insn.ops[0] else {
                panic!("va_start operand must be a register");
            };
            let prev_sp = func.new_temp_reg(Type::I64);
            // prev_sp = mem64[fp + 16]
            out.push(Insn::new(
                Op::Mov,
                vec![
                    Operand::Reg(prev_sp),
                    Operand::hard_reg_mem(Type::I64, 16, FP),
                ],
            ));
            if gen.non_vararg_int_args_num != 8 {
                out.push(Insn::new(
                    Op::Add,
                    vec![
                        Operand::Reg(prev_sp),
                        Operand::Reg(prev_sp),
                        Operand::Int((i64::from(gen.non_vararg_int_args_num) - 8) * 8),
                    ],
                ));
            }
            out.push(Insn::new(
                Op::Mov,
                vec![Operand::mem(Type::I64, 0, va_reg), Operand::Reg(prev_sp)],
            ));
        }
        Op::VaEnd => {} // nothing to tear down
        Op::Call | Op::Inline => {
            machinize_call(gen, module, func, insn, out)?;
            gen.leaf_p = false;
        }
        Op::Alloca => {
            gen.alloca_p = true;
            out.push(insn);
        }
        Op::Ret => {
            assert_eq!(func.res_types.len(), insn.nops());
            let mut n_xregs = 0u8;
            let mut n_fpregs = 0u8;
            for i in 0..insn.nops() {
                assert!(matches!(insn.ops[i], Operand::Reg(_)));
                let res_type = func.res_types[i];
                let (mov_code, ret_reg);
                if (res_type == Type::F || res_type == Type::D) && n_fpregs < 2 {
                    mov_code = if res_type == Type::F { Op::Fmov } else { Op::Dmov };
                    ret_reg = FA0 + n_fpregs;
                    n_fpregs += 1;
                } else if n_xregs < 2 {
                    mov_code = if res_type == Type::Ld { Op::Ldmov } else { Op::Mov };
                    ret_reg = A0 + n_xregs;
                    n_xregs += 1;
                    if res_type == Type::Ld {
                        n_xregs += 1;
                    }
                } else {
                    return Err(GenError::RetValues);
                }
                out.push(Insn::new(
                    mov_code,
                    vec![Operand::HardReg(ret_reg), insn.ops[i].clone()],
                ));
                insn.ops[i] = Operand::HardReg(ret_reg);
            }
            out.push(insn);
        }
        _ => out.push(insn),
    }
    Ok(())
}

/// ABI type of a call argument operand: declared for fixed args,
/// derived from the operand for variadic ones
fn call_arg_type(
    func: &Func,
    proto: &Proto,
    op: &Operand,
    fixed: bool,
    strict: bool,
    arg_index: usize,
) -> Result<Type, GenError> {
    if fixed {
        return Ok(proto.args[arg_index].ty);
    }
    if let Operand::Mem(m) = op {
        assert!(m.ty.is_any_blk());
        return Ok(m.ty);
    }
    let ty = match op {
        Operand::Reg(r) => func.reg_type(*r),
        Operand::Int(_) | Operand::Uint(_) => Type::I64,
        _ => return Err(GenError::WrongArgType),
    };
    Ok(match ty {
        Type::F if strict => return Err(GenError::FloatVarargArg),
        Type::D => Type::D,
        Type::Ld => Type::Ld,
        _ => Type::I64,
    })
}

fn machinize_call(
    gen: &mut CodeGen,
    module: &mut Module,
    func: &mut Func,
    mut call: Insn,
    out: &mut Vec<Insn>,
) -> Result<(), GenError> {
    if call.code == Op::Inline {
        call.code = Op::Call;
    }
    let proto = {
        let Operand::Ref(proto_id) = call.ops[0] else {
            panic!("call must reference its prototype");
        };
        module.proto(proto_id).clone()
    };
    let nops = call.nops();
    let start = proto.res_types.len() + 2;
    let nargs = proto.args.len();
    assert!(nops - start >= nargs && (proto.vararg_p || nops - start == nargs));

    // insns placed right after the stack adjustment, before the
    // register moves
    let mut early: Vec<Insn> = Vec::new();
    // insns placed immediately before the call
    let mut late: Vec<Insn> = Vec::new();

    if !matches!(call.ops[1], Operand::Reg(_) | Operand::HardReg(_)) {
        let temp = func.new_temp_reg(Type::I64);
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(temp), call.ops[1].clone()],
        ));
        call.ops[1] = Operand::Reg(temp);
    }

    // first pass: compute the stack offset where by-address block
    // argument data starts
    let mut int_arg_num = 0usize;
    let mut fp_arg_num = 0usize;
    let mut blk_offset: u64 = 0;
    for i in start..nops {
        let op = &call.ops[i];
        let ty = call_arg_type(func, &proto, op, i - start < nargs, true, i - start)?;
        let int_or_ld_or_blk = matches!(
            ty,
            Type::I8
                | Type::U8
                | Type::I16
                | Type::U16
                | Type::I32
                | Type::U32
                | Type::I64
                | Type::U64
                | Type::P
                | Type::Ld
        ) || ty.is_any_blk();
        if int_or_ld_or_blk {
            let qwords = if let Operand::Mem(m) = op {
                (m.disp as u64 + 7) / 8
            } else {
                0
            };
            if ty == Type::BlkFp && qwords <= 2 {
                if fp_arg_num + qwords as usize > 8 {
                    blk_offset +=
                        (qwords - u64::from(fp_arg_num + qwords as usize == 9)) * 8;
                }
                fp_arg_num += qwords as usize;
            } else if ty.is_blk() && qwords <= 2 {
                if ty == Type::BlkEven {
                    int_arg_num = (int_arg_num + 1) / 2 * 2;
                }
                if int_arg_num + qwords as usize > 8 {
                    blk_offset +=
                        (qwords - u64::from(int_arg_num + qwords as usize == 9)) * 8;
                }
                int_arg_num += qwords as usize;
            } else {
                // blocks from here on are passed by address
                if ty == Type::Ld {
                    int_arg_num = (int_arg_num + 1) / 2 * 2;
                }
                if int_arg_num >= 8 {
                    blk_offset += 8 + if ty == Type::Ld { 8 } else { 0 };
                }
                int_arg_num += 1;
                if ty == Type::Ld {
                    int_arg_num += 1;
                }
            }
        } else if ty == Type::F || ty == Type::D {
            if i - start >= nargs {
                // varargs are passed in int regs
                if int_arg_num >= 8 {
                    blk_offset += 8;
                }
                int_arg_num += 1;
            } else {
                if fp_arg_num >= 8 {
                    blk_offset += 8;
                }
                fp_arg_num += 1;
            }
        } else {
            return Err(GenError::WrongArgType);
        }
    }
    blk_offset = round_up16(blk_offset);

    // second pass: emit the argument traffic
    let mut mem_size: i64 = 0;
    int_arg_num = 0;
    fp_arg_num = 0;
    for i in start..nops {
        let mut arg_op = call.ops[i].clone();
        assert!(matches!(
            arg_op,
            Operand::Reg(_) | Operand::HardReg(_) | Operand::Mem(_)
        ));
        let ty = call_arg_type(func, &proto, &arg_op, i - start < nargs, false, i - start)?;
        let mut ext_insn = None;
        if let Some(ext) = ext_code(ty) {
            let temp = func.new_temp_reg(Type::I64);
            ext_insn = Some(Insn::new(ext, vec![Operand::Reg(temp), arg_op.clone()]));
            arg_op = Operand::Reg(temp);
            call.ops[i] = arg_op.clone();
        }
        if ty.is_blk() {
            let Operand::Mem(m) = arg_op else {
                panic!("block argument must be a memory reference");
            };
            assert!(m.disp >= 0 && m.index.is_none());
            let qwords = (m.disp as u64 + 7) / 8;
            if qwords <= 2 {
                if ty == Type::BlkEven {
                    int_arg_num = (int_arg_num + 1) / 2 * 2;
                }
                for n in 0..qwords as i64 {
                    if ty == Type::BlkFp {
                        if fp_arg_num < 8 {
                            late.push(Insn::new(
                                Op::Dmov,
                                vec![
                                    Operand::HardReg(FA0 + fp_arg_num as HardReg),
                                    Operand::mem(Type::D, n * 8, m.base),
                                ],
                            ));
                            fp_arg_num += 1;
                        } else {
                            // this word goes on the stack
                            let treg = func.new_temp_reg(Type::D);
                            late.push(Insn::new(
                                Op::Dmov,
                                vec![
                                    Operand::Reg(treg),
                                    Operand::mem(Type::D, n * 8, m.base),
                                ],
                            ));
                            late.push(Insn::new(
                                Op::Dmov,
                                vec![
                                    Operand::hard_reg_mem(Type::D, mem_size, SP),
                                    Operand::Reg(treg),
                                ],
                            ));
                            mem_size += 8;
                        }
                    } else if int_arg_num < 8 {
                        late.push(Insn::new(
                            Op::Mov,
                            vec![
                                Operand::HardReg(A0 + int_arg_num as HardReg),
                                Operand::mem(Type::I64, n * 8, m.base),
                            ],
                        ));
                        int_arg_num += 1;
                    } else {
                        let treg = func.new_temp_reg(Type::I64);
                        late.push(Insn::new(
                            Op::Mov,
                            vec![Operand::Reg(treg), Operand::mem(Type::I64, n * 8, m.base)],
                        ));
                        late.push(Insn::new(
                            Op::Mov,
                            vec![
                                Operand::hard_reg_mem(Type::I64, mem_size, SP),
                                Operand::Reg(treg),
                            ],
                        ));
                        mem_size += 8;
                    }
                }
                continue;
            }
            // copy the data below the outgoing args and pass its address
            gen_blk_mov(module, func, &mut late, blk_offset, SP, m.base, qwords, int_arg_num);
            let addr = func.new_temp_reg(Type::I64);
            early.push(Insn::new(
                Op::Add,
                vec![
                    Operand::Reg(addr),
                    Operand::HardReg(SP),
                    Operand::Int(blk_offset as i64),
                ],
            ));
            arg_op = Operand::Reg(addr);
            blk_offset += qwords * 8;
        }
        let (areg, mov_code) = arg_reg(ty, i - start >= nargs, &mut int_arg_num, &mut fp_arg_num);
        if let Some(r) = areg {
            // argument goes in a register
            if let Some(ext) = ext_insn {
                late.push(ext);
            }
            let mut arg_reg_op = Operand::HardReg(r);
            if ty != Type::RBlk {
                if mov_code == Op::Mov && (ty == Type::F || ty == Type::D) {
                    // variadic float/double crosses into the int regs
                    late.push(Insn::new(
                        Op::Unspec,
                        vec![
                            Operand::Int(if ty == Type::F { FMVXW_CODE } else { FMVXD_CODE }),
                            arg_reg_op.clone(),
                            arg_op,
                        ],
                    ));
                } else {
                    late.push(Insn::new(mov_code, vec![arg_reg_op.clone(), arg_op]));
                }
            } else {
                let Operand::Mem(m) = arg_op else {
                    panic!("ref-block argument must be a memory reference");
                };
                late.push(Insn::new(
                    Op::Mov,
                    vec![arg_reg_op.clone(), Operand::Reg(m.base)],
                ));
                arg_reg_op = Operand::HardRegMem(HardRegMem::new(Type::RBlk, m.disp, r));
            }
            call.ops[i] = arg_reg_op;
        } else {
            // argument goes on the stack
            let mem_op = Operand::hard_reg_mem(mem_type_for(ty), mem_size, SP);
            let mov = mov_code_for(ty);
            if let Some(ext) = ext_insn {
                early.push(ext);
            }
            if ty != Type::RBlk {
                early.push(Insn::new(mov, vec![mem_op.clone(), arg_op]));
            } else {
                let Operand::Mem(m) = arg_op else {
                    panic!("ref-block argument must be a memory reference");
                };
                early.push(Insn::new(mov, vec![mem_op.clone(), Operand::Reg(m.base)]));
            }
            call.ops[i] = mem_op;
            mem_size += if ty == Type::Ld { 16 } else { 8 };
        }
    }
    blk_offset = round_up16(blk_offset);
    if blk_offset != 0 {
        mem_size = blk_offset as i64;
    }

    // result moves after the call
    let mut ret_moves: Vec<Insn> = Vec::new();
    int_arg_num = 0;
    fp_arg_num = 0;
    for i in 0..proto.res_types.len() {
        let ret_op = call.ops[i + 2].clone();
        assert!(matches!(ret_op, Operand::Reg(_) | Operand::HardReg(_)));
        let ty = proto.res_types[i];
        let float_p = ty == Type::F || ty == Type::D;
        let (mov_code, hard_op);
        if float_p && fp_arg_num < 2 {
            mov_code = if ty == Type::F { Op::Fmov } else { Op::Dmov };
            hard_op = Operand::HardReg(FA0 + fp_arg_num as HardReg);
            fp_arg_num += 1;
        } else if ty == Type::Ld && int_arg_num < 2 {
            mov_code = Op::Ldmov;
            hard_op = Operand::HardReg(A0 + int_arg_num as HardReg);
            int_arg_num += 2;
        } else if !float_p && int_arg_num < 2 {
            mov_code = Op::Mov;
            hard_op = Operand::HardReg(A0 + int_arg_num as HardReg);
            int_arg_num += 1;
        } else {
            return Err(GenError::RetValues);
        }
        ret_moves.push(Insn::new(mov_code, vec![ret_op.clone(), hard_op.clone()]));
        call.ops[i + 2] = hard_op;
        if let Some(ext) = ext_code(ty) {
            ret_moves.push(Insn::new(ext, vec![ret_op.clone(), ret_op]));
        }
    }

    // bracket the call with the outgoing-arg stack adjustment
    if mem_size != 0 {
        mem_size = (mem_size + 15) / 16 * 16;
        let temp = func.new_temp_reg(Type::I64);
        out.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(temp), Operand::Int(mem_size)],
        ));
        out.push(Insn::new(
            Op::Sub,
            vec![
                Operand::HardReg(SP),
                Operand::HardReg(SP),
                Operand::Reg(temp),
            ],
        ));
    }
    out.append(&mut early);
    out.append(&mut late);
    out.push(call);
    if mem_size != 0 {
        let temp = func.new_temp_reg(Type::I64);
        out.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(temp), Operand::Int(mem_size)],
        ));
        out.push(Insn::new(
            Op::Add,
            vec![
                Operand::HardReg(SP),
                Operand::HardReg(SP),
                Operand::Reg(temp),
            ],
        ));
    }
    out.append(&mut ret_moves);
    Ok(())
}

/// Copy a block argument to [to_base + to_disp]: inline qword moves
/// for small blocks, a call to the block move builtin for large ones
/// (saving the argument registers that are already loaded).
#[allow(clippy::too_many_arguments)]
fn gen_blk_mov(
    module: &mut Module,
    func: &mut Func,
    late: &mut Vec<Insn>,
    to_disp: u64,
    to_base: HardReg,
    from_base: Reg,
    qwords: u64,
    save_regs: usize,
) {
    let treg = func.new_temp_reg(Type::I64);
    let treg2 = func.new_temp_reg(Type::I64);
    if qwords <= 16 {
        let mut to_disp = to_disp as i64;
        let mut from_disp = 0i64;
        for _ in 0..qwords {
            late.push(Insn::new(
                Op::Mov,
                vec![
                    Operand::Reg(treg),
                    Operand::Mem(Mem::new(Type::I64, from_disp, from_base)),
                ],
            ));
            late.push(Insn::new(
                Op::Mov,
                vec![
                    Operand::HardRegMem(HardRegMem::new(Type::I64, to_disp, to_base)),
                    Operand::Reg(treg),
                ],
            ));
            to_disp += 8;
            from_disp += 8;
        }
        return;
    }
    let treg3 = func.new_temp_reg(Type::I64);
    // save arg regs the copy call would clobber
    if save_regs > 0 {
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(treg), Operand::HardReg(A0)],
        ));
    }
    if save_regs > 1 {
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(treg2), Operand::HardReg(A0 + 1)],
        ));
    }
    if save_regs > 2 {
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::Reg(treg3), Operand::HardReg(A0 + 2)],
        ));
    }
    let b = builtins::blk_mov_builtin(module);
    let freg = func.new_temp_reg(Type::I64);
    late.push(Insn::new(
        Op::Mov,
        vec![Operand::Reg(freg), Operand::Ref(b.import)],
    ));
    let treg4 = func.new_temp_reg(Type::I64);
    late.push(Insn::new(
        Op::Mov,
        vec![Operand::Reg(treg4), Operand::Int(to_disp as i64)],
    ));
    late.push(Insn::new(
        Op::Add,
        vec![
            Operand::HardReg(A0),
            Operand::HardReg(to_base),
            Operand::Reg(treg4),
        ],
    ));
    late.push(Insn::new(
        Op::Add,
        vec![
            Operand::HardReg(A0 + 1),
            Operand::Reg(from_base),
            Operand::Int(0),
        ],
    ));
    late.push(Insn::new(
        Op::Mov,
        vec![Operand::HardReg(A0 + 2), Operand::Int(qwords as i64)],
    ));
    late.push(Insn::new(
        Op::Call,
        vec![
            Operand::Ref(b.proto),
            Operand::Reg(freg),
            Operand::HardReg(A0),
            Operand::HardReg(A0 + 1),
            Operand::HardReg(A0 + 2),
        ],
    ));
    // restore them
    if save_regs > 0 {
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::HardReg(A0), Operand::Reg(treg)],
        ));
    }
    if save_regs > 1 {
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::HardReg(A0 + 1), Operand::Reg(treg2)],
        ));
    }
    if save_regs > 2 {
        late.push(Insn::new(
            Op::Mov,
            vec![Operand::HardReg(A0 + 2), Operand::Reg(treg3)],
        ));
    }
}
