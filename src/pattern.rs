//! Pattern-directed instruction selection.
//!
//! Each pattern maps an opcode plus an operand-shape string to an
//! encoding template. Shapes are matched position by position against
//! the machinized operands:
//!
//! ```txt
//! blank    ignore
//! X        match everything
//! $        finish successfully matching
//! r        register operand
//! c<n>     immediate integer with value n
//! m[0-3]   int memory of size 8,16,32,64 bits (signed or unsigned)
//! ms[0-3]  signed int memory
//! mu[0-3]  unsigned int memory
//! mf/md    float / double memory
//! mld      long double memory (disp and disp+8 must be encodable)
//! i        12-bit signed immediate (2nd or 3rd op)
//! j        as i but -j must also fit (excludes the minimum), 3rd op
//! ju       as j but rounded up to 16 first, 2nd op
//! iu       32-bit signed immediate with zero low 12 bits, 2nd op
//! ia       any 32-bit signed immediate (or reference), 2nd op
//! I        any 64-bit immediate (goes to the constant pool)
//! s / S    immediate shift amount, 5 / 6 bits, 3rd op
//! l / L    label, B-format (13-bit) / J-format (21-bit) pc offset
//! ```
//!
//! All memory shapes require base-only addressing with a displacement
//! in [-2048, 2048).
//!
//! Template directives are documented in the emitter, which parses
//! them word by word. Float and long double immediates never reach
//! this stage; they are data items by now.

use std::collections::HashMap;

use itertools::Itertools;

use crate::ir::{Insn, Module, Op, Operand, Type};

pub struct Pattern {
    pub code: Op,
    pub pat: &'static str,
    pub repl: &'static str,
}

const fn pat(code: Op, pat: &'static str, repl: &'static str) -> Pattern {
    Pattern { code, pat, repl }
}

pub static PATTERNS: &[Pattern] = &[
    pat(Op::Mov, "r r", "O13 F0 rd0 rs1 i0"), // addi rd,rs1,0
    pat(Op::Mov, "r m3", "O3 F3 rd0 ml"),     // ld rd,m
    pat(Op::Mov, "m3 r", "O23 F3 rS1 ms"),    // sd rs2,m
    pat(Op::Mov, "r ms2", "O3 F2 rd0 ml"),    // lw rd,m
    pat(Op::Mov, "r mu2", "O3 F6 rd0 ml"),    // lwu rd,m
    pat(Op::Mov, "m2 r", "O23 F2 rS1 ms"),    // sw rs2,m
    pat(Op::Mov, "r ms1", "O3 F1 rd0 ml"),    // lh rd,m
    pat(Op::Mov, "r mu1", "O3 F5 rd0 ml"),    // lhu rd,m
    pat(Op::Mov, "m1 r", "O23 F1 rS1 ms"),    // sh rs2,m
    pat(Op::Mov, "r ms0", "O3 F0 rd0 ml"),    // lb rd,m
    pat(Op::Mov, "r mu0", "O3 F4 rd0 ml"),    // lbu rd,m
    pat(Op::Mov, "m0 r", "O23 F0 rS1 ms"),    // sb rs2,m
    pat(Op::Mov, "r i", "O13 F0 rd0 hs0 i"),  // addi r,zero,i
    pat(Op::Mov, "r iu", "O37 rd0 iu"),       // lui r,i
    pat(Op::Mov, "r I", "O17 rd0 I; O3 F3 rd0 rs0"), // auipc r,rel-caddr; ld r,rel-caddr(r)
    pat(Op::Fmov, "r r", "O53 F0 f10 rd0 rs1 rS1"), // fsgnj.s rd,rs1,rs2
    pat(Op::Fmov, "r mf", "O7 F2 rd0 ml"),          // flw rd,m
    pat(Op::Fmov, "mf r", "O27 F2 rS1 ms"),         // fsw rd,m
    pat(Op::Dmov, "r r", "O53 F0 f11 rd0 rs1 rS1"), // fsgnj.d rd,rs1,rs2
    pat(Op::Dmov, "r md", "O7 F3 rd0 ml"),          // fld rd,m
    pat(Op::Dmov, "md r", "O27 F3 rS1 ms"),         // fsd rd,m
    // LD values are always kept in memory. They enter int hard reg
    // pairs only for passing args and returning values, and the
    // translate driver splits these moves before matching:
    pat(Op::Ldmov, "r mld", ""),   // int_reg <- mem
    pat(Op::Ldmov, "mld r", ""),   // mem <- int_reg
    pat(Op::Ldmov, "mld mld", ""), // mem <- mem through the temp fp regs
    pat(Op::Unspec, "c0 r r", "O53 F0 f70 rd1 rs2"), // fmv.x.w r0,r1
    pat(Op::Unspec, "c1 r r", "O53 F0 f71 rd1 rs2"), // fmv.x.d r0,r1
    pat(Op::Ext8, "r r", "O13 F1 rd0 rs1 S38; O13 F5 f20 rd0 rs0 S38"), // slli rd,rs1,56;srai rd,rs1,56
    pat(Op::Ext16, "r r", "O13 F1 rd0 rs1 S30; O13 F5 f20 rd0 rs0 S30"), // slli rd,rs1,48;srai rd,rs1,48
    pat(Op::Ext32, "r r", "O1b F0 rd0 rs1 i0"), // addiw rd,rs1,0
    pat(Op::Uext8, "r r", "O13 F1 rd0 rs1 S38; O13 F5 f0 rd0 rs0 S38"), // slli rd,rs1,56;srli rd,rs1,56
    pat(Op::Uext16, "r r", "O13 F1 rd0 rs1 S30; O13 F5 f0 rd0 rs0 S30"), // slli rd,rs1,48;srli rd,rs1,48
    pat(Op::Uext32, "r r", "O13 F1 rd0 rs1 S20; O13 F5 f0 rd0 rs0 S20"), // slli rd,rs1,32;srli rd,rs1,32
    pat(Op::Add, "r r r", "O33 F0 rd0 rs1 rS2"),      // add rd,rs1,rs2
    pat(Op::Add, "r r i", "O13 F0 rd0 rs1 i"),        // addi rd,rs1,i
    pat(Op::Adds, "r r r", "O3b F0 rd0 rs1 rS2"),     // addw rd,rs1,rs2
    pat(Op::Adds, "r r i", "O1b F0 rd0 rs1 i"),       // addiw rd,rs1,i
    pat(Op::Fadd, "r r r", "O53 F7 f0 rd0 rs1 rS2"),  // fadd.s rd,rs1,rs2
    pat(Op::Dadd, "r r r", "O53 F7 f1 rd0 rs1 rS2"),  // fadd.d rd,rs1,rs2
    // ldadd is implemented through a builtin
    pat(Op::Sub, "r r r", "O33 F0 f20 rd0 rs1 rS2"),  // sub rd,rs1,rs2
    pat(Op::Sub, "r r j", "O13 F0 rd0 rs1 j"),        // addi rd,rs1,-j
    pat(Op::Subs, "r r r", "O3b F0 f20 rd0 rs1 rS2"), // subw rd,rs1,rs2
    pat(Op::Subs, "r r j", "O1b F0 rd0 rs1 j"),       // addiw rd,rs1,-j
    pat(Op::Fsub, "r r r", "O53 F7 f4 rd0 rs1 rS2"),  // fsub.s rd,rs1,rs2
    pat(Op::Dsub, "r r r", "O53 F7 f5 rd0 rs1 rS2"),  // fsub.d rd,rs1,rs2
    // ldsub is implemented through a builtin
    pat(Op::Mul, "r r r", "O33 F0 f1 rd0 rs1 rS2"),  // mul rd,rs1,rs2
    pat(Op::Muls, "r r r", "O3b F0 f1 rd0 rs1 rS2"), // mulw rd,rs1,rs2
    pat(Op::Fmul, "r r r", "O53 F7 f8 rd0 rs1 rS2"), // fmul.s rd,rs1,rs2
    pat(Op::Dmul, "r r r", "O53 F7 f9 rd0 rs1 rS2"), // fmul.d rd,rs1,rs2
    // ldmul is implemented through a builtin
    pat(Op::Div, "r r r", "O33 F4 f1 rd0 rs1 rS2"),   // div rd,rs1,rs2
    pat(Op::Divs, "r r r", "O3b F4 f1 rd0 rs1 rS2"),  // divw rd,rs1,rs2
    pat(Op::Udiv, "r r r", "O33 F5 f1 rd0 rs1 rS2"),  // divu rd,rs1,rs2
    pat(Op::Udivs, "r r r", "O3b F5 f1 rd0 rs1 rS2"), // divuw rd,rs1,rs2
    pat(Op::Fdiv, "r r r", "O53 F7 fc rd0 rs1 rS2"),  // fdiv.s rd,rs1,rs2
    pat(Op::Ddiv, "r r r", "O53 F7 fd rd0 rs1 rS2"),  // fdiv.d rd,rs1,rs2
    // lddiv is implemented through a builtin
    pat(Op::Mod, "r r r", "O33 F6 f1 rd0 rs1 rS2"),   // rem rd,rs1,rs2
    pat(Op::Mods, "r r r", "O3b F6 f1 rd0 rs1 rS2"),  // remw rd,rs1,rs2
    pat(Op::Umod, "r r r", "O33 F7 f1 rd0 rs1 rS2"),  // remu rd,rs1,rs2
    pat(Op::Umods, "r r r", "O3b F7 f1 rd0 rs1 rS2"), // remuw rd,rs1,rs2
    pat(Op::Eq, "r r r", "O33 F0 f20 rd0 rs1 rS2; O13 F3 rd0 rs0 i1"), // sub rd,rs1,rs2; sltiu rd,rs1,1
    pat(Op::Eq, "r r j", "O13 F0 rd0 rs1 j; O13 F3 rd0 rs0 i1"), // addi rd,rs1,-j; sltiu rd,rs1,1
    pat(Op::Eqs, "r r r", "O3b F0 f20 rd0 rs1 rS2; O13 F3 rd0 rs0 i1"), // subw rd,rs1,rs2; sltiu rd,rs1,1
    pat(Op::Eqs, "r r j", "O1b F0 rd0 rs1 j; O13 F3 rd0 rs0 i1"), // addiw rd,rs1,-j; sltiu rd,rs1,1
    pat(Op::Ne, "r r r", "O33 F0 f20 rd0 rs1 rS2; O33 F3 rd0 hs0 rS0"), // sub rd,rs1,rs2; sltu rd,z,rs2
    pat(Op::Ne, "r r j", "O13 F0 rd0 rs1 j; O33 F3 rd0 hs0 rS0"), // addi rd,rs1,-j; sltu rd,z,rs2
    pat(Op::Nes, "r r r", "O33 F0 f20 rd0 rs1 rS2; O33 F3 rd0 hs0 rS0"), // sub rd,rs1,rs2; sltu rd,z,rs2
    pat(Op::Nes, "r r j", "O13 F0 rd0 rs1 j; O33 F3 rd0 hs0 rS0"), // addi rd,rs1,-j; sltu rd,z,rs2
    pat(Op::Lt, "r r r", "O33 F2 f0 rd0 rs1 rS2"),   // slt rd,rs1,rs2
    pat(Op::Lt, "r r i", "O13 F2 f0 rd0 rs1 i"),     // slti rd,rs1,i
    pat(Op::Lts, "r r r", "O33 F2 f0 rd0 rs1 rS2"),  // slt rd,rs1,rs2
    pat(Op::Lts, "r r i", "O13 F2 f0 rd0 rs1 i"),    // slti rd,rs1,i
    pat(Op::Ult, "r r r", "O33 F3 f0 rd0 rs1 rS2"),  // sltu rd,rs1,rs2
    pat(Op::Ult, "r r i", "O13 F3 f0 rd0 rs1 i"),    // sltiu rd,rs1,i
    pat(Op::Ults, "r r r", "O33 F3 f0 rd0 rs1 rS2"), // sltu rd,rs1,rs2
    pat(Op::Ults, "r r i", "O13 F3 f0 rd0 rs1 i"),   // sltiu rd,rs1,i
    // le is !(op2 < op1)
    pat(Op::Le, "r r r", "O33 F2 f0 rd0 rs2 rS1; O13 F4 f0 rd0 rs0 i1"), // sgt rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Le, "r i r", "O13 F2 f0 rd0 rs2 i; O13 F4 f0 rd0 rs0 i1"), // sgti rd,rs1,i;xori rd,rs1,1
    pat(Op::Les, "r r r", "O33 F2 f0 rd0 rs2 rS1; O13 F4 f0 rd0 rs0 i1"), // sgt rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Les, "r i r", "O13 F2 f0 rd0 rs2 i; O13 F4 f0 rd0 rs0 i1"), // sgti rd,rs1,i;xori rd,rs1,1
    pat(Op::Ule, "r r r", "O33 F3 f0 rd0 rs2 rS1; O13 F4 f0 rd0 rs0 i1"), // sgtu rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Ule, "r i r", "O13 F3 f0 rd0 rs2 i; O13 F4 f0 rd0 rs0 i1"), // sgtui rd,rs1,i;xori rd,rs1,1
    pat(Op::Ules, "r r r", "O33 F3 f0 rd0 rs2 rS1; O13 F4 f0 rd0 rs0 i1"), // sgtu rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Ules, "r i r", "O13 F3 f0 rd0 rs2 i; O13 F4 f0 rd0 rs0 i1"), // sgtui rd,rs1,i;xori rd,rs1,1
    pat(Op::Gt, "r r r", "O33 F2 f0 rd0 rs2 rS1"),   // slt rd,rs2,rs1
    pat(Op::Gt, "r i r", "O13 F2 f0 rd0 rs2 i"),     // slti rd,rs2,i
    pat(Op::Gts, "r r r", "O33 F2 f0 rd0 rs2 rS1"),  // slt rd,rs2,rs1
    pat(Op::Gts, "r i r", "O13 F2 f0 rd0 rs2 i"),    // slti rd,rs2,i
    pat(Op::Ugt, "r r r", "O33 F3 f0 rd0 rs2 rS1"),  // sltu rd,rs2,rs1
    pat(Op::Ugt, "r i r", "O13 F3 f0 rd0 rs2 i"),    // sltiu rd,rs2,i
    pat(Op::Ugts, "r r r", "O33 F3 f0 rd0 rs2 rS1"), // sltu rd,rs2,rs1
    pat(Op::Ugts, "r i r", "O13 F3 f0 rd0 rs2 i"),   // sltiu rd,rs2,i
    pat(Op::Ge, "r r r", "O33 F2 f0 rd0 rs1 rS2; O13 F4 f0 rd0 rs0 i1"), // slt rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Ge, "r r i", "O13 F2 f0 rd0 rs1 i; O13 F4 f0 rd0 rs0 i1"), // slti rd,rs1,i;xori rd,rs1,1
    pat(Op::Ges, "r r r", "O33 F2 f0 rd0 rs1 rS2; O13 F4 f0 rd0 rs0 i1"), // slt rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Ges, "r r i", "O13 F2 f0 rd0 rs1 i; O13 F4 f0 rd0 rs0 i1"), // slti rd,rs1,i;xori rd,rs1,1
    pat(Op::Uge, "r r r", "O33 F3 f0 rd0 rs1 rS2; O13 F4 f0 rd0 rs0 i1"), // sltu rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Uge, "r r i", "O13 F3 f0 rd0 rs1 i; O13 F4 f0 rd0 rs0 i1"), // sltui rd,rs1,i;xori rd,rs1,1
    pat(Op::Uges, "r r r", "O33 F3 f0 rd0 rs1 rS2; O13 F4 f0 rd0 rs0 i1"), // sltu rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Uges, "r r i", "O13 F3 f0 rd0 rs1 i; O13 F4 f0 rd0 rs0 i1"), // sltui rd,rs1,i;xori rd,rs1,1
    pat(Op::Feq, "r r r", "O53 F2 f50 rd0 rs1 rS2"), // feq.s rd,rs1,rs2
    pat(Op::Deq, "r r r", "O53 F2 f51 rd0 rs1 rS2"), // feq.d rd,rs1,rs2
    pat(Op::Fne, "r r r", "O53 F2 f50 rd0 rs1 rS2; O13 F4 rd0 rs0 i1"), // feq.s rd,rs1,rs2; xori rd,r1,1
    pat(Op::Dne, "r r r", "O53 F2 f51 rd0 rs1 rS2; O13 F4 rd0 rs0 i1"), // feq.d rd,rs1,rs2;xori rd,rs1,1
    pat(Op::Flt, "r r r", "O53 F1 f50 rd0 rs1 rS2"), // flt.s rd,rs1,rs2
    pat(Op::Dlt, "r r r", "O53 F1 f51 rd0 rs1 rS2"), // flt.d rd,rs1,rs2
    pat(Op::Fle, "r r r", "O53 F0 f50 rd0 rs1 rS2"), // fle.s rd,rs1,rs2
    pat(Op::Dle, "r r r", "O53 F0 f51 rd0 rs1 rS2"), // fle.d rd,rs1,rs2
    pat(Op::Fgt, "r r r", "O53 F1 f50 rd0 rs2 rS1"), // flt.s rd,rs2,rs1
    pat(Op::Dgt, "r r r", "O53 F1 f51 rd0 rs2 rS1"), // flt.d rd,rs2,rs1
    pat(Op::Fge, "r r r", "O53 F0 f50 rd0 rs2 rS1"), // fle.s rd,rs2,rs1
    pat(Op::Dge, "r r r", "O53 F0 f51 rd0 rs2 rS1"), // fle.d rd,rs2,rs1
    pat(Op::Jmp, "L", "O6f hd0 L"), // jal: 20-bit offset (w/o 1 bit) jmp
    pat(Op::Bt, "l r", "O63 F1 rs1 hS0 l"),  // bne rs1,zero,l
    pat(Op::Bts, "l r", "O63 F1 rs1 hS0 l"), // bne rs1,zero,l
    pat(Op::Bf, "l r", "O63 F0 rs1 hS0 l"),  // beq rs1,zero,l
    pat(Op::Bfs, "l r", "O63 F0 rs1 hS0 l"), // beq rs1,zero,l
    pat(Op::Beq, "l r r", "O63 F0 rs1 rS2 l"),  // beq rs1,rs2,l
    pat(Op::Beqs, "l r r", "O63 F0 rs1 rS2 l"), // beq rs1,rs2,l
    pat(Op::Bne, "l r r", "O63 F1 rs1 rS2 l"),  // bne rs1,rs2,l
    pat(Op::Bnes, "l r r", "O63 F1 rs1 rS2 l"), // bne rs1,rs2,l
    pat(Op::Blt, "l r r", "O63 F4 rs1 rS2 l"),   // blt rs1,rs2,l
    pat(Op::Blts, "l r r", "O63 F4 rs1 rS2 l"),  // blt rs1,rs2,l
    pat(Op::Ublt, "l r r", "O63 F6 rs1 rS2 l"),  // bltu rs1,rs2,l
    pat(Op::Ublts, "l r r", "O63 F6 rs1 rS2 l"), // bltu rs1,rs2,l
    pat(Op::Bge, "l r r", "O63 F5 rs1 rS2 l"),   // bge rs1,rs2,l
    pat(Op::Bges, "l r r", "O63 F5 rs1 rS2 l"),  // bge rs1,rs2,l
    pat(Op::Ubge, "l r r", "O63 F7 rs1 rS2 l"),  // bgeu rs1,rs2,l
    pat(Op::Ubges, "l r r", "O63 F7 rs1 rS2 l"), // bgeu rs1,rs2,l
    pat(Op::Bgt, "l r r", "O63 F4 rs2 rS1 l"),   // blt rs2,rs1,l
    pat(Op::Bgts, "l r r", "O63 F4 rs2 rS1 l"),  // blt rs2,rs1,l
    pat(Op::Ubgt, "l r r", "O63 F6 rs2 rS1 l"),  // bltu rs2,rs1,l
    pat(Op::Ubgts, "l r r", "O63 F6 rs2 rS1 l"), // bltu rs2,rs1,l
    pat(Op::Ble, "l r r", "O63 F5 rs2 rS1 l"),   // bge rs2,rs1,l
    pat(Op::Bles, "l r r", "O63 F5 rs2 rS1 l"),  // bge rs2,rs1,l
    pat(Op::Uble, "l r r", "O63 F7 rs2 rS1 l"),  // bgeu rs2,rs1,l
    pat(Op::Ubles, "l r r", "O63 F7 rs2 rS1 l"), // bgeu rs2,rs1,l
    // there are no FBx,DBx,LDBx as they are machinized into a compare and BT
    pat(Op::Neg, "r r", "O33 F0 f20 rd0 hs0 rS1"),  // sub rd,z,rs2
    pat(Op::Negs, "r r", "O3b F0 f20 rd0 hs0 rS1"), // subw rd,z,rs2
    pat(Op::Fneg, "r r", "O53 F1 f10 rd0 rs1 rS1"), // fsgnjn.s rd,rs1,rs2
    pat(Op::Dneg, "r r", "O53 F1 f11 rd0 rs1 rS1"), // fsgnjn.d rd,rs1,rs2
    // ldneg is a builtin
    pat(Op::Lsh, "r r r", "O33 F1 f0 rd0 rs1 rS2"),  // sll rd,rs1,rs2
    pat(Op::Lshs, "r r r", "O3b F1 f0 rd0 rs1 rS2"), // sllw rd,rs1,rs2
    pat(Op::Lsh, "r r S", "O13 F1 f0 rd0 rs1 S"),    // slli rd,rs1,sh
    pat(Op::Lshs, "r r s", "O1b F1 f0 rd0 rs1 s"),   // slliw rd,rs1,sh
    pat(Op::Rsh, "r r r", "O33 F5 f20 rd0 rs1 rS2"),  // sra rd,rs1,rs2
    pat(Op::Rshs, "r r r", "O3b F5 f20 rd0 rs1 rS2"), // sraw rd,rs1,rs2
    pat(Op::Rsh, "r r S", "O13 F5 f20 rd0 rs1 S"),    // srai rd,rs1,sh
    pat(Op::Rshs, "r r s", "O1b F5 f20 rd0 rs1 s"),   // sraiw rd,rs1,sh
    pat(Op::Ursh, "r r r", "O33 F5 f0 rd0 rs1 rS2"),  // srl rd,rs1,rs2
    pat(Op::Urshs, "r r r", "O3b F5 f0 rd0 rs1 rS2"), // srlw rd,rs1,rs2
    pat(Op::Ursh, "r r S", "O13 F5 f0 rd0 rs1 S"),    // srli rd,rs1,sh
    pat(Op::Urshs, "r r s", "O1b F5 f0 rd0 rs1 s"),   // srliw rd,rs1,sh
    pat(Op::And, "r r r", "O33 F7 f0 rd0 rs1 rS2"),  // and rd,rs1,rs2
    pat(Op::And, "r r i", "O13 F7 f0 rd0 rs1 i"),    // andi rd,rs1,i
    pat(Op::Ands, "r r r", "O33 F7 f0 rd0 rs1 rS2"), // and rd,rs1,rs2
    pat(Op::Ands, "r r i", "O13 F7 f0 rd0 rs1 i"),   // andi rd,rs1,i
    pat(Op::Or, "r r r", "O33 F6 f0 rd0 rs1 rS2"),  // or rd,rs1,rs2
    pat(Op::Or, "r r i", "O13 F6 f0 rd0 rs1 i"),    // ori rd,rs1,i
    pat(Op::Ors, "r r r", "O33 F6 f0 rd0 rs1 rS2"), // or rd,rs1,rs2
    pat(Op::Ors, "r r i", "O13 F6 f0 rd0 rs1 i"),   // ori rd,rs1,i
    pat(Op::Xor, "r r r", "O33 F4 f0 rd0 rs1 rS2"),  // xor rd,rs1,rs2
    pat(Op::Xor, "r r i", "O13 F4 f0 rd0 rs1 i"),    // xori rd,rs1,i
    pat(Op::Xors, "r r r", "O33 F4 f0 rd0 rs1 rS2"), // xor rd,rs1,rs2
    pat(Op::Xors, "r r i", "O13 F4 f0 rd0 rs1 i"),   // xori rd,rs1,i
    pat(Op::I2f, "r r", "O53 F7 f68 hS2 rd0 rs1"),  // fcvt.s.l rd,rs1
    pat(Op::I2d, "r r", "O53 F7 f69 hS2 rd0 rs1"),  // fcvt.d.l rd,rs1
    pat(Op::Ui2f, "r r", "O53 F7 f68 hS3 rd0 rs1"), // fcvt.s.lu rd,rs1
    pat(Op::Ui2d, "r r", "O53 F7 f69 hS3 rd0 rs1"), // fcvt.d.lu rd,rs1
    pat(Op::F2i, "r r", "O53 F1 f60 hS2 rd0 rs1"), // fcvt.l.s rd,rs1,rtz
    pat(Op::D2i, "r r", "O53 F1 f61 hS2 rd0 rs1"), // fcvt.l.d rd,rs1,rtz
    pat(Op::F2d, "r r", "O53 F0 f21 hS0 rd0 rs1"), // fcvt.d.s rd,rs1 -- never rounds
    pat(Op::D2f, "r r", "O53 F7 f20 hS1 rd0 rs1"), // fcvt.s.d rd,rs1
    // i2ld, ui2ld, ld2i, f2ld, d2ld, ld2f, ld2d are builtins
    pat(Op::Call, "X r $", "O67 F0 hd1 rs1 i0"),   // jalr ra,rs1
    pat(Op::Inline, "X r $", "O67 F0 hd1 rs1 i0"), // jalr ra,rs1
    pat(Op::Ret, "$", "O67 F0 hd0 hs1 i0"),        // jalr zero,ra,0
    // addi r0,r1,15; andi r0,r0,-16; sub sp,sp,r0; mov r0,sp:
    pat(
        Op::Alloca,
        "r r",
        "O13 F0 rd0 rs1 if; O13 F7 f0 rd0 rs0 i-10;O33 F0 f20 hd2 hs2 rS0; O13 F0 rd0 hs2 i0",
    ),
    // addi sp,sp,-roundup(imm,16); addi r0,sp,0:
    pat(Op::Alloca, "r ju", "O13 F0 hd2 hs2 ju; O13 F0 rd0 hs2 i0"),
    pat(Op::Bstart, "r", "O13 F0 rd0 hs2 i0"), // r = sp: addi rd,sp,0
    pat(Op::Bend, "r", "O13 F0 hd2 rs0 i0"),   // sp = r: addi sp,rs1,0
    // slli t5,r,3; auipc t6,0; add t6,t6,t5; ld t6,T(t6); jalr zero,t6,0;
    // 8-byte aligned table contents follow the code. r can be t5 when
    // the switch operand was memory.
    pat(
        Op::Switch,
        "r $",
        "O13 F1 hd1e rs0 S3; O17 hd1f iu0; O33 F0 hd1f hs1f hS1e; O3 F3 hd1f hs1f T; O67 F0 hd0 hs1f i0",
    ),
];

/// Per-opcode pattern index, in table order
pub fn build_index() -> HashMap<Op, Vec<usize>> {
    PATTERNS
        .iter()
        .enumerate()
        .map(|(i, p)| (p.code, i))
        .into_group_map()
}

pub(crate) fn read_dec(p: &[u8], i: &mut usize) -> u64 {
    let start = *i;
    let mut res: u64 = 0;
    while *i < p.len() && p[*i].is_ascii_digit() {
        assert_eq!(res >> 60, 0);
        res = res * 10 + u64::from(p[*i] - b'0');
        *i += 1;
    }
    assert_ne!(*i, start);
    res
}

pub(crate) fn read_hex(p: &[u8], i: &mut usize) -> u64 {
    let start = *i;
    let mut res: u64 = 0;
    while *i < p.len() && p[*i].is_ascii_hexdigit() {
        assert_eq!(res >> 60, 0);
        let v = (p[*i] as char).to_digit(16).unwrap();
        res = res * 16 + u64::from(v);
        *i += 1;
    }
    assert_ne!(*i, start);
    res
}

fn int_value(op: &Operand) -> Option<i64> {
    match op {
        Operand::Int(v) => Some(*v),
        Operand::Uint(v) => Some(*v as i64),
        _ => None,
    }
}

/// Accepted memory operand types for a size/signedness shape
fn mem_types(u_p: bool, s_p: bool, size_ch: u8) -> (Type, Option<Type>, Option<Type>) {
    match size_ch {
        b'0' => (
            if u_p { Type::U8 } else { Type::I8 },
            (u_p && s_p).then_some(Type::I8),
            None,
        ),
        b'1' => (
            if u_p { Type::U16 } else { Type::I16 },
            (u_p && s_p).then_some(Type::I16),
            None,
        ),
        b'2' => (
            if u_p { Type::U32 } else { Type::I32 },
            (u_p && s_p).then_some(Type::I32),
            None,
        ),
        b'3' => (
            if u_p { Type::U64 } else { Type::I64 },
            (u_p && s_p).then_some(Type::I64),
            Some(Type::P), // 64-bit pointers
        ),
        _ => panic!("bad memory size in pattern"),
    }
}

/// Match one pattern's operand shape against a machinized insn
pub fn pattern_match_p(pat: &Pattern, insn: &Insn, module: &Module) -> bool {
    let p = pat.pat.as_bytes();
    let nops = insn.nops();
    let mut i = 0;
    let mut nop = 0;
    while i < p.len() {
        if p[i] == b' ' || p[i] == b'\t' {
            i += 1;
            continue;
        }
        let start_ch = p[i];
        if start_ch == b'$' {
            return true;
        }
        if insn.code.is_call() && nop >= nops {
            return false;
        }
        assert!(nop < nops);
        let op = &insn.ops[nop];
        match start_ch {
            b'X' => i += 1,
            b'r' => {
                if !matches!(op, Operand::HardReg(_)) {
                    return false;
                }
                i += 1;
            }
            b'c' => {
                i += 1;
                let n = read_dec(p, &mut i);
                match op {
                    Operand::Int(v) if *v as u64 == n => {}
                    Operand::Uint(v) if *v == n => {}
                    _ => return false,
                }
            }
            b'm' => {
                i += 1;
                let (ty, ty2, ty3, ld_p) = match p[i] {
                    b'f' => {
                        i += 1;
                        (Type::F, None, None, false)
                    }
                    b'd' => {
                        i += 1;
                        (Type::D, None, None, false)
                    }
                    b'l' => {
                        i += 1;
                        assert_eq!(p[i], b'd');
                        i += 1;
                        (Type::Ld, None, None, true)
                    }
                    b'u' | b's' => {
                        let u_p = p[i] == b'u';
                        let s_p = p[i] == b's';
                        i += 1;
                        let (t, t2, t3) = mem_types(u_p, s_p, p[i]);
                        i += 1;
                        (t, t2, t3, false)
                    }
                    size_ch => {
                        let (t, t2, t3) = mem_types(true, true, size_ch);
                        i += 1;
                        (t, t2, t3, false)
                    }
                };
                let Operand::HardRegMem(m) = op else {
                    return false;
                };
                if m.ty != ty && Some(m.ty) != ty2 && Some(m.ty) != ty3 {
                    return false;
                }
                if m.index.is_some()
                    || m.disp < -(1 << 11)
                    || m.disp >= (1 << 11)
                    || (ld_p && m.disp + 8 >= (1 << 11))
                {
                    return false;
                }
            }
            b'i' => {
                i += 1;
                let mod_ch = p.get(i).copied();
                let int_p = matches!(op, Operand::Int(_) | Operand::Uint(_));
                if !int_p && (mod_ch != Some(b'a') || !matches!(op, Operand::Ref(_))) {
                    return false;
                }
                if matches!(mod_ch, Some(b'u') | Some(b'a')) && int_p {
                    assert_eq!(nop, 1);
                    let v = int_value(op).unwrap();
                    if !((-(1i64 << 31))..(1i64 << 31)).contains(&v) {
                        return false;
                    }
                    if mod_ch == Some(b'u') && v & 0xfff != 0 {
                        return false;
                    }
                    i += 1;
                } else if mod_ch == Some(b'a') {
                    let Operand::Ref(item) = op else { return false };
                    let v = module.item_addr(*item) as i64;
                    if !((-(1i64 << 31))..(1i64 << 31)).contains(&v) {
                        return false;
                    }
                    i += 1;
                } else {
                    assert!(nop == 1 || nop == 2);
                    let v = int_value(op).unwrap();
                    if !((-(1i64 << 11))..(1i64 << 11)).contains(&v) {
                        return false;
                    }
                }
            }
            b'j' => {
                let Some(mut v) = int_value(op) else {
                    return false;
                };
                i += 1;
                if p.get(i) == Some(&b'u') {
                    assert_eq!(nop, 1);
                    v = (v + 15) / 16 * 16;
                    i += 1;
                } else {
                    assert_eq!(nop, 2);
                }
                if v <= -(1 << 11) || v >= (1 << 11) {
                    return false;
                }
            }
            b'I' => {
                if !matches!(op, Operand::Int(_) | Operand::Uint(_) | Operand::Ref(_)) {
                    return false;
                }
                i += 1;
            }
            b's' | b'S' => {
                assert_eq!(nop, 2);
                let Some(v) = int_value(op) else {
                    return false;
                };
                if v < 0 || (start_ch == b's' && v > 31) || (start_ch == b'S' && v > 63) {
                    return false;
                }
                i += 1;
            }
            b'l' | b'L' => {
                if !matches!(op, Operand::Label(_)) {
                    return false;
                }
                i += 1;
            }
            _ => panic!("bad pattern element {:?}", start_ch as char),
        }
        nop += 1;
    }
    assert_eq!(nop, nops);
    true
}

/// Replacement template for the first pattern matching the insn
pub fn find_insn_pattern_replacement(
    index: &HashMap<Op, Vec<usize>>,
    insn: &Insn,
    module: &Module,
) -> Option<&'static str> {
    let indexes = index.get(&insn.code)?;
    indexes
        .iter()
        .map(|&i| &PATTERNS[i])
        .find(|p| pattern_match_p(p, insn, module))
        .map(|p| p.repl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Item;
    use crate::regs::{A0, A7, FA0, SP};

    fn hr(r: u8) -> Operand {
        Operand::HardReg(r)
    }

    fn matches_as(insn: &Insn, expect: &str) -> bool {
        let module = Module::new();
        let index = build_index();
        find_insn_pattern_replacement(&index, insn, &module) == Some(expect)
    }

    #[test]
    fn check_every_opcode_with_patterns_is_indexed() {
        let index = build_index();
        assert_eq!(
            index.values().map(Vec::len).sum::<usize>(),
            PATTERNS.len()
        );
        // order within an opcode follows the table
        let movs = &index[&Op::Mov];
        assert!(movs.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn check_reg_reg_add() {
        let insn = Insn::new(Op::Add, vec![hr(A0), hr(A0), hr(A7)]);
        assert!(matches_as(&insn, "O33 F0 rd0 rs1 rS2"));
    }

    #[test]
    fn check_add_immediate_range() {
        let small = Insn::new(Op::Add, vec![hr(A0), hr(A0), Operand::Int(2047)]);
        assert!(matches_as(&small, "O13 F0 rd0 rs1 i"));
        let module = Module::new();
        let index = build_index();
        let big = Insn::new(Op::Add, vec![hr(A0), hr(A0), Operand::Int(2048)]);
        assert!(find_insn_pattern_replacement(&index, &big, &module).is_none());
    }

    #[test]
    fn check_sub_negatable_immediate() {
        let ok = Insn::new(Op::Sub, vec![hr(A0), hr(A0), Operand::Int(2047)]);
        assert!(matches_as(&ok, "O13 F0 rd0 rs1 j"));
        // -(-2048) does not fit, so the register form must be required
        let module = Module::new();
        let index = build_index();
        let min = Insn::new(Op::Sub, vec![hr(A0), hr(A0), Operand::Int(-2048)]);
        assert!(find_insn_pattern_replacement(&index, &min, &module).is_none());
    }

    #[test]
    fn check_memory_type_and_range() {
        let ld = Insn::new(
            Op::Mov,
            vec![hr(A0), Operand::hard_reg_mem(Type::I64, 16, SP)],
        );
        assert!(matches_as(&ld, "O3 F3 rd0 ml"));
        // pointers load with the same pattern
        let ptr = Insn::new(
            Op::Mov,
            vec![hr(A0), Operand::hard_reg_mem(Type::P, 0, SP)],
        );
        assert!(matches_as(&ptr, "O3 F3 rd0 ml"));
        // unsigned 32-bit load picks lwu
        let lwu = Insn::new(
            Op::Mov,
            vec![hr(A0), Operand::hard_reg_mem(Type::U32, 0, SP)],
        );
        assert!(matches_as(&lwu, "O3 F6 rd0 ml"));
        // out-of-range displacement matches nothing
        let module = Module::new();
        let index = build_index();
        let far = Insn::new(
            Op::Mov,
            vec![hr(A0), Operand::hard_reg_mem(Type::I64, 2048, SP)],
        );
        assert!(find_insn_pattern_replacement(&index, &far, &module).is_none());
    }

    #[test]
    fn check_long_double_memory_pair_range() {
        let module = Module::new();
        let index = build_index();
        let ok = Insn::new(
            Op::Ldmov,
            vec![hr(A0), Operand::hard_reg_mem(Type::Ld, 2032, SP)],
        );
        assert!(find_insn_pattern_replacement(&index, &ok, &module).is_some());
        // disp fits but disp+8 does not
        let far = Insn::new(
            Op::Ldmov,
            vec![hr(A0), Operand::hard_reg_mem(Type::Ld, 2040, SP)],
        );
        assert!(find_insn_pattern_replacement(&index, &far, &module).is_none());
    }

    #[test]
    fn check_lui_immediate() {
        let ok = Insn::new(Op::Mov, vec![hr(A0), Operand::Int(0x12345 << 12)]);
        assert!(matches_as(&ok, "O37 rd0 iu"));
        // low bits force the constant pool
        let low = Insn::new(Op::Mov, vec![hr(A0), Operand::Int(0x12345001)]);
        assert!(matches_as(&low, "O17 rd0 I; O3 F3 rd0 rs0"));
        // and so does a full 64-bit value
        let wide = Insn::new(Op::Mov, vec![hr(A0), Operand::Int(1 << 40)]);
        assert!(matches_as(&wide, "O17 rd0 I; O3 F3 rd0 rs0"));
    }

    #[test]
    fn check_ref_operand_goes_to_pool() {
        let mut module = Module::new();
        let id = module.add(Item::Import { name: "callee".into(), addr: 0x7fff_ffff_f000 });
        let index = build_index();
        let insn = Insn::new(Op::Mov, vec![hr(A0), Operand::Ref(id)]);
        assert_eq!(
            find_insn_pattern_replacement(&index, &insn, &module),
            Some("O17 rd0 I; O3 F3 rd0 rs0")
        );
    }

    #[test]
    fn check_shift_amount_ranges() {
        let ok = Insn::new(Op::Lsh, vec![hr(A0), hr(A0), Operand::Int(63)]);
        assert!(matches_as(&ok, "O13 F1 f0 rd0 rs1 S"));
        let short_ok = Insn::new(Op::Lshs, vec![hr(A0), hr(A0), Operand::Int(31)]);
        assert!(matches_as(&short_ok, "O1b F1 f0 rd0 rs1 s"));
        let module = Module::new();
        let index = build_index();
        let too_big = Insn::new(Op::Lshs, vec![hr(A0), hr(A0), Operand::Int(32)]);
        assert!(find_insn_pattern_replacement(&index, &too_big, &module).is_none());
    }

    #[test]
    fn check_unspec_selects_by_code() {
        let w = Insn::new(Op::Unspec, vec![Operand::Int(0), hr(A0), hr(FA0)]);
        assert!(matches_as(&w, "O53 F0 f70 rd1 rs2"));
        let d = Insn::new(Op::Unspec, vec![Operand::Int(1), hr(A0), hr(FA0)]);
        assert!(matches_as(&d, "O53 F0 f71 rd1 rs2"));
    }

    #[test]
    fn check_call_pattern_ignores_tail_operands() {
        let mut module = Module::new();
        let id = module.add(Item::Import { name: "f".into(), addr: 0 });
        let index = build_index();
        let insn = Insn::new(
            Op::Call,
            vec![Operand::Ref(id), hr(A0 + 5), hr(A0), hr(A0), hr(A0 + 1)],
        );
        assert_eq!(
            find_insn_pattern_replacement(&index, &insn, &module),
            Some("O67 F0 hd1 rs1 i0")
        );
    }

    #[test]
    fn check_ret_matches_any_result_regs() {
        let module = Module::new();
        let index = build_index();
        let insn = Insn::new(Op::Ret, vec![hr(A0), hr(A0 + 1)]);
        assert_eq!(
            find_insn_pattern_replacement(&index, &insn, &module),
            Some("O67 F0 hd0 hs1 i0")
        );
    }

    #[test]
    fn check_alloca_imm_rounding_match() {
        let insn = Insn::new(Op::Alloca, vec![hr(A0), Operand::Int(2033)]);
        // 2033 rounds to 2048 which no longer fits
        let module = Module::new();
        let index = build_index();
        assert!(find_insn_pattern_replacement(&index, &insn, &module).is_none());
        let ok = Insn::new(Op::Alloca, vec![hr(A0), Operand::Int(2032)]);
        assert!(matches_as(&ok, "O13 F0 hd2 hs2 ju; O13 F0 rd0 hs2 i0"));
    }
}
