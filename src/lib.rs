//! RV64 JIT backend.
//!
//! Turns a machine-independent three-address IR into an in-memory
//! RV64IMFD instruction stream following the RISC-V Linux LP64D
//! calling convention. One [CodeGen] context compiles one function at
//! a time: machinize, splice in the prologue and epilogue once the
//! register allocator has run, then translate to binary and hand the
//! absolute-address relocations to the code loader.
//!
//! ```
//! use riscvgen::ir::{Func, Module, Op, Operand};
//! use riscvgen::regs::A0;
//! use riscvgen::CodeGen;
//!
//! // a fully machinized and allocated body: add a0,a0,a1; ret
//! let mut func = Func::new("add", vec![], vec![], false);
//! func.push(Op::Add, vec![
//!     Operand::HardReg(A0), Operand::HardReg(A0), Operand::HardReg(A0 + 1),
//! ]);
//! func.push(Op::Ret, vec![Operand::HardReg(A0)]);
//!
//! let module = Module::new();
//! let mut gen = CodeGen::new();
//! let code = gen.translate(&module, &func).unwrap();
//! assert_eq!(code.len(), 16);
//! ```

use std::collections::HashMap;

use thiserror::Error;

pub mod abi;
pub mod builtins;
pub mod emit;
pub mod encode;
pub mod frame;
pub mod ir;
pub mod machinize;
pub mod pattern;
pub mod regs;
pub mod utils;

use emit::{ConstRef, LabelRef};
pub use emit::CodeReloc;
use ir::{Func, Insn, LabelId, Module, Op, Type};
use regs::{HardReg, HardRegSet, FP};

/// Errors surfaced while lowering or emitting a function. Pattern
/// misses indicate a backend bug rather than bad user input; the
/// others reject argument or result configurations the ABI cannot
/// express.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenError {
    #[error("passing float variadic arg (should be passed as double)")]
    FloatVarargArg,
    #[error("wrong type of arg value")]
    WrongArgType,
    #[error("riscv can not handle this combination of return values")]
    RetValues,
    #[error("fatal failure in matching insn: {0}")]
    NoPattern(String),
}

/// Registered backend pseudo-instructions, selected by the first
/// operand of an [Op::Unspec] insn
const UNSPEC_NAMES: [&str; 2] = ["fmv.x.w", "fmv.x.d"];

/// Per-function backend context. Create one per logical compilation
/// worker; the pattern table itself is static and shared.
pub struct CodeGen {
    pub(crate) alloca_p: bool,
    pub(crate) block_arg_func_p: bool,
    pub(crate) leaf_p: bool,
    pub(crate) non_vararg_int_args_num: u32,
    pub(crate) small_aggregate_save_area: u64,
    pub(crate) pattern_index: HashMap<Op, Vec<usize>>,
    pub(crate) result_code: Vec<u8>,
    pub(crate) label_refs: Vec<LabelRef>,
    pub(crate) const_refs: Vec<ConstRef>,
    pub(crate) abs_address_locs: Vec<usize>,
    pub(crate) relocs: Vec<CodeReloc>,
    pub(crate) label_disps: HashMap<LabelId, usize>,
}

impl CodeGen {
    pub fn new() -> Self {
        Self {
            alloca_p: false,
            block_arg_func_p: false,
            leaf_p: false,
            non_vararg_int_args_num: 0,
            small_aggregate_save_area: 0,
            pattern_index: pattern::build_index(),
            result_code: Vec::new(),
            label_refs: Vec::new(),
            const_refs: Vec::new(),
            abs_address_locs: Vec::new(),
            relocs: Vec::new(),
            label_disps: HashMap::new(),
        }
    }

    /// Lower the function in place to the LP64D calling convention
    pub fn machinize(&mut self, module: &mut Module, func: &mut Func) -> Result<(), GenError> {
        machinize::machinize(self, module, func)
    }

    /// Splice in the frame setup and teardown. Must run after
    /// machinize, with the used-register set and stack slot count
    /// reported by the register allocator.
    pub fn make_prolog_epilog(
        &mut self,
        func: &mut Func,
        used_hard_regs: &HardRegSet,
        stack_slots_num: usize,
    ) {
        frame::make_prolog_epilog(self, func, used_hard_regs, stack_slots_num)
    }

    /// Emit the function as binary code. The returned buffer is owned
    /// by the context and valid until the next translation.
    pub fn translate(&mut self, module: &Module, func: &Func) -> Result<&[u8], GenError> {
        emit::translate(self, module, func)?;
        Ok(&self.result_code)
    }

    /// Absolute-address relocations for code placed at base, for the
    /// executable-memory loader to apply
    pub fn rebase(&mut self, base: u64) -> &[CodeReloc] {
        emit::rebase(self, base)
    }

    /// Does some pattern match this machinized insn?
    pub fn insn_ok_p(&self, insn: &Insn, module: &Module) -> bool {
        pattern::find_insn_pattern_replacement(&self.pattern_index, insn, module).is_some()
    }

    /// Hard registers an insn clobbers before reading its inputs
    pub fn early_clobbered_hard_regs(insn: &Insn) -> (Option<HardReg>, Option<HardReg>) {
        match insn.code {
            Op::Mod | Op::Mods | Op::Umod | Op::Umods => (Some(FP), None),
            _ => (None, None),
        }
    }

    /// Frame offset of a register-allocator stack slot. The first 16
    /// bytes above fp always hold the saved RA/FP pair; vararg and
    /// stack-arg functions also keep the previous stack start there.
    pub fn stack_slot_offset(&self, func: &Func, _ty: Type, slot: u32) -> i64 {
        let offset = if func.vararg_p || self.block_arg_func_p { 32 } else { 16 };
        i64::from(slot) * 8 + offset
    }

    /// Can a memory operand of this type use the given displacement?
    pub fn valid_mem_offset_p(&self, ty: Type, offset: i64) -> bool {
        let offset2 = if ty == Type::Ld { offset + 8 } else { offset };
        -(1 << 11) <= offset && offset2 < (1 << 11)
    }

    /// Name of a registered unspec pseudo-instruction
    pub fn unspec_name(&self, code: i64) -> &'static str {
        UNSPEC_NAMES[usize::try_from(code).expect("unspec code in range")]
    }
}

impl Default for CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;
    use crate::regs::{A0, SP};

    #[test]
    fn check_early_clobbers() {
        let rem = Insn::new(
            Op::Mod,
            vec![
                Operand::HardReg(A0),
                Operand::HardReg(A0),
                Operand::HardReg(A0 + 1),
            ],
        );
        assert_eq!(CodeGen::early_clobbered_hard_regs(&rem), (Some(FP), None));
        let add = Insn::new(Op::Add, rem.ops.clone());
        assert_eq!(CodeGen::early_clobbered_hard_regs(&add), (None, None));
    }

    #[test]
    fn check_stack_slot_offsets() {
        let gen = CodeGen::new();
        let plain = Func::new("f", vec![], vec![], false);
        assert_eq!(gen.stack_slot_offset(&plain, Type::I64, 0), 16);
        assert_eq!(gen.stack_slot_offset(&plain, Type::I64, 3), 40);
        let vararg = Func::new("g", vec![], vec![], true);
        assert_eq!(gen.stack_slot_offset(&vararg, Type::I64, 0), 32);
        let mut gen2 = CodeGen::new();
        gen2.block_arg_func_p = true;
        assert_eq!(gen2.stack_slot_offset(&plain, Type::I64, 1), 40);
    }

    #[test]
    fn check_valid_mem_offsets() {
        let gen = CodeGen::new();
        assert!(gen.valid_mem_offset_p(Type::I64, -2048));
        assert!(gen.valid_mem_offset_p(Type::I64, 2047));
        assert!(!gen.valid_mem_offset_p(Type::I64, 2048));
        assert!(!gen.valid_mem_offset_p(Type::I64, -2049));
        assert!(gen.valid_mem_offset_p(Type::Ld, 2032));
        assert!(!gen.valid_mem_offset_p(Type::Ld, 2040));
    }

    #[test]
    fn check_insn_ok_p() {
        let gen = CodeGen::new();
        let module = Module::new();
        let good = Insn::new(
            Op::Add,
            vec![
                Operand::HardReg(A0),
                Operand::HardReg(A0),
                Operand::HardReg(SP),
            ],
        );
        assert!(gen.insn_ok_p(&good, &module));
        // virtual register operands never match
        let bad = Insn::new(Op::Add, vec![Operand::Reg(1), Operand::Reg(2), Operand::Reg(3)]);
        assert!(!gen.insn_ok_p(&bad, &module));
    }

    #[test]
    fn check_unspec_names() {
        let gen = CodeGen::new();
        assert_eq!(gen.unspec_name(machinize::FMVXW_CODE), "fmv.x.w");
        assert_eq!(gen.unspec_name(machinize::FMVXD_CODE), "fmv.x.d");
    }
}
