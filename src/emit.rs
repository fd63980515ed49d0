//! Template interpretation and binary emission.
//!
//! Each replacement template emits one or more 32-bit words separated
//! by `;`. A word is assembled by ORing independently masked fields;
//! two directives touching the same bits is a backend bug and
//! asserts. Directives:
//!
//! ```txt
//! Ohex     opcode [6:0]          Fhex  funct3 [14:12]
//! fhex     funct7 [31:25]        ghex  funct7 w/o 1 bit [31:26]
//! rd<n> rs<n> rS<n>   n-th operand register into rd / rs1 / rs2
//! h(d,s,S)hex         literal hardware register number
//! ml       load-form memory: base into rs1, disp into imm12 [31:20]
//! ms       store-form memory: base into rs1, disp split [31:25,11:7]
//! i        12-bit immediate from the 2nd or 3rd operand [31:20]
//! i[-]hex  literal 12-bit immediate
//! ih / il  20-bit upper / 12-bit lower part of a 32-bit value
//! iu       20-bit immediate [31:12] from a low-12-zero operand
//! iuhex    literal 20-bit immediate [31:12]
//! j        negated 3rd-operand immediate [31:20]
//! ju       2nd-operand immediate rounded up to 16, negated
//! s / S    5- / 6-bit shift amount from the 3rd operand [24:20]/[25:20]
//! shex/Shex  literal shift amount
//! I        constant-pool reference: the auipc/ld pair across this
//!          word and the next is patched once the pool is laid out
//! T        12-bit offset from here to the 8-aligned switch table
//! l / L    label fixup at this word, B-format / J-format
//! ```
//!
//! The translate driver runs the per-insn emission, then patches
//! label references (rewriting short branches whose target moved out
//! of the 13-bit range into a branch-around trampoline), lays out the
//! 64-bit constant pool (8-aligned), appends switch tables, and pads
//! the result to 16 bytes.

use log::debug;

use crate::encode::{
    b_format_imm, get_insn, get_int64, j_format_imm, or_insn, put_uint64, set_insn, set_int64,
};
use crate::ir::{Func, HardRegMem, Insn, LabelId, Module, Op, Operand, Type};
use crate::pattern::{find_insn_pattern_replacement, read_hex};
use crate::regs::{F0, TEMP_DOUBLE_HARD_REG1, TEMP_DOUBLE_HARD_REG2};
use crate::{CodeGen, GenError};

/// A pending branch/jump displacement or an absolute-address slot
#[derive(Debug, Clone)]
pub(crate) struct LabelRef {
    pub abs_addr_p: bool,
    pub short_p: bool,
    pub label_val_disp: usize,
    pub label: LabelId,
}

/// A pending auipc/ld pair loading a pooled 64-bit constant
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConstRef {
    pub val: u64,
    pub const_addr_disp: usize,
}

/// Absolute-address patch the loader must apply after placement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeReloc {
    pub offset: u64,
    pub value: u64,
}

fn check_and_set_mask(insn_mask: u32, el_mask: u32) -> u32 {
    assert_eq!(insn_mask & el_mask, 0, "overlapping template fields");
    insn_mask | el_mask
}

/// 64-bit value of an int or reference operand
fn imm_value(op: &Operand, module: &Module) -> u64 {
    match op {
        Operand::Int(v) => *v as u64,
        Operand::Uint(v) => *v,
        Operand::Ref(id) => module.item_addr(*id),
        _ => panic!("immediate or reference operand expected, got {op}"),
    }
}

fn hard_reg_mem(op: &Operand) -> &HardRegMem {
    match op {
        Operand::HardRegMem(m) => m,
        _ => panic!("memory operand expected, got {op}"),
    }
}

fn int_op(op: &Operand) -> i64 {
    match op {
        Operand::Int(v) => *v,
        Operand::Uint(v) => *v as i64,
        _ => panic!("integer operand expected, got {op}"),
    }
}

/// Emit the machine words for one matched insn
pub(crate) fn out_insn(gen: &mut CodeGen, insn: &mut Insn, replacement: &str, module: &Module) {
    if insn.code == Op::Alloca {
        if let Operand::Int(v) = insn.ops[1] {
            insn.ops[1] = Operand::Int((v + 15) & -16);
        } else if let Operand::Uint(v) = insn.ops[1] {
            insn.ops[1] = Operand::Uint((v + 15) & (-16i64 as u64));
        }
    }
    let nops = insn.nops();
    let r = replacement.as_bytes();
    let mut pos = 0;
    let mut switch_table_addr_p = false;
    loop {
        let mut insn32: u32 = 0;
        let mut insn_mask: u32 = 0;
        let mut opcode: Option<u32> = None;
        let mut funct3: Option<u32> = None;
        let mut funct7: Option<u32> = None;
        let mut rd: Option<u32> = None;
        let mut rs1: Option<u32> = None;
        let mut rs2: Option<u32> = None;
        let mut shamt: Option<u32> = None;
        let mut imm12: Option<i32> = None;
        let mut imm20: Option<i32> = None;
        let mut st_disp: Option<u32> = None;
        let mut label_ref_num: Option<usize> = None;
        while pos < r.len() && r[pos] != b';' {
            let start_ch = r[pos];
            let mut el_mask: u32 = 0;
            match start_ch {
                b' ' | b'\t' => {
                    pos += 1;
                    continue;
                }
                b'O' => {
                    pos += 1;
                    assert!(opcode.is_none());
                    let v = read_hex(r, &mut pos) as u32;
                    assert!(v < (1 << 7));
                    opcode = Some(v);
                    el_mask = 0x3f;
                }
                b'F' => {
                    pos += 1;
                    assert!(funct3.is_none());
                    let v = read_hex(r, &mut pos) as u32;
                    assert!(v < (1 << 3));
                    funct3 = Some(v);
                    el_mask = 0xf000;
                }
                b'f' => {
                    pos += 1;
                    assert!(funct7.is_none());
                    let v = read_hex(r, &mut pos) as u32;
                    assert!(v < (1 << 7));
                    funct7 = Some(v);
                    el_mask = 0xfe00_0000;
                }
                b'g' => {
                    pos += 1;
                    assert!(funct7.is_none());
                    let v = read_hex(r, &mut pos) as u32;
                    assert!(v < (1 << 6));
                    funct7 = Some(v);
                    el_mask = 0xfc00_0000;
                }
                b'r' | b'h' => {
                    pos += 1;
                    let ch2 = r[pos];
                    assert!(ch2 == b'd' || ch2 == b's' || ch2 == b'S');
                    pos += 1;
                    let mut reg = if start_ch == b'h' {
                        read_hex(r, &mut pos) as u32
                    } else {
                        let n = r[pos];
                        assert!((b'0'..=b'2').contains(&n) && usize::from(n - b'0') < nops);
                        pos += 1;
                        match insn.ops[usize::from(n - b'0')] {
                            Operand::HardReg(h) => u32::from(h),
                            ref op => panic!("hard register operand expected, got {op}"),
                        }
                    };
                    if reg >= u32::from(F0) {
                        reg -= u32::from(F0);
                    }
                    assert!(reg <= 31);
                    if ch2 == b'd' {
                        rd = Some(reg);
                        el_mask = 0xf80;
                    } else if ch2 == b's' {
                        rs1 = Some(reg);
                        el_mask = 0xf8000;
                    } else {
                        rs2 = Some(reg);
                        el_mask = 0x1f0_0000;
                    }
                }
                b'm' => {
                    pos += 1;
                    let m;
                    if r[pos] == b's' {
                        // store form
                        m = hard_reg_mem(&insn.ops[0]);
                        let disp = m.disp as i32;
                        st_disp =
                            Some((((disp << 13) & 0x01fc_0000) | (disp & 0x1f)) as u32);
                        el_mask = 0xfe00_0f80;
                    } else {
                        assert_eq!(r[pos], b'l');
                        m = hard_reg_mem(&insn.ops[1]);
                        imm12 = Some(m.disp as i32);
                        el_mask = 0xfff0_0000;
                    }
                    pos += 1;
                    el_mask |= 0xf8000;
                    rs1 = Some(u32::from(m.base));
                }
                b's' | b'S' => {
                    el_mask = if start_ch == b's' { 0x1f0_0000 } else { 0x3f0_0000 };
                    pos += 1;
                    if pos < r.len() && r[pos].is_ascii_hexdigit() {
                        shamt = Some(read_hex(r, &mut pos) as u32);
                    } else {
                        let v = int_op(&insn.ops[2]);
                        assert!(v >= 0);
                        shamt = Some(v as u32);
                    }
                }
                b'i' => {
                    pos += 1;
                    let ch = r.get(pos).copied();
                    if ch == Some(b'-') || ch.is_some_and(|c| c.is_ascii_hexdigit()) {
                        // literal i[-]<hex>
                        let neg_p = ch == Some(b'-');
                        if neg_p {
                            pos += 1;
                        }
                        let mut v = read_hex(r, &mut pos) as i32;
                        if neg_p {
                            v = -v;
                        }
                        imm12 = Some(v);
                        el_mask = 0xfff0_0000;
                    } else if ch == Some(b'h') || ch == Some(b'l') {
                        pos += 1;
                        let v = imm_value(&insn.ops[1], module) as i64 as i32;
                        let low = (v << 20) >> 20;
                        if ch == Some(b'h') {
                            imm20 = Some((v.wrapping_sub(low)) >> 12);
                            el_mask = 0xffff_f000;
                        } else {
                            imm12 = Some(low);
                            el_mask = 0xfff0_0000;
                        }
                    } else if ch == Some(b'u') {
                        pos += 1;
                        if pos < r.len() && r[pos].is_ascii_hexdigit() {
                            imm20 = Some(read_hex(r, &mut pos) as i32);
                        } else {
                            let v = int_op(&insn.ops[1]);
                            assert_eq!(v & 0xfff, 0);
                            imm20 = Some((v >> 12) as i32);
                        }
                        el_mask = 0xffff_f000;
                    } else {
                        // i: the 2nd or 3rd operand
                        let v = if nops > 2
                            && matches!(insn.ops[2], Operand::Int(_) | Operand::Uint(_))
                        {
                            int_op(&insn.ops[2])
                        } else {
                            int_op(&insn.ops[1])
                        };
                        imm12 = Some(v as i32);
                    }
                }
                b'j' => {
                    pos += 1;
                    let v = if r.get(pos) == Some(&b'u') {
                        pos += 1;
                        let v = int_op(&insn.ops[1]);
                        -((v + 15) / 16 * 16)
                    } else {
                        -int_op(&insn.ops[2])
                    };
                    imm12 = Some(v as i32);
                    el_mask = 0xfff0_0000;
                }
                b'I' => {
                    pos += 1;
                    let val = imm_value(&insn.ops[1], module);
                    gen.const_refs.push(ConstRef {
                        val,
                        const_addr_disp: gen.result_code.len(),
                    });
                }
                b'T' => {
                    pos += 1;
                    assert!(!switch_table_addr_p);
                    let mut v = (gen.result_code.len() % 8) as i32;
                    if v != 0 {
                        v = 8 - v;
                    }
                    v += 16;
                    imm12 = Some(v);
                    el_mask = 0xfff0_0000;
                    switch_table_addr_p = true;
                }
                b'l' | b'L' => {
                    pos += 1;
                    let short_p = start_ch == b'l';
                    let nop = if short_p || !insn.code.is_call() { 0 } else { 1 };
                    let Operand::Label(label) = insn.ops[nop] else {
                        panic!("label operand expected in {insn}");
                    };
                    label_ref_num = Some(gen.label_refs.len());
                    gen.label_refs.push(LabelRef {
                        abs_addr_p: false,
                        short_p,
                        label_val_disp: 0,
                        label,
                    });
                    el_mask = if short_p { 0xfe00_0f80 } else { 0xffff_f000 };
                }
                _ => panic!("bad template element {:?}", start_ch as char),
            }
            insn_mask = check_and_set_mask(insn_mask, el_mask);
        }
        if let Some(v) = opcode {
            insn32 |= v;
        }
        if let Some(v) = funct3 {
            insn32 |= v << 12;
        }
        if let Some(v) = funct7 {
            insn32 |= v << 25;
        }
        if let Some(v) = rd {
            insn32 |= v << 7;
        }
        if let Some(v) = rs1 {
            insn32 |= v << 15;
        }
        if let Some(v) = rs2 {
            insn32 |= v << 20;
        }
        if let Some(v) = shamt {
            insn32 |= v << 20;
        }
        if let Some(v) = imm12 {
            insn32 |= (v as u32) << 20;
        }
        if let Some(v) = imm20 {
            insn32 |= (v as u32) << 12;
        }
        if let Some(v) = st_disp {
            insn32 |= v << 7;
        }
        if let Some(n) = label_ref_num {
            gen.label_refs[n].label_val_disp = gen.result_code.len();
        }
        put_uint64(&mut gen.result_code, u64::from(insn32), 4);
        if pos >= r.len() {
            break;
        }
        pos += 1; // skip ';'
    }
    if !switch_table_addr_p {
        return;
    }
    // append the jump table: one absolute label address per case
    assert_eq!(insn.code, Op::Switch);
    if gen.result_code.len() % 8 != 0 {
        let pad = 8 - gen.result_code.len() % 8;
        put_uint64(&mut gen.result_code, 0, pad);
    }
    for i in 1..insn.nops() {
        let Operand::Label(label) = insn.ops[i] else {
            panic!("switch case must be a label");
        };
        gen.label_refs.push(LabelRef {
            abs_addr_p: true,
            short_p: false,
            label_val_disp: gen.result_code.len(),
            label,
        });
        put_uint64(&mut gen.result_code, 0, 8);
    }
}

/// Replace a long double move by word moves before matching: an int
/// register pair on one side turns into two 64-bit moves at disp and
/// disp+8; memory to memory goes through the two reserved fp temps.
fn split_ldmov(insn: Insn, out: &mut Vec<Insn>) {
    match (&insn.ops[0], &insn.ops[1]) {
        (&Operand::HardReg(dst), &Operand::HardRegMem(mem)) => {
            assert!(dst + 1 < F0);
            let mut mem = mem;
            mem.ty = Type::I64;
            out.push(Insn::new(
                Op::Mov,
                vec![Operand::HardReg(dst), Operand::HardRegMem(mem)],
            ));
            mem.disp += 8;
            out.push(Insn::new(
                Op::Mov,
                vec![Operand::HardReg(dst + 1), Operand::HardRegMem(mem)],
            ));
        }
        (&Operand::HardRegMem(mem), &Operand::HardReg(src)) => {
            assert!(src + 1 < F0);
            let mut mem = mem;
            mem.ty = Type::I64;
            out.push(Insn::new(
                Op::Mov,
                vec![Operand::HardRegMem(mem), Operand::HardReg(src)],
            ));
            mem.disp += 8;
            out.push(Insn::new(
                Op::Mov,
                vec![Operand::HardRegMem(mem), Operand::HardReg(src + 1)],
            ));
        }
        (&Operand::HardRegMem(dst), &Operand::HardRegMem(src)) => {
            let (mut dst, mut src) = (dst, src);
            src.ty = Type::D;
            dst.ty = Type::D;
            out.push(Insn::new(
                Op::Dmov,
                vec![
                    Operand::HardReg(TEMP_DOUBLE_HARD_REG1),
                    Operand::HardRegMem(src),
                ],
            ));
            src.disp += 8;
            out.push(Insn::new(
                Op::Dmov,
                vec![
                    Operand::HardReg(TEMP_DOUBLE_HARD_REG2),
                    Operand::HardRegMem(src),
                ],
            ));
            out.push(Insn::new(
                Op::Dmov,
                vec![
                    Operand::HardRegMem(dst),
                    Operand::HardReg(TEMP_DOUBLE_HARD_REG1),
                ],
            ));
            dst.disp += 8;
            out.push(Insn::new(
                Op::Dmov,
                vec![
                    Operand::HardRegMem(dst),
                    Operand::HardReg(TEMP_DOUBLE_HARD_REG2),
                ],
            ));
        }
        _ => panic!("unsplittable long double move {insn}"),
    }
}

pub(crate) fn translate(
    gen: &mut CodeGen,
    module: &Module,
    func: &Func,
) -> Result<(), GenError> {
    gen.result_code.clear();
    gen.label_refs.clear();
    gen.const_refs.clear();
    gen.abs_address_locs.clear();
    gen.label_disps.clear();

    let mut insns: Vec<Insn> = Vec::with_capacity(func.insns.len());
    for insn in &func.insns {
        if insn.code == Op::Ldmov {
            split_ldmov(insn.clone(), &mut insns);
        } else {
            insns.push(insn.clone());
        }
    }
    for insn in &mut insns {
        if insn.code == Op::Label {
            let Operand::Label(label) = insn.ops[0] else {
                panic!("label insn without a label operand");
            };
            gen.label_disps.insert(label, gen.result_code.len());
        } else {
            let Some(replacement) =
                find_insn_pattern_replacement(&gen.pattern_index, insn, module)
            else {
                return Err(GenError::NoPattern(insn.to_string()));
            };
            out_insn(gen, insn, replacement, module);
        }
    }
    // setting up labels
    for i in 0..gen.label_refs.len() {
        let lr = gen.label_refs[i].clone();
        let target = *gen
            .label_disps
            .get(&lr.label)
            .expect("label is defined before fixup");
        if !lr.abs_addr_p {
            let mut offset = target as i64 - lr.label_val_disp as i64;
            assert_eq!(offset & 1, 0);
            if lr.short_p && !((-(1 << 12))..=(1 << 12)).contains(&offset) {
                // BL: br L  =>  BL: jmp NBL; ... NBL: br TL; jmp BL+4; TL: jmp L
                let bin_insn = get_insn(&gen.result_code, lr.label_val_disp);
                offset = gen.result_code.len() as i64 - lr.label_val_disp as i64;
                set_insn(
                    &mut gen.result_code,
                    lr.label_val_disp,
                    0x6f | j_format_imm(offset),
                );
                put_uint64(
                    &mut gen.result_code,
                    u64::from(bin_insn | b_format_imm(8)),
                    4,
                );
                offset = lr.label_val_disp as i64 - gen.result_code.len() as i64 + 4;
                put_uint64(&mut gen.result_code, u64::from(0x6f | j_format_imm(offset)), 4);
                offset = target as i64 - gen.result_code.len() as i64;
                put_uint64(&mut gen.result_code, u64::from(0x6f | j_format_imm(offset)), 4);
            } else {
                let imm = if lr.short_p {
                    b_format_imm(offset)
                } else {
                    j_format_imm(offset)
                };
                or_insn(&mut gen.result_code, lr.label_val_disp, imm);
            }
        } else {
            set_int64(
                &mut gen.result_code[lr.label_val_disp..],
                target as i64,
                8,
            );
            gen.abs_address_locs.push(lr.label_val_disp);
        }
    }
    while gen.result_code.len() % 8 != 0 {
        gen.result_code.push(0); // align the pool
    }
    // setting up the 64-bit constants
    for i in 0..gen.const_refs.len() {
        let cr = gen.const_refs[i];
        assert!(gen.result_code.len() > cr.const_addr_disp);
        let disp = (gen.result_code.len() - cr.const_addr_disp) as u32;
        // the ld immediate is sign extended, so propagate its carry
        // into the auipc part
        let carry = (disp & 0x800) << 1;
        or_insn(
            &mut gen.result_code,
            cr.const_addr_disp,
            disp.wrapping_add(carry) & 0xffff_f000,
        );
        or_insn(&mut gen.result_code, cr.const_addr_disp + 4, disp << 20);
        put_uint64(&mut gen.result_code, cr.val, 8);
    }
    while gen.result_code.len() % 16 != 0 {
        gen.result_code.push(0);
    }
    debug!(
        "translated {}: {} bytes, {} label refs, {} pool consts",
        func.name,
        gen.result_code.len(),
        gen.label_refs.len(),
        gen.const_refs.len()
    );
    Ok(())
}

/// Recompute the absolute-address relocations for code placed at base
pub(crate) fn rebase(gen: &mut CodeGen, base: u64) -> &[CodeReloc] {
    gen.relocs.clear();
    for &offset in &gen.abs_address_locs {
        let value = base.wrapping_add(get_int64(&gen.result_code[offset..], 8) as u64);
        gen.relocs.push(CodeReloc { offset: offset as u64, value });
    }
    &gen.relocs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::PATTERNS;
    use crate::regs::{HardReg, A0, RA, SP, T5, T6, ZERO};
    use crate::utils::extract_field;

    fn hr(r: HardReg) -> Operand {
        Operand::HardReg(r)
    }

    fn word(code: &[u8], n: usize) -> u32 {
        get_insn(code, n * 4)
    }

    /// Decode a B-format branch displacement back to bytes
    fn b_disp(word: u32) -> i64 {
        let imm12 = extract_field(word, 31, 31);
        let imm11 = extract_field(word, 7, 7);
        let imm10_5 = extract_field(word, 30, 25);
        let imm4_1 = extract_field(word, 11, 8);
        let v = (imm12 << 12) | (imm11 << 11) | (imm10_5 << 5) | (imm4_1 << 1);
        ((v as i32) << 19 >> 19) as i64
    }

    /// Decode a J-format jump displacement back to bytes
    fn j_disp(word: u32) -> i64 {
        let imm20 = extract_field(word, 31, 31);
        let imm19_12 = extract_field(word, 19, 12);
        let imm11 = extract_field(word, 20, 20);
        let imm10_1 = extract_field(word, 30, 21);
        let v = (imm20 << 20) | (imm19_12 << 12) | (imm11 << 11) | (imm10_1 << 1);
        ((v as i32) << 11 >> 11) as i64
    }

    fn translate_insns(insns: Vec<Insn>) -> (CodeGen, Vec<u8>) {
        let module = Module::new();
        let mut func = Func::new("t", vec![], vec![], false);
        func.insns = insns;
        let mut gen = CodeGen::new();
        translate(&mut gen, &module, &func).unwrap();
        let code = gen.result_code.clone();
        (gen, code)
    }

    #[test]
    fn check_add_function_body() {
        // add a0,a0,a1; ret -- no prologue needed for a leaf
        let (_, code) = translate_insns(vec![
            Insn::new(Op::Add, vec![hr(A0), hr(A0), hr(A0 + 1)]),
            Insn::new(Op::Ret, vec![hr(A0)]),
        ]);
        assert_eq!(word(&code, 0), 0x00b5_0533); // add a0,a0,a1
        assert_eq!(word(&code, 1), 0x0000_8067); // jalr zero,ra,0
        assert_eq!(code.len(), 16); // padded
        assert_eq!(&code[8..], [0u8; 8]);
    }

    #[test]
    fn check_load_immediate_forms() {
        let (_, code) = translate_insns(vec![
            Insn::new(Op::Mov, vec![hr(A0), Operand::Int(100)]),
            Insn::new(Op::Mov, vec![hr(A0), Operand::Int(0x12345 << 12)]),
            Insn::new(Op::Ret, vec![]),
        ]);
        assert_eq!(word(&code, 0), 0x0640_0513); // addi a0,zero,100
        assert_eq!(word(&code, 1), 0x1234_5537); // lui a0,0x12345
    }

    #[test]
    fn check_memory_forms() {
        let (_, code) = translate_insns(vec![
            Insn::new(Op::Mov, vec![hr(A0), Operand::hard_reg_mem(Type::I64, 16, SP)]),
            Insn::new(Op::Mov, vec![Operand::hard_reg_mem(Type::I64, 8, SP), hr(A0)]),
            Insn::new(Op::Ret, vec![]),
        ]);
        assert_eq!(word(&code, 0), 0x0101_3503); // ld a0,16(sp)
        assert_eq!(word(&code, 1), 0x00a1_3423); // sd a0,8(sp)
    }

    #[test]
    fn check_negative_store_displacement() {
        let (_, code) = translate_insns(vec![
            Insn::new(
                Op::Mov,
                vec![Operand::hard_reg_mem(Type::I64, -24, SP), hr(A0)],
            ),
            Insn::new(Op::Ret, vec![]),
        ]);
        let w = word(&code, 0);
        let imm11_5 = extract_field(w, 31, 25);
        let imm4_0 = extract_field(w, 11, 7);
        let v = ((imm11_5 << 5) | imm4_0) as i32;
        assert_eq!((v << 20) >> 20, -24);
    }

    #[test]
    fn check_constant_pool_round_trip() {
        let value: u64 = 0x1122_3344_5566_7788;
        let (_, code) = translate_insns(vec![
            Insn::new(Op::Mov, vec![hr(A0), Operand::Uint(value)]),
            Insn::new(Op::Ret, vec![]),
        ]);
        // auipc a0,hi; ld a0,lo(a0)
        let auipc = word(&code, 0);
        let ld = word(&code, 1);
        assert_eq!(auipc & 0xfff, 0x517); // auipc rd=a0
        assert_eq!(ld & 0xfffff, 0x5_3503 & 0xfffff); // ld a0,..(a0)
        let hi = (auipc as i32) >> 12 << 12;
        let lo = (ld as i32) >> 20;
        let pool = 0i64 + i64::from(hi) + i64::from(lo);
        assert_eq!(get_int64(&code[pool as usize..], 8) as u64, value);
    }

    #[test]
    fn check_constant_pool_carry_correction() {
        // place the pool exactly 0x800 bytes after the auipc so the
        // sign-extended ld immediate needs the +0x1000 carry
        let mut insns = vec![Insn::new(Op::Mov, vec![hr(A0), Operand::Uint(0xdead_beef)])];
        for _ in 0..508 {
            insns.push(Insn::new(Op::Mov, vec![hr(A0), Operand::Int(0)]));
        }
        insns.push(Insn::new(Op::Ret, vec![]));
        let (_, code) = translate_insns(insns);
        // code: 2 + 508 + 1 words = 2044 bytes, aligned to 2048
        let auipc = word(&code, 0);
        let ld = word(&code, 1);
        let hi = (auipc as i32) >> 12 << 12;
        let lo = (ld as i32) >> 20;
        assert_eq!(hi, 0x1000);
        assert_eq!(lo, -0x800);
        let pool = i64::from(hi) + i64::from(lo);
        assert_eq!(pool, 0x800);
        assert_eq!(get_int64(&code[pool as usize..], 8), 0xdead_beef);
    }

    #[test]
    fn check_branch_displacement() {
        let mut func = Func::new("t", vec![], vec![], false);
        let l = func.new_label();
        func.push(Op::Label, vec![Operand::Label(l)]);
        func.push(Op::Mov, vec![hr(A0), Operand::Int(0)]);
        func.push(Op::Bt, vec![Operand::Label(l), hr(A0)]);
        func.push(Op::Ret, vec![]);
        let module = Module::new();
        let mut gen = CodeGen::new();
        translate(&mut gen, &module, &func).unwrap();
        let w = word(&gen.result_code, 1);
        assert_eq!(w & 0x7f, 0x63); // bne
        assert_eq!(b_disp(w), -4);
    }

    #[test]
    fn check_jump_displacement() {
        let mut func = Func::new("t", vec![], vec![], false);
        let l = func.new_label();
        func.push(Op::Jmp, vec![Operand::Label(l)]);
        func.push(Op::Mov, vec![hr(A0), Operand::Int(0)]);
        func.push(Op::Label, vec![Operand::Label(l)]);
        func.push(Op::Ret, vec![]);
        let module = Module::new();
        let mut gen = CodeGen::new();
        translate(&mut gen, &module, &func).unwrap();
        let w = word(&gen.result_code, 0);
        assert_eq!(w & 0xfff, 0x6f); // jal zero
        assert_eq!(j_disp(w), 8);
    }

    #[test]
    fn check_long_branch_trampoline() {
        // branch target beyond the 13-bit range is reached through a
        // branch-around plus jump pair appended at the end
        let mut func = Func::new("t", vec![], vec![], false);
        let l = func.new_label();
        func.push(Op::Bt, vec![Operand::Label(l), hr(A0)]);
        for _ in 0..1030 {
            func.push(Op::Mov, vec![hr(A0), Operand::Int(0)]);
        }
        func.push(Op::Label, vec![Operand::Label(l)]);
        func.push(Op::Ret, vec![]);
        let module = Module::new();
        let mut gen = CodeGen::new();
        translate(&mut gen, &module, &func).unwrap();
        let code = &gen.result_code;
        let target = 4 + 1030 * 4; // the ret insn
        let tramp = target + 4; // appended after the body
        // the branch site now holds a jump to the trampoline
        let w0 = word(code, 0);
        assert_eq!(w0 & 0xfff, 0x6f);
        assert_eq!(j_disp(w0), tramp as i64);
        // trampoline: bne +8; jal back-to-fallthrough; jal target
        let w1 = word(code, tramp / 4);
        assert_eq!(w1 & 0x7f, 0x63);
        assert_eq!(b_disp(w1), 8);
        let w2 = word(code, tramp / 4 + 1);
        assert_eq!(tramp as i64 + 4 + j_disp(w2), 4); // falls through after the branch
        let w3 = word(code, tramp / 4 + 2);
        assert_eq!(tramp as i64 + 8 + j_disp(w3), target as i64);
    }

    #[test]
    fn check_switch_dispatch_and_table() {
        let mut func = Func::new("t", vec![], vec![], false);
        let labels: Vec<_> = (0..3).map(|_| func.new_label()).collect();
        for (n, &l) in labels.iter().enumerate() {
            func.push(Op::Label, vec![Operand::Label(l)]);
            func.push(Op::Mov, vec![hr(A0), Operand::Int(n as i64)]);
        }
        let mut ops = vec![hr(A0)];
        ops.extend(labels.iter().map(|&l| Operand::Label(l)));
        func.push(Op::Switch, ops);
        func.push(Op::Ret, vec![]);
        let module = Module::new();
        let mut gen = CodeGen::new();
        translate(&mut gen, &module, &func).unwrap();
        let code = gen.result_code.clone();
        // dispatch starts at 12: slli t5,a0,3; auipc t6,0;
        // add t6,t6,t5; ld t6,20(t6); jalr zero,t6,0
        let base = 3;
        let slli = word(&code, base);
        assert_eq!(slli & 0x7f, 0x13);
        assert_eq!(extract_field(slli, 11, 7), u32::from(T5));
        assert_eq!(extract_field(slli, 19, 15), u32::from(A0));
        assert_eq!(extract_field(slli, 25, 20), 3);
        let auipc = word(&code, base + 1);
        assert_eq!(auipc, 0x17 | u32::from(T6) << 7); // auipc t6,0
        let add = word(&code, base + 2);
        assert_eq!(extract_field(add, 11, 7), u32::from(T6));
        assert_eq!(extract_field(add, 24, 20), u32::from(T5));
        let ld = word(&code, base + 3);
        assert_eq!((ld as i32) >> 20, 16); // table offset from the auipc
        let jalr = word(&code, base + 4);
        assert_eq!(extract_field(jalr, 11, 7), u32::from(ZERO));
        assert_eq!(extract_field(jalr, 19, 15), u32::from(T6));
        // the 8-aligned table holds the three label displacements
        let table = (base + 5) * 4;
        assert_eq!(table % 8, 0);
        assert_eq!(get_int64(&code[table..], 8), 0);
        assert_eq!(get_int64(&code[table + 8..], 8), 4);
        assert_eq!(get_int64(&code[table + 16..], 8), 8);
        // and rebasing reports them as absolute relocations
        let relocs = rebase(&mut gen, 0x4000_0000);
        assert_eq!(
            relocs,
            [
                CodeReloc { offset: table as u64, value: 0x4000_0000 },
                CodeReloc { offset: table as u64 + 8, value: 0x4000_0004 },
                CodeReloc { offset: table as u64 + 16, value: 0x4000_0008 },
            ]
        );
    }

    #[test]
    fn check_alloca_immediate_rounds_up() {
        let (_, code) = translate_insns(vec![
            Insn::new(Op::Alloca, vec![hr(A0), Operand::Int(24)]),
            Insn::new(Op::Ret, vec![]),
        ]);
        assert_eq!(word(&code, 0), 0xfe01_0113); // addi sp,sp,-32
        assert_eq!(word(&code, 1), 0x0001_0513); // addi a0,sp,0
    }

    #[test]
    fn check_ldmov_reg_pair_split() {
        let (_, code) = translate_insns(vec![
            Insn::new(
                Op::Ldmov,
                vec![hr(A0), Operand::hard_reg_mem(Type::Ld, 16, SP)],
            ),
            Insn::new(Op::Ret, vec![]),
        ]);
        assert_eq!(word(&code, 0), 0x0101_3503); // ld a0,16(sp)
        assert_eq!(word(&code, 1), 0x0181_3583); // ld a1,24(sp)
    }

    #[test]
    fn check_ldmov_mem_mem_through_fp_temps() {
        let (_, code) = translate_insns(vec![
            Insn::new(
                Op::Ldmov,
                vec![
                    Operand::hard_reg_mem(Type::Ld, 0, SP),
                    Operand::hard_reg_mem(Type::Ld, 16, SP),
                ],
            ),
            Insn::new(Op::Ret, vec![]),
        ]);
        assert_eq!(word(&code, 0), 0x0101_3f07); // fld ft10,16(sp)
        assert_eq!(word(&code, 1), 0x0181_3f87); // fld ft11,24(sp)
        assert_eq!(word(&code, 2), 0x01e1_3027); // fsd ft10,0(sp)
        assert_eq!(word(&code, 3), 0x01f1_3427); // fsd ft11,8(sp)
    }

    #[test]
    fn check_unmatched_insn_reports_pattern_miss() {
        let module = Module::new();
        let mut func = Func::new("t", vec![], vec![], false);
        func.push(Op::Add, vec![Operand::Reg(1), Operand::Reg(2), Operand::Reg(3)]);
        let mut gen = CodeGen::new();
        let err = translate(&mut gen, &module, &func).unwrap_err();
        assert!(matches!(err, GenError::NoPattern(ref s) if s.contains("Add")));
    }

    #[test]
    fn check_call_and_ret_encodings() {
        let (_, code) = translate_insns(vec![
            Insn::new(
                Op::Call,
                vec![Operand::Int(0), hr(T6), hr(A0), hr(A0)],
            ),
            Insn::new(Op::Ret, vec![hr(A0)]),
        ]);
        // jalr ra,t6,0
        assert_eq!(word(&code, 0), 0x67 | 1 << 7 | u32::from(T6) << 15);
        assert_eq!(word(&code, 1), 0x67 | u32::from(RA) << 15);
    }

    /// Build operands satisfying a pattern shape so its template can
    /// be driven through the emitter
    fn synth_ops(shape: &str, func: &mut Func) -> Vec<Operand> {
        let mut ops = Vec::new();
        for tok in shape.split_whitespace() {
            let op = match tok {
                "$" => break,
                "X" => Operand::Int(0),
                "r" => hr(A0),
                "i" | "j" | "s" | "S" => Operand::Int(1),
                "ju" => Operand::Int(16),
                "ia" => Operand::Int(5),
                "iu" => Operand::Int(0x1000),
                "I" => Operand::Int(123),
                "l" | "L" => {
                    let l = func.new_label();
                    Operand::Label(l)
                }
                t if t.starts_with('c') => Operand::Int(t[1..].parse().unwrap()),
                "m0" | "ms0" => Operand::hard_reg_mem(Type::I8, 0, A0),
                "mu0" => Operand::hard_reg_mem(Type::U8, 0, A0),
                "m1" | "ms1" => Operand::hard_reg_mem(Type::I16, 0, A0),
                "mu1" => Operand::hard_reg_mem(Type::U16, 0, A0),
                "m2" | "ms2" => Operand::hard_reg_mem(Type::I32, 0, A0),
                "mu2" => Operand::hard_reg_mem(Type::U32, 0, A0),
                "m3" | "ms3" => Operand::hard_reg_mem(Type::I64, 0, A0),
                "mu3" => Operand::hard_reg_mem(Type::U64, 0, A0),
                "mf" => Operand::hard_reg_mem(Type::F, 0, A0),
                "md" => Operand::hard_reg_mem(Type::D, 0, A0),
                "mld" => Operand::hard_reg_mem(Type::Ld, 0, A0),
                other => panic!("unhandled shape element {other}"),
            };
            ops.push(op);
        }
        ops
    }

    /// Every template must assemble with disjoint field masks; the
    /// emitter asserts on any overlap
    #[test]
    fn check_all_templates_have_disjoint_masks() {
        let module = Module::new();
        for p in PATTERNS {
            let mut func = Func::new("t", vec![], vec![], false);
            let ops = synth_ops(p.pat, &mut func);
            let mut insn = Insn::new(p.code, ops);
            let mut gen = CodeGen::new();
            out_insn(&mut gen, &mut insn, p.repl, &module);
            let words = if p.repl.is_empty() {
                1
            } else {
                p.repl.matches(';').count() + 1
            };
            assert!(
                gen.result_code.len() >= words * 4,
                "pattern {:?} {:?} emitted too little",
                p.code,
                p.pat
            );
        }
    }
}
