//! The machine-independent IR consumed by the backend.
//!
//! A function body is a flat vector of typed three-address
//! instructions over virtual registers, hard registers and memory
//! operands. The backend rewrites it in place (machinize, then
//! prologue/epilogue insertion) before the final binary emission.
//!
//! Argument virtual registers are 1..=nargs in declaration order;
//! temporaries are handed out after those. Labels are defined by
//! [Op::Label] instructions in the stream and referenced by
//! [Operand::Label].
//!
//! Call instructions use the operand layout
//! `[proto ref, callee, results.., args..]`.

use std::fmt;

use crate::regs::HardReg;

/// Virtual register number (1-based; 1..=nargs are the formals)
pub type Reg = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F,
    D,
    /// 16-byte long double; always memory or a GPR pair, never an FPR
    Ld,
    /// Pointer
    P,
    /// By-value aggregate passed in GPRs or on the stack
    Blk,
    /// By-value aggregate requiring an even GPR pair start
    BlkEven,
    /// By-value packed-double aggregate classified to FPRs
    BlkFp,
    /// Aggregate passed by reference
    RBlk,
}

impl Type {
    /// Stable numeric code, as passed to the va_arg runtime helper
    pub fn code(self) -> u64 {
        match self {
            Type::I8 => 0,
            Type::U8 => 1,
            Type::I16 => 2,
            Type::U16 => 3,
            Type::I32 => 4,
            Type::U32 => 5,
            Type::I64 => 6,
            Type::U64 => 7,
            Type::F => 8,
            Type::D => 9,
            Type::Ld => 10,
            Type::P => 11,
            Type::Blk => 12,
            Type::BlkEven => 13,
            Type::BlkFp => 14,
            Type::RBlk => 15,
        }
    }

    /// float or double (the types that live in FPRs)
    pub fn is_fp(self) -> bool {
        matches!(self, Type::F | Type::D | Type::Ld)
    }

    /// By-value block types
    pub fn is_blk(self) -> bool {
        matches!(self, Type::Blk | Type::BlkEven | Type::BlkFp)
    }

    /// By-value and by-reference block types
    pub fn is_any_blk(self) -> bool {
        self.is_blk() || self == Type::RBlk
    }
}

/// Opcodes reaching this backend. The S suffix marks 32-bit ("short")
/// variants, U unsigned ones, F/D/LD the float, double and long double
/// forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Mov,
    Fmov,
    Dmov,
    Ldmov,
    Ext8,
    Ext16,
    Ext32,
    Uext8,
    Uext16,
    Uext32,
    Add,
    Adds,
    Fadd,
    Dadd,
    Ldadd,
    Sub,
    Subs,
    Fsub,
    Dsub,
    Ldsub,
    Mul,
    Muls,
    Fmul,
    Dmul,
    Ldmul,
    Div,
    Divs,
    Udiv,
    Udivs,
    Fdiv,
    Ddiv,
    Lddiv,
    Mod,
    Mods,
    Umod,
    Umods,
    Neg,
    Negs,
    Fneg,
    Dneg,
    Ldneg,
    Lsh,
    Lshs,
    Rsh,
    Rshs,
    Ursh,
    Urshs,
    And,
    Ands,
    Or,
    Ors,
    Xor,
    Xors,
    Eq,
    Eqs,
    Ne,
    Nes,
    Lt,
    Lts,
    Ult,
    Ults,
    Le,
    Les,
    Ule,
    Ules,
    Gt,
    Gts,
    Ugt,
    Ugts,
    Ge,
    Ges,
    Uge,
    Uges,
    Feq,
    Deq,
    Ldeq,
    Fne,
    Dne,
    Ldne,
    Flt,
    Dlt,
    Ldlt,
    Fle,
    Dle,
    Ldle,
    Fgt,
    Dgt,
    Ldgt,
    Fge,
    Dge,
    Ldge,
    I2f,
    I2d,
    I2ld,
    Ui2f,
    Ui2d,
    Ui2ld,
    F2i,
    D2i,
    Ld2i,
    F2d,
    F2ld,
    D2f,
    D2ld,
    Ld2f,
    Ld2d,
    Jmp,
    Bt,
    Bts,
    Bf,
    Bfs,
    Beq,
    Beqs,
    Bne,
    Bnes,
    Blt,
    Blts,
    Ublt,
    Ublts,
    Bge,
    Bges,
    Ubge,
    Ubges,
    Bgt,
    Bgts,
    Ubgt,
    Ubgts,
    Ble,
    Bles,
    Uble,
    Ubles,
    Fbeq,
    Fbne,
    Fblt,
    Fbge,
    Fbgt,
    Fble,
    Dbeq,
    Dbne,
    Dblt,
    Dbge,
    Dbgt,
    Dble,
    Ldbeq,
    Ldbne,
    Ldblt,
    Ldbge,
    Ldbgt,
    Ldble,
    Call,
    Inline,
    Ret,
    Alloca,
    Bstart,
    Bend,
    VaArg,
    VaBlockArg,
    VaStart,
    VaEnd,
    Switch,
    Label,
    /// Backend-introduced pseudo insn; ops[0] selects the registered
    /// unspec code
    Unspec,
}

impl Op {
    pub fn is_call(self) -> bool {
        matches!(self, Op::Call | Op::Inline)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(pub usize);

/// Memory operand with a virtual base register. For block-typed call
/// operands disp holds the block byte size, not a displacement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mem {
    pub ty: Type,
    pub disp: i64,
    pub base: Reg,
    pub index: Option<Reg>,
    pub scale: u8,
}

impl Mem {
    pub fn new(ty: Type, disp: i64, base: Reg) -> Self {
        Self { ty, disp, base, index: None, scale: 1 }
    }
}

/// Memory operand with a hard register base
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardRegMem {
    pub ty: Type,
    pub disp: i64,
    pub base: HardReg,
    pub index: Option<HardReg>,
    pub scale: u8,
}

impl HardRegMem {
    pub fn new(ty: Type, disp: i64, base: HardReg) -> Self {
        Self { ty, disp, base, index: None, scale: 1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(Reg),
    HardReg(HardReg),
    Int(i64),
    Uint(u64),
    Label(LabelId),
    Ref(ItemId),
    Mem(Mem),
    HardRegMem(HardRegMem),
}

impl Operand {
    pub fn hard_reg_mem(ty: Type, disp: i64, base: HardReg) -> Self {
        Operand::HardRegMem(HardRegMem::new(ty, disp, base))
    }

    pub fn mem(ty: Type, disp: i64, base: Reg) -> Self {
        Operand::Mem(Mem::new(ty, disp, base))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "r{r}"),
            Operand::HardReg(h) => write!(f, "h{h}"),
            Operand::Int(i) => write!(f, "{i}"),
            Operand::Uint(u) => write!(f, "{u}u"),
            Operand::Label(l) => write!(f, "L{}", l.0),
            Operand::Ref(i) => write!(f, "ref#{}", i.0),
            Operand::Mem(m) => write!(f, "{:?}:{}(r{})", m.ty, m.disp, m.base),
            Operand::HardRegMem(m) => write!(f, "{:?}:{}(h{})", m.ty, m.disp, m.base),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub code: Op,
    pub ops: Vec<Operand>,
}

impl Insn {
    pub fn new(code: Op, ops: Vec<Operand>) -> Self {
        Self { code, ops }
    }

    pub fn nops(&self) -> usize {
        self.ops.len()
    }
}

impl fmt::Display for Insn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.code)?;
        for (i, op) in self.ops.iter().enumerate() {
            write!(f, "{}{op}", if i == 0 { " " } else { ", " })?;
        }
        Ok(())
    }
}

/// A formal argument or prototype parameter. size only matters for
/// block types.
#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: Type,
    pub size: u64,
}

impl Var {
    pub fn new(name: &str, ty: Type) -> Self {
        Self { name: name.to_string(), ty, size: 0 }
    }

    pub fn block(name: &str, ty: Type, size: u64) -> Self {
        assert!(ty.is_any_blk());
        Self { name: name.to_string(), ty, size }
    }
}

#[derive(Debug, Clone)]
pub struct Func {
    pub name: String,
    pub res_types: Vec<Type>,
    pub vars: Vec<Var>,
    pub vararg_p: bool,
    pub insns: Vec<Insn>,
    reg_types: Vec<Type>,
    next_label: u32,
}

impl Func {
    pub fn new(name: &str, res_types: Vec<Type>, args: Vec<Var>, vararg_p: bool) -> Self {
        let reg_types = args
            .iter()
            .map(|v| if v.ty.is_any_blk() { Type::I64 } else { v.ty })
            .collect();
        Self {
            name: name.to_string(),
            res_types,
            vars: args,
            vararg_p,
            insns: Vec::new(),
            reg_types,
            next_label: 0,
        }
    }

    pub fn nargs(&self) -> usize {
        self.vars.len()
    }

    /// Virtual register holding the i-th formal (0-based i)
    pub fn arg_reg(i: usize) -> Reg {
        (i + 1) as Reg
    }

    pub fn new_temp_reg(&mut self, ty: Type) -> Reg {
        self.reg_types.push(ty);
        self.reg_types.len() as Reg
    }

    pub fn reg_type(&self, reg: Reg) -> Type {
        self.reg_types[(reg - 1) as usize]
    }

    pub fn new_label(&mut self) -> LabelId {
        let l = LabelId(self.next_label);
        self.next_label += 1;
        l
    }

    pub fn push(&mut self, code: Op, ops: Vec<Operand>) {
        self.insns.push(Insn::new(code, ops));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Proto {
    pub name: String,
    pub res_types: Vec<Type>,
    pub args: Vec<Var>,
    pub vararg_p: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Proto(Proto),
    /// Imported function bound to a host address (e.g. a builtin
    /// trampoline); the address lands in the constant pool
    Import { name: String, addr: u64 },
    /// Named data whose absolute address is known to the JIT
    Data { name: String, addr: u64 },
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Proto(p) => &p.name,
            Item::Import { name, .. } | Item::Data { name, .. } => name,
        }
    }
}

/// Item registry shared by the functions of one JIT module
#[derive(Debug, Default, Clone)]
pub struct Module {
    items: Vec<Item>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.0]
    }

    pub fn find(&self, name: &str) -> Option<ItemId> {
        self.items.iter().position(|i| i.name() == name).map(ItemId)
    }

    pub fn add(&mut self, item: Item) -> ItemId {
        self.items.push(item);
        ItemId(self.items.len() - 1)
    }

    /// Get or create a prototype item with the given signature
    pub fn builtin_proto(
        &mut self,
        name: &str,
        res_types: &[Type],
        args: &[Var],
    ) -> ItemId {
        if let Some(id) = self.find(name) {
            return id;
        }
        self.add(Item::Proto(Proto {
            name: name.to_string(),
            res_types: res_types.to_vec(),
            args: args.to_vec(),
            vararg_p: false,
        }))
    }

    /// Get or create an import item bound to the given host address
    pub fn builtin_import(&mut self, name: &str, addr: u64) -> ItemId {
        if let Some(id) = self.find(name) {
            return id;
        }
        self.add(Item::Import { name: name.to_string(), addr })
    }

    pub fn proto(&self, id: ItemId) -> &Proto {
        match self.item(id) {
            Item::Proto(p) => p,
            other => panic!("item {} is not a proto", other.name()),
        }
    }

    /// Absolute address of an import or data item (0 when unresolved)
    pub fn item_addr(&self, id: ItemId) -> u64 {
        match self.item(id) {
            Item::Import { addr, .. } | Item::Data { addr, .. } => *addr,
            Item::Proto(_) => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_arg_regs_and_temps() {
        let mut func = Func::new(
            "f",
            vec![Type::I64],
            vec![Var::new("a", Type::I64), Var::new("b", Type::D)],
            false,
        );
        assert_eq!(Func::arg_reg(0), 1);
        assert_eq!(func.reg_type(1), Type::I64);
        assert_eq!(func.reg_type(2), Type::D);
        let t = func.new_temp_reg(Type::I64);
        assert_eq!(t, 3);
        assert_eq!(func.reg_type(t), Type::I64);
    }

    #[test]
    fn check_module_get_or_create() {
        let mut module = Module::new();
        let p1 = module.builtin_proto("mir.ldadd.p", &[Type::Ld], &[Var::new("d1", Type::Ld)]);
        let p2 = module.builtin_proto("mir.ldadd.p", &[Type::Ld], &[Var::new("d1", Type::Ld)]);
        assert_eq!(p1, p2);
        let f1 = module.builtin_import("mir.ldadd", 0x1000);
        let f2 = module.builtin_import("mir.ldadd", 0x2000);
        assert_eq!(f1, f2);
        assert_eq!(module.item_addr(f1), 0x1000);
    }

    #[test]
    fn check_insn_display() {
        let insn = Insn::new(
            Op::Add,
            vec![Operand::Reg(3), Operand::Reg(1), Operand::Int(-2)],
        );
        assert_eq!(insn.to_string(), "Add r3, r1, -2");
    }

    #[test]
    fn check_blk_type_predicates() {
        assert!(Type::Blk.is_blk());
        assert!(Type::BlkFp.is_blk());
        assert!(!Type::RBlk.is_blk());
        assert!(Type::RBlk.is_any_blk());
        assert!(Type::Ld.is_fp());
        assert!(!Type::I32.is_fp());
    }
}
