//! Generate one of the built-in sample functions and dump the result:
//! binary samples print the emitted 32-bit words, lowering samples
//! print the machinized IR.

use clap::{Parser, ValueEnum};

use riscvgen::ir::{Func, Insn, Item, Module, Op, Operand, Proto, Type, Var};
use riscvgen::regs::{A0, SP};
use riscvgen::CodeGen;

#[derive(Copy, Clone, ValueEnum)]
enum Sample {
    /// add a0,a0,a1; ret
    Add,
    /// load-immediate forms including a constant-pool value
    Li,
    /// three-way switch with a jump table and relocations
    Switch,
    /// long double addition lowered to a builtin call
    Ldadd,
    /// variadic call passing a double through the int regs
    Printf,
}

#[derive(Parser)]
#[command(about = "Dump generated RV64 code for a sample function")]
struct Args {
    #[arg(value_enum, default_value = "add")]
    sample: Sample,
    /// Report relocations as if the code were placed here
    #[arg(long, default_value_t = 0x1000_0000)]
    base: u64,
}

fn hr(r: u8) -> Operand {
    Operand::HardReg(r)
}

fn dump_code(gen: &mut CodeGen, module: &Module, func: &Func, base: u64) {
    let code = gen.translate(module, func).expect("sample must translate");
    for (i, word) in code.chunks(4).enumerate() {
        let w = u32::from_le_bytes(word.try_into().unwrap());
        println!("{:6x}: {w:08x}", i * 4);
    }
    let relocs = gen.rebase(base);
    for r in relocs {
        println!("reloc at {:#x}: {:#x}", r.offset, r.value);
    }
}

fn dump_ir(gen: &CodeGen, func: &Func) {
    for insn in &func.insns {
        if insn.code == Op::Unspec {
            let Operand::Int(code) = insn.ops[0] else { unreachable!() };
            println!("  {} ({})", insn, gen.unspec_name(code));
        } else {
            println!("  {insn}");
        }
    }
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let mut module = Module::new();
    let mut gen = CodeGen::new();
    match args.sample {
        Sample::Add => {
            let mut func = Func::new("add", vec![], vec![], false);
            func.push(Op::Add, vec![hr(A0), hr(A0), hr(A0 + 1)]);
            func.push(Op::Ret, vec![hr(A0)]);
            dump_code(&mut gen, &module, &func, args.base);
        }
        Sample::Li => {
            let mut func = Func::new("li", vec![], vec![], false);
            func.push(Op::Mov, vec![hr(A0), Operand::Int(100)]);
            func.push(Op::Mov, vec![hr(A0), Operand::Int(0x12345 << 12)]);
            func.push(Op::Mov, vec![hr(A0), Operand::Uint(0x1122_3344_5566_7788)]);
            func.push(Op::Mov, vec![Operand::hard_reg_mem(Type::I64, 8, SP), hr(A0)]);
            func.push(Op::Ret, vec![]);
            dump_code(&mut gen, &module, &func, args.base);
        }
        Sample::Switch => {
            let mut func = Func::new("switch3", vec![], vec![], false);
            let labels: Vec<_> = (0..3).map(|_| func.new_label()).collect();
            for (n, &l) in labels.iter().enumerate() {
                func.push(Op::Label, vec![Operand::Label(l)]);
                func.push(Op::Mov, vec![hr(A0), Operand::Int(n as i64)]);
            }
            let mut ops = vec![hr(A0)];
            ops.extend(labels.iter().map(|&l| Operand::Label(l)));
            func.push(Op::Switch, ops);
            func.push(Op::Ret, vec![hr(A0)]);
            dump_code(&mut gen, &module, &func, args.base);
        }
        Sample::Ldadd => {
            let mut func = Func::new(
                "ldadd",
                vec![Type::Ld],
                vec![Var::new("a", Type::Ld), Var::new("b", Type::Ld)],
                false,
            );
            let res = func.new_temp_reg(Type::Ld);
            func.push(
                Op::Ldadd,
                vec![Operand::Reg(res), Operand::Reg(1), Operand::Reg(2)],
            );
            func.push(Op::Ret, vec![Operand::Reg(res)]);
            gen.machinize(&mut module, &mut func).expect("machinize");
            dump_ir(&gen, &func);
        }
        Sample::Printf => {
            let proto = module.add(Item::Proto(Proto {
                name: "printf.p".into(),
                res_types: vec![Type::I32],
                args: vec![Var::new("fmt", Type::P)],
                vararg_p: true,
            }));
            let import = module.add(Item::Import { name: "printf".into(), addr: args.base });
            let mut func = Func::new("f", vec![], vec![Var::new("fmt", Type::P)], false);
            let res = func.new_temp_reg(Type::I32);
            let n = func.new_temp_reg(Type::I64);
            let d = func.new_temp_reg(Type::D);
            func.insns.push(Insn::new(
                Op::Call,
                vec![
                    Operand::Ref(proto),
                    Operand::Ref(import),
                    Operand::Reg(res),
                    Operand::Reg(1),
                    Operand::Reg(n),
                    Operand::Reg(d),
                ],
            ));
            func.push(Op::Ret, vec![]);
            gen.machinize(&mut module, &mut func).expect("machinize");
            dump_ir(&gen, &func);
        }
    }
}
