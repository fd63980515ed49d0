//! Runtime helpers the generated code calls when an IR operation has
//! no machine encoding.
//!
//! Long double arithmetic, int/float <-> long double conversions,
//! va_arg decoding and out-of-line block moves are all routed through
//! ordinary calls following the LP64D convention. Each helper has a
//! fixed import name (`mir.ldadd`, ...) paired with a `*.p` prototype
//! item; machinize creates both on first use and binds the import to a
//! host trampoline address.
//!
//! An embedder may pre-register an import under the same name to
//! substitute its own trampoline; registration is get-or-create, so
//! the first binding wins.
//!
//! Host requirement: the in-memory long double format is IEEE
//! binary128 (16 bytes, passed in even GPR pairs). The default
//! trampolines here carry the exact bit format but approximate the
//! arithmetic via f64, since the host language has no stable 128-bit
//! float; a conforming embedder can supply exact ones.

use crate::ir::{ItemId, Module, Op, Type, Var};

pub const LDADD: &str = "mir.ldadd";
pub const LDSUB: &str = "mir.ldsub";
pub const LDMUL: &str = "mir.ldmul";
pub const LDDIV: &str = "mir.lddiv";
pub const LDNEG: &str = "mir.ldneg";
pub const I2LD: &str = "mir.i2ld";
pub const UI2LD: &str = "mir.ui2ld";
pub const F2LD: &str = "mir.f2ld";
pub const D2LD: &str = "mir.d2ld";
pub const LD2I: &str = "mir.ld2i";
pub const LD2F: &str = "mir.ld2f";
pub const LD2D: &str = "mir.ld2d";
pub const LDEQ: &str = "mir.ldeq";
pub const LDNE: &str = "mir.ldne";
pub const LDLT: &str = "mir.ldlt";
pub const LDLE: &str = "mir.ldle";
pub const LDGT: &str = "mir.ldgt";
pub const LDGE: &str = "mir.ldge";
pub const VA_ARG: &str = "mir.va_arg";
pub const VA_BLOCK_ARG: &str = "mir.va_block_arg";
pub const BLK_MOV: &str = "mir.blk_mov";

/// Proto item and bound import for one builtin call, plus the number
/// of arguments the rewritten call passes
#[derive(Debug, Clone, Copy)]
pub struct BuiltinCall {
    pub proto: ItemId,
    pub import: ItemId,
    pub nargs: usize,
}

fn register(
    module: &mut Module,
    name: &'static str,
    res_types: &[Type],
    args: &[Var],
    nargs: usize,
) -> BuiltinCall {
    let proto = module.builtin_proto(&format!("{name}.p"), res_types, args);
    let import = module.builtin_import(name, host_addr(name));
    BuiltinCall { proto, import, nargs }
}

/// Builtin replacing the given opcode, if any
pub fn get_builtin(module: &mut Module, code: Op) -> Option<BuiltinCall> {
    let ld = Var::new("d", Type::Ld);
    let ld1 = Var::new("d1", Type::Ld);
    let ld2 = Var::new("d2", Type::Ld);
    let binary_ld = [ld1.clone(), ld2.clone()];
    Some(match code {
        Op::I2ld => register(module, I2LD, &[Type::Ld], &[Var::new("v", Type::I64)], 1),
        Op::Ui2ld => register(module, UI2LD, &[Type::Ld], &[Var::new("v", Type::I64)], 1),
        Op::F2ld => register(module, F2LD, &[Type::Ld], &[Var::new("v", Type::F)], 1),
        Op::D2ld => register(module, D2LD, &[Type::Ld], &[Var::new("v", Type::D)], 1),
        Op::Ld2i => register(module, LD2I, &[Type::I64], &[Var::new("v", Type::Ld)], 1),
        Op::Ld2f => register(module, LD2F, &[Type::F], &[Var::new("v", Type::Ld)], 1),
        Op::Ld2d => register(module, LD2D, &[Type::D], &[Var::new("v", Type::Ld)], 1),
        Op::Ldadd => register(module, LDADD, &[Type::Ld], &binary_ld, 2),
        Op::Ldsub => register(module, LDSUB, &[Type::Ld], &binary_ld, 2),
        Op::Ldmul => register(module, LDMUL, &[Type::Ld], &binary_ld, 2),
        Op::Lddiv => register(module, LDDIV, &[Type::Ld], &binary_ld, 2),
        Op::Ldneg => register(module, LDNEG, &[Type::Ld], &[ld], 1),
        Op::Ldeq => register(module, LDEQ, &[Type::I64], &binary_ld, 2),
        Op::Ldne => register(module, LDNE, &[Type::I64], &binary_ld, 2),
        Op::Ldlt => register(module, LDLT, &[Type::I64], &binary_ld, 2),
        Op::Ldle => register(module, LDLE, &[Type::I64], &binary_ld, 2),
        Op::Ldgt => register(module, LDGT, &[Type::I64], &binary_ld, 2),
        Op::Ldge => register(module, LDGE, &[Type::I64], &binary_ld, 2),
        Op::VaArg => register(
            module,
            VA_ARG,
            &[Type::I64],
            &[Var::new("va", Type::I64), Var::new("type", Type::I64)],
            2,
        ),
        Op::VaBlockArg => register(
            module,
            VA_BLOCK_ARG,
            &[],
            &[
                Var::new("res", Type::I64),
                Var::new("va", Type::I64),
                Var::new("size", Type::I64),
                Var::new("ncase", Type::I64),
            ],
            4,
        ),
        _ => return None,
    })
}

/// Proto and import for the out-of-line block move helper
pub fn blk_mov_builtin(module: &mut Module) -> BuiltinCall {
    register(
        module,
        BLK_MOV,
        &[],
        &[
            Var::new("to", Type::I64),
            Var::new("from", Type::I64),
            Var::new("nwords", Type::I64),
        ],
        3,
    )
}

/// Address of the default host trampoline for a builtin name
pub fn host_addr(name: &str) -> u64 {
    let f: usize = match name {
        LDADD => mir_ldadd as usize,
        LDSUB => mir_ldsub as usize,
        LDMUL => mir_ldmul as usize,
        LDDIV => mir_lddiv as usize,
        LDNEG => mir_ldneg as usize,
        I2LD => mir_i2ld as usize,
        UI2LD => mir_ui2ld as usize,
        F2LD => mir_f2ld as usize,
        D2LD => mir_d2ld as usize,
        LD2I => mir_ld2i as usize,
        LD2F => mir_ld2f as usize,
        LD2D => mir_ld2d as usize,
        LDEQ => mir_ldeq as usize,
        LDNE => mir_ldne as usize,
        LDLT => mir_ldlt as usize,
        LDLE => mir_ldle as usize,
        LDGT => mir_ldgt as usize,
        LDGE => mir_ldge as usize,
        VA_ARG => mir_va_arg as usize,
        VA_BLOCK_ARG => mir_va_block_arg as usize,
        BLK_MOV => mir_blk_mov as usize,
        _ => panic!("unknown builtin {name}"),
    };
    f as u64
}

/// 16-byte IEEE binary128 value, stored as two little-endian halves
/// (the in-memory long double format of the target)
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct LongDouble {
    lo: u64,
    hi: u64,
}

const EXP_BIAS_128: i32 = 16383;
const EXP_BIAS_64: i32 = 1023;

impl LongDouble {
    pub fn from_bits(bits: u128) -> Self {
        Self { lo: bits as u64, hi: (bits >> 64) as u64 }
    }

    pub fn to_bits(self) -> u128 {
        u128::from(self.lo) | u128::from(self.hi) << 64
    }

    /// Exact widening conversion
    pub fn from_f64(v: f64) -> Self {
        let bits = v.to_bits();
        let sign = u128::from(bits >> 63);
        let e = ((bits >> 52) & 0x7ff) as i32;
        let m = u128::from(bits & ((1 << 52) - 1));
        let (exp, mant) = if e == 0x7ff {
            (0x7fff, m << 60) // inf or nan, payload kept
        } else if e == 0 {
            if m == 0 {
                (0, 0)
            } else {
                // renormalize a subnormal: m = 1.f * 2^k
                let k = 127 - m.leading_zeros() as i32;
                let frac = m & ((1 << k) - 1);
                ((k - 1074 + EXP_BIAS_128) as u128, frac << (112 - k))
            }
        } else {
            ((e - EXP_BIAS_64 + EXP_BIAS_128) as u128, m << 60)
        };
        Self::from_bits(sign << 127 | exp << 112 | mant)
    }

    /// Narrowing conversion; values below the f64 normal range flush
    /// to zero
    pub fn to_f64(self) -> f64 {
        let bits = self.to_bits();
        let sign = if bits >> 127 != 0 { -1.0f64 } else { 1.0 };
        let exp = ((bits >> 112) & 0x7fff) as i32;
        let mant = bits & ((1u128 << 112) - 1);
        if exp == 0x7fff {
            return if mant == 0 { sign * f64::INFINITY } else { f64::NAN };
        }
        if exp == 0 {
            return sign * 0.0;
        }
        let frac = (mant >> 60) as u64;
        let f = 1.0 + frac as f64 / (1u64 << 52) as f64;
        sign * f * 2f64.powi(exp - EXP_BIAS_128)
    }

    fn negate(self) -> Self {
        Self { lo: self.lo, hi: self.hi ^ (1 << 63) }
    }
}

pub extern "C" fn mir_i2ld(i: i64) -> LongDouble {
    LongDouble::from_f64(i as f64)
}

pub extern "C" fn mir_ui2ld(u: u64) -> LongDouble {
    LongDouble::from_f64(u as f64)
}

pub extern "C" fn mir_f2ld(f: f32) -> LongDouble {
    LongDouble::from_f64(f64::from(f))
}

pub extern "C" fn mir_d2ld(d: f64) -> LongDouble {
    LongDouble::from_f64(d)
}

pub extern "C" fn mir_ld2i(d: LongDouble) -> i64 {
    d.to_f64() as i64
}

pub extern "C" fn mir_ld2f(d: LongDouble) -> f32 {
    d.to_f64() as f32
}

pub extern "C" fn mir_ld2d(d: LongDouble) -> f64 {
    d.to_f64()
}

pub extern "C" fn mir_ldadd(d1: LongDouble, d2: LongDouble) -> LongDouble {
    LongDouble::from_f64(d1.to_f64() + d2.to_f64())
}

pub extern "C" fn mir_ldsub(d1: LongDouble, d2: LongDouble) -> LongDouble {
    LongDouble::from_f64(d1.to_f64() - d2.to_f64())
}

pub extern "C" fn mir_ldmul(d1: LongDouble, d2: LongDouble) -> LongDouble {
    LongDouble::from_f64(d1.to_f64() * d2.to_f64())
}

pub extern "C" fn mir_lddiv(d1: LongDouble, d2: LongDouble) -> LongDouble {
    LongDouble::from_f64(d1.to_f64() / d2.to_f64())
}

pub extern "C" fn mir_ldneg(d: LongDouble) -> LongDouble {
    d.negate()
}

pub extern "C" fn mir_ldeq(d1: LongDouble, d2: LongDouble) -> i64 {
    i64::from(d1.to_f64() == d2.to_f64())
}

pub extern "C" fn mir_ldne(d1: LongDouble, d2: LongDouble) -> i64 {
    i64::from(d1.to_f64() != d2.to_f64())
}

pub extern "C" fn mir_ldlt(d1: LongDouble, d2: LongDouble) -> i64 {
    i64::from(d1.to_f64() < d2.to_f64())
}

pub extern "C" fn mir_ldle(d1: LongDouble, d2: LongDouble) -> i64 {
    i64::from(d1.to_f64() <= d2.to_f64())
}

pub extern "C" fn mir_ldgt(d1: LongDouble, d2: LongDouble) -> i64 {
    i64::from(d1.to_f64() > d2.to_f64())
}

pub extern "C" fn mir_ldge(d1: LongDouble, d2: LongDouble) -> i64 {
    i64::from(d1.to_f64() >= d2.to_f64())
}

/// va_list layout of the target: a single pointer walking the argument
/// save area
#[repr(C)]
pub struct VaList {
    pub arg_area: *mut u64,
}

/// Return the address of the next variadic argument and advance the
/// list. Long doubles occupy an aligned pair of slots.
pub extern "C" fn mir_va_arg(va: *mut VaList, type_code: u64) -> *mut u8 {
    unsafe {
        let va = &mut *va;
        if type_code == Type::Ld.code() {
            let addr = va.arg_area as usize;
            va.arg_area = ((addr + 15) / 16 * 16) as *mut u64;
            let a = va.arg_area;
            va.arg_area = va.arg_area.add(2);
            a as *mut u8
        } else {
            let a = va.arg_area;
            va.arg_area = va.arg_area.add(1);
            a as *mut u8
        }
    }
}

/// Copy the next variadic block argument into res. Blocks over two
/// qwords travel by reference, matching the call lowering.
pub extern "C" fn mir_va_block_arg(res: *mut u8, va: *mut VaList, size: u64, _ncase: u64) {
    unsafe {
        let va = &mut *va;
        let qwords = (size as usize + 7) / 8;
        let src = if qwords > 2 {
            let p = *va.arg_area as *const u8;
            va.arg_area = va.arg_area.add(1);
            p
        } else {
            let p = va.arg_area as *const u8;
            va.arg_area = va.arg_area.add(qwords);
            p
        };
        std::ptr::copy_nonoverlapping(src, res, size as usize);
    }
}

pub extern "C" fn mir_blk_mov(to: *mut u64, from: *const u64, nwords: u64) {
    unsafe {
        for i in 0..nwords as usize {
            *to.add(i) = *from.add(i);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_f64_round_trip() {
        for v in [0.0f64, -0.0, 1.0, -1.5, 2.0e300, 1.0e-300, f64::MIN_POSITIVE] {
            let ld = LongDouble::from_f64(v);
            assert_eq!(ld.to_f64(), v, "value {v}");
        }
        assert!(LongDouble::from_f64(f64::NAN).to_f64().is_nan());
        assert_eq!(LongDouble::from_f64(f64::INFINITY).to_f64(), f64::INFINITY);
    }

    #[test]
    fn check_binary128_layout() {
        // 1.0 in binary128: sign 0, exponent 0x3fff, mantissa 0
        assert_eq!(LongDouble::from_f64(1.0).to_bits(), 0x3fff << 112);
        // -2.0: sign 1, exponent 0x4000
        assert_eq!(
            LongDouble::from_f64(-2.0).to_bits(),
            (1 << 127) | (0x4000 << 112)
        );
    }

    #[test]
    fn check_subnormal_widening() {
        // the smallest f64 subnormal is a normal binary128 value
        let tiny = f64::from_bits(1);
        let ld = LongDouble::from_f64(tiny);
        let exp = ((ld.to_bits() >> 112) & 0x7fff) as i32;
        assert_eq!(exp - 16383, -1074);
    }

    #[test]
    fn check_arithmetic_helpers() {
        let two = mir_i2ld(2);
        let three = mir_ui2ld(3);
        assert_eq!(mir_ld2i(mir_ldadd(two, three)), 5);
        assert_eq!(mir_ld2i(mir_ldsub(two, three)), -1);
        assert_eq!(mir_ld2i(mir_ldmul(two, three)), 6);
        assert_eq!(mir_ld2d(mir_lddiv(three, two)), 1.5);
        assert_eq!(mir_ld2i(mir_ldneg(two)), -2);
        assert_eq!(mir_ldlt(two, three), 1);
        assert_eq!(mir_ldge(two, three), 0);
        assert_eq!(mir_ldeq(two, two), 1);
        assert_eq!(mir_ldne(two, two), 0);
        assert_eq!(mir_ldle(two, two), 1);
        assert_eq!(mir_ldgt(three, two), 1);
        assert_eq!(mir_ld2f(mir_f2ld(0.25)), 0.25);
        assert_eq!(mir_ld2d(mir_d2ld(-8.5)), -8.5);
    }

    #[test]
    fn check_va_arg_walk() {
        #[repr(align(16))]
        struct Area([u64; 6]);
        let mut area = Area([1, 2, 30, 31, 3, 0]);
        let mut va = VaList { arg_area: area.0.as_mut_ptr() };
        let p1 = mir_va_arg(&mut va, Type::I64.code());
        assert_eq!(unsafe { *(p1 as *const u64) }, 1);
        let p2 = mir_va_arg(&mut va, Type::D.code());
        assert_eq!(unsafe { *(p2 as *const u64) }, 2);
        // long double consumes a 16-aligned pair of slots
        let pld = mir_va_arg(&mut va, Type::Ld.code());
        assert_eq!(unsafe { *(pld as *const u64) }, 30);
        let p3 = mir_va_arg(&mut va, Type::I64.code());
        assert_eq!(unsafe { *(p3 as *const u64) }, 3);
    }

    #[test]
    fn check_blk_mov() {
        let src = [5u64, 6, 7];
        let mut dst = [0u64; 3];
        mir_blk_mov(dst.as_mut_ptr(), src.as_ptr(), 3);
        assert_eq!(dst, src);
    }

    #[test]
    fn check_registration() {
        let mut module = Module::new();
        let b = get_builtin(&mut module, Op::Ldadd).unwrap();
        assert_eq!(b.nargs, 2);
        assert_eq!(module.item(b.import).name(), LDADD);
        assert_eq!(module.proto(b.proto).name, "mir.ldadd.p");
        assert_ne!(module.item_addr(b.import), 0);
        // second request reuses the same items
        let b2 = get_builtin(&mut module, Op::Ldadd).unwrap();
        assert_eq!(b.proto, b2.proto);
        assert_eq!(b.import, b2.import);
        assert!(get_builtin(&mut module, Op::Add).is_none());
    }

    #[test]
    fn check_va_builtin_shapes() {
        let mut module = Module::new();
        let va = get_builtin(&mut module, Op::VaArg).unwrap();
        assert_eq!(va.nargs, 2);
        assert_eq!(module.proto(va.proto).res_types, vec![Type::I64]);
        let vb = get_builtin(&mut module, Op::VaBlockArg).unwrap();
        assert_eq!(vb.nargs, 4);
        assert!(module.proto(vb.proto).res_types.is_empty());
    }
}
