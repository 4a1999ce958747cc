//! AArch64 instruction-word synthesis.
//!
//! Every emitted instruction is a plain 32-bit word built by a pure function
//! of its operand fields. Nothing here touches memory or carries state, so
//! each encoder is unit-testable against known-correct words.
//!
//! # Encoding Reference
//! All instructions are fixed 32-bit little-endian words. Immediate fields
//! that cannot represent the requested operand are a construction-time
//! contract violation: the encoders assert, they never truncate.

use crate::regs::{CondCode, IntReg, VecReg};

// =============================================================================
// Operand Flavors
// =============================================================================

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemOp {
    Store,
    Load,
}

/// Addressing mode for immediate-offset loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// `[Xn, #imm]` — no writeback.
    Offset,
    /// `[Xn, #imm]!` — base updated before the access.
    PreIndex,
    /// `[Xn], #imm` — base updated after the access.
    PostIndex,
}

/// Extend option for register-offset addressing. Combined with the scale
/// flag this covers the five addressing shapes the stubs use: unsigned and
/// signed 32-bit extension, logical shift, signed 64-bit extension, and the
/// plain shifted form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extend {
    /// Unsigned 32-bit extend of the index.
    Uxtw,
    /// 64-bit index, logical shift left.
    Lsl,
    /// Signed 32-bit extend of the index.
    Sxtw,
    /// Signed 64-bit extend of the index.
    Sxtx,
}

impl Extend {
    /// Hardware `option` field bits.
    #[inline(always)]
    const fn option(self) -> u32 {
        match self {
            Extend::Uxtw => 0b010,
            Extend::Lsl => 0b011,
            Extend::Sxtw => 0b110,
            Extend::Sxtx => 0b111,
        }
    }
}

// =============================================================================
// Branches & Calls
// =============================================================================

/// `br Xn` — indirect branch.
#[inline]
pub const fn br(rn: IntReg) -> u32 {
    0xD61F_0000 | (rn.num() as u32) << 5
}

/// `blr Xn` — indirect call.
#[inline]
pub const fn blr(rn: IntReg) -> u32 {
    0xD63F_0000 | (rn.num() as u32) << 5
}

/// `ret Xn`.
#[inline]
pub const fn ret(rn: IntReg) -> u32 {
    0xD65F_0000 | (rn.num() as u32) << 5
}

/// `b #offset` — unconditional branch, byte offset from this instruction.
#[inline]
pub const fn b(offset: i32) -> u32 {
    assert!(offset % 4 == 0, "branch offset must be word aligned");
    assert!(
        offset >= -(1 << 27) && offset < (1 << 27),
        "branch offset out of range"
    );
    0x1400_0000 | ((offset >> 2) as u32 & 0x03FF_FFFF)
}

/// `b.<cond> #offset` — conditional branch, byte offset from this instruction.
#[inline]
pub const fn b_cond(cond: CondCode, offset: i32) -> u32 {
    assert!(offset % 4 == 0, "branch offset must be word aligned");
    assert!(
        offset >= -(1 << 20) && offset < (1 << 20),
        "conditional branch offset out of range"
    );
    0x5400_0000 | (((offset >> 2) as u32 & 0x7_FFFF) << 5) | cond.num() as u32
}

// =============================================================================
// PC-relative
// =============================================================================

/// `adr Xd, #offset` — PC-relative address, byte offset from this instruction.
#[inline]
pub const fn adr(rd: IntReg, offset: i32) -> u32 {
    assert!(
        offset >= -(1 << 20) && offset < (1 << 20),
        "adr offset out of range"
    );
    let imm = offset as u32;
    0x1000_0000 | (imm & 0x3) << 29 | ((imm >> 2) & 0x7_FFFF) << 5 | rd.num() as u32
}

/// `ldr Xt, #offset` — PC-relative literal load, byte offset from this
/// instruction.
#[inline]
pub const fn ldr_literal(rt: IntReg, offset: i32) -> u32 {
    assert!(offset % 4 == 0, "literal offset must be word aligned");
    assert!(
        offset >= -(1 << 20) && offset < (1 << 20),
        "literal offset out of range"
    );
    0x5800_0000 | (((offset >> 2) as u32) & 0x7_FFFF) << 5 | rt.num() as u32
}

// =============================================================================
// Moves
// =============================================================================

/// `movz Xd, #imm16, lsl #(hw * 16)`.
#[inline]
pub const fn movz(rd: IntReg, imm16: u16, hw: u8) -> u32 {
    assert!(hw < 4, "move halfword index out of range");
    0xD280_0000 | (hw as u32) << 21 | (imm16 as u32) << 5 | rd.num() as u32
}

/// `movk Xd, #imm16, lsl #(hw * 16)`.
#[inline]
pub const fn movk(rd: IntReg, imm16: u16, hw: u8) -> u32 {
    assert!(hw < 4, "move halfword index out of range");
    0xF280_0000 | (hw as u32) << 21 | (imm16 as u32) << 5 | rd.num() as u32
}

/// `movn Xd, #imm16, lsl #(hw * 16)`.
#[inline]
pub const fn movn(rd: IntReg, imm16: u16, hw: u8) -> u32 {
    assert!(hw < 4, "move halfword index out of range");
    0x9280_0000 | (hw as u32) << 21 | (imm16 as u32) << 5 | rd.num() as u32
}

/// `mov Xd, Xm` (alias of `orr Xd, xzr, Xm`).
#[inline]
pub const fn mov_reg(rd: IntReg, rm: IntReg) -> u32 {
    0xAA00_03E0 | (rm.num() as u32) << 16 | rd.num() as u32
}

// =============================================================================
// Arithmetic & Compare
// =============================================================================

/// `add Xd, Xn, #imm12`.
#[inline]
pub const fn add_imm(rd: IntReg, rn: IntReg, imm12: u32) -> u32 {
    assert!(imm12 < 4096, "add immediate out of range");
    0x9100_0000 | imm12 << 10 | (rn.num() as u32) << 5 | rd.num() as u32
}

/// `sub Xd, Xn, #imm12`.
#[inline]
pub const fn sub_imm(rd: IntReg, rn: IntReg, imm12: u32) -> u32 {
    assert!(imm12 < 4096, "sub immediate out of range");
    0xD100_0000 | imm12 << 10 | (rn.num() as u32) << 5 | rd.num() as u32
}

/// `cmp Xn, #imm12` (alias of `subs xzr, Xn, #imm12`).
#[inline]
pub const fn cmp_imm(rn: IntReg, imm12: u32) -> u32 {
    assert!(imm12 < 4096, "compare immediate out of range");
    0xF100_0000 | imm12 << 10 | (rn.num() as u32) << 5 | 0x1F
}

/// `cmp Xn, Xm` (alias of `subs xzr, Xn, Xm`).
#[inline]
pub const fn cmp_reg(rn: IntReg, rm: IntReg) -> u32 {
    0xEB00_0000 | (rm.num() as u32) << 16 | (rn.num() as u32) << 5 | 0x1F
}

// =============================================================================
// Load/Store Pair
// =============================================================================

/// `ldp`/`stp Xt1, Xt2, [Xn {, #imm}]` with the requested addressing mode.
/// The offset is a signed multiple of 8 in `[-512, 504]`.
#[inline]
pub const fn ldst_pair_imm(
    op: MemOp,
    mode: AddrMode,
    rt1: IntReg,
    rt2: IntReg,
    rn: IntReg,
    offset: i32,
) -> u32 {
    let base = match (mode, op) {
        (AddrMode::Offset, MemOp::Store) => 0xA900_0000,
        (AddrMode::Offset, MemOp::Load) => 0xA940_0000,
        (AddrMode::PreIndex, MemOp::Store) => 0xA980_0000,
        (AddrMode::PreIndex, MemOp::Load) => 0xA9C0_0000,
        (AddrMode::PostIndex, MemOp::Store) => 0xA880_0000,
        (AddrMode::PostIndex, MemOp::Load) => 0xA8C0_0000,
    };
    base | pair_fields(rt1.num(), rt2.num(), rn.num(), offset)
}

/// `ldp`/`stp Dt1, Dt2, [Xn {, #imm}]` — 64-bit vector pair form.
#[inline]
pub const fn ldst_vec_pair_imm(
    op: MemOp,
    mode: AddrMode,
    vt1: VecReg,
    vt2: VecReg,
    rn: IntReg,
    offset: i32,
) -> u32 {
    let base = match (mode, op) {
        (AddrMode::Offset, MemOp::Store) => 0x6D00_0000,
        (AddrMode::Offset, MemOp::Load) => 0x6D40_0000,
        (AddrMode::PreIndex, MemOp::Store) => 0x6D80_0000,
        (AddrMode::PreIndex, MemOp::Load) => 0x6DC0_0000,
        (AddrMode::PostIndex, MemOp::Store) => 0x6C80_0000,
        (AddrMode::PostIndex, MemOp::Load) => 0x6CC0_0000,
    };
    base | pair_fields(vt1.num(), vt2.num(), rn.num(), offset)
}

#[inline]
const fn pair_fields(rt1: u8, rt2: u8, rn: u8, offset: i32) -> u32 {
    assert!(offset % 8 == 0, "pair offset must be 8-byte scaled");
    assert!(offset >= -512 && offset <= 504, "pair offset out of range");
    let imm7 = ((offset >> 3) as u32) & 0x7F;
    imm7 << 15 | (rt2 as u32) << 10 | (rn as u32) << 5 | rt1 as u32
}

// =============================================================================
// Load/Store Single
// =============================================================================

/// `ldr`/`str Xt, [Xn {, #imm}]` with the requested addressing mode.
///
/// The no-writeback form takes an unsigned 8-byte-scaled offset up to
/// 32760; the writeback forms take an unscaled signed 9-bit offset.
#[inline]
pub const fn ldst_reg_imm(op: MemOp, mode: AddrMode, rt: IntReg, rn: IntReg, offset: i32) -> u32 {
    match mode {
        AddrMode::Offset => {
            assert!(offset % 8 == 0, "scaled offset must be 8-byte aligned");
            assert!(offset >= 0 && offset <= 32760, "scaled offset out of range");
            let base = match op {
                MemOp::Store => 0xF900_0000,
                MemOp::Load => 0xF940_0000,
            };
            base | ((offset >> 3) as u32) << 10 | (rn.num() as u32) << 5 | rt.num() as u32
        }
        AddrMode::PreIndex | AddrMode::PostIndex => {
            let base = match (mode, op) {
                (AddrMode::PreIndex, MemOp::Store) => 0xF800_0C00,
                (AddrMode::PreIndex, MemOp::Load) => 0xF840_0C00,
                (AddrMode::PostIndex, MemOp::Store) => 0xF800_0400,
                (AddrMode::PostIndex, MemOp::Load) => 0xF840_0400,
                (AddrMode::Offset, _) => unreachable!(),
            };
            base | imm9_field(offset) | (rn.num() as u32) << 5 | rt.num() as u32
        }
    }
}

/// `ldr`/`str Dt, [Xn {, #imm}]` — 64-bit vector form.
#[inline]
pub const fn ldst_vec_imm(op: MemOp, mode: AddrMode, vt: VecReg, rn: IntReg, offset: i32) -> u32 {
    match mode {
        AddrMode::Offset => {
            assert!(offset % 8 == 0, "scaled offset must be 8-byte aligned");
            assert!(offset >= 0 && offset <= 32760, "scaled offset out of range");
            let base = match op {
                MemOp::Store => 0xFD00_0000,
                MemOp::Load => 0xFD40_0000,
            };
            base | ((offset >> 3) as u32) << 10 | (rn.num() as u32) << 5 | vt.num() as u32
        }
        AddrMode::PreIndex | AddrMode::PostIndex => {
            let base = match (mode, op) {
                (AddrMode::PreIndex, MemOp::Store) => 0xFC00_0C00,
                (AddrMode::PreIndex, MemOp::Load) => 0xFC40_0C00,
                (AddrMode::PostIndex, MemOp::Store) => 0xFC00_0400,
                (AddrMode::PostIndex, MemOp::Load) => 0xFC40_0400,
                (AddrMode::Offset, _) => unreachable!(),
            };
            base | imm9_field(offset) | (rn.num() as u32) << 5 | vt.num() as u32
        }
    }
}

#[inline]
const fn imm9_field(offset: i32) -> u32 {
    assert!(offset >= -256 && offset <= 255, "writeback offset out of range");
    ((offset as u32) & 0x1FF) << 12
}

/// `ldr`/`str Xt, [Xn, Xm, <extend> {#3}]` — register-offset form.
/// When `scaled` is set the index is shifted left by 3 (the 64-bit access
/// size) as part of the extension.
#[inline]
pub const fn ldst_reg_reg(
    op: MemOp,
    rt: IntReg,
    rn: IntReg,
    rm: IntReg,
    extend: Extend,
    scaled: bool,
) -> u32 {
    let base = match op {
        MemOp::Store => 0xF820_0800,
        MemOp::Load => 0xF860_0800,
    };
    base | (rm.num() as u32) << 16
        | extend.option() << 13
        | (scaled as u32) << 12
        | (rn.num() as u32) << 5
        | rt.num() as u32
}

// =============================================================================
// Miscellaneous
// =============================================================================

/// `nop`.
pub const NOP: u32 = 0xD503_201F;

/// `brk #0xF000` — the runtime's fail-fast breakpoint.
pub const BREAKPOINT: u32 = brk(0xF000);

/// `brk #imm16`.
#[inline]
pub const fn brk(imm16: u16) -> u32 {
    0xD420_0000 | (imm16 as u32) << 5
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::*;

    #[test]
    fn test_branch_encodings() {
        assert_eq!(br(X10), 0xD61F0140);
        assert_eq!(br(X16), 0xD61F0200);
        assert_eq!(blr(X9), 0xD63F0120);
        assert_eq!(ret(LR), 0xD65F03C0);
    }

    #[test]
    fn test_b_cond() {
        // b.eq +8 and b.ne -4
        assert_eq!(b_cond(COND_EQ, 8), 0x54000040);
        assert_eq!(b_cond(COND_NE, -4), 0x54FFFFE1);
    }

    #[test]
    fn test_adr() {
        assert_eq!(adr(X9, 16), 0x10000089);
        assert_eq!(adr(X8, 16), 0x10000088);
        assert_eq!(adr(X12, 0), 0x1000000C);
        assert_eq!(adr(X12, 16), 0x1000008C);
        assert_eq!(adr(X12, 24), 0x100000CC);
    }

    #[test]
    fn test_ldr_literal() {
        // The trampoline signature word.
        assert_eq!(ldr_literal(X16, 8), 0x58000050);
        assert_eq!(ldr_literal(X10, 12), 0x5800006A);
    }

    #[test]
    fn test_moves() {
        assert_eq!(movz(X0, 42, 0), 0xD2800540);
        assert_eq!(movk(X0, 0xBEEF, 1), 0xF2B7DDE0);
        // movn x0, #0 loads all-ones in one word.
        assert_eq!(movn(X0, 0, 0), 0x92800000);
        assert_eq!(movn(X0, 0xEDCB, 0), 0x929DB960);
        assert_eq!(mov_reg(X12, X0), 0xAA0003EC);
        assert_eq!(mov_reg(X0, X1), 0xAA0103E0);
        assert_eq!(mov_reg(X1, X12), 0xAA0C03E1);
    }

    #[test]
    fn test_arithmetic() {
        // add x0, x0, #8
        assert_eq!(add_imm(X0, X0, 8), 0x91002000);
        // sub sp-relative forms use the same immediate field
        assert_eq!(sub_imm(SP, SP, 16), 0xD10043FF);
        // cmp x0, #0
        assert_eq!(cmp_imm(X0, 0), 0xF100001F);
        // cmp x0, x1
        assert_eq!(cmp_reg(X0, X1), 0xEB01001F);
    }

    #[test]
    fn test_pair_encodings() {
        // ldp x10, x12, [x9]
        assert_eq!(
            ldst_pair_imm(MemOp::Load, AddrMode::Offset, X10, X12, X9, 0),
            0xA940312A
        );
        // ldp x10, x12, [x12]
        assert_eq!(
            ldst_pair_imm(MemOp::Load, AddrMode::Offset, X10, X12, X12, 0),
            0xA940318A
        );
        // stp x9, x30, [sp, #-16]!
        assert_eq!(
            ldst_pair_imm(MemOp::Store, AddrMode::PreIndex, X9, LR, SP, -16),
            0xA9BF7BE9
        );
        // ldp x9, x30, [sp], #16
        assert_eq!(
            ldst_pair_imm(MemOp::Load, AddrMode::PostIndex, X9, LR, SP, 16),
            0xA8D07BE9
        );
    }

    #[test]
    fn test_single_encodings() {
        // ldr x11, [x12, #16]
        assert_eq!(
            ldst_reg_imm(MemOp::Load, AddrMode::Offset, X11, X12, 16),
            0xF940098B
        );
        // str x0, [sp, #8]
        assert_eq!(
            ldst_reg_imm(MemOp::Store, AddrMode::Offset, X0, SP, 8),
            0xF90007E0
        );
    }

    #[test]
    fn test_vec_pair_load_store_bit() {
        let st = ldst_vec_pair_imm(MemOp::Store, AddrMode::Offset, D0, D1, SP, 16);
        let ld = ldst_vec_pair_imm(MemOp::Load, AddrMode::Offset, D0, D1, SP, 16);
        // Bit 22 selects load; everything else matches.
        assert_eq!(st | 1 << 22, ld);
    }

    #[test]
    fn test_reg_offset_extend_bits() {
        let w = ldst_reg_reg(MemOp::Load, X0, X1, X2, Extend::Lsl, true);
        assert_eq!(w, 0xF8627820);
        let u = ldst_reg_reg(MemOp::Load, X0, X1, X2, Extend::Uxtw, false);
        assert_eq!((u >> 13) & 0x7, 0b010);
    }

    #[test]
    fn test_misc() {
        assert_eq!(NOP, 0xD503201F);
        assert_eq!(BREAKPOINT, 0xD43E0000);
    }

    #[test]
    #[should_panic]
    fn test_unencodable_pair_offset_panics() {
        let _ = ldst_pair_imm(MemOp::Load, AddrMode::Offset, X0, X1, SP, 4);
    }

    #[test]
    #[should_panic]
    fn test_unencodable_imm12_panics() {
        let _ = add_imm(X0, X0, 4096);
    }
}
