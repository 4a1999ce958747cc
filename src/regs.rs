//! AArch64 register and condition-code value types.
//!
//! This module provides:
//! - Range-checked general-purpose (`IntReg`) and vector (`VecReg`) register numbers
//! - Branch condition codes (`CondCode`) with all sixteen hardware conditions
//! - The fixed register assignments the stub family relies on (scratch, frame, link)
//! - Saved-register frame layouts shared with the stack walker
//!
//! # Performance Considerations
//! - All register types are `Copy` newtypes over `u8` for zero-cost encoding
//! - Range checks happen at construction, so encoders can trust the value
//! - Register sets are plain bit masks for O(1) membership testing

use std::fmt;

// =============================================================================
// General-Purpose Registers
// =============================================================================

/// An AArch64 general-purpose register number in `[0, 32)`.
///
/// Encoding 31 is shared between the stack pointer and the zero register;
/// which one an instruction sees depends on the instruction class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntReg(u8);

impl IntReg {
    /// Create a register from its hardware number.
    ///
    /// # Panics
    /// Panics if `reg >= 32`.
    #[inline(always)]
    pub const fn new(reg: u8) -> Self {
        assert!(reg < 32, "integer register number out of range");
        IntReg(reg)
    }

    /// Get the hardware encoding (0-31).
    #[inline(always)]
    pub const fn num(self) -> u8 {
        self.0
    }

    /// Get the save/restore bit mask for this register.
    #[inline(always)]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for IntReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 31 {
            write!(f, "sp")
        } else {
            write!(f, "x{}", self.0)
        }
    }
}

/// Argument registers x0-x7.
pub const X0: IntReg = IntReg(0);
pub const X1: IntReg = IntReg(1);
pub const X2: IntReg = IntReg(2);
pub const X3: IntReg = IntReg(3);
pub const X4: IntReg = IntReg(4);
pub const X5: IntReg = IntReg(5);
pub const X6: IntReg = IntReg(6);
pub const X7: IntReg = IntReg(7);

/// Indirect-result register; also the marker register in the native-import
/// bootstrap template.
pub const X8: IntReg = IntReg(8);

/// Scratch registers used by precode and thunk templates.
pub const X9: IntReg = IntReg(9);
pub const X10: IntReg = IntReg(10);
pub const X11: IntReg = IntReg(11);
pub const X12: IntReg = IntReg(12);

/// Intra-procedure-call scratch registers. x16 is reserved for trampolines
/// and cycle breaking in shuffle thunks; x17 for stack-to-stack staging.
pub const X16: IntReg = IntReg(16);
pub const X17: IntReg = IntReg(17);

/// Platform register holding the thread environment block.
pub const TEB: IntReg = IntReg(18);

/// First callee-saved register; x19-x28 are callee-saved.
pub const X19: IntReg = IntReg(19);

/// Frame pointer.
pub const FP: IntReg = IntReg(29);

/// Link register.
pub const LR: IntReg = IntReg(30);

/// Stack pointer. Shares encoding 31 with the zero register.
pub const SP: IntReg = IntReg(31);

/// Zero register. Shares encoding 31 with the stack pointer.
pub const ZR: IntReg = IntReg(31);

/// Number of integer argument registers (x0-x7).
pub const NUM_ARGUMENT_REGISTERS: usize = 8;

/// Number of vector argument registers (d0-d7).
pub const NUM_FLOAT_ARGUMENT_REGISTERS: usize = 8;

// =============================================================================
// Vector Registers
// =============================================================================

/// An AArch64 vector register number in `[0, 32)`.
///
/// Stubs only move the low 64 bits (d0-d31); the managed type system has no
/// quad-precision floating type, so the upper half is never live across a
/// stub frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VecReg(u8);

impl VecReg {
    /// Create a register from its hardware number.
    ///
    /// # Panics
    /// Panics if `reg >= 32`.
    #[inline(always)]
    pub const fn new(reg: u8) -> Self {
        assert!(reg < 32, "vector register number out of range");
        VecReg(reg)
    }

    /// Get the hardware encoding (0-31).
    #[inline(always)]
    pub const fn num(self) -> u8 {
        self.0
    }

    /// Get the save/restore bit mask for this register.
    #[inline(always)]
    pub const fn mask(self) -> u32 {
        1 << self.0
    }
}

impl fmt::Display for VecReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

pub const D0: VecReg = VecReg(0);
pub const D1: VecReg = VecReg(1);

// =============================================================================
// Condition Codes
// =============================================================================

/// A branch condition code in `[0, 16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondCode(u8);

impl CondCode {
    /// Create a condition code from its hardware encoding.
    ///
    /// # Panics
    /// Panics if `cond >= 16`.
    #[inline(always)]
    pub const fn new(cond: u8) -> Self {
        assert!(cond < 16, "condition code out of range");
        CondCode(cond)
    }

    /// Get the hardware encoding (0-15).
    #[inline(always)]
    pub const fn num(self) -> u8 {
        self.0
    }
}

/// Equal.
pub const COND_EQ: CondCode = CondCode(0);
/// Not equal.
pub const COND_NE: CondCode = CondCode(1);
/// Carry set (unsigned higher or same).
pub const COND_CS: CondCode = CondCode(2);
/// Carry clear (unsigned lower).
pub const COND_CC: CondCode = CondCode(3);
/// Minus (negative).
pub const COND_MI: CondCode = CondCode(4);
/// Plus (positive or zero).
pub const COND_PL: CondCode = CondCode(5);
/// Overflow set.
pub const COND_VS: CondCode = CondCode(6);
/// Overflow clear.
pub const COND_VC: CondCode = CondCode(7);
/// Unsigned higher.
pub const COND_HI: CondCode = CondCode(8);
/// Unsigned lower or same.
pub const COND_LS: CondCode = CondCode(9);
/// Signed greater or equal.
pub const COND_GE: CondCode = CondCode(10);
/// Signed less.
pub const COND_LT: CondCode = CondCode(11);
/// Signed greater.
pub const COND_GT: CondCode = CondCode(12);
/// Signed less or equal.
pub const COND_LE: CondCode = CondCode(13);
/// Always.
pub const COND_AL: CondCode = CondCode(14);
/// Never (reserved "always" alias in the architecture).
pub const COND_NV: CondCode = CondCode(15);

// =============================================================================
// Frame Layouts
// =============================================================================

/// Stack alignment required at public interfaces.
pub const STACK_ALIGN_SIZE: usize = 16;

/// Alignment of emitted code records.
pub const CODE_SIZE_ALIGN: usize = 8;

/// Preferred alignment for embedded data words.
pub const DATA_ALIGNMENT: usize = 8;

/// Size of one stack argument slot.
pub const STACK_ELEM_SIZE: usize = 8;

/// Maximum struct size returned in registers (eight doubles, the largest
/// homogeneous float aggregate).
pub const ENREGISTERED_RETURNTYPE_MAXSIZE: usize = 64;

/// Maximum integer return size kept in registers.
pub const ENREGISTERED_RETURNTYPE_INTEGER_MAXSIZE: usize = 8;

/// Maximum value type size passed by value in registers.
pub const ENREGISTERED_PARAMTYPE_MAXSIZE: usize = 16;

/// Round a parameter size up to a whole number of stack slots.
#[inline(always)]
pub const fn stack_elem_size(param_size: usize) -> usize {
    (param_size + STACK_ELEM_SIZE - 1) & !(STACK_ELEM_SIZE - 1)
}

/// Whether an unmanaged value type of the given size is returned through a
/// hidden reference rather than in registers.
#[inline(always)]
pub const fn is_unmanaged_value_type_returned_by_ref(size: usize) -> bool {
    size > 8
}

/// Callee-saved (non-volatile) registers captured by framed stubs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct CalleeSavedRegisters {
    /// Frame pointer (x29).
    pub fp: u64,
    /// Link register (x30).
    pub lr: u64,
    /// x19-x28.
    pub x: [u64; 10],
}

/// Integer argument registers (x0-x7) captured by framed stubs.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ArgumentRegisters {
    pub x: [u64; NUM_ARGUMENT_REGISTERS],
}

/// Floating-point argument registers (d0-d7) captured by stubs that call
/// into native helpers.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatArgumentRegisters {
    pub d: [f64; NUM_FLOAT_ARGUMENT_REGISTERS],
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_reg_range() {
        assert_eq!(IntReg::new(0).num(), 0);
        assert_eq!(IntReg::new(31).num(), 31);
    }

    #[test]
    #[should_panic]
    fn test_int_reg_out_of_range() {
        let _ = IntReg::new(32);
    }

    #[test]
    #[should_panic]
    fn test_vec_reg_out_of_range() {
        let _ = VecReg::new(32);
    }

    #[test]
    #[should_panic]
    fn test_cond_code_out_of_range() {
        let _ = CondCode::new(16);
    }

    #[test]
    fn test_reg_masks() {
        assert_eq!(X0.mask(), 1);
        assert_eq!(X9.mask(), 1 << 9);
        assert_eq!(LR.mask(), 1 << 30);
        assert_eq!(D1.mask(), 2);
    }

    #[test]
    fn test_named_registers() {
        assert_eq!(TEB.num(), 18);
        assert_eq!(FP.num(), 29);
        assert_eq!(LR.num(), 30);
        // The stack pointer and zero register share encoding 31.
        assert_eq!(SP.num(), ZR.num());
    }

    #[test]
    fn test_condition_codes() {
        assert_eq!(COND_EQ.num(), 0);
        assert_eq!(COND_NE.num(), 1);
        assert_eq!(COND_AL.num(), 14);
        assert_eq!(COND_NV.num(), 15);
    }

    #[test]
    fn test_stack_elem_size() {
        assert_eq!(stack_elem_size(1), 8);
        assert_eq!(stack_elem_size(8), 8);
        assert_eq!(stack_elem_size(9), 16);
        assert_eq!(stack_elem_size(16), 16);
    }

    #[test]
    fn test_retbuf_threshold() {
        assert!(!is_unmanaged_value_type_returned_by_ref(8));
        assert!(is_unmanaged_value_type_returned_by_ref(9));
    }

    #[test]
    fn test_display() {
        assert_eq!(X0.to_string(), "x0");
        assert_eq!(SP.to_string(), "sp");
        assert_eq!(D0.to_string(), "d0");
    }
}
