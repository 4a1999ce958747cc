//! Unmanaged-to-managed entry thunks.
//!
//! An entry thunk is the callable address handed to native code for a
//! managed method exposed as a function pointer. It carries two embedded
//! words: the managed entry to branch to and a secret parameter
//! identifying the thunk itself, loaded as a pair so the landing pad can
//! recover its context without a lookup.
//!
//! Unlike precodes, entry thunks are write-once: the target never changes
//! after [`UMEntryThunk::encode`], so there is no compare-exchange path.

use crate::inst::{self, AddrMode, MemOp};
use crate::patch::flush_instruction_cache;
use crate::regs::{X10, X12};

/// Byte offset of the callable entry point within the thunk. The code is
/// the first field, so the thunk address is the entry point.
pub const ENTRY_POINT_OFFSET: usize = 0;

/// A native-callable thunk bridging into managed code.
///
/// ```text
/// +0:   adr x12, #16          ; x12 -> embedded data
/// +4:   ldp x10, x12, [x12]   ; x10 = managed target, x12 = secret param
/// +8:   br  x10
/// +12:  (padding)
/// +16:  managed target
/// +24:  secret parameter
/// ```
#[repr(C, align(16))]
pub struct UMEntryThunk {
    code: [u32; 4],
    target_code: usize,
    secret_param: usize,
}

impl UMEntryThunk {
    const TEMPLATE: [u32; 4] = [
        inst::adr(X12, 16),
        inst::ldst_pair_imm(MemOp::Load, AddrMode::Offset, X10, X12, X12, 0),
        inst::br(X10),
        inst::NOP,
    ];

    /// Write the instruction template and both embedded words. The thunk
    /// must be in writable memory; nothing is mutated afterwards.
    pub fn encode(&mut self, target_code: usize, secret_param: usize) {
        self.code = Self::TEMPLATE;
        self.target_code = target_code;
        self.secret_param = secret_param;
        // SAFETY: self points at valid, writable thunk memory
        unsafe { flush_instruction_cache(self.code.as_ptr().cast(), size_of_val(&self.code)) };
    }

    /// The address native code calls.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self as *const Self as usize + ENTRY_POINT_OFFSET
    }

    /// The managed target the thunk branches to.
    #[inline]
    pub fn target_code(&self) -> usize {
        self.target_code
    }

    /// The secret parameter delivered in x12 at the managed target.
    #[inline]
    pub fn secret_param(&self) -> usize {
        self.secret_param
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::StubHeap;

    #[test]
    fn test_thunk_layout() {
        assert_eq!(size_of::<UMEntryThunk>(), 32);
        assert_eq!(align_of::<UMEntryThunk>(), 16);
    }

    #[test]
    fn test_encode() {
        let mut heap = StubHeap::new(4096).unwrap();
        let thunk = heap.place::<UMEntryThunk>().unwrap();
        thunk.encode(0xA000, 0xB000);

        assert_eq!(thunk.target_code(), 0xA000);
        assert_eq!(thunk.secret_param(), 0xB000);
        assert_eq!(thunk.entry_point() % 16, 0);
        assert_eq!(thunk.entry_point(), thunk as *const UMEntryThunk as usize);
    }

    #[test]
    fn test_template_words() {
        assert_eq!(UMEntryThunk::TEMPLATE[0], 0x1000008C); // adr x12, #16
        assert_eq!(UMEntryThunk::TEMPLATE[1], 0xA940318A); // ldp x10, x12, [x12]
        assert_eq!(UMEntryThunk::TEMPLATE[2], 0xD61F0140); // br x10
        assert_eq!(UMEntryThunk::TEMPLATE[3], inst::NOP);
    }
}
