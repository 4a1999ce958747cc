//! The fixed indirect-jump trampoline.
//!
//! A trampoline is 16 bytes at an 8-byte-aligned address:
//!
//! ```text
//! +0:   ldr x16, [pc, #8]     ; load the embedded target
//! +4:   br  x16
//! +8:   [64-bit target address]
//! ```
//!
//! The first word doubles as an identity signature: stack walking and patch
//! verification recognize a trampoline by comparing the word at offset 0,
//! and decoding needs only the pointer at offset 8. This is the building
//! block several precode variants and standalone code redirection share.

use crate::inst;
use crate::patch::flush_instruction_cache;
use crate::regs::X16;

/// Bytes to allocate for a trampoline.
pub const JUMP_ALLOCATE_SIZE: usize = 16;

/// Bytes to allocate for a back-to-back jump; same pattern on this
/// architecture.
pub const BACK_TO_BACK_JUMP_ALLOCATE_SIZE: usize = JUMP_ALLOCATE_SIZE;

/// `ldr x16, [pc, #8]` — the identity signature word.
pub const JUMP_SIGNATURE: u32 = inst::ldr_literal(X16, 8);

/// Byte offset of the embedded target address.
pub const JUMP_TARGET_OFFSET: usize = 8;

/// Write a trampoline to `code` that branches to `target`.
///
/// The instruction words are flushed from the instruction cache before the
/// target pointer is stored; the pointer itself is data and is never
/// fetched as an instruction.
///
/// # Panics
/// Panics if `code` is not 8-byte aligned; the literal load requires it,
/// and a misaligned write would corrupt adjacent records rather than fault.
///
/// # Safety
/// `code` must be valid for 16 writable bytes.
pub unsafe fn emit_jump(code: *mut u8, target: usize) {
    assert!(code as usize & 7 == 0, "trampoline requires 8-byte alignment");

    let words = code as *mut u32;
    // SAFETY: caller guarantees 16 valid bytes; alignment checked above
    unsafe {
        words.write(JUMP_SIGNATURE);
        words.add(1).write(inst::br(X16));
        flush_instruction_cache(code, 8);
        (code.add(JUMP_TARGET_OFFSET) as *mut usize).write(target);
    }
}

/// Read the target a trampoline branches to.
///
/// The result is meaningless if `code` was not produced by [`emit_jump`];
/// gate on [`is_encoded_jump`] when the code shape is not known.
///
/// # Safety
/// `code` must be valid for 16 readable bytes.
#[inline]
pub unsafe fn decode_jump(code: *const u8) -> usize {
    // SAFETY: caller guarantees 16 readable bytes
    unsafe { (code.add(JUMP_TARGET_OFFSET) as *const usize).read() }
}

/// Whether `code` starts with the trampoline signature word.
///
/// # Safety
/// `code` must be valid for 4 readable bytes.
#[inline]
pub unsafe fn is_encoded_jump(code: *const u8) -> bool {
    // SAFETY: caller guarantees 4 readable bytes
    unsafe { (code as *const u32).read_unaligned() == JUMP_SIGNATURE }
}

/// Write a back-to-back jump; identical to [`emit_jump`] on this
/// architecture.
///
/// # Safety
/// See [`emit_jump`].
#[inline]
pub unsafe fn emit_back_to_back_jump(code: *mut u8, target: usize) {
    // SAFETY: forwarded contract
    unsafe { emit_jump(code, target) }
}

/// Decode a back-to-back jump.
///
/// # Safety
/// See [`decode_jump`].
#[inline]
pub unsafe fn decode_back_to_back_jump(code: *const u8) -> usize {
    // SAFETY: forwarded contract
    unsafe { decode_jump(code) }
}

/// Identify a back-to-back jump.
///
/// # Safety
/// See [`is_encoded_jump`].
#[inline]
pub unsafe fn is_back_to_back_jump(code: *const u8) -> bool {
    // SAFETY: forwarded contract
    unsafe { is_encoded_jump(code) }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(8))]
    struct Buffer([u8; JUMP_ALLOCATE_SIZE]);

    #[test]
    fn test_signature_word() {
        // ldr x16, [pc, #8]
        assert_eq!(JUMP_SIGNATURE, 0x58000050);
    }

    #[test]
    fn test_round_trip() {
        let mut buf = Buffer([0; JUMP_ALLOCATE_SIZE]);
        let target = 0x0000_7FFF_DEAD_BEE8usize;
        unsafe {
            emit_jump(buf.0.as_mut_ptr(), target);
            assert_eq!(decode_jump(buf.0.as_ptr()), target);
        }
    }

    #[test]
    fn test_identity() {
        let mut buf = Buffer([0; JUMP_ALLOCATE_SIZE]);
        unsafe {
            assert!(!is_encoded_jump(buf.0.as_ptr()));
            emit_jump(buf.0.as_mut_ptr(), 0x1000);
            assert!(is_encoded_jump(buf.0.as_ptr()));
            assert!(is_back_to_back_jump(buf.0.as_ptr()));
        }

        // An arbitrary unrelated instruction sequence is not a trampoline.
        let other = Buffer([0x1F, 0x20, 0x03, 0xD5, 0xC0, 0x03, 0x5F, 0xD6, 0, 0, 0, 0, 0, 0, 0, 0]);
        unsafe {
            assert!(!is_encoded_jump(other.0.as_ptr()));
        }
    }

    #[test]
    fn test_instruction_words() {
        let mut buf = Buffer([0; JUMP_ALLOCATE_SIZE]);
        unsafe {
            emit_jump(buf.0.as_mut_ptr(), 0x4000);
        }
        let w0 = u32::from_le_bytes(buf.0[0..4].try_into().unwrap());
        let w1 = u32::from_le_bytes(buf.0[4..8].try_into().unwrap());
        assert_eq!(w0, 0x58000050); // ldr x16, [pc, #8]
        assert_eq!(w1, 0xD61F0200); // br x16
    }

    #[test]
    #[should_panic]
    fn test_misaligned_buffer_rejected() {
        let mut buf = Buffer([0; JUMP_ALLOCATE_SIZE]);
        unsafe {
            // Offset by one byte so the pointer is no longer 8-byte aligned.
            emit_jump(buf.0.as_mut_ptr().add(1), 0x1000);
        }
    }
}
