//! The precode family: fixed-layout lazy-binding dispatch records.
//!
//! A precode is a small block of machine instructions plus embedded data
//! that redirects a call to a possibly not-yet-known target. Every variant
//! is self-describing: the low byte of its first instruction word is a
//! discriminant unique to the variant, so the kind of an arbitrary precode
//! can be read at [`OFFSET_OF_PRECODE_TYPE`] without knowing the layout.
//!
//! The discriminant values are not arbitrary tags; they fall out of the
//! first instruction each template was built around. The simple stub loads
//! through x9 (byte 0x89) while the native-import variant loads through x8
//! (byte 0x88) precisely so the runtime can tell import stubs from
//! ordinary stubs by inspecting the first instruction.
//!
//! Lifecycle: a precode is placed in loader-allocator memory, `init`
//! writes the instruction template and the embedded fields, and afterwards
//! only the target field may change, through the atomic compare-exchange
//! path. Records never move and die with their allocator.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::heap::FixupChunkTable;
use crate::inst::{self, AddrMode, MemOp};
use crate::patch::{CodePatcher, flush_instruction_cache};
use crate::regs::{LR, SP, X8, X9, X10, X11, X12};

/// Byte offset of the discriminant within any precode.
pub const OFFSET_OF_PRECODE_TYPE: usize = 0;

/// Discriminant value no valid precode uses.
pub const INVALID_PRECODE_TYPE: u8 = 0;

/// Required alignment of any precode.
pub const PRECODE_ALIGNMENT: usize = crate::regs::CODE_SIZE_ALIGN;

// =============================================================================
// Kind Detection
// =============================================================================

/// The closed set of precode variants, tagged by the discriminant byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrecodeKind {
    /// Generic "jump to target, pass descriptor" bootstrap stub.
    Stub = StubPrecode::TYPE,
    /// Same pattern through the marker register x8, identifying stubs that
    /// front native-import cells.
    NativeImport = NativeImportPrecode::TYPE,
    /// Compact chunked variant; descriptor recovered from indices.
    Fixup = FixupPrecode::TYPE,
    /// Swaps the this pointer and return-buffer argument before dispatch.
    ThisPtrRetBuf = ThisPtrRetBufPrecode::TYPE,
    /// Calls an interception routine before the real target.
    Intercept = InterceptPrecode::TYPE,
}

impl PrecodeKind {
    /// Map a discriminant byte to a kind.
    #[inline]
    pub const fn from_type_byte(byte: u8) -> Option<PrecodeKind> {
        match byte {
            StubPrecode::TYPE => Some(PrecodeKind::Stub),
            NativeImportPrecode::TYPE => Some(PrecodeKind::NativeImport),
            FixupPrecode::TYPE => Some(PrecodeKind::Fixup),
            ThisPtrRetBufPrecode::TYPE => Some(PrecodeKind::ThisPtrRetBuf),
            InterceptPrecode::TYPE => Some(PrecodeKind::Intercept),
            _ => None,
        }
    }

    /// Read the discriminant of the precode at `addr`.
    ///
    /// # Safety
    /// `addr` must be valid for one readable byte.
    #[inline]
    pub unsafe fn detect(addr: *const u8) -> Option<PrecodeKind> {
        // SAFETY: caller guarantees one readable byte
        Self::from_type_byte(unsafe { addr.add(OFFSET_OF_PRECODE_TYPE).read() })
    }
}

// =============================================================================
// Shared patching helper
// =============================================================================

/// Compare-exchange a precode target slot through the patcher.
///
/// A `false` result is a lost race, not an error: the caller re-reads the
/// now-current target and either retries or accepts the winner's value.
#[inline]
unsafe fn cas_slot(
    patcher: &CodePatcher,
    slot: &AtomicUsize,
    new: usize,
    expected: usize,
) -> io::Result<bool> {
    // SAFETY: the slot lives inside loader-allocator memory the patcher
    // may re-protect
    unsafe { patcher.cas_target(slot, new, expected) }
}

/// Cast an entry-point address to a precode reference after checking the
/// discriminant and alignment.
///
/// # Safety
/// `addr` must be valid for reads of `size_of::<T>()` bytes for lifetime
/// `'a`.
unsafe fn checked_cast<'a, T>(addr: usize, kind: PrecodeKind) -> Option<&'a T> {
    if addr & (PRECODE_ALIGNMENT - 1) != 0 {
        return None;
    }
    // SAFETY: caller guarantees readability; alignment checked above
    if unsafe { PrecodeKind::detect(addr as *const u8) } != Some(kind) {
        return None;
    }
    // SAFETY: discriminant matched, so the record was initialized as T
    Some(unsafe { &*(addr as *const T) })
}

// =============================================================================
// Stub Precode
// =============================================================================

/// The generic bootstrap precode.
///
/// ```text
/// +0:   adr x9, #16           ; x9 -> embedded data
/// +4:   ldp x10, x12, [x9]    ; x10 = target, x12 = descriptor
/// +8:   br  x10
/// +12:  (padding for 8-byte alignment of the data)
/// +16:  target
/// +24:  descriptor
/// ```
#[repr(C, align(8))]
pub struct StubPrecode {
    code: [u32; 4],
    target: AtomicUsize,
    method_desc: usize,
}

impl StubPrecode {
    /// Discriminant byte; low byte of `adr x9, #16`.
    pub const TYPE: u8 = 0x89;

    const TEMPLATE: [u32; 4] = [
        inst::adr(X9, 16),
        inst::ldst_pair_imm(MemOp::Load, AddrMode::Offset, X10, X12, X9, 0),
        inst::br(X10),
        inst::NOP,
    ];

    /// Write the instruction template and the embedded fields.
    ///
    /// The record must be in writable memory; the instruction bytes are
    /// never mutated again after this.
    pub fn init(&mut self, method_desc: usize, target: usize) {
        self.code = Self::TEMPLATE;
        self.target = AtomicUsize::new(target);
        self.method_desc = method_desc;
        // SAFETY: self points at valid, writable record memory
        unsafe { flush_instruction_cache(self.code.as_ptr().cast(), size_of_val(&self.code)) };
    }

    /// The currently active dispatch target.
    #[inline]
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// The owning descriptor reference, immutable after `init`.
    #[inline]
    pub fn method_desc(&self) -> usize {
        self.method_desc
    }

    /// The executable entry point, which is the record itself.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self as *const Self as usize
    }

    /// Atomically swap the dispatch target. See [`CodePatcher::cas_target`]
    /// for the race and error contract.
    ///
    /// # Safety
    /// The record must live in memory the patcher may re-protect.
    pub unsafe fn set_target_interlocked(
        &self,
        patcher: &CodePatcher,
        new: usize,
        expected: usize,
    ) -> io::Result<bool> {
        // SAFETY: forwarded contract
        unsafe { cas_slot(patcher, &self.target, new, expected) }
    }

    /// Recover a precode reference from its entry point.
    ///
    /// # Safety
    /// `addr` must be valid for reads of the record size for lifetime `'a`.
    pub unsafe fn from_entry_point<'a>(addr: usize) -> Option<&'a Self> {
        // SAFETY: forwarded contract
        unsafe { checked_cast(addr, PrecodeKind::Stub) }
    }
}

// =============================================================================
// Native-Import Precode
// =============================================================================

/// The native-import bootstrap precode.
///
/// Identical shape to [`StubPrecode`] but addressed through x8 instead of
/// x9, which is what makes the first instruction (and so the discriminant)
/// differ. The entry point doubles as the import cell's callable address.
#[repr(C, align(8))]
pub struct NativeImportPrecode {
    code: [u32; 4],
    target: AtomicUsize,
    method_desc: usize,
}

impl NativeImportPrecode {
    /// Discriminant byte; low byte of `adr x8, #16`.
    pub const TYPE: u8 = 0x88;

    const TEMPLATE: [u32; 4] = [
        inst::adr(X8, 16),
        inst::ldst_pair_imm(MemOp::Load, AddrMode::Offset, X10, X12, X8, 0),
        inst::br(X10),
        inst::NOP,
    ];

    /// Write the instruction template and the embedded fields.
    pub fn init(&mut self, method_desc: usize, target: usize) {
        self.code = Self::TEMPLATE;
        self.target = AtomicUsize::new(target);
        self.method_desc = method_desc;
        // SAFETY: self points at valid, writable record memory
        unsafe { flush_instruction_cache(self.code.as_ptr().cast(), size_of_val(&self.code)) };
    }

    /// The currently active dispatch target.
    #[inline]
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// The owning descriptor reference.
    #[inline]
    pub fn method_desc(&self) -> usize {
        self.method_desc
    }

    /// The executable entry point.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self as *const Self as usize
    }

    /// Atomically swap the dispatch target.
    ///
    /// # Safety
    /// The record must live in memory the patcher may re-protect.
    pub unsafe fn set_target_interlocked(
        &self,
        patcher: &CodePatcher,
        new: usize,
        expected: usize,
    ) -> io::Result<bool> {
        // SAFETY: forwarded contract
        unsafe { cas_slot(patcher, &self.target, new, expected) }
    }

    /// Recover a precode reference from its entry point.
    ///
    /// # Safety
    /// `addr` must be valid for reads of the record size for lifetime `'a`.
    pub unsafe fn from_entry_point<'a>(addr: usize) -> Option<&'a Self> {
        // SAFETY: forwarded contract
        unsafe { checked_cast(addr, PrecodeKind::NativeImport) }
    }
}

// =============================================================================
// Fixup Precode
// =============================================================================

/// The compact chunked precode.
///
/// ```text
/// +0:   adr x12, #0           ; x12 = this precode, for the fixup thunk
/// +4:   ldr x11, [x12, #16]   ; x11 = target
/// +8:   br  x11
/// +12:  method index, chunk index, 2 bytes padding
/// +16:  target
/// ```
///
/// No descriptor pointer is embedded; the owner is
/// `chunk_base(chunk_index) + method_index * METHOD_DESC_ALIGNMENT`,
/// resolved through the loader allocator's [`FixupChunkTable`]. Many
/// precodes amortize one table entry, which is the space optimization this
/// variant exists for.
#[repr(C, align(8))]
pub struct FixupPrecode {
    code: [u32; 3],
    method_index: u8,
    chunk_index: u8,
    _pad: [u8; 2],
    target: AtomicUsize,
}

impl FixupPrecode {
    /// Discriminant byte; low byte of `adr x12, #0`.
    pub const TYPE: u8 = 0x0C;

    const TEMPLATE: [u32; 3] = [
        inst::adr(X12, 0),
        inst::ldst_reg_imm(MemOp::Load, AddrMode::Offset, X11, X12, 16),
        inst::br(X11),
    ];

    /// Write the instruction template, the indices, and the initial target
    /// (normally the lazy fixup thunk).
    pub fn init(&mut self, chunk_index: u8, method_index: u8, target: usize) {
        self.code = Self::TEMPLATE;
        self.method_index = method_index;
        self.chunk_index = chunk_index;
        self._pad = [0; 2];
        self.target = AtomicUsize::new(target);
        // SAFETY: self points at valid, writable record memory
        unsafe { flush_instruction_cache(self.code.as_ptr().cast(), size_of_val(&self.code)) };
    }

    /// The currently active dispatch target.
    #[inline]
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// Chunk table index identifying the descriptor chunk.
    #[inline]
    pub fn chunk_index(&self) -> u8 {
        self.chunk_index
    }

    /// Index of the owning descriptor within its chunk.
    #[inline]
    pub fn method_index(&self) -> u8 {
        self.method_index
    }

    /// The owning descriptor reference, computed from chunk base + index.
    #[inline]
    pub fn method_desc(&self, chunks: &FixupChunkTable) -> usize {
        chunks.method_desc(self.chunk_index, self.method_index)
    }

    /// The executable entry point.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self as *const Self as usize
    }

    /// Atomically swap the dispatch target.
    ///
    /// # Safety
    /// The record must live in memory the patcher may re-protect.
    pub unsafe fn set_target_interlocked(
        &self,
        patcher: &CodePatcher,
        new: usize,
        expected: usize,
    ) -> io::Result<bool> {
        // SAFETY: forwarded contract
        unsafe { cas_slot(patcher, &self.target, new, expected) }
    }

    /// Recover a precode reference from its entry point.
    ///
    /// # Safety
    /// `addr` must be valid for reads of the record size for lifetime `'a`.
    pub unsafe fn from_entry_point<'a>(addr: usize) -> Option<&'a Self> {
        // SAFETY: forwarded contract
        unsafe { checked_cast(addr, PrecodeKind::Fixup) }
    }
}

// =============================================================================
// This-Pointer / Return-Buffer Precode
// =============================================================================

/// The argument-shuffling precode for closed delegates over static methods
/// that return large structures by hidden reference.
///
/// ```text
/// +0:   mov x12, x0           ; stash the delegate this
/// +4:   mov x0, x1            ; return buffer moves up
/// +8:   mov x1, x12
/// +12:  ldr x10, [pc, #12]    ; target
/// +16:  br  x10
/// +20:  (padding)
/// +24:  target
/// +32:  descriptor
/// ```
#[repr(C, align(8))]
pub struct ThisPtrRetBufPrecode {
    code: [u32; 6],
    target: AtomicUsize,
    method_desc: usize,
}

impl ThisPtrRetBufPrecode {
    /// Discriminant byte; low byte of `mov x12, x0`.
    pub const TYPE: u8 = 0xEC;

    const TEMPLATE: [u32; 6] = [
        inst::mov_reg(X12, crate::regs::X0),
        inst::mov_reg(crate::regs::X0, crate::regs::X1),
        inst::mov_reg(crate::regs::X1, X12),
        inst::ldr_literal(X10, 12),
        inst::br(X10),
        inst::NOP,
    ];

    /// Write the instruction template and the embedded fields.
    pub fn init(&mut self, method_desc: usize, target: usize) {
        self.code = Self::TEMPLATE;
        self.target = AtomicUsize::new(target);
        self.method_desc = method_desc;
        // SAFETY: self points at valid, writable record memory
        unsafe { flush_instruction_cache(self.code.as_ptr().cast(), size_of_val(&self.code)) };
    }

    /// The currently active dispatch target.
    #[inline]
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Acquire)
    }

    /// The owning descriptor reference.
    #[inline]
    pub fn method_desc(&self) -> usize {
        self.method_desc
    }

    /// The executable entry point.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self as *const Self as usize
    }

    /// Atomically swap the dispatch target.
    ///
    /// # Safety
    /// The record must live in memory the patcher may re-protect.
    pub unsafe fn set_target_interlocked(
        &self,
        patcher: &CodePatcher,
        new: usize,
        expected: usize,
    ) -> io::Result<bool> {
        // SAFETY: forwarded contract
        unsafe { cas_slot(patcher, &self.target, new, expected) }
    }

    /// Recover a precode reference from its entry point.
    ///
    /// # Safety
    /// `addr` must be valid for reads of the record size for lifetime `'a`.
    pub unsafe fn from_entry_point<'a>(addr: usize) -> Option<&'a Self> {
        // SAFETY: forwarded contract
        unsafe { checked_cast(addr, PrecodeKind::ThisPtrRetBuf) }
    }
}

// =============================================================================
// Intercept Precode
// =============================================================================

/// The interception precode: calls a runtime interception routine, then
/// falls through to the real target.
///
/// ```text
/// +0:   stp x9, lr, [sp, #-16]!
/// +4:   ldr x9, [pc, #28]     ; interceptor
/// +8:   blr x9
/// +12:  ldp x9, lr, [sp], #16
/// +16:  ldr x9, [pc, #24]     ; local target
/// +20:  br  x9
/// +24:  descriptor
/// +32:  interceptor
/// +40:  local target
/// ```
///
/// The interceptor receives the incoming argument registers untouched; lr
/// is preserved around the call so the final branch behaves like the
/// precode was never there.
#[repr(C, align(8))]
pub struct InterceptPrecode {
    code: [u32; 6],
    method_desc: usize,
    interceptor: usize,
    local_target: AtomicUsize,
}

impl InterceptPrecode {
    /// Discriminant byte; low byte of `stp x9, lr, [sp, #-16]!`.
    pub const TYPE: u8 = 0xE9;

    const TEMPLATE: [u32; 6] = [
        inst::ldst_pair_imm(MemOp::Store, AddrMode::PreIndex, X9, LR, SP, -16),
        inst::ldr_literal(X9, 28),
        inst::blr(X9),
        inst::ldst_pair_imm(MemOp::Load, AddrMode::PostIndex, X9, LR, SP, 16),
        inst::ldr_literal(X9, 24),
        inst::br(X9),
    ];

    /// Write the instruction template and the embedded fields.
    pub fn init(&mut self, method_desc: usize, interceptor: usize, target: usize) {
        self.code = Self::TEMPLATE;
        self.method_desc = method_desc;
        self.interceptor = interceptor;
        self.local_target = AtomicUsize::new(target);
        // SAFETY: self points at valid, writable record memory
        unsafe { flush_instruction_cache(self.code.as_ptr().cast(), size_of_val(&self.code)) };
    }

    /// The currently active local dispatch target (past the interceptor).
    #[inline]
    pub fn target(&self) -> usize {
        self.local_target.load(Ordering::Acquire)
    }

    /// The interception routine address, immutable after `init`.
    #[inline]
    pub fn interceptor(&self) -> usize {
        self.interceptor
    }

    /// The owning descriptor reference.
    #[inline]
    pub fn method_desc(&self) -> usize {
        self.method_desc
    }

    /// The executable entry point.
    #[inline]
    pub fn entry_point(&self) -> usize {
        self as *const Self as usize
    }

    /// Atomically swap the local dispatch target.
    ///
    /// # Safety
    /// The record must live in memory the patcher may re-protect.
    pub unsafe fn set_target_interlocked(
        &self,
        patcher: &CodePatcher,
        new: usize,
        expected: usize,
    ) -> io::Result<bool> {
        // SAFETY: forwarded contract
        unsafe { cas_slot(patcher, &self.local_target, new, expected) }
    }

    /// Recover a precode reference from its entry point.
    ///
    /// # Safety
    /// `addr` must be valid for reads of the record size for lifetime `'a`.
    pub unsafe fn from_entry_point<'a>(addr: usize) -> Option<&'a Self> {
        // SAFETY: forwarded contract
        unsafe { checked_cast(addr, PrecodeKind::Intercept) }
    }
}

// =============================================================================
// Generic View
// =============================================================================

/// A discriminated view over any precode, for callers that only know they
/// have "some precode" at an entry point.
pub enum Precode<'a> {
    Stub(&'a StubPrecode),
    NativeImport(&'a NativeImportPrecode),
    Fixup(&'a FixupPrecode),
    ThisPtrRetBuf(&'a ThisPtrRetBufPrecode),
    Intercept(&'a InterceptPrecode),
}

impl<'a> Precode<'a> {
    /// Identify and view the precode at an entry point, if it is one.
    ///
    /// # Safety
    /// `addr` must be valid for reads of the largest record size for
    /// lifetime `'a`.
    pub unsafe fn from_entry_point(addr: usize) -> Option<Precode<'a>> {
        if addr & (PRECODE_ALIGNMENT - 1) != 0 {
            return None;
        }
        // SAFETY: caller guarantees readability
        let kind = unsafe { PrecodeKind::detect(addr as *const u8) }?;
        // SAFETY: discriminant selected the matching layout
        unsafe {
            Some(match kind {
                PrecodeKind::Stub => Precode::Stub(&*(addr as *const _)),
                PrecodeKind::NativeImport => Precode::NativeImport(&*(addr as *const _)),
                PrecodeKind::Fixup => Precode::Fixup(&*(addr as *const _)),
                PrecodeKind::ThisPtrRetBuf => Precode::ThisPtrRetBuf(&*(addr as *const _)),
                PrecodeKind::Intercept => Precode::Intercept(&*(addr as *const _)),
            })
        }
    }

    /// The variant tag.
    pub fn kind(&self) -> PrecodeKind {
        match self {
            Precode::Stub(_) => PrecodeKind::Stub,
            Precode::NativeImport(_) => PrecodeKind::NativeImport,
            Precode::Fixup(_) => PrecodeKind::Fixup,
            Precode::ThisPtrRetBuf(_) => PrecodeKind::ThisPtrRetBuf,
            Precode::Intercept(_) => PrecodeKind::Intercept,
        }
    }

    /// The currently active dispatch target.
    pub fn target(&self) -> usize {
        match self {
            Precode::Stub(p) => p.target(),
            Precode::NativeImport(p) => p.target(),
            Precode::Fixup(p) => p.target(),
            Precode::ThisPtrRetBuf(p) => p.target(),
            Precode::Intercept(p) => p.target(),
        }
    }

    /// The owning descriptor reference. The chunk table is consulted only
    /// by the compact variant.
    pub fn method_desc(&self, chunks: &FixupChunkTable) -> usize {
        match self {
            Precode::Stub(p) => p.method_desc(),
            Precode::NativeImport(p) => p.method_desc(),
            Precode::Fixup(p) => p.method_desc(chunks),
            Precode::ThisPtrRetBuf(p) => p.method_desc(),
            Precode::Intercept(p) => p.method_desc(),
        }
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
    fn test_record_sizes() {
        assert_eq!(size_of::<StubPrecode>(), 32);
        assert_eq!(size_of::<NativeImportPrecode>(), 32);
        assert_eq!(size_of::<FixupPrecode>(), 24);
        assert_eq!(size_of::<ThisPtrRetBufPrecode>(), 40);
        assert_eq!(size_of::<InterceptPrecode>(), 48);
    }

    #[test]
    fn test_discriminants_match_templates() {
        assert_eq!(StubPrecode::TEMPLATE[0].to_le_bytes()[0], StubPrecode::TYPE);
        assert_eq!(
            NativeImportPrecode::TEMPLATE[0].to_le_bytes()[0],
            NativeImportPrecode::TYPE
        );
        assert_eq!(FixupPrecode::TEMPLATE[0].to_le_bytes()[0], FixupPrecode::TYPE);
        assert_eq!(
            ThisPtrRetBufPrecode::TEMPLATE[0].to_le_bytes()[0],
            ThisPtrRetBufPrecode::TYPE
        );
        assert_eq!(
            InterceptPrecode::TEMPLATE[0].to_le_bytes()[0],
            InterceptPrecode::TYPE
        );
    }

    #[test]
    fn test_discriminants_pairwise_distinct() {
        let types = [
            StubPrecode::TYPE,
            NativeImportPrecode::TYPE,
            FixupPrecode::TYPE,
            ThisPtrRetBufPrecode::TYPE,
            InterceptPrecode::TYPE,
        ];
        for (i, a) in types.iter().enumerate() {
            assert_ne!(*a, INVALID_PRECODE_TYPE);
            for b in &types[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_stub_precode_init_and_detect() {
        let mut heap = StubHeap::new(4096).unwrap();
        let precode = heap.place::<StubPrecode>().unwrap();
        precode.init(0x2000, 0x1000);

        assert_eq!(precode.target(), 0x1000);
        assert_eq!(precode.method_desc(), 0x2000);

        let entry = precode.entry_point();
        unsafe {
            assert_eq!(PrecodeKind::detect(entry as *const u8), Some(PrecodeKind::Stub));
            assert!(StubPrecode::from_entry_point(entry).is_some());
            assert!(NativeImportPrecode::from_entry_point(entry).is_none());

            let view = Precode::from_entry_point(entry).unwrap();
            assert_eq!(view.kind(), PrecodeKind::Stub);
            assert_eq!(view.target(), 0x1000);
        }
    }

    #[test]
    fn test_native_import_marker_register() {
        let mut heap = StubHeap::new(4096).unwrap();
        let precode = heap.place::<NativeImportPrecode>().unwrap();
        precode.init(0x5000, 0x6000);

        // The two bootstrap variants differ only in the register the first
        // instruction addresses the data through.
        assert_eq!(precode.code[0], inst::adr(X8, 16));
        assert_eq!(precode.target(), 0x6000);
        assert_eq!(precode.method_desc(), 0x5000);
    }

    #[test]
    fn test_fixup_precode_indices() {
        let table = FixupChunkTable::new();
        let chunk = table.register_chunk(0x9000);

        let mut heap = StubHeap::new(4096).unwrap();
        let precode = heap.place::<FixupPrecode>().unwrap();
        precode.init(chunk, 4, 0x7000);

        assert_eq!(precode.target(), 0x7000);
        assert_eq!(precode.chunk_index(), chunk);
        assert_eq!(precode.method_index(), 4);
        assert_eq!(
            precode.method_desc(&table),
            0x9000 + 4 * crate::heap::METHOD_DESC_ALIGNMENT
        );
    }

    #[test]
    fn test_intercept_precode_fields() {
        let mut heap = StubHeap::new(4096).unwrap();
        let precode = heap.place::<InterceptPrecode>().unwrap();
        precode.init(0x2000, 0x8888, 0x9999);

        assert_eq!(precode.method_desc(), 0x2000);
        assert_eq!(precode.interceptor(), 0x8888);
        assert_eq!(precode.target(), 0x9999);
    }

    #[test]
    fn test_set_target_interlocked_scenario() {
        let mut heap = StubHeap::new(4096).unwrap();
        let patcher = CodePatcher::new();

        let precode = heap.place::<StubPrecode>().unwrap() as *mut StubPrecode;
        unsafe { (*precode).init(0x2000, 0x1000) };
        assert!(heap.make_executable());
        let precode = unsafe { &*precode };

        unsafe {
            // First swap wins.
            assert!(precode.set_target_interlocked(&patcher, 0x3000, 0x1000).unwrap());
            assert_eq!(precode.target(), 0x3000);

            // A stale expected value loses and changes nothing.
            assert!(!precode.set_target_interlocked(&patcher, 0x4000, 0x1000).unwrap());
            assert_eq!(precode.target(), 0x3000);
        }
    }

    #[test]
    fn test_unknown_bytes_are_not_precodes() {
        let buf = [0u64; 8];
        let addr = buf.as_ptr() as usize;
        unsafe {
            assert_eq!(PrecodeKind::detect(addr as *const u8), None);
            assert!(Precode::from_entry_point(addr).is_none());
        }
    }
}
