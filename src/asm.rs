//! Two-pass stub assembler.
//!
//! [`StubAssembler`] builds a stub as a stream of instruction words. Forward
//! branches go through [`Label`]s: emission records a fixup, `finalize`
//! resolves every label and re-encodes the branch words with their real
//! offsets. All encoding is delegated to [`crate::inst`]; this layer owns
//! ordering, labels, frame bookkeeping, and the composite stub shapes built
//! from the primitives:
//!
//! - unboxing stubs and direct/indirect managed-method calls
//! - delegate shuffle thunks (dependency-ordered argument permutation)
//! - secure-delegate invocation stubs keyed by a signature hash
//! - interop call prestubs with a patchable embedded target
//!
//! Frames are symmetric by construction: `emit_prolog` records the exact
//! restore sequence while emitting the saves, and `emit_epilog` replays it
//! in reverse, so the two cannot drift apart.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use smallvec::SmallVec;

use crate::inst::{self, AddrMode, Extend, MemOp};
use crate::patch::flush_instruction_cache;
use crate::regs::{
    CondCode, FP, IntReg, LR, SP, STACK_ALIGN_SIZE, TEB, VecReg, X0, X12, X16, X17, X19,
};

// =============================================================================
// Labels
// =============================================================================

/// A branch target within one assembler's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum BranchKind {
    Unconditional,
    Conditional(CondCode),
}

#[derive(Debug, Clone, Copy)]
struct Fixup {
    /// Word index of the branch instruction to re-encode.
    site: usize,
    label: Label,
    kind: BranchKind,
}

// =============================================================================
// Frame bookkeeping
// =============================================================================

#[derive(Debug)]
struct FrameShape {
    frame_size: i32,
    /// Restore words mirroring each save, recorded in save order and
    /// replayed reversed by the epilog.
    restores: Vec<u32>,
}

// =============================================================================
// Stub Assembler
// =============================================================================

/// Builder for a single stub's instruction stream.
pub struct StubAssembler {
    words: Vec<u32>,
    /// Bound word index per label id.
    labels: Vec<Option<usize>>,
    fixups: SmallVec<[Fixup; 8]>,
    frame: Option<FrameShape>,
    /// Net stack displacement in bytes; zero once a frame is fully closed.
    sp_delta: i64,
}

impl Default for StubAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StubAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            labels: Vec::new(),
            fixups: SmallVec::new(),
            frame: None,
            sp_delta: 0,
        }
    }

    /// Number of words emitted so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing has been emitted yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Net stack displacement in bytes; zero outside an open frame.
    #[inline]
    pub fn sp_delta(&self) -> i64 {
        self.sp_delta
    }

    #[inline]
    fn push(&mut self, word: u32) {
        self.words.push(word);
    }

    // -------------------------------------------------------------------------
    // Labels
    // -------------------------------------------------------------------------

    /// Allocate a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind a label to the current position.
    ///
    /// # Panics
    /// Panics if the label is already bound.
    pub fn bind_label(&mut self, label: Label) {
        assert!(self.labels[label.0].is_none(), "label bound twice");
        self.labels[label.0] = Some(self.words.len());
    }

    /// `b <label>`.
    pub fn emit_jump_label(&mut self, label: Label) {
        self.emit_branch(label, BranchKind::Unconditional);
    }

    /// `b.<cond> <label>`.
    pub fn emit_cond_flag_jump(&mut self, label: Label, cond: CondCode) {
        self.emit_branch(label, BranchKind::Conditional(cond));
    }

    fn emit_branch(&mut self, label: Label, kind: BranchKind) {
        let site = self.words.len();
        match self.labels[label.0] {
            Some(target) => self.push(Self::encode_branch(kind, site, target)),
            None => {
                // Placeholder re-encoded at finalize.
                self.push(Self::encode_branch(kind, site, site));
                self.fixups.push(Fixup { site, label, kind });
            }
        }
    }

    fn encode_branch(kind: BranchKind, site: usize, target: usize) -> u32 {
        let offset = (target as i64 - site as i64) as i32 * 4;
        match kind {
            BranchKind::Unconditional => inst::b(offset),
            BranchKind::Conditional(cond) => inst::b_cond(cond, offset),
        }
    }

    // -------------------------------------------------------------------------
    // Primitives
    // -------------------------------------------------------------------------

    /// `ldp`/`stp` of two integer registers.
    pub fn emit_load_store_pair_imm(
        &mut self,
        op: MemOp,
        mode: AddrMode,
        rt1: IntReg,
        rt2: IntReg,
        base: IntReg,
        offset: i32,
    ) {
        self.push(inst::ldst_pair_imm(op, mode, rt1, rt2, base, offset));
    }

    /// `ldp`/`stp` of two vector registers (64-bit halves).
    pub fn emit_load_store_vec_pair_imm(
        &mut self,
        op: MemOp,
        mode: AddrMode,
        vt1: VecReg,
        vt2: VecReg,
        base: IntReg,
        offset: i32,
    ) {
        self.push(inst::ldst_vec_pair_imm(op, mode, vt1, vt2, base, offset));
    }

    /// `ldr`/`str` of one integer register.
    pub fn emit_load_store_reg_imm(
        &mut self,
        op: MemOp,
        mode: AddrMode,
        rt: IntReg,
        base: IntReg,
        offset: i32,
    ) {
        self.push(inst::ldst_reg_imm(op, mode, rt, base, offset));
    }

    /// `ldr`/`str` of one vector register (64-bit half).
    pub fn emit_load_store_vec_imm(
        &mut self,
        op: MemOp,
        mode: AddrMode,
        vt: VecReg,
        base: IntReg,
        offset: i32,
    ) {
        self.push(inst::ldst_vec_imm(op, mode, vt, base, offset));
    }

    /// `ldr Xt, [base, index, <extend>]` — register-offset load.
    pub fn emit_load_reg_reg(
        &mut self,
        rt: IntReg,
        base: IntReg,
        index: IntReg,
        extend: Extend,
        scaled: bool,
    ) {
        self.push(inst::ldst_reg_reg(MemOp::Load, rt, base, index, extend, scaled));
    }

    /// Synthesize a 64-bit constant in the fewest move words: seed with
    /// `movz` (skipping zero halfwords) or, when the constant is
    /// all-ones-heavy, with `movn` (skipping all-ones halfwords), then
    /// `movk` the rest. Always emits at least one word.
    pub fn emit_mov_constant(&mut self, rd: IntReg, value: u64) {
        let halves = [
            value as u16,
            (value >> 16) as u16,
            (value >> 32) as u16,
            (value >> 48) as u16,
        ];
        let ones = halves.iter().filter(|&&h| h == 0xFFFF).count();
        let zeros = halves.iter().filter(|&&h| h == 0).count();

        let mut emitted = false;
        if ones > zeros {
            for (hw, &half) in halves.iter().enumerate() {
                if half == 0xFFFF {
                    continue;
                }
                if emitted {
                    self.push(inst::movk(rd, half, hw as u8));
                } else {
                    self.push(inst::movn(rd, !half, hw as u8));
                    emitted = true;
                }
            }
            if !emitted {
                self.push(inst::movn(rd, 0, 0));
            }
        } else {
            for (hw, &half) in halves.iter().enumerate() {
                if half == 0 {
                    continue;
                }
                if emitted {
                    self.push(inst::movk(rd, half, hw as u8));
                } else {
                    self.push(inst::movz(rd, half, hw as u8));
                    emitted = true;
                }
            }
            if !emitted {
                self.push(inst::movz(rd, 0, 0));
            }
        }
    }

    /// `mov Xd, Xm`.
    pub fn emit_mov_reg(&mut self, rd: IntReg, rm: IntReg) {
        self.push(inst::mov_reg(rd, rm));
    }

    /// `add Xd, Xn, #imm`.
    pub fn emit_add_imm(&mut self, rd: IntReg, rn: IntReg, imm: u32) {
        self.push(inst::add_imm(rd, rn, imm));
    }

    /// `sub Xd, Xn, #imm`.
    pub fn emit_sub_imm(&mut self, rd: IntReg, rn: IntReg, imm: u32) {
        self.push(inst::sub_imm(rd, rn, imm));
    }

    /// `cmp Xn, #imm`.
    pub fn emit_cmp_imm(&mut self, rn: IntReg, imm: u32) {
        self.push(inst::cmp_imm(rn, imm));
    }

    /// `cmp Xn, Xm`.
    pub fn emit_cmp_reg(&mut self, rn: IntReg, rm: IntReg) {
        self.push(inst::cmp_reg(rn, rm));
    }

    /// `br Xn`.
    pub fn emit_jump_register(&mut self, rn: IntReg) {
        self.push(inst::br(rn));
    }

    /// `blr Xn`.
    pub fn emit_call_register(&mut self, rn: IntReg) {
        self.push(inst::blr(rn));
    }

    /// `ret Xn` — return through the given register, conventionally lr.
    pub fn emit_ret(&mut self, rn: IntReg) {
        self.push(inst::ret(rn));
    }

    /// `nop`.
    pub fn emit_nop(&mut self) {
        self.push(inst::NOP);
    }

    /// Debugger breakpoint.
    pub fn emit_breakpoint(&mut self) {
        self.push(inst::BREAKPOINT);
    }

    /// Load the current thread context from the platform register.
    pub fn emit_get_thread_inlined(&mut self, rd: IntReg) {
        self.push(inst::mov_reg(rd, TEB));
    }

    // -------------------------------------------------------------------------
    // Prolog / Epilog
    // -------------------------------------------------------------------------

    /// Open a stub frame: push fp/lr, establish fp, and save the requested
    /// argument and callee-saved registers, plus `extra_stack` scratch bytes.
    ///
    /// The restore sequence is recorded here so [`emit_epilog`] is an exact
    /// inverse by construction.
    ///
    /// # Panics
    /// Panics on a second prolog, on more than 8 argument registers of
    /// either kind, on more than 10 callee-saved registers, or when the
    /// frame exceeds the pre-indexed store-pair range (504 bytes).
    ///
    /// [`emit_epilog`]: StubAssembler::emit_epilog
    pub fn emit_prolog(
        &mut self,
        int_args: usize,
        vec_args: usize,
        callee_saved: usize,
        extra_stack: usize,
    ) {
        assert!(self.frame.is_none(), "frame already open");
        assert!(int_args <= 8, "too many integer argument registers");
        assert!(vec_args <= 8, "too many vector argument registers");
        assert!(callee_saved <= 10, "too many callee-saved registers");

        let save_bytes = 8 * (int_args + vec_args + callee_saved);
        let raw = 16 + save_bytes + extra_stack;
        let frame_size = raw.div_ceil(STACK_ALIGN_SIZE) * STACK_ALIGN_SIZE;
        assert!(frame_size <= 504, "frame exceeds store-pair offset range");
        let frame_size = frame_size as i32;

        let mut restores = Vec::new();

        // stp fp, lr, [sp, #-frame]!  /  ldp fp, lr, [sp], #frame
        self.push(inst::ldst_pair_imm(
            MemOp::Store,
            AddrMode::PreIndex,
            FP,
            LR,
            SP,
            -frame_size,
        ));
        restores.push(inst::ldst_pair_imm(
            MemOp::Load,
            AddrMode::PostIndex,
            FP,
            LR,
            SP,
            frame_size,
        ));
        // mov through orr reads the zero register at encoding 31, so fp is
        // established with an add of zero.
        self.push(inst::add_imm(FP, SP, 0));

        let mut offset = 16i32;

        let mut i = 0;
        while i + 1 < int_args {
            let (a, b) = (IntReg::new(i as u8), IntReg::new(i as u8 + 1));
            self.push(inst::ldst_pair_imm(MemOp::Store, AddrMode::Offset, a, b, SP, offset));
            restores.push(inst::ldst_pair_imm(MemOp::Load, AddrMode::Offset, a, b, SP, offset));
            offset += 16;
            i += 2;
        }
        if i < int_args {
            let a = IntReg::new(i as u8);
            self.push(inst::ldst_reg_imm(MemOp::Store, AddrMode::Offset, a, SP, offset));
            restores.push(inst::ldst_reg_imm(MemOp::Load, AddrMode::Offset, a, SP, offset));
            offset += 8;
        }

        let mut i = 0;
        while i + 1 < vec_args {
            let (a, b) = (VecReg::new(i as u8), VecReg::new(i as u8 + 1));
            self.push(inst::ldst_vec_pair_imm(MemOp::Store, AddrMode::Offset, a, b, SP, offset));
            restores.push(inst::ldst_vec_pair_imm(MemOp::Load, AddrMode::Offset, a, b, SP, offset));
            offset += 16;
            i += 2;
        }
        if i < vec_args {
            let a = VecReg::new(i as u8);
            self.push(inst::ldst_vec_imm(MemOp::Store, AddrMode::Offset, a, SP, offset));
            restores.push(inst::ldst_vec_imm(MemOp::Load, AddrMode::Offset, a, SP, offset));
            offset += 8;
        }

        let mut i = 0;
        while i + 1 < callee_saved {
            let (a, b) = (
                IntReg::new(X19.num() + i as u8),
                IntReg::new(X19.num() + i as u8 + 1),
            );
            self.push(inst::ldst_pair_imm(MemOp::Store, AddrMode::Offset, a, b, SP, offset));
            restores.push(inst::ldst_pair_imm(MemOp::Load, AddrMode::Offset, a, b, SP, offset));
            offset += 16;
            i += 2;
        }
        if i < callee_saved {
            let a = IntReg::new(X19.num() + i as u8);
            self.push(inst::ldst_reg_imm(MemOp::Store, AddrMode::Offset, a, SP, offset));
            restores.push(inst::ldst_reg_imm(MemOp::Load, AddrMode::Offset, a, SP, offset));
        }

        self.sp_delta += frame_size as i64;
        self.frame = Some(FrameShape { frame_size, restores });
    }

    /// Close the frame opened by [`emit_prolog`]: replay the recorded
    /// restores in reverse, release the frame, and return.
    ///
    /// # Panics
    /// Panics if no frame is open.
    ///
    /// [`emit_prolog`]: StubAssembler::emit_prolog
    pub fn emit_epilog(&mut self) {
        let frame = self.frame.take().expect("epilog without prolog");
        for word in frame.restores.iter().rev() {
            self.push(*word);
        }
        self.sp_delta -= frame.frame_size as i64;
        self.emit_ret(LR);
    }

    // -------------------------------------------------------------------------
    // Composite stubs
    // -------------------------------------------------------------------------

    /// Unboxing stub: advance `this` past the box header and tail-dispatch
    /// to the unboxed entry.
    pub fn emit_unbox_method_stub(&mut self, entry: usize) {
        self.emit_add_imm(X0, X0, size_of::<usize>() as u32);
        self.emit_mov_constant(X12, entry as u64);
        self.emit_jump_register(X12);
    }

    /// Call (or tail-dispatch to) a managed entry point whose address is
    /// known at emission time.
    pub fn emit_call_managed_method(&mut self, entry: usize, tail: bool) {
        self.emit_mov_constant(X12, entry as u64);
        if tail {
            self.emit_jump_register(X12);
        } else {
            self.emit_call_register(X12);
        }
    }

    /// Call (or tail-dispatch) through an indirection cell; the cell holds
    /// the callable address and may be rebound after emission.
    pub fn emit_call_managed_method_indirect(&mut self, cell: usize, tail: bool) {
        self.emit_mov_constant(X12, cell as u64);
        self.emit_load_store_reg_imm(MemOp::Load, AddrMode::Offset, X12, X12, 0);
        if tail {
            self.emit_jump_register(X12);
        } else {
            self.emit_call_register(X12);
        }
    }

    /// Secure-delegate invocation stub: materialize the signature hash for
    /// the helper, then tail-dispatch to it.
    pub fn emit_secure_delegate_invoke(&mut self, sig_hash: u64, helper: usize) {
        self.emit_mov_constant(X12, sig_hash);
        self.emit_mov_constant(X16, helper as u64);
        self.emit_jump_register(X16);
    }

    /// Delegate shuffle thunk: permute arguments per `entries`, then
    /// tail-dispatch to `target`. See [`plan_shuffle`] for the ordering and
    /// cycle-breaking rules.
    pub fn emit_shuffle_thunk(&mut self, entries: &[ShuffleEntry], target: usize) {
        for m in plan_shuffle(entries) {
            self.emit_slot_move(m.dst, m.src);
        }
        self.emit_mov_constant(X16, target as u64);
        self.emit_jump_register(X16);
    }

    fn emit_slot_move(&mut self, dst: ShuffleSlot, src: ShuffleSlot) {
        // The cycle temporary is x16; stack-to-stack copies stage through
        // x17 so the temporary stays live across them.
        let dst = match dst {
            ShuffleSlot::Temp => ShuffleSlot::Reg(X16),
            other => other,
        };
        let src = match src {
            ShuffleSlot::Temp => ShuffleSlot::Reg(X16),
            other => other,
        };
        match (dst, src) {
            (ShuffleSlot::Reg(d), ShuffleSlot::Reg(s)) => self.emit_mov_reg(d, s),
            (ShuffleSlot::Reg(d), ShuffleSlot::Stack(i)) => {
                self.emit_load_store_reg_imm(MemOp::Load, AddrMode::Offset, d, SP, i as i32 * 8);
            }
            (ShuffleSlot::Stack(i), ShuffleSlot::Reg(s)) => {
                self.emit_load_store_reg_imm(MemOp::Store, AddrMode::Offset, s, SP, i as i32 * 8);
            }
            (ShuffleSlot::Stack(i), ShuffleSlot::Stack(j)) => {
                self.emit_load_store_reg_imm(MemOp::Load, AddrMode::Offset, X17, SP, j as i32 * 8);
                self.emit_load_store_reg_imm(MemOp::Store, AddrMode::Offset, X17, SP, i as i32 * 8);
            }
            (ShuffleSlot::Temp, _) | (_, ShuffleSlot::Temp) => unreachable!(),
        }
    }

    // -------------------------------------------------------------------------
    // Finalization
    // -------------------------------------------------------------------------

    /// Resolve all labels and return the finished word stream.
    ///
    /// # Panics
    /// Panics if any referenced label was never bound, or if a frame is
    /// still open.
    pub fn finalize(mut self) -> Vec<u32> {
        assert!(self.frame.is_none(), "frame left open");
        for fixup in &self.fixups {
            let target = self.labels[fixup.label.0].expect("unbound label at finalize");
            self.words[fixup.site] = Self::encode_branch(fixup.kind, fixup.site, target);
        }
        self.words
    }

    /// Resolve all labels and return the finished stream as bytes.
    pub fn finalize_bytes(self) -> Vec<u8> {
        let words = self.finalize();
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for w in words {
            bytes.extend_from_slice(&w.to_le_bytes());
        }
        bytes
    }
}

// =============================================================================
// Shuffle planning
// =============================================================================

/// One argument location in a shuffle thunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShuffleSlot {
    /// An integer argument register.
    Reg(IntReg),
    /// A caller stack slot, index in 8-byte units from sp.
    Stack(u16),
    /// The cycle-breaking temporary (x16); produced by planning, never
    /// valid in caller input.
    Temp,
}

/// One move of a shuffle thunk: `dst` receives the value in `src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShuffleEntry {
    pub src: ShuffleSlot,
    pub dst: ShuffleSlot,
}

/// Order shuffle moves so every source is read before it is overwritten.
///
/// A move is safe once no pending move still reads its destination. When no
/// move is safe the remaining moves form a cycle; the cycle is broken by
/// parking one destination's current value in [`ShuffleSlot::Temp`] and
/// redirecting its readers there.
///
/// # Panics
/// Panics if the input contains [`ShuffleSlot::Temp`] or two moves with the
/// same destination.
pub fn plan_shuffle(entries: &[ShuffleEntry]) -> SmallVec<[ShuffleEntry; 8]> {
    for (i, e) in entries.iter().enumerate() {
        assert!(
            e.src != ShuffleSlot::Temp && e.dst != ShuffleSlot::Temp,
            "temporary slot is reserved for planning"
        );
        for other in &entries[i + 1..] {
            assert!(e.dst != other.dst, "duplicate shuffle destination");
        }
    }

    let mut pending: SmallVec<[ShuffleEntry; 8]> = entries
        .iter()
        .copied()
        .filter(|e| e.src != e.dst)
        .collect();
    let mut plan = SmallVec::new();

    while !pending.is_empty() {
        let safe = pending
            .iter()
            .position(|m| !pending.iter().any(|o| o.src == m.dst));
        match safe {
            Some(i) => {
                plan.push(pending.remove(i));
            }
            None => {
                // Every pending destination is still read by another move:
                // a cycle. Park the first destination's value and redirect
                // its readers to the temporary.
                let parked = pending[0].dst;
                plan.push(ShuffleEntry {
                    src: parked,
                    dst: ShuffleSlot::Temp,
                });
                for m in pending.iter_mut() {
                    if m.src == parked {
                        m.src = ShuffleSlot::Temp;
                    }
                }
            }
        }
    }
    plan
}

// =============================================================================
// Multicast signature hashing
// =============================================================================

/// The calling-convention shape of a delegate signature, as far as a
/// multicast dispatch stub cares: everything that changes the frame the
/// stub must replay per subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SigShape {
    /// Bytes of stack-passed arguments.
    pub stack_arg_bytes: u32,
    /// Whether the signature carries an instance `this`.
    pub has_this: bool,
    /// Whether a hidden return buffer is passed.
    pub has_ret_buf: bool,
    /// Number of vector argument registers in use.
    pub float_arg_regs: u8,
}

/// Hash a signature shape for multicast stub sharing: delegates with equal
/// shapes share one invocation stub.
pub fn hash_multicast_invoke(sig: &SigShape) -> u64 {
    let mut hasher = FxHasher::default();
    sig.hash(&mut hasher);
    hasher.finish()
}

// =============================================================================
// Interop call prestub
// =============================================================================

/// Bytes of padding in front of an interop method descriptor; the prestub
/// occupies it exactly, so the descriptor sits at `prestub + prepad`.
pub const COM_METHOD_PREPAD: usize = 24;

/// Total prestub size.
pub const COM_CALL_PRESTUB_SIZE: usize = 24;

/// Byte offset of the patchable call target within the prestub.
pub const COM_CALL_PRESTUB_ADDRESS_OFFSET: usize = 16;

/// Write an interop call prestub that branches to `target`.
///
/// ```text
/// +0:   adr x12, #24          ; x12 -> the descriptor after the prestub
/// +4:   ldr x10, [pc, #12]    ; embedded target
/// +8:   br  x10
/// +12:  (padding)
/// +16:  target
/// ```
///
/// # Panics
/// Panics if `code` is not 8-byte aligned.
///
/// # Safety
/// `code` must be valid for [`COM_CALL_PRESTUB_SIZE`] writable bytes.
pub unsafe fn encode_com_call_prestub(code: *mut u8, target: usize) {
    assert!(code as usize & 7 == 0, "prestub requires 8-byte alignment");

    let words = code as *mut u32;
    // SAFETY: caller guarantees the full prestub is writable; alignment
    // checked above
    unsafe {
        words.write(inst::adr(X12, COM_METHOD_PREPAD as i32));
        words.add(1).write(inst::ldr_literal(
            crate::regs::X10,
            (COM_CALL_PRESTUB_ADDRESS_OFFSET - 4) as i32,
        ));
        words.add(2).write(inst::br(crate::regs::X10));
        words.add(3).write(inst::NOP);
        flush_instruction_cache(code, COM_CALL_PRESTUB_ADDRESS_OFFSET);
        (code.add(COM_CALL_PRESTUB_ADDRESS_OFFSET) as *mut usize).write(target);
    }
}

/// Read the call target embedded in a prestub.
///
/// # Safety
/// `code` must be valid for [`COM_CALL_PRESTUB_SIZE`] readable bytes.
#[inline]
pub unsafe fn com_call_prestub_target(code: *const u8) -> usize {
    // SAFETY: caller guarantees the full prestub is readable
    unsafe { (code.add(COM_CALL_PRESTUB_ADDRESS_OFFSET) as *const usize).read() }
}

// =============================================================================
// Tests
// =============================================================================
