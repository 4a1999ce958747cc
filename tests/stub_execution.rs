//! Executes emitted stubs directly; only meaningful on the architecture
//! the words are encoded for.
#![cfg(target_arch = "aarch64")]

use stublink::asm::StubAssembler;
use stublink::heap::{LoaderAllocator, StubHeap};
use stublink::patch::flush_instruction_cache;
use stublink::regs::{LR, X0};
use stublink::trampoline;

/// Copy finished stub bytes into the heap and return their address.
fn install(heap: &mut StubHeap, bytes: &[u8]) -> usize {
    let slot = heap.alloc_stub(bytes.len(), 8).unwrap();
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), slot.as_ptr(), bytes.len());
        flush_instruction_cache(slot.as_ptr(), bytes.len());
    }
    slot.as_ptr() as usize
}

#[test]
fn test_assembled_stub_executes() {
    let mut asm = StubAssembler::new();
    asm.emit_mov_constant(X0, 42);
    asm.emit_ret(LR);
    let bytes = asm.finalize_bytes();

    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let entry = install(&mut heap, &bytes);
    assert!(heap.make_executable());

    let f: extern "C" fn() -> u64 = unsafe { std::mem::transmute(entry) };
    assert_eq!(f(), 42);
}

#[test]
fn test_trampoline_executes_through_target() {
    // Target stub: return 7.
    let mut asm = StubAssembler::new();
    asm.emit_mov_constant(X0, 7);
    asm.emit_ret(LR);
    let target_bytes = asm.finalize_bytes();

    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let target = install(&mut heap, &target_bytes);

    let jump = heap.alloc_stub(trampoline::JUMP_ALLOCATE_SIZE, 8).unwrap();
    unsafe { trampoline::emit_jump(jump.as_ptr(), target) };
    assert!(heap.make_executable());

    let f: extern "C" fn() -> u64 = unsafe { std::mem::transmute(jump.as_ptr()) };
    assert_eq!(f(), 7);
}

#[test]
fn test_prolog_epilog_framed_stub_executes() {
    // A framed identity stub: open a frame saving x0, reload it, close.
    use stublink::inst::{AddrMode, MemOp};
    use stublink::regs::SP;

    let mut asm = StubAssembler::new();
    asm.emit_prolog(1, 0, 0, 0);
    asm.emit_load_store_reg_imm(MemOp::Load, AddrMode::Offset, X0, SP, 16);
    asm.emit_epilog();
    let bytes = asm.finalize_bytes();

    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let entry = install(&mut heap, &bytes);
    assert!(heap.make_executable());

    let f: extern "C" fn(u64) -> u64 = unsafe { std::mem::transmute(entry) };
    assert_eq!(f(0xDEAD), 0xDEAD);
}
