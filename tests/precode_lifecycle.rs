use std::sync::{Arc, Barrier};
use std::thread;

use stublink::heap::{FixupChunkTable, LoaderAllocator, StubHeap};
use stublink::precode::{Precode, PrecodeKind, StubPrecode};
use stublink::{CodePatcher, FixupPrecode, UMEntryThunk, trampoline};

#[test]
fn test_stub_precode_full_lifecycle() {
    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let patcher = CodePatcher::new();

    let precode = heap.place::<StubPrecode>().unwrap() as *mut StubPrecode;
    unsafe { (*precode).init(0x2000, 0x1000) };
    assert!(heap.make_executable());
    let precode = unsafe { &*precode };

    // Bind the precode to its compiled target; the descriptor never moves.
    unsafe {
        assert!(
            precode
                .set_target_interlocked(&patcher, 0x3000, 0x1000)
                .unwrap()
        );
    }
    assert_eq!(precode.target(), 0x3000);
    assert_eq!(precode.method_desc(), 0x2000);

    // The generic view agrees after the swap.
    let view = unsafe { Precode::from_entry_point(precode.entry_point()).unwrap() };
    assert_eq!(view.kind(), PrecodeKind::Stub);
    assert_eq!(view.target(), 0x3000);
}

#[test]
fn test_fixup_precode_resolves_descriptor_through_chunks() {
    let chunks = FixupChunkTable::new();
    let chunk = chunks.register_chunk(0xA000);

    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let precode = heap.place::<FixupPrecode>().unwrap();
    precode.init(chunk, 7, 0x1000);

    let view = unsafe { Precode::from_entry_point(precode as *const FixupPrecode as usize) };
    let view = view.unwrap();
    assert_eq!(view.kind(), PrecodeKind::Fixup);
    assert_eq!(view.method_desc(&chunks), 0xA000 + 7 * 8);
}

#[test]
fn test_concurrent_binding_has_one_winner() {
    const THREADS: usize = 8;

    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let precode = heap.place::<StubPrecode>().unwrap() as *mut StubPrecode;
    unsafe { (*precode).init(0x2000, 0x1000) };
    assert!(heap.make_executable());
    let addr = precode as usize;

    let patcher = Arc::new(CodePatcher::new());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let patcher = Arc::clone(&patcher);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let precode = unsafe { StubPrecode::from_entry_point(addr).unwrap() };
                barrier.wait();
                unsafe {
                    precode
                        .set_target_interlocked(&patcher, 0x3000, 0x1000)
                        .unwrap()
                }
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|&won| won)
        .count();

    // Exactly one thread's compare-exchange succeeds; every loser observes
    // the winner's binding.
    assert_eq!(wins, 1);
    let precode = unsafe { StubPrecode::from_entry_point(addr).unwrap() };
    assert_eq!(precode.target(), 0x3000);
    assert_eq!(patcher.patches_applied(), 1);
}

#[test]
fn test_trampoline_in_stub_memory() {
    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let slot = heap.alloc_stub(trampoline::JUMP_ALLOCATE_SIZE, 8).unwrap();

    unsafe {
        trampoline::emit_jump(slot.as_ptr(), 0xBEEF_0000);
        assert!(trampoline::is_encoded_jump(slot.as_ptr()));
        assert_eq!(trampoline::decode_jump(slot.as_ptr()), 0xBEEF_0000);
    }
    assert!(heap.make_executable());
    unsafe {
        assert!(trampoline::is_encoded_jump(slot.as_ptr()));
    }
}

#[test]
fn test_entry_thunk_round_trip() {
    let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
    let thunk = heap.place::<UMEntryThunk>().unwrap();
    thunk.encode(0xC000, thunk as *const UMEntryThunk as usize);

    assert_eq!(thunk.target_code(), 0xC000);
    assert_eq!(thunk.secret_param(), thunk.entry_point());
    assert_eq!(thunk.entry_point() % 16, 0);
}
