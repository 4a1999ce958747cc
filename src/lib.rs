//! AArch64 stub and precode generation engine for a managed runtime.
//!
//! The crate turns method-dispatch bookkeeping into executable AArch64
//! code: fixed-layout precodes that lazily bind to their real targets,
//! indirect-jump trampolines, unmanaged-entry thunks, and an assembler for
//! the larger shaped stubs (shuffle thunks, unboxing stubs, interop
//! prestubs). Mutation of published code goes through a single W^X
//! patching path with instruction-cache coherency.
//!
//! # Module map
//! - [`regs`]: register/condition value types and frame layout constants
//! - [`inst`]: pure instruction-word encoders
//! - [`trampoline`]: the 16-byte indirect-jump codec
//! - [`patch`]: code patching and instruction-cache flush
//! - [`heap`]: stub memory, the loader-allocator seam, descriptor chunks
//! - [`precode`]: the five precode variants and tag-based detection
//! - [`entry_thunk`]: native-callable entry thunks
//! - [`asm`]: the two-pass stub assembler and composite stub shapes

#![deny(unsafe_op_in_unsafe_fn)]

pub mod asm;
pub mod entry_thunk;
pub mod heap;
pub mod inst;
pub mod patch;
pub mod precode;
pub mod regs;
pub mod trampoline;

pub use asm::{ShuffleEntry, ShuffleSlot, SigShape, StubAssembler};
pub use entry_thunk::UMEntryThunk;
pub use heap::{FixupChunkTable, LoaderAllocator, StubHeap};
pub use patch::CodePatcher;
pub use precode::{
    FixupPrecode, InterceptPrecode, NativeImportPrecode, Precode, PrecodeKind, StubPrecode,
    ThisPtrRetBufPrecode,
};
