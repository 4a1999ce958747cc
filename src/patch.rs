//! Executable-code patching with instruction-cache coherency.
//!
//! Precode targets are patched lazily, possibly by several racing threads.
//! The patching system operates in three phases:
//! 1. **Protection Change**: raise write permission on the affected pages
//! 2. **Patch**: a single atomic compare-exchange (targets) or a byte copy
//!    followed by an instruction-cache flush (instruction words)
//! 3. **Protection Restore**: return the pages to execute/read-only
//!
//! The intermediate window is never exposed to callers: every mutation of
//! published code goes through [`CodePatcher`], which performs all three
//! phases behind one call. Pages keep execute permission during the window
//! so threads already running through a precode are unaffected; only the
//! write bit is toggled.
//!
//! A failed platform call here is fatal to the caller: execution cannot
//! safely continue if the code-patching invariants cannot be upheld.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering, fence};

use parking_lot::Mutex;

// =============================================================================
// Platform-specific permission control
// =============================================================================

#[cfg(unix)]
mod platform {
    use std::io;

    pub fn page_size() -> usize {
        // SAFETY: sysconf is safe to call with _SC_PAGESIZE
        unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
    }

    /// Raise write permission while keeping execute.
    ///
    /// # Safety
    /// The range must be mapped in the process address space.
    pub unsafe fn make_writable(start: usize, len: usize) -> io::Result<()> {
        // SAFETY: Caller guarantees the range is mapped
        let result = unsafe {
            libc::mprotect(
                start as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            )
        };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Restore execute/read-only permission.
    ///
    /// # Safety
    /// The range must be mapped in the process address space.
    pub unsafe fn make_executable(start: usize, len: usize) -> io::Result<()> {
        // SAFETY: Caller guarantees the range is mapped
        let result = unsafe {
            libc::mprotect(
                start as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_EXEC,
            )
        };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::io;
    use windows_sys::Win32::System::Memory::{
        PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE, VirtualProtect,
    };
    use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

    pub fn page_size() -> usize {
        // SAFETY: SYSTEM_INFO can be zero-initialized and GetSystemInfo always succeeds
        let mut info: SYSTEM_INFO = unsafe { std::mem::zeroed() };
        unsafe { GetSystemInfo(&mut info) };
        info.dwPageSize as usize
    }

    /// Raise write permission while keeping execute.
    ///
    /// # Safety
    /// The range must be mapped in the process address space.
    pub unsafe fn make_writable(start: usize, len: usize) -> io::Result<()> {
        let mut old_protect: u32 = 0;
        // SAFETY: Caller guarantees the range is mapped
        let result = unsafe {
            VirtualProtect(
                start as *mut std::ffi::c_void,
                len,
                PAGE_EXECUTE_READWRITE,
                &mut old_protect,
            )
        };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Restore execute/read-only permission.
    ///
    /// # Safety
    /// The range must be mapped in the process address space.
    pub unsafe fn make_executable(start: usize, len: usize) -> io::Result<()> {
        let mut old_protect: u32 = 0;
        // SAFETY: Caller guarantees the range is mapped
        let result = unsafe {
            VirtualProtect(
                start as *mut std::ffi::c_void,
                len,
                PAGE_EXECUTE_READ,
                &mut old_protect,
            )
        };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Get the system page size.
pub fn page_size() -> usize {
    platform::page_size()
}

// =============================================================================
// Instruction-cache flush
// =============================================================================

/// Invalidate any cached instruction-stream copies for the given range.
///
/// Must be called after rewriting instruction words before any thread,
/// including the current one, executes them. Patches to embedded data words
/// (trampoline targets, precode target fields) do not require a flush.
///
/// On hosts that will never execute the emitted code (ahead-of-time
/// cross-compilation), this degrades to a compiler/memory fence.
///
/// # Safety
/// The range must be mapped and readable in the process address space.
#[cfg(all(target_arch = "aarch64", not(windows)))]
pub unsafe fn flush_instruction_cache(ptr: *const u8, len: usize) {
    use std::arch::asm;

    let start = ptr as usize;
    let end = start + len;

    // Cache line geometry from CTR_EL0: DminLine in [19:16], IminLine in [3:0],
    // both log2 of the line size in words.
    let ctr: u64;
    // SAFETY: reading CTR_EL0 is always permitted at EL0
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack)) };
    let dline = 4usize << ((ctr >> 16) & 0xF);
    let iline = 4usize << (ctr & 0xF);

    // Clean data cache to the point of unification, then invalidate the
    // instruction cache over the same range.
    let mut addr = start & !(dline - 1);
    while addr < end {
        // SAFETY: caller guarantees the range is mapped
        unsafe { asm!("dc cvau, {}", in(reg) addr, options(nostack)) };
        addr += dline;
    }
    // SAFETY: barriers have no memory operands
    unsafe { asm!("dsb ish", options(nostack)) };
    let mut addr = start & !(iline - 1);
    while addr < end {
        // SAFETY: caller guarantees the range is mapped
        unsafe { asm!("ic ivau, {}", in(reg) addr, options(nostack)) };
        addr += iline;
    }
    // SAFETY: barriers have no memory operands
    unsafe { asm!("dsb ish", "isb", options(nostack)) };
}

/// See the aarch64 variant. Windows exposes a single call covering both
/// cache maintenance and the required barriers.
#[cfg(windows)]
pub unsafe fn flush_instruction_cache(ptr: *const u8, len: usize) {
    use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
    use windows_sys::Win32::System::Threading::GetCurrentProcess;

    // SAFETY: caller guarantees the range is mapped
    unsafe {
        FlushInstructionCache(GetCurrentProcess(), ptr as *const _, len);
    }
}

/// See the aarch64 variant. On foreign-architecture hosts the emitted code
/// is never executed (cross-compilation mode), so a fence is sufficient.
#[cfg(not(any(target_arch = "aarch64", windows)))]
pub unsafe fn flush_instruction_cache(_ptr: *const u8, _len: usize) {
    fence(Ordering::SeqCst);
}

// =============================================================================
// Code Patcher
// =============================================================================

/// Thread-safe patcher for published (execute/read-only) code.
///
/// The permission window is serialized internally so two threads patching
/// records on the same page cannot observe each other's half-restored
/// protection state. The caller-visible concurrency protocol is unchanged:
/// target swaps are optimistic compare-exchanges and losing a race is not
/// an error.
#[derive(Debug)]
pub struct CodePatcher {
    /// Page size for protection operations.
    page_size: usize,
    /// Serializes the raise/restore permission window.
    window: Mutex<()>,
    /// Total patches applied.
    patches_applied: AtomicU64,
}

impl Default for CodePatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CodePatcher {
    /// Create a new patcher.
    pub fn new() -> Self {
        Self {
            page_size: platform::page_size(),
            window: Mutex::new(()),
            patches_applied: AtomicU64::new(0),
        }
    }

    /// Page-align an address downwards.
    #[inline]
    fn page_align(&self, addr: usize) -> usize {
        addr & !(self.page_size - 1)
    }

    /// Page range covering `[addr, addr + len)`.
    #[inline]
    fn page_span(&self, addr: usize, len: usize) -> (usize, usize) {
        let start = self.page_align(addr);
        let end = self.page_align(addr + len - 1) + self.page_size;
        (start, end - start)
    }

    /// Atomically swap a precode target field in published code.
    ///
    /// Returns `Ok(true)` if `slot` held `expected` and now holds `new`;
    /// `Ok(false)` on a lost race (the caller re-reads and retries or
    /// accepts the winner's value). `Err` only for platform permission
    /// failures, which the caller must treat as fatal.
    ///
    /// The slot is a data word that is never executed, so no
    /// instruction-cache flush is required.
    ///
    /// # Safety
    /// `slot` must lie within a mapped region this patcher may change
    /// permissions on.
    pub unsafe fn cas_target(
        &self,
        slot: &AtomicUsize,
        new: usize,
        expected: usize,
    ) -> io::Result<bool> {
        let addr = slot as *const AtomicUsize as usize;
        let (start, len) = self.page_span(addr, size_of::<usize>());

        let guard = self.window.lock();
        // SAFETY: caller guarantees the slot's pages are mapped
        unsafe { platform::make_writable(start, len)? };
        let swapped = slot
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        // SAFETY: same range as above
        let restore = unsafe { platform::make_executable(start, len) };
        drop(guard);

        fence(Ordering::SeqCst);
        restore?;

        if swapped {
            self.patches_applied.fetch_add(1, Ordering::Relaxed);
        }
        Ok(swapped)
    }

    /// Rewrite instruction bytes in published code.
    ///
    /// Performs the full three-phase sequence including the
    /// instruction-cache flush; on return any thread may execute the new
    /// bytes.
    ///
    /// # Safety
    /// `addr` must be valid for `bytes.len()` bytes inside a mapped region
    /// this patcher may change permissions on, and no thread may be
    /// mid-execution of the instructions being replaced.
    pub unsafe fn patch_code(&self, addr: *mut u8, bytes: &[u8]) -> io::Result<()> {
        let (start, len) = self.page_span(addr as usize, bytes.len());

        let guard = self.window.lock();
        // SAFETY: caller guarantees the range is mapped
        unsafe { platform::make_writable(start, len)? };
        // SAFETY: range is now writable and caller guarantees validity
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr, bytes.len());
            flush_instruction_cache(addr, bytes.len());
        }
        // SAFETY: same range as above
        let restore = unsafe { platform::make_executable(start, len) };
        drop(guard);

        fence(Ordering::SeqCst);
        restore?;

        self.patches_applied.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Total successful patches applied through this patcher.
    #[inline]
    pub fn patches_applied(&self) -> u64 {
        self.patches_applied.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = page_size();
        assert!(size.is_power_of_two());
        assert!(size >= 4096);
    }

    #[test]
    fn test_page_span() {
        let patcher = CodePatcher::new();
        let ps = patcher.page_size;

        let (start, len) = patcher.page_span(ps + 8, 8);
        assert_eq!(start, ps);
        assert_eq!(len, ps);

        // A write straddling a page boundary covers both pages.
        let (start, len) = patcher.page_span(2 * ps - 4, 8);
        assert_eq!(start, ps);
        assert_eq!(len, 2 * ps);
    }

    #[test]
    fn test_patcher_starts_clean() {
        let patcher = CodePatcher::new();
        assert_eq!(patcher.patches_applied(), 0);
    }

    #[test]
    fn test_patch_code_rewrites_published_bytes() {
        use crate::heap::{LoaderAllocator, StubHeap};
        use crate::inst;
        use crate::regs::LR;

        let mut heap = StubHeap::new(4096).expect("failed to map stub heap");
        let slot = heap.alloc_stub(4, 4).unwrap();
        // SAFETY: freshly allocated, writable, 4-byte aligned
        unsafe { (slot.as_ptr() as *mut u32).write(inst::NOP) };
        assert!(heap.make_executable());

        let patcher = CodePatcher::new();
        let replacement = inst::ret(LR).to_le_bytes();
        // SAFETY: the word lies inside the heap's mapping
        unsafe { patcher.patch_code(slot.as_ptr(), &replacement).unwrap() };

        // SAFETY: the page is readable after the protection restore
        let word = unsafe { (slot.as_ptr() as *const u32).read() };
        assert_eq!(word, inst::ret(LR));
        assert_eq!(patcher.patches_applied(), 1);
    }
}
