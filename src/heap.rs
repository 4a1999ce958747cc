//! Executable memory for precodes and stubs.
//!
//! This module provides:
//! - [`StubHeap`]: a platform-allocated write-then-execute region with
//!   aligned bump allocation; records placed here are never moved and are
//!   reclaimed only when the heap is dropped
//! - [`LoaderAllocator`]: the narrow allocation interface precode `init`
//!   paths consume
//! - [`FixupChunkTable`]: the chunk descriptor table that lets compact
//!   fixup precodes recover their owning descriptor from two small indices
//!
//! # Safety
//! All memory management is inherently unsafe. This module encapsulates
//! the unsafety behind safe APIs where possible.

use std::ptr::NonNull;

use parking_lot::RwLock;

// =============================================================================
// Platform-specific allocation
// =============================================================================

#[cfg(unix)]
mod platform {
    use std::ptr;

    /// Allocate memory with read-write permissions.
    pub unsafe fn alloc_rw(size: usize) -> *mut u8 {
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            ptr::null_mut()
        } else {
            ptr as *mut u8
        }
    }

    /// Free allocated memory.
    pub unsafe fn free(ptr: *mut u8, size: usize) {
        unsafe {
            libc::munmap(ptr as *mut _, size);
        }
    }

    /// Make memory executable (and read-only).
    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        unsafe { libc::mprotect(ptr as *mut _, size, libc::PROT_READ | libc::PROT_EXEC) == 0 }
    }

    /// Make memory writable (remove execute permission).
    pub unsafe fn make_writable(ptr: *mut u8, size: usize) -> bool {
        unsafe { libc::mprotect(ptr as *mut _, size, libc::PROT_READ | libc::PROT_WRITE) == 0 }
    }
}

#[cfg(windows)]
mod platform {
    use std::ptr;
    use windows_sys::Win32::System::Memory::{
        MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_READWRITE, VirtualAlloc,
        VirtualFree, VirtualProtect,
    };

    /// Allocate memory with read-write permissions.
    pub unsafe fn alloc_rw(size: usize) -> *mut u8 {
        unsafe {
            VirtualAlloc(ptr::null(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) as *mut u8
        }
    }

    /// Free allocated memory.
    pub unsafe fn free(ptr: *mut u8, _size: usize) {
        unsafe {
            VirtualFree(ptr as *mut _, 0, MEM_RELEASE);
        }
    }

    /// Make memory executable (and read-only).
    pub unsafe fn make_executable(ptr: *mut u8, size: usize) -> bool {
        let mut old_protect = 0;
        unsafe { VirtualProtect(ptr as *mut _, size, PAGE_EXECUTE_READ, &mut old_protect) != 0 }
    }

    /// Make memory writable (remove execute permission).
    pub unsafe fn make_writable(ptr: *mut u8, size: usize) -> bool {
        let mut old_protect = 0;
        unsafe { VirtualProtect(ptr as *mut _, size, PAGE_READWRITE, &mut old_protect) != 0 }
    }
}

// =============================================================================
// Loader Allocator
// =============================================================================

/// The allocation interface precodes and thunks are written through.
///
/// Implementors own the memory's lifetime; records handed out are never
/// moved and stay valid until the allocator is torn down.
pub trait LoaderAllocator {
    /// Allocate `size` bytes of stub memory with the given alignment.
    /// Returns `None` when the heap is exhausted.
    fn alloc_stub(&mut self, size: usize, align: usize) -> Option<NonNull<u8>>;
}

// =============================================================================
// Stub Heap
// =============================================================================

/// A bump-allocated region of write-then-execute memory.
///
/// The heap follows a W^X model:
/// 1. Initially writable while precodes and stubs are placed and `init`ed
/// 2. Made executable (and non-writable) before publication
/// 3. Patched afterwards only through [`crate::patch::CodePatcher`]
pub struct StubHeap {
    /// Pointer to the allocated memory.
    ptr: NonNull<u8>,
    /// Total allocated size (page-aligned).
    capacity: usize,
    /// Current bump position.
    len: usize,
    /// Whether the region is currently executable.
    is_executable: bool,
}

impl StubHeap {
    /// Create a heap with at least `min_capacity` bytes, rounded up to a
    /// whole number of pages.
    pub fn new(min_capacity: usize) -> Option<Self> {
        let page = crate::patch::page_size();
        let capacity = min_capacity.max(page).div_ceil(page) * page;

        // SAFETY: requesting a fresh page-aligned anonymous mapping
        let ptr = unsafe { platform::alloc_rw(capacity) };
        let ptr = NonNull::new(ptr)?;

        Some(StubHeap {
            ptr,
            capacity,
            len: 0,
            is_executable: false,
        })
    }

    /// Base address of the region.
    #[inline]
    pub fn base(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Bytes allocated so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been allocated yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total capacity.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the region is currently executable.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.is_executable
    }

    /// Make the region executable (and non-writable). Returns `true` on
    /// success.
    pub fn make_executable(&mut self) -> bool {
        if self.is_executable {
            return true;
        }
        // SAFETY: the region was mapped by this heap
        let ok = unsafe { platform::make_executable(self.ptr.as_ptr(), self.capacity) };
        if ok {
            self.is_executable = true;
        }
        ok
    }

    /// Make the region writable again for placing more records. Returns
    /// `true` on success.
    pub fn make_writable(&mut self) -> bool {
        if !self.is_executable {
            return true;
        }
        // SAFETY: the region was mapped by this heap
        let ok = unsafe { platform::make_writable(self.ptr.as_ptr(), self.capacity) };
        if ok {
            self.is_executable = false;
        }
        ok
    }

    /// Allocate a zero-initialized record of type `T` and hand out a
    /// mutable reference for `init`. The record address is stable for the
    /// heap's lifetime.
    ///
    /// # Panics
    /// Panics if the heap has already been made executable.
    pub fn place<T>(&mut self) -> Option<&mut T> {
        assert!(!self.is_executable, "cannot place records in executable heap");
        let ptr = self.alloc_stub(size_of::<T>(), align_of::<T>())?;
        // SAFETY: freshly allocated, aligned, zeroed by the OS, and within
        // the mapping
        Some(unsafe { &mut *ptr.as_ptr().cast::<T>() })
    }
}

impl LoaderAllocator for StubHeap {
    fn alloc_stub(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        let base = self.ptr.as_ptr() as usize;
        let start = (base + self.len + align - 1) & !(align - 1);
        let end = start.checked_add(size)?;
        if end > base + self.capacity {
            return None;
        }
        self.len = end - base;
        NonNull::new(start as *mut u8)
    }
}

impl Drop for StubHeap {
    fn drop(&mut self) {
        // SAFETY: the region was mapped by this heap and is unmapped once
        unsafe {
            platform::free(self.ptr.as_ptr(), self.capacity);
        }
    }
}

// SAFETY: the heap hands out raw addresses; synchronization of the records
// themselves is the concern of the precode CAS protocol.
unsafe impl Send for StubHeap {}
unsafe impl Sync for StubHeap {}

// =============================================================================
// Fixup Chunk Table
// =============================================================================

/// Alignment of method descriptors; index bytes in compact precodes are
/// scaled by this.
pub const METHOD_DESC_ALIGNMENT: usize = 8;

/// Descriptor-chunk bases for compact fixup precodes.
///
/// A fixup precode does not embed its owning descriptor pointer. It stores
/// a chunk index into this table plus a within-chunk index; the descriptor
/// address is `base(chunk) + method_index * METHOD_DESC_ALIGNMENT`. Many
/// precodes share one table entry, which is the point of the compact
/// variant.
#[derive(Debug, Default)]
pub struct FixupChunkTable {
    bases: RwLock<Vec<usize>>,
}

impl FixupChunkTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor-chunk base address, returning its chunk index.
    ///
    /// # Panics
    /// Panics once more than 256 chunks are registered; the per-precode
    /// chunk index is a single byte.
    pub fn register_chunk(&self, base: usize) -> u8 {
        let mut bases = self.bases.write();
        let index = bases.len();
        assert!(index < 256, "fixup chunk index overflow");
        bases.push(base);
        index as u8
    }

    /// Base address of a registered chunk.
    ///
    /// # Panics
    /// Panics for an unregistered index; a precode carrying one is corrupt.
    pub fn chunk_base(&self, chunk_index: u8) -> usize {
        self.bases.read()[chunk_index as usize]
    }

    /// Resolve a (chunk, method) index pair to a descriptor reference.
    pub fn method_desc(&self, chunk_index: u8, method_index: u8) -> usize {
        self.chunk_base(chunk_index) + method_index as usize * METHOD_DESC_ALIGNMENT
    }

    /// Number of registered chunks.
    pub fn chunk_count(&self) -> usize {
        self.bases.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
