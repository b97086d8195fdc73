//! # Virtual Memory Core
//!
//! Per-process virtual memory for a 32-bit machine with a software-refilled
//! TLB: typed regions, a two-level page table, demand paging, copy-on-write
//! sharing across process cloning, and a growable heap.
//!
//! ## Virtual Address → Page Entry Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31       21 | 20       12 | 11        0 |
//! |  L1 index   |  L2 index   |   Offset    |
//! |  (11 bits)  |  (9 bits)   |  (12 bits)  |
//! ```
//!
//! The L1 index selects one of 2048 slots in the top-level table; each
//! occupied slot points to a second-level table of 512 entry references.
//! A translation therefore costs two array lookups, and the metadata for a
//! sparse address space stays proportional to what is actually mapped.
//!
//! ```text
//!  L1 table  →  L2 table  →  PageEntry  →  physical frame
//!    │            │             │
//!    │            │             └───► refcounted, possibly shared
//!    │            └─────────────────► freed when its last entry leaves
//!    └──────────────────────────────► one per address space
//! ```
//!
//! ## Components
//!
//! | Module | Responsibility |
//! |:-------|:---------------|
//! | [`pte`] | One physical frame with permission bits, a share count, and the copy-on-write split. |
//! | [`page_table`] | The sparse two-level map from virtual page to [`pte::PageEntry`]. |
//! | [`region`] | The ordered map of typed regions (code/data/heap/stack/file). |
//! | [`address_space`] | Bundles the above; lifecycle, cloning, ELF-load bracketing, stack/heap seeding. |
//! | [`fault`] | The TLB-miss/fault handler: permission checks, demand fill, COW split, TLB load. |
//!
//! ## Collaborators
//!
//! The core is fully in-memory and drives its surroundings through traits
//! injected at each call site:
//!
//! - [`FrameAlloc`] hands out and takes back 4 KiB physical frames.
//! - [`PhysMapper`] turns a frame into a byte slice the kernel can touch
//!   (a direct map on hardware, an owned arena in tests).
//! - [`FileTable`] resolves file handles for memory-mapped regions.
//! - [`kernel_tlb::Tlb`] is the per-CPU TLB written on fault and flushed on
//!   address-space activation.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod address_space;
pub mod fault;
pub mod page_table;
pub mod pte;
pub mod region;
#[cfg(test)]
mod test_support;

pub use address_space::AddressSpace;
pub use fault::{FaultKind, vm_fault};
pub use page_table::PageTable;
pub use pte::PageEntry;
pub use region::{FileMapping, Protection, Region, RegionKind, RegionMap};

use kernel_memory_addresses::{PAGE_SIZE, PhysicalPage};

/// Errors surfaced by the virtual-memory core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmError {
    /// The frame allocator (or a gap search) came up empty.
    #[error("out of physical memory")]
    OutOfMemory,
    /// The address lies outside every region, or the access violates the
    /// region's permissions.
    #[error("bad user-space access")]
    BadAccess,
    /// Malformed arguments: overlapping regions, unaligned offsets,
    /// zero-length mappings.
    #[error("invalid argument")]
    InvalidArgument,
    /// The file handle does not refer to an open file.
    #[error("bad file handle")]
    BadFileHandle,
    /// The operation was compiled out of this build.
    #[error("operation not supported")]
    NotSupported,
    /// An error from the file collaborator, passed through unchanged.
    #[error(transparent)]
    File(#[from] FileError),
}

/// Errors reported by the [`FileTable`] collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    /// The handle is not open (closed concurrently or never valid).
    #[error("file handle is not open")]
    NotOpen,
    /// The backing store failed; the code is collaborator-defined.
    #[error("file i/o failed (code {0})")]
    Io(i32),
}

/// A process-local file descriptor, as passed to `mmap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(pub i32);

/// Physical frame provider.
///
/// Frames are 4 KiB and returned page-aligned. Allocation may block in the
/// provider and may fail; both are the caller's problem to surface.
pub trait FrameAlloc {
    /// Allocate one frame, or `None` when physical memory is exhausted.
    fn alloc_page(&mut self) -> Option<PhysicalPage>;

    /// Return a frame previously handed out by
    /// [`alloc_page`](Self::alloc_page).
    fn free_page(&mut self, page: PhysicalPage);
}

/// Converts physical frames to byte slices usable in the current (kernel)
/// address space.
///
/// On hardware this is the kernel's direct-mapped segment; the test suites
/// substitute an owned arena.
///
/// # Safety
/// Implementations hand out references with a caller-chosen lifetime; the
/// caller must ensure the frame stays allocated for that lifetime and that
/// no aliasing mutable access exists.
pub trait PhysMapper {
    /// Borrow the contents of `page` read-only.
    ///
    /// # Safety
    /// `page` must be an allocated frame, with no live mutable borrow.
    unsafe fn frame_ref<'a>(&self, page: PhysicalPage) -> &'a [u8; PAGE_SIZE];

    /// Borrow the contents of `page` mutably.
    ///
    /// # Safety
    /// `page` must be an allocated frame, with no other live borrow.
    unsafe fn frame_mut<'a>(&self, page: PhysicalPage) -> &'a mut [u8; PAGE_SIZE];
}

/// File access for memory-mapped regions.
///
/// The core only ever reads whole-page chunks during fault handling and
/// checks handle validity when a mapping is created.
pub trait FileTable {
    /// True when `handle` refers to an open file.
    fn is_open(&self, handle: FileHandle) -> bool;

    /// Read up to `dst.len()` bytes at byte `offset`; returns the number of
    /// bytes read. Short reads are legal near end-of-file; the caller
    /// zero-fills the remainder.
    fn read_at(&self, handle: FileHandle, offset: u64, dst: &mut [u8]) -> Result<usize, FileError>;
}
