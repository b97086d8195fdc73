//! # Page Entries
//!
//! A [`PageEntry`] is the metadata for one physical frame: the TLB payload
//! word (frame number plus `VALID`/`DIRTY` control bits), a reference count,
//! and the sharing-policy bit consulted when an address space is cloned.
//!
//! Entries referenced from more than one page-table slot are the mechanism
//! behind copy-on-write. The governing invariant:
//!
//! > While `refcount > 1`, the `DIRTY` (write-enable) bit is clear.
//!
//! Every new sharer clears `DIRTY` before the entry becomes visible, so the
//! first store through any sharer traps, and the fault handler resolves the
//! trap with [`PageEntry::copy_on_write`]. A writable entry is therefore
//! always solely owned, and no cross-space coordination beyond the entry's
//! own lock is ever needed.

use crate::{FrameAlloc, PhysMapper, VmError};
use alloc::sync::Arc;
use core::fmt;
use kernel_sync::SpinLock;
use kernel_tlb::EntryLo;

/// One physical frame, owned or shared.
///
/// Shared across address spaces as `Arc<PageEntry>`; the embedded reference
/// count (not the `Arc`'s) decides when the frame itself is returned to the
/// allocator. The entry's lock serializes count updates, write-enable flips,
/// and destruction.
pub struct PageEntry {
    state: SpinLock<EntryState>,
}

struct EntryState {
    /// TLB payload word: frame number plus control bits. `VALID` is set for
    /// the entry's whole lifetime; `DIRTY` tracks write permission.
    frame: EntryLo,
    /// Number of page-table slots referencing this entry. Never observable
    /// below 1 while the entry is installed anywhere.
    refcount: u32,
    /// Whether a clone of the owning address space shares this entry
    /// (copy-on-write) instead of duplicating it eagerly.
    shared: bool,
}

impl PageEntry {
    /// Allocate a fresh zero-filled frame.
    ///
    /// The entry starts solely owned, not shared, readable but not
    /// writable (`VALID` set, `DIRTY` clear).
    pub fn new(
        alloc: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<Arc<Self>, VmError> {
        let page = alloc.alloc_page().ok_or(VmError::OutOfMemory)?;
        // User memory must never leak previous contents.
        // Safety: the frame was just allocated; nobody else references it.
        unsafe { mapper.frame_mut(page) }.fill(0);
        Ok(Arc::new(Self {
            state: SpinLock::new(EntryState {
                frame: EntryLo::for_frame(page).with_valid(true),
                refcount: 1,
                shared: false,
            }),
        }))
    }

    /// The current TLB payload word.
    #[must_use]
    pub fn frame_word(&self) -> EntryLo {
        self.state.with_lock(|s| s.frame)
    }

    /// The current reference count.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.state.with_lock(|s| s.refcount)
    }

    /// Whether clones of the owning space share this entry.
    #[must_use]
    pub fn is_shared(&self) -> bool {
        self.state.with_lock(|s| s.shared)
    }

    /// Whether stores through this entry are currently permitted.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.state.with_lock(|s| s.frame.dirty())
    }

    /// Opt this entry into copy-on-write sharing on clone.
    pub fn mark_shared(&self) {
        self.state.with_lock(|s| s.shared = true);
    }

    /// Enable stores through this entry.
    ///
    /// Only legal on a solely-owned entry; shared entries become writable
    /// exclusively through [`copy_on_write`](Self::copy_on_write).
    pub fn make_writable(&self) {
        self.state.with_lock(|s| {
            debug_assert_eq!(s.refcount, 1, "writable entry must be solely owned");
            s.frame.set_dirty(true);
        });
    }

    /// Register an additional page-table slot referencing this entry.
    ///
    /// Clears `DIRTY` so the next store through any referencing slot traps.
    pub fn inc_ref(&self) {
        self.state.with_lock(|s| {
            debug_assert!(s.refcount >= 1);
            s.refcount += 1;
            s.frame.set_dirty(false);
        });
    }

    /// Drop one reference; the last reference scrubs and frees the frame.
    pub fn release(&self, alloc: &mut impl FrameAlloc, mapper: &impl PhysMapper) {
        let last = self.state.with_lock(|s| {
            debug_assert!(s.refcount >= 1);
            if s.refcount > 1 {
                s.refcount -= 1;
                None
            } else {
                s.refcount = 0;
                Some(s.frame.frame())
            }
        });
        if let Some(page) = last {
            // Scrub so stale user data never leaks into the next allocation.
            // Safety: we held the last reference; nobody can reach the frame.
            unsafe { mapper.frame_mut(page) }.fill(0);
            alloc.free_page(page);
        }
    }

    /// An independent copy: new frame, same contents, same control bits,
    /// same sharing policy. The source's reference count is untouched.
    pub fn duplicate(
        &self,
        alloc: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<Arc<Self>, VmError> {
        self.state.with_lock(|s| clone_locked(s, alloc, mapper))
    }

    /// Resolve a write to a read-only entry.
    ///
    /// A solely-owned entry just turns writable in place. A shared entry is
    /// split: the caller gets a writable private copy and the source loses
    /// the caller's reference. Either way the returned entry is solely
    /// owned and writable.
    pub fn copy_on_write(
        self: &Arc<Self>,
        alloc: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<Arc<Self>, VmError> {
        let copied = self.state.with_lock(|s| {
            debug_assert!(s.refcount >= 1);
            if s.refcount == 1 {
                s.frame.set_dirty(true);
                Ok::<_, VmError>(None)
            } else {
                let copy = clone_locked(s, alloc, mapper)?;
                copy.state.with_lock(|c| c.frame.set_dirty(true));
                s.refcount -= 1;
                Ok(Some(copy))
            }
        })?;
        Ok(copied.unwrap_or_else(|| Arc::clone(self)))
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (frame, refcount, shared) =
            self.state.with_lock(|s| (s.frame, s.refcount, s.shared));
        f.debug_struct("PageEntry")
            .field("frame", &frame)
            .field("refcount", &refcount)
            .field("shared", &shared)
            .finish()
    }
}

/// Copy `src` into a fresh entry while the source lock is held.
fn clone_locked(
    src: &EntryState,
    alloc: &mut impl FrameAlloc,
    mapper: &impl PhysMapper,
) -> Result<Arc<PageEntry>, VmError> {
    let page = alloc.alloc_page().ok_or(VmError::OutOfMemory)?;
    // Safety: `page` is fresh and `src` is pinned by the held entry lock;
    // the two frames are distinct.
    unsafe {
        let dst = mapper.frame_mut(page);
        let src_bytes = mapper.frame_ref(src.frame.frame());
        dst.copy_from_slice(src_bytes);
    }
    Ok(Arc::new(PageEntry {
        state: SpinLock::new(EntryState {
            frame: src.frame.with_frame(page),
            refcount: 1,
            shared: src.shared,
        }),
    }))
}
