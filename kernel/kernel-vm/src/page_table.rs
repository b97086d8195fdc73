//! # Two-Level Page Table
//!
//! The sparse map from virtual page to [`PageEntry`]. The top level has
//! 2048 slots (VA bits [31:21]); each occupied slot holds a second-level
//! table of 512 entry references (VA bits [20:12]) plus a live counter,
//! so second-level tables are reclaimed as soon as they empty out.
//!
//! One table-wide lock guards the *shape* (materializing and freeing
//! second-level tables, filling and clearing slots). The contents of each
//! entry stay under that entry's own lock, which keeps the hot
//! copy-on-write path off the table lock. Lock order is always table
//! first, then entry, never the reverse.

use crate::pte::PageEntry;
use crate::{FrameAlloc, PhysMapper, VmError};
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;

/// Number of top-level slots (VA bits [31:21]).
pub const L1_ENTRIES: usize = 1 << 11;

/// Number of entries per second-level table (VA bits [20:12]).
pub const L2_ENTRIES: usize = 1 << 9;

/// Index into the top-level table (derived from VA bits [31:21]).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L1Index(u16);

impl L1Index {
    /// Extract the index from a virtual address.
    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress) -> Self {
        Self((va.as_u32() >> 21) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Index into a second-level table (derived from VA bits [20:12]).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L2Index(u16);

impl L2Index {
    /// Extract the index from a virtual address.
    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress) -> Self {
        Self(((va.as_u32() >> 12) & 0x1ff) as u16)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// A second-level table: 512 optional entry references and how many of
/// them are occupied.
struct L2Table {
    entries: [Option<Arc<PageEntry>>; L2_ENTRIES],
    live: usize,
}

impl L2Table {
    fn new() -> Box<Self> {
        Box::new(Self {
            entries: [const { None }; L2_ENTRIES],
            live: 0,
        })
    }
}

type Shape = [Option<Box<L2Table>>; L1_ENTRIES];

/// The per-address-space page table.
pub struct PageTable {
    shape: SpinLock<Box<Shape>>,
}

impl PageTable {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shape: SpinLock::new(Box::new([const { None }; L1_ENTRIES])),
        }
    }

    /// The entry installed for the page containing `va`, if any.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<Arc<PageEntry>> {
        let (l1, l2) = (L1Index::of(va), L2Index::of(va));
        self.shape.with_lock(|t| {
            t[l1.as_usize()]
                .as_ref()
                .and_then(|l2t| l2t.entries[l2.as_usize()].clone())
        })
    }

    /// Install `entry` in the slot for the page containing `va`, lazily
    /// materializing the second-level table.
    ///
    /// Replacing an occupied slot is legal and leaves the live count
    /// untouched; the caller owns the previous entry's lifecycle (the
    /// fault handler takes this path when a copy-on-write split retires
    /// the old entry).
    pub fn insert(&self, va: VirtualAddress, entry: Arc<PageEntry>) {
        let (l1, l2) = (L1Index::of(va), L2Index::of(va));
        self.shape.with_lock(|t| {
            let l2t = t[l1.as_usize()].get_or_insert_with(L2Table::new);
            let slot = &mut l2t.entries[l2.as_usize()];
            if slot.is_none() {
                l2t.live += 1;
            }
            *slot = Some(entry);
        });
    }

    /// Clear the slot for the page containing `va` and return what it held.
    ///
    /// Frees the second-level table once its last entry leaves.
    pub fn remove(&self, va: VirtualAddress) -> Option<Arc<PageEntry>> {
        let (l1, l2) = (L1Index::of(va), L2Index::of(va));
        self.shape.with_lock(|t| {
            let slot = &mut t[l1.as_usize()];
            let l2t = slot.as_mut()?;
            let old = l2t.entries[l2.as_usize()].take()?;
            l2t.live -= 1;
            if l2t.live == 0 {
                *slot = None;
            }
            Some(old)
        })
    }

    /// Total number of installed entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.shape
            .with_lock(|t| t.iter().flatten().map(|l2t| l2t.live).sum())
    }

    /// The clone walk used by address-space duplication.
    ///
    /// Entries marked shared gain a reference and appear in both tables;
    /// the rest are deep-copied. On failure the partial copy is torn down
    /// and this table is left exactly as it was.
    pub fn duplicate(
        &self,
        alloc: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<Self, VmError> {
        let mut new = Self::new();
        let dst = new.shape.get_mut();

        let result = self.shape.with_lock(|src| {
            for (slot, l1) in src.iter().enumerate() {
                let Some(l2t) = l1 else { continue };
                let copy = dst[slot].insert(L2Table::new());
                for (i, entry) in l2t.entries.iter().enumerate() {
                    let Some(entry) = entry else { continue };
                    let cloned = if entry.is_shared() {
                        entry.inc_ref();
                        Arc::clone(entry)
                    } else {
                        entry.duplicate(alloc, mapper)?
                    };
                    copy.entries[i] = Some(cloned);
                    copy.live += 1;
                }
            }
            Ok(())
        });

        match result {
            Ok(()) => Ok(new),
            Err(e) => {
                new.teardown(alloc, mapper);
                Err(e)
            }
        }
    }

    /// Release every entry and reclaim all second-level tables.
    ///
    /// Explicit rather than `Drop` because disposing a frame needs the
    /// collaborators. Best-effort by construction: nothing here can fail.
    pub fn teardown(&self, alloc: &mut impl FrameAlloc, mapper: &impl PhysMapper) {
        self.shape.with_lock(|t| {
            for slot in t.iter_mut() {
                let Some(mut l2t) = slot.take() else { continue };
                for entry in &mut l2t.entries {
                    if let Some(entry) = entry.take() {
                        l2t.live -= 1;
                        entry.release(alloc, mapper);
                    }
                }
                debug_assert_eq!(l2t.live, 0);
            }
        });
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PageTable")
            .field("entries", &self.entry_count())
            .finish_non_exhaustive()
    }
}
