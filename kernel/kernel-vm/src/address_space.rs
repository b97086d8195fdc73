//! # Address Spaces
//!
//! An [`AddressSpace`] bundles the region map and page table of one process
//! together with the heap and stack anchors and the transient
//! force-readwrite flag used while an executable is being loaded.
//!
//! ## Lifecycle
//!
//! A space is created empty. The ELF loader defines one region per segment,
//! brackets the actual loading between [`AddressSpace::prepare_load`] and
//! [`AddressSpace::complete_load`] (so stores into read-only segments are
//! permitted while the flag is up), and then calls
//! [`AddressSpace::define_stack`], which also seeds a one-page heap above
//! the topmost loaded segment. Process fork calls
//! [`AddressSpace::duplicate`]; process exit calls
//! [`AddressSpace::teardown`], which returns every exclusively-held frame.

use crate::page_table::PageTable;
use crate::region::{FileMapping, Protection, Region, RegionKind, RegionMap};
use crate::{FrameAlloc, PhysMapper, VmError};
use kernel_info::memory::{HEAP_SEED_PAGES, USERSTACK, stack_base};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage, pages_spanning};
use kernel_tlb::{Tlb, flush_all};
use log::debug;

/// The virtual memory state of one process.
pub struct AddressSpace {
    regions: RegionMap,
    page_table: PageTable,
    heap_start: Option<VirtualPage>,
    stack_start: Option<VirtualPage>,
    force_readwrite: bool,
}

impl AddressSpace {
    /// A new, empty space: no regions, no translations.
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: RegionMap::new(),
            page_table: PageTable::new(),
            heap_start: None,
            stack_start: None,
            force_readwrite: false,
        }
    }

    /// The region map.
    #[must_use]
    pub const fn regions(&self) -> &RegionMap {
        &self.regions
    }

    /// Mutable region-map access for the memory system calls.
    pub const fn regions_mut(&mut self) -> &mut RegionMap {
        &mut self.regions
    }

    /// The page table.
    #[must_use]
    pub const fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Base of the heap region, once [`define_stack`](Self::define_stack)
    /// has run.
    #[must_use]
    pub const fn heap_start(&self) -> Option<VirtualPage> {
        self.heap_start
    }

    /// Base of the stack region, once [`define_stack`](Self::define_stack)
    /// has run.
    #[must_use]
    pub const fn stack_start(&self) -> Option<VirtualPage> {
        self.stack_start
    }

    /// Whether every region is treated as writable (ELF load in progress).
    #[must_use]
    pub const fn force_readwrite(&self) -> bool {
        self.force_readwrite
    }

    /// Define a segment at `vaddr` spanning `size` bytes.
    ///
    /// The base is aligned down and the size up to whole pages. The region
    /// is typed [`RegionKind::Unnamed`]; overlapping an existing region or
    /// leaving user space is rejected.
    pub fn define_region(
        &mut self,
        vaddr: VirtualAddress,
        size: u32,
        prot: Protection,
    ) -> Result<(), VmError> {
        let vbase = vaddr.page();
        let size = size
            .checked_add(vaddr.offset())
            .ok_or(VmError::InvalidArgument)?;
        let npages = pages_spanning(size).ok_or(VmError::InvalidArgument)?;
        let top = vbase
            .base()
            .as_u32()
            .checked_add(
                npages
                    .checked_mul(PAGE_SIZE as u32)
                    .ok_or(VmError::InvalidArgument)?,
            )
            .ok_or(VmError::InvalidArgument)?;
        let vtop = VirtualPage::containing(VirtualAddress::new(top));

        debug!("define region {vbase:?}..{vtop:?} prot={prot:?}");
        self.regions
            .insert(Region::new(vbase, vtop, prot, RegionKind::Unnamed))
    }

    /// Begin loading: treat every region as writable until
    /// [`complete_load`](Self::complete_load).
    pub const fn prepare_load(&mut self) {
        self.force_readwrite = true;
    }

    /// Finish loading: region permissions apply again.
    pub const fn complete_load(&mut self) {
        self.force_readwrite = false;
    }

    /// Create the stack region and the initial heap, and record both
    /// anchors. Returns the initial user stack pointer.
    ///
    /// The stack spans [`kernel_info::memory::STACK_PAGES`] pages ending at
    /// [`USERSTACK`]; the heap seed sits directly above the topmost
    /// already-defined region. Requires at least one defined region.
    pub fn define_stack(&mut self) -> Result<VirtualAddress, VmError> {
        let heap_base = self
            .regions
            .iter()
            .map(Region::vtop)
            .max()
            .ok_or(VmError::InvalidArgument)?;
        let heap_top = heap_base
            .base()
            .checked_add(HEAP_SEED_PAGES * PAGE_SIZE as u32)
            .ok_or(VmError::OutOfMemory)?
            .page();
        self.regions.insert(Region::new(
            heap_base,
            heap_top,
            Protection::RW,
            RegionKind::Heap,
        ))?;

        let stack = Region::new(
            stack_base(),
            USERSTACK.page(),
            Protection::RW,
            RegionKind::Stack,
        );
        if let Err(e) = self.regions.insert(stack) {
            self.regions.remove_by_vbase(heap_base);
            return Err(e);
        }

        self.heap_start = Some(heap_base);
        self.stack_start = Some(stack_base());
        debug!(
            "stack at {:?}..{USERSTACK}, heap seeded at {heap_base:?}",
            stack_base()
        );
        Ok(USERSTACK)
    }

    /// Place a file-backed region in the gap below the mappings (or the
    /// stack) and above the heap, aligned against the gap's top.
    ///
    /// Successive mappings therefore stack downward toward the heap.
    /// Returns the base of the new region.
    pub fn alloc_file_region(
        &mut self,
        length: u32,
        prot: Protection,
        mapping: FileMapping,
    ) -> Result<VirtualPage, VmError> {
        let heap_start = self.heap_start.ok_or(VmError::InvalidArgument)?;
        let heap_top = self
            .regions
            .find_by_vbase(heap_start)
            .ok_or(VmError::InvalidArgument)?
            .vtop();
        let gap_end = self
            .regions
            .neighbor_above(heap_start)
            .ok_or(VmError::InvalidArgument)?
            .vbase();

        let bytes = pages_spanning(length)
            .and_then(|n| n.checked_mul(PAGE_SIZE as u32))
            .ok_or(VmError::InvalidArgument)?;
        let vbase = gap_end
            .base()
            .as_u32()
            .checked_sub(bytes)
            .ok_or(VmError::OutOfMemory)?;
        let vbase = VirtualAddress::new(vbase).page();
        if vbase < heap_top {
            return Err(VmError::OutOfMemory);
        }

        debug!("file region {vbase:?}..{gap_end:?} for {:?}", mapping.handle);
        self.regions
            .insert(Region::with_file(vbase, gap_end, prot, mapping))?;
        Ok(vbase)
    }

    /// Clone this space for fork.
    ///
    /// The region map is copied structurally; page-table entries are shared
    /// (copy-on-write) or duplicated according to their policy bit. On
    /// failure the partially-built child is torn down and `self` is left
    /// untouched.
    pub fn duplicate(
        &self,
        alloc: &mut impl FrameAlloc,
        mapper: &impl PhysMapper,
    ) -> Result<Self, VmError> {
        let regions = self.regions.clone();
        let page_table = self.page_table.duplicate(alloc, mapper)?;
        Ok(Self {
            regions,
            page_table,
            heap_start: self.heap_start,
            stack_start: self.stack_start,
            force_readwrite: self.force_readwrite,
        })
    }

    /// Release everything: every page-table entry drops its reference, and
    /// frames not shared with another space return to the allocator.
    ///
    /// Best-effort and infallible; the space is empty afterwards.
    pub fn teardown(&mut self, alloc: &mut impl FrameAlloc, mapper: &impl PhysMapper) {
        self.page_table.teardown(alloc, mapper);
        self.regions = RegionMap::new();
        self.heap_start = None;
        self.stack_start = None;
    }

    /// Make this space current on the executing CPU.
    ///
    /// With no address-space tags in the TLB, activation simply flushes it;
    /// translations refill on demand.
    pub fn activate(&self, tlb: &mut impl Tlb) {
        flush_all(tlb);
    }

    /// Stop running on this space (e.g. before destruction elsewhere).
    pub fn deactivate(&self, tlb: &mut impl Tlb) {
        flush_all(tlb);
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("regions", &self.regions.len())
            .field("entries", &self.page_table.entry_count())
            .field("heap_start", &self.heap_start)
            .field("stack_start", &self.stack_start)
            .field("force_readwrite", &self.force_readwrite)
            .finish()
    }
}
