//! # Page-Fault Handling
//!
//! [`vm_fault`] is the software TLB-refill path. Every user memory access
//! that misses the TLB (or stores through a write-protected entry) lands
//! here, and the handler decides between four outcomes:
//!
//! 1. **Reject**: the address lies outside every region, or the access
//!    violates the region's permissions.
//! 2. **Reload**: a translation already exists; write it into the TLB.
//! 3. **Copy-on-write split**: a store hit a write-protected entry in a
//!    writable region; resolve via [`PageEntry::copy_on_write`] and install
//!    the now-writable entry.
//! 4. **Demand fill**: no translation yet; allocate a zero-filled frame,
//!    populate it from the backing file for mapped-file regions, apply the
//!    sharing policy, install, and load the TLB.

use crate::address_space::AddressSpace;
use crate::pte::PageEntry;
use crate::region::{Protection, RegionKind};
use crate::{FileTable, FrameAlloc, PhysMapper, VmError};
use alloc::sync::Arc;
use kernel_memory_addresses::VirtualAddress;
use kernel_tlb::{Tlb, load_or_replace};
use log::{trace, warn};

/// The trap classes delivered by the MMU exception path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A load or instruction fetch missed the TLB.
    Read,
    /// A store missed the TLB.
    Write,
    /// A store hit an entry whose write-enable bit is clear. This is the
    /// copy-on-write trigger.
    ReadOnly,
}

/// Handle a fault at `address` on behalf of `space`.
///
/// Returns `Ok(())` when the faulting access may be retried; the TLB then
/// holds a translation for the page. Errors are reported to the trap
/// entry, which signals the faulting process.
pub fn vm_fault(
    space: &AddressSpace,
    kind: FaultKind,
    address: VirtualAddress,
    alloc: &mut impl FrameAlloc,
    mapper: &impl PhysMapper,
    tlb: &mut impl Tlb,
    files: &impl FileTable,
) -> Result<(), VmError> {
    let force_rw = space.force_readwrite();

    let Some(region) = space.regions().find(address) else {
        warn!("{kind:?} fault at {address} outside any region");
        return Err(VmError::BadAccess);
    };

    let readable = region.prot().contains(Protection::READ);
    let writable = region.prot().contains(Protection::WRITE);
    let denied = match kind {
        FaultKind::Read => !readable,
        FaultKind::Write | FaultKind::ReadOnly => !writable && !force_rw,
    };
    if denied {
        warn!("{kind:?} fault at {address} denied by region permissions");
        return Err(VmError::BadAccess);
    }

    let page = address.page();

    // An installed translation: reload, splitting first if this is a
    // copy-on-write trigger.
    if let Some(entry) = space.page_table().lookup(address) {
        let entry = if kind == FaultKind::ReadOnly {
            let split = entry.copy_on_write(alloc, mapper)?;
            space.page_table().insert(address, Arc::clone(&split));
            split
        } else {
            entry
        };
        load_tlb(tlb, page, &entry, force_rw);
        return Ok(());
    }

    // First touch of this page: fresh zero-filled frame.
    let entry = PageEntry::new(alloc, mapper)?;
    if writable {
        entry.make_writable();
    }
    // Sharing policy by region role. Stack pages are eagerly copied on
    // clone because forked stacks diverge immediately; everything else is
    // worth sharing copy-on-write.
    match region.kind() {
        RegionKind::Unnamed | RegionKind::Heap | RegionKind::File => entry.mark_shared(),
        RegionKind::Stack => {}
    }

    if region.kind() == RegionKind::File {
        let mapping = region.file().ok_or(VmError::InvalidArgument)?;
        let offset =
            mapping.offset + u64::from(page.base().as_u32() - region.vbase().base().as_u32());
        let frame = entry.frame_word().frame();
        // Safety: the frame was just allocated and is not installed yet;
        // nothing else can reach it.
        let dst = unsafe { mapper.frame_mut(frame) };
        match files.read_at(mapping.handle, offset, dst) {
            Ok(n) => {
                // A short read near end-of-file leaves the zero fill.
                trace!("filled {n} bytes from {:?} at offset {offset}", mapping.handle);
            }
            Err(e) => {
                entry.release(alloc, mapper);
                return Err(e.into());
            }
        }
    }

    space.page_table().insert(address, Arc::clone(&entry));
    load_tlb(tlb, page, &entry, force_rw);
    Ok(())
}

fn load_tlb(
    tlb: &mut impl Tlb,
    page: kernel_memory_addresses::VirtualPage,
    entry: &PageEntry,
    force_rw: bool,
) {
    let mut lo = entry.frame_word();
    if force_rw {
        lo.set_dirty(true);
    }
    load_or_replace(tlb, page, lo);
}
