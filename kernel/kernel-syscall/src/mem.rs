//! Heap-break and memory-map calls.

use kernel_memory_addresses::VirtualAddress;
use kernel_vm::{AddressSpace, FileHandle, FileTable, FrameAlloc, PhysMapper, Protection, VmError};

/// Move the heap break by `delta` bytes and return the previous break.
///
/// The effective change is rounded to whole pages, toward the request's
/// sign: growth rounds up, shrinkage rounds down. Growing into the region
/// above the heap (stack or lowest mapping) or shrinking below the heap
/// base fails with out-of-memory, leaving the break unchanged. Shrinking
/// releases the vacated pages immediately; their frames return to the
/// allocator unless another space still shares them.
#[cfg(feature = "sbrk")]
pub fn sys_sbrk(
    space: &mut AddressSpace,
    delta: i32,
    alloc: &mut impl FrameAlloc,
    mapper: &impl PhysMapper,
) -> Result<VirtualAddress, VmError> {
    use kernel_info::memory::USERSPACE_TOP;
    use kernel_memory_addresses::{PAGE_SIZE, VirtualPage};
    use log::debug;

    let heap_start = space.heap_start().ok_or(VmError::InvalidArgument)?;
    let heap = space
        .regions()
        .find_by_vbase(heap_start)
        .ok_or(VmError::InvalidArgument)?;
    let old_top = heap.vtop();

    if delta == 0 {
        return Ok(old_top.base());
    }

    let limit = space
        .regions()
        .neighbor_above(heap_start)
        .map_or(USERSPACE_TOP, |r| r.vbase().base());

    // page-round toward the sign of the request
    let page = i64::from(PAGE_SIZE as u32);
    let raw = i64::from(old_top.base().as_u32()) + i64::from(delta);
    let rounded = if delta > 0 {
        (raw + page - 1) & !(page - 1)
    } else {
        raw & !(page - 1)
    };

    if rounded < i64::from(heap_start.base().as_u32()) {
        return Err(VmError::OutOfMemory);
    }
    if rounded >= i64::from(limit.as_u32()) {
        return Err(VmError::OutOfMemory);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let new_top = VirtualPage::containing(VirtualAddress::new(rounded as u32));

    space.regions_mut().resize(heap_start, new_top)?;
    debug!("break moved {old_top:?} -> {new_top:?}");

    if new_top < old_top {
        release_range(space, new_top, old_top, alloc, mapper);
    }
    Ok(old_top.base())
}

/// Stub compiled when the `sbrk` feature is off.
#[cfg(not(feature = "sbrk"))]
pub fn sys_sbrk(
    _space: &mut AddressSpace,
    _delta: i32,
    _alloc: &mut impl FrameAlloc,
    _mapper: &impl PhysMapper,
) -> Result<VirtualAddress, VmError> {
    Err(VmError::NotSupported)
}

/// Map `length` bytes of the file behind `fd`, starting at byte `offset`,
/// into the gap between the heap and the stack. Returns the mapping base.
///
/// The mapping is placed against the top of the gap, so successive
/// mappings stack downward. `offset` must be page-aligned and `length`
/// nonzero; `fd` must be open.
#[cfg(feature = "mmap")]
pub fn sys_mmap(
    space: &mut AddressSpace,
    length: u32,
    prot: Protection,
    fd: FileHandle,
    offset: u64,
    files: &impl FileTable,
) -> Result<VirtualAddress, VmError> {
    use kernel_memory_addresses::PAGE_SIZE;
    use kernel_vm::FileMapping;
    use log::debug;

    if length == 0 || offset % PAGE_SIZE as u64 != 0 {
        return Err(VmError::InvalidArgument);
    }
    if !files.is_open(fd) {
        return Err(VmError::BadFileHandle);
    }

    let vbase = space.alloc_file_region(length, prot, FileMapping { handle: fd, offset })?;
    debug!("mapped {length} bytes of {fd:?}@{offset} at {vbase:?}");
    Ok(vbase.base())
}

/// Stub compiled when the `mmap` feature is off.
#[cfg(not(feature = "mmap"))]
pub fn sys_mmap(
    _space: &mut AddressSpace,
    _length: u32,
    _prot: Protection,
    _fd: FileHandle,
    _offset: u64,
    _files: &impl FileTable,
) -> Result<VirtualAddress, VmError> {
    Err(VmError::NotSupported)
}

/// Remove the file mapping whose base is exactly `addr`.
///
/// Only [`kernel_vm::RegionKind::File`] regions can be unmapped; the
/// region's translations are removed and their frames released.
#[cfg(feature = "mmap")]
pub fn sys_munmap(
    space: &mut AddressSpace,
    addr: VirtualAddress,
    alloc: &mut impl FrameAlloc,
    mapper: &impl PhysMapper,
) -> Result<(), VmError> {
    use kernel_vm::RegionKind;
    use log::debug;

    if !addr.is_page_aligned() {
        return Err(VmError::InvalidArgument);
    }
    let vbase = addr.page();
    let region = space
        .regions()
        .find_by_vbase(vbase)
        .ok_or(VmError::InvalidArgument)?;
    if region.kind() != RegionKind::File {
        return Err(VmError::InvalidArgument);
    }
    let vtop = region.vtop();

    space
        .regions_mut()
        .remove_by_vbase(vbase)
        .ok_or(VmError::InvalidArgument)?;
    release_range(space, vbase, vtop, alloc, mapper);
    debug!("unmapped {vbase:?}..{vtop:?}");
    Ok(())
}

/// Stub compiled when the `mmap` feature is off.
#[cfg(not(feature = "mmap"))]
pub fn sys_munmap(
    _space: &mut AddressSpace,
    _addr: VirtualAddress,
    _alloc: &mut impl FrameAlloc,
    _mapper: &impl PhysMapper,
) -> Result<(), VmError> {
    Err(VmError::NotSupported)
}

/// Remove and release every translation in `[from, to)`.
#[cfg(any(feature = "sbrk", feature = "mmap"))]
fn release_range(
    space: &AddressSpace,
    from: kernel_memory_addresses::VirtualPage,
    to: kernel_memory_addresses::VirtualPage,
    alloc: &mut impl FrameAlloc,
    mapper: &impl PhysMapper,
) {
    let mut page = from;
    while page < to {
        if let Some(entry) = space.page_table().remove(page.base()) {
            entry.release(alloc, mapper);
        }
        let Some(next) = page.next() else { break };
        page = next;
    }
}
