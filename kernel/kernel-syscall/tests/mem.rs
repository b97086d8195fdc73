//! End-to-end exercises of the memory system calls against a loaded
//! address space backed by the bitmap allocator and the linear arena.

use kernel_alloc::{BitmapFrameAlloc, LinearMemory};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress};
use kernel_syscall::{sys_mmap, sys_munmap, sys_sbrk};
use kernel_tlb::SoftTlb;
use kernel_vm::{
    AddressSpace, FaultKind, FileError, FileHandle, FileTable, PhysMapper, Protection, Region,
    VmError, vm_fault,
};
use std::collections::BTreeMap;

const RAM_BASE: PhysicalAddress = PhysicalAddress::new(0x0010_0000);
const RAM_FRAMES: usize = 64;
const CODE_BASE: u32 = 0x0040_0000;

struct Files {
    files: BTreeMap<i32, Vec<u8>>,
}

impl Files {
    fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }

    fn insert(&mut self, fd: i32, bytes: Vec<u8>) {
        self.files.insert(fd, bytes);
    }
}

impl FileTable for Files {
    fn is_open(&self, handle: FileHandle) -> bool {
        self.files.contains_key(&handle.0)
    }

    fn read_at(&self, handle: FileHandle, offset: u64, dst: &mut [u8]) -> Result<usize, FileError> {
        let data = self.files.get(&handle.0).ok_or(FileError::NotOpen)?;
        let off = usize::try_from(offset).map_err(|_| FileError::Io(-1))?;
        if off >= data.len() {
            return Ok(0);
        }
        let n = dst.len().min(data.len() - off);
        dst[..n].copy_from_slice(&data[off..off + n]);
        Ok(n)
    }
}

struct Harness {
    mem: LinearMemory,
    pmm: BitmapFrameAlloc,
    tlb: SoftTlb,
    files: Files,
}

impl Harness {
    fn new() -> Self {
        Self {
            mem: LinearMemory::new(RAM_BASE, RAM_FRAMES),
            pmm: BitmapFrameAlloc::new(RAM_BASE, RAM_FRAMES),
            tlb: SoftTlb::new(),
            files: Files::new(),
        }
    }

    fn fault(&mut self, space: &AddressSpace, kind: FaultKind, address: u32) -> Result<(), VmError> {
        vm_fault(
            space,
            kind,
            VirtualAddress::new(address),
            &mut self.pmm,
            &self.mem,
            &mut self.tlb,
            &self.files,
        )
    }
}

fn loaded_space() -> AddressSpace {
    let mut space = AddressSpace::new();
    space
        .define_region(
            VirtualAddress::new(CODE_BASE),
            0x2000,
            Protection::READ | Protection::EXEC,
        )
        .unwrap();
    space.define_stack().unwrap();
    space
}

#[test]
fn sbrk_zero_reports_the_break_without_mutation() {
    let mut h = Harness::new();
    let mut space = loaded_space();

    let v = sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap();
    let again = sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap();
    assert_eq!(v, again);
    assert_eq!(h.pmm.used_frames(), 0);
}

#[test]
fn sbrk_rounds_toward_the_request_sign() {
    let mut h = Harness::new();
    let mut space = loaded_space();

    let v = sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap();

    // 5000 bytes round up to two pages
    assert_eq!(sys_sbrk(&mut space, 5000, &mut h.pmm, &h.mem).unwrap(), v);
    let grown = sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap();
    assert_eq!(grown.as_u32(), v.as_u32() + 2 * PAGE_SIZE as u32);

    // giving the 5000 bytes back rounds down to the original break
    assert_eq!(
        sys_sbrk(&mut space, -5000, &mut h.pmm, &h.mem).unwrap(),
        grown
    );
    assert_eq!(sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap(), v);
    assert!(space.regions().is_well_formed());
}

#[test]
fn sbrk_rejects_escaping_the_gap() {
    let mut h = Harness::new();
    let mut space = loaded_space();

    // past the stack
    assert_eq!(
        sys_sbrk(&mut space, i32::MAX, &mut h.pmm, &h.mem),
        Err(VmError::OutOfMemory)
    );
    // below the heap base
    assert_eq!(
        sys_sbrk(&mut space, -(2 * PAGE_SIZE as i32), &mut h.pmm, &h.mem),
        Err(VmError::OutOfMemory)
    );
    // both failures left the break alone
    let heap = space
        .regions()
        .find_by_vbase(space.heap_start().unwrap())
        .unwrap();
    assert_eq!(heap.npages(), 1);
}

#[test]
fn sbrk_without_a_heap_is_invalid() {
    let mut h = Harness::new();
    let mut space = AddressSpace::new();
    assert_eq!(
        sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem),
        Err(VmError::InvalidArgument)
    );
}

#[test]
fn sbrk_shrink_releases_the_vacated_frames() {
    let mut h = Harness::new();
    let mut space = loaded_space();
    let v = sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap();

    sys_sbrk(&mut space, 3 * PAGE_SIZE as i32, &mut h.pmm, &h.mem).unwrap();
    // touch every grown page plus the seed page
    for i in 0..4u32 {
        h.fault(&space, FaultKind::Write, v.as_u32() - PAGE_SIZE as u32 + i * PAGE_SIZE as u32)
            .unwrap();
    }
    assert_eq!(h.pmm.used_frames(), 4);

    sys_sbrk(&mut space, -(3 * PAGE_SIZE as i32), &mut h.pmm, &h.mem).unwrap();
    assert_eq!(h.pmm.used_frames(), 1);
    assert_eq!(space.page_table().entry_count(), 1);

    // the vacated range is no longer part of the heap
    assert_eq!(h.fault(&space, FaultKind::Read, v.as_u32()), Err(VmError::BadAccess));

    space.teardown(&mut h.pmm, &h.mem);
    assert_eq!(h.pmm.free_frames(), RAM_FRAMES);
}

#[test]
fn mmap_validates_its_arguments() {
    let mut h = Harness::new();
    let mut space = loaded_space();
    h.files.insert(3, vec![0; 8192]);

    assert_eq!(
        sys_mmap(&mut space, 0, Protection::READ, FileHandle(3), 0, &h.files),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(
        sys_mmap(&mut space, 4096, Protection::READ, FileHandle(3), 123, &h.files),
        Err(VmError::InvalidArgument)
    );
    assert_eq!(
        sys_mmap(&mut space, 4096, Protection::READ, FileHandle(9), 0, &h.files),
        Err(VmError::BadFileHandle)
    );
}

#[test]
fn mmap_reads_pages_on_demand_and_munmap_revokes_them() {
    let mut h = Harness::new();
    let mut space = loaded_space();

    // a 10 KiB file with a recognizable pattern
    let mut contents = vec![0u8; 10 * 1024];
    for (i, b) in contents.iter_mut().enumerate() {
        *b = (i % 241) as u8;
    }
    h.files.insert(3, contents.clone());

    let before: Vec<Region> = space.regions().iter().cloned().collect();

    let a = sys_mmap(
        &mut space,
        10 * 1024,
        Protection::READ,
        FileHandle(3),
        0,
        &h.files,
    )
    .unwrap();

    // three pages, faulted one by one
    for page in 0..3u32 {
        h.fault(&space, FaultKind::Read, a.as_u32() + page * PAGE_SIZE as u32)
            .unwrap();
    }
    assert_eq!(h.pmm.used_frames(), 3);

    // contents line up with the file, tail page zero-filled past 10 KiB
    for page in 0..3u32 {
        let entry = space
            .page_table()
            .lookup(VirtualAddress::new(a.as_u32() + page * PAGE_SIZE as u32))
            .unwrap();
        let frame = unsafe { h.mem.frame_ref(entry.frame_word().frame()) };
        let start = page as usize * PAGE_SIZE;
        let end = contents.len().min(start + PAGE_SIZE);
        assert_eq!(&frame[..end - start], &contents[start..end]);
        if end - start < PAGE_SIZE {
            assert!(frame[end - start..].iter().all(|&b| b == 0));
        }
    }

    sys_munmap(&mut space, a, &mut h.pmm, &h.mem).unwrap();

    // region list and frames are back to their prior state
    let after: Vec<Region> = space.regions().iter().cloned().collect();
    assert_eq!(before, after);
    assert_eq!(h.pmm.used_frames(), 0);
    assert_eq!(
        h.fault(&space, FaultKind::Read, a.as_u32()),
        Err(VmError::BadAccess)
    );
}

#[test]
fn mmap_offset_window_is_honored() {
    let mut h = Harness::new();
    let mut space = loaded_space();

    let mut contents = vec![0u8; 3 * PAGE_SIZE];
    contents[PAGE_SIZE] = 0x77; // first byte of the second page
    h.files.insert(5, contents);

    let a = sys_mmap(
        &mut space,
        PAGE_SIZE as u32,
        Protection::READ,
        FileHandle(5),
        PAGE_SIZE as u64,
        &h.files,
    )
    .unwrap();
    h.fault(&space, FaultKind::Read, a.as_u32()).unwrap();

    let entry = space.page_table().lookup(a).unwrap();
    let frame = unsafe { h.mem.frame_ref(entry.frame_word().frame()) };
    assert_eq!(frame[0], 0x77);
}

#[test]
fn munmap_only_accepts_exact_file_bases() {
    let mut h = Harness::new();
    let mut space = loaded_space();
    h.files.insert(3, vec![1, 2, 3, 4]);

    let a = sys_mmap(&mut space, 4096, Protection::READ, FileHandle(3), 0, &h.files).unwrap();

    // not a mapping base
    assert_eq!(
        sys_munmap(&mut space, VirtualAddress::new(CODE_BASE), &mut h.pmm, &h.mem),
        Err(VmError::InvalidArgument)
    );
    // unaligned
    assert_eq!(
        sys_munmap(&mut space, VirtualAddress::new(a.as_u32() + 1), &mut h.pmm, &h.mem),
        Err(VmError::InvalidArgument)
    );
    // unknown address
    assert_eq!(
        sys_munmap(&mut space, VirtualAddress::new(0x2000_0000), &mut h.pmm, &h.mem),
        Err(VmError::InvalidArgument)
    );

    sys_munmap(&mut space, a, &mut h.pmm, &h.mem).unwrap();
    // unmapping twice fails cleanly
    assert_eq!(
        sys_munmap(&mut space, a, &mut h.pmm, &h.mem),
        Err(VmError::InvalidArgument)
    );
}

#[test]
fn mappings_narrow_the_sbrk_gap() {
    let mut h = Harness::new();
    let mut space = loaded_space();
    h.files.insert(3, vec![0; 4096]);

    let a = sys_mmap(&mut space, 4096, Protection::READ, FileHandle(3), 0, &h.files).unwrap();

    // the heap may now grow only up to the mapping
    let heap_top = sys_sbrk(&mut space, 0, &mut h.pmm, &h.mem).unwrap();
    let gap = a.as_u32() - heap_top.as_u32();
    assert_eq!(
        sys_sbrk(&mut space, gap as i32, &mut h.pmm, &h.mem),
        Err(VmError::OutOfMemory)
    );
    sys_sbrk(&mut space, (gap - PAGE_SIZE as u32) as i32, &mut h.pmm, &h.mem).unwrap();
}
