//! Bitmap-based physical frame allocator.

use alloc::vec;
use alloc::vec::Vec;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_vm::FrameAlloc;
use log::warn;

/// Tracks free/used 4 KiB frames in a fixed physical region, one bit per
/// frame.
///
/// Allocation scans for the first clear bit; freeing clears it again.
/// Double frees and frames outside the managed region are programming
/// errors and panic. The allocator also maintains a free count so tests
/// (and diagnostics) can observe leaks cheaply.
pub struct BitmapFrameAlloc {
    bitmap: Vec<u64>,
    base: PhysicalPage,
    nframes: usize,
    free: usize,
}

impl BitmapFrameAlloc {
    /// Manage `nframes` frames starting at `base` (page-aligned).
    #[must_use]
    pub fn new(base: PhysicalAddress, nframes: usize) -> Self {
        debug_assert_eq!(base.offset(), 0, "region base must be page-aligned");
        let mut bitmap = vec![0_u64; nframes.div_ceil(64)];
        // bits past the end of the region count as permanently used
        if nframes % 64 != 0 {
            if let Some(last) = bitmap.last_mut() {
                *last |= !0 << (nframes % 64);
            }
        }
        Self {
            bitmap,
            base: base.page(),
            nframes,
            free: nframes,
        }
    }

    /// Frames currently available.
    #[must_use]
    pub const fn free_frames(&self) -> usize {
        self.free
    }

    /// Frames currently handed out.
    #[must_use]
    pub const fn used_frames(&self) -> usize {
        self.nframes - self.free
    }

    /// Total frames under management.
    #[must_use]
    pub const fn nframes(&self) -> usize {
        self.nframes
    }

    fn index_of(&self, page: PhysicalPage) -> usize {
        let idx = page
            .number()
            .checked_sub(self.base.number())
            .expect("frame below the managed region") as usize;
        assert!(idx < self.nframes, "frame beyond the managed region");
        idx
    }
}

impl FrameAlloc for BitmapFrameAlloc {
    fn alloc_page(&mut self) -> Option<PhysicalPage> {
        for (word_idx, word) in self.bitmap.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = (!*word).trailing_zeros() as usize;
                *word |= 1 << bit;
                self.free -= 1;
                let idx = word_idx * 64 + bit;
                return Some(PhysicalPage::from_number(self.base.number() + idx as u32));
            }
        }
        warn!("physical memory exhausted ({} frames in use)", self.nframes);
        None
    }

    fn free_page(&mut self, page: PhysicalPage) {
        let idx = self.index_of(page);
        let (word, bit) = (idx / 64, idx % 64);
        assert!(
            self.bitmap[word] & (1 << bit) != 0,
            "double free of {page:?}"
        );
        self.bitmap[word] &= !(1 << bit);
        self.free += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: PhysicalAddress = PhysicalAddress::new(0x0010_0000);

    #[test]
    fn hands_out_distinct_frames_until_exhausted() {
        let mut pmm = BitmapFrameAlloc::new(BASE, 3);
        let a = pmm.alloc_page().unwrap();
        let b = pmm.alloc_page().unwrap();
        let c = pmm.alloc_page().unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_eq!(pmm.free_frames(), 0);
        assert!(pmm.alloc_page().is_none());
    }

    #[test]
    fn freed_frames_are_reused() {
        let mut pmm = BitmapFrameAlloc::new(BASE, 2);
        let a = pmm.alloc_page().unwrap();
        let _b = pmm.alloc_page().unwrap();
        pmm.free_page(a);
        assert_eq!(pmm.free_frames(), 1);
        assert_eq!(pmm.alloc_page(), Some(a));
    }

    #[test]
    fn free_count_tracks_usage() {
        let mut pmm = BitmapFrameAlloc::new(BASE, 100);
        assert_eq!(pmm.free_frames(), 100);
        let pages: Vec<_> = (0..70).map(|_| pmm.alloc_page().unwrap()).collect();
        assert_eq!(pmm.used_frames(), 70);
        for p in pages {
            pmm.free_page(p);
        }
        assert_eq!(pmm.free_frames(), 100);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let mut pmm = BitmapFrameAlloc::new(BASE, 2);
        let a = pmm.alloc_page().unwrap();
        pmm.free_page(a);
        pmm.free_page(a);
    }

    #[test]
    fn partial_last_word_is_respected() {
        // 65 frames straddle a word boundary
        let mut pmm = BitmapFrameAlloc::new(BASE, 65);
        for _ in 0..65 {
            assert!(pmm.alloc_page().is_some());
        }
        assert!(pmm.alloc_page().is_none());
    }
}
