use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalPage, VirtualPage};

/// TLB **EntryHi** word: the match key of a TLB slot.
///
/// The ASID field exists in hardware but is unused by this core; address
/// spaces are isolated by flushing on activation instead.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryHi {
    /// Hardware-zero bits.
    #[bits(6)]
    __: u8,
    /// Address-space identifier (bits 6..12). Always zero here.
    #[bits(6)]
    pub asid: u8,
    /// Virtual page number (bits 12..32).
    #[bits(20)]
    pub vpn: u32,
}

/// TLB **EntryLo** word: the translation payload of a TLB slot.
///
/// The same encoding is stored in page-table entries, so installing a
/// translation is a single word move plus the permission decision.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryLo {
    /// Hardware-zero bits.
    #[bits(8)]
    __: u8,
    /// Global: match regardless of ASID. Unused by this core.
    pub global: bool,
    /// Valid: the entry may be used for translation.
    pub valid: bool,
    /// Dirty: hardware write-enable. A store through an entry with this bit
    /// clear raises a read-only fault.
    pub dirty: bool,
    /// Uncached access. Unused by this core.
    pub nocache: bool,
    /// Physical frame number (bits 12..32).
    #[bits(20)]
    pub pfn: u32,
}

impl EntryHi {
    /// The match key for a virtual page.
    #[inline]
    #[must_use]
    pub const fn for_page(page: VirtualPage) -> Self {
        Self::new().with_vpn(page.number())
    }

    /// A key that can never match a user translation: one kernel-segment
    /// page per slot, so invalidated slots also never collide with each
    /// other.
    #[inline]
    #[must_use]
    pub const fn invalid(slot: usize) -> Self {
        Self::new().with_vpn(0x8_0000 + slot as u32)
    }

    /// The virtual page this key matches.
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage::containing(kernel_memory_addresses::VirtualAddress::new(
            self.vpn() << 12,
        ))
    }
}

impl EntryLo {
    /// A translation to `frame` with all control bits clear.
    #[inline]
    #[must_use]
    pub const fn for_frame(frame: PhysicalPage) -> Self {
        Self::new().with_pfn(frame.number())
    }

    /// The physical frame this entry translates to.
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::from_number(self.pfn())
    }

    /// Replace the frame, keeping every control bit.
    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage) -> Self {
        self.with_pfn(frame.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

    #[test]
    fn entryhi_encoding() {
        let page = VirtualPage::containing(VirtualAddress::new(0x4000_2abc));
        let hi = EntryHi::for_page(page);
        assert_eq!(hi.into_bits(), 0x4000_2000);
        assert_eq!(hi.page(), page);
        assert_eq!(hi.asid(), 0);
    }

    #[test]
    fn entrylo_encoding() {
        let frame = PhysicalPage::containing(PhysicalAddress::new(0x0012_3000));
        let lo = EntryLo::for_frame(frame).with_valid(true).with_dirty(true);
        assert_eq!(lo.into_bits(), 0x0012_3000 | 0x200 | 0x400);
        assert_eq!(lo.frame(), frame);
        assert!(lo.valid());
        assert!(lo.dirty());
        assert!(!lo.global());
        assert!(!lo.nocache());
    }

    #[test]
    fn with_frame_keeps_control_bits() {
        let a = PhysicalPage::from_number(5);
        let b = PhysicalPage::from_number(9);
        let lo = EntryLo::for_frame(a).with_valid(true).with_dirty(true);
        let moved = lo.with_frame(b);
        assert_eq!(moved.frame(), b);
        assert!(moved.valid());
        assert!(moved.dirty());
    }

    #[test]
    fn invalid_keys_are_distinct_kernel_pages() {
        let a = EntryHi::invalid(0);
        let b = EntryHi::invalid(1);
        assert_ne!(a.into_bits(), b.into_bits());
        // both sit above the user half
        assert!(a.page().base().as_u32() >= 0x8000_0000);
    }
}
