//! The two TLB operations the memory core performs: dropping every entry on
//! an address-space switch, and installing one translation after a fault.
//!
//! Both run entirely inside a [`RaisedPriority`] bracket so an interrupt can
//! never observe (or clobber) a half-written slot pair.

use crate::{EntryHi, EntryLo, NUM_TLB, Tlb};
use log::trace;

/// RAII bracket that holds the interrupt priority raised while giving
/// access to the TLB primitives.
///
/// Created at the top of each bridge operation; dropping it restores the
/// previous priority level.
pub struct RaisedPriority<'a, T: Tlb + ?Sized> {
    tlb: &'a mut T,
}

impl<'a, T: Tlb + ?Sized> RaisedPriority<'a, T> {
    pub fn new(tlb: &'a mut T) -> Self {
        tlb.raise_priority();
        Self { tlb }
    }

    #[inline]
    pub fn probe(&mut self, hi: EntryHi) -> Option<usize> {
        self.tlb.probe(hi)
    }

    #[inline]
    pub fn write(&mut self, hi: EntryHi, lo: EntryLo, slot: usize) {
        self.tlb.write(hi, lo, slot);
    }

    #[inline]
    pub fn random(&mut self, hi: EntryHi, lo: EntryLo) {
        self.tlb.random(hi, lo);
    }
}

impl<T: Tlb + ?Sized> Drop for RaisedPriority<'_, T> {
    fn drop(&mut self) {
        self.tlb.lower_priority();
    }
}

/// Invalidate every TLB slot.
///
/// Called on address-space activation and deactivation; with no ASID
/// tagging in use, this is what keeps translations from leaking between
/// processes.
pub fn flush_all(tlb: &mut impl Tlb) {
    let mut tlb = RaisedPriority::new(tlb);
    for slot in 0..NUM_TLB {
        tlb.write(EntryHi::invalid(slot), EntryLo::new(), slot);
    }
}

/// Install the translation `lo` for `page`.
///
/// If a slot already matches the page it is overwritten in place (the
/// permission bits may have changed, e.g. after a copy-on-write split);
/// otherwise a hardware-chosen slot is replaced.
pub fn load_or_replace(tlb: &mut impl Tlb, page: kernel_memory_addresses::VirtualPage, lo: EntryLo) {
    let hi = EntryHi::for_page(page);
    trace!("tlb load {:?} -> {:?} (dirty={})", page, lo.frame(), lo.dirty());

    let mut tlb = RaisedPriority::new(tlb);
    match tlb.probe(hi) {
        Some(slot) => tlb.write(hi, lo, slot),
        None => tlb.random(hi, lo),
    }
}
