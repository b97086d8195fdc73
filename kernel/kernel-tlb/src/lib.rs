//! # Software-Refilled TLB Interface
//!
//! The architecture modeled here resolves TLB misses in software: on a miss
//! the CPU traps, the kernel computes a translation, and writes it into one
//! of the [`NUM_TLB`] entry slots. Each slot holds a pair of words:
//!
//! ```text
//! EntryHi | 31        12 | 11   6 | 5    0 |
//!         |     VPN      |  ASID  |   0    |
//!
//! EntryLo | 31        12 | 11 | 10 | 9 | 8 | 7    0 |
//!         |     PFN      | NC |  D | V | G |   0    |
//! ```
//!
//! - **VPN/PFN**: virtual/physical page number (address bits [31:12]).
//! - **D** ("dirty"): the hardware write-enable bit. A store through an entry
//!   with `D` clear traps, which is what drives the copy-on-write protocol.
//! - **V** ("valid"): the entry participates in matching.
//! - **NC**/**G**: uncached access and global matching; unused by this core.
//!
//! This crate provides the word encodings ([`EntryHi`], [`EntryLo`]), the
//! [`Tlb`] trait implemented by the hardware layer, the two bridge
//! operations the memory core actually uses ([`flush_all`],
//! [`load_or_replace`]), and [`SoftTlb`], a deterministic software model
//! for the test suites.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod bridge;
mod entry;
mod soft;

pub use bridge::{RaisedPriority, flush_all, load_or_replace};
pub use entry::{EntryHi, EntryLo};
pub use soft::SoftTlb;

/// Number of TLB entry slots.
pub const NUM_TLB: usize = 64;

/// Mask isolating the page/frame number in either TLB word.
pub const PAGE_FRAME: u32 = 0xffff_f000;

/// The TLB hardware interface.
///
/// Mirrors the probe/write/random instruction set of the modeled MMU plus
/// the processor interrupt-priority controls that must bracket every TLB
/// access. Implementations are per-CPU; the memory core never assumes
/// entries survive an address-space switch.
///
/// Callers do not use this trait directly; they go through [`flush_all`]
/// and [`load_or_replace`], which handle the priority bracketing.
pub trait Tlb {
    /// Find the slot whose `EntryHi` matches `hi`, if any.
    fn probe(&mut self, hi: EntryHi) -> Option<usize>;

    /// Write an entry pair into a specific slot.
    fn write(&mut self, hi: EntryHi, lo: EntryLo, slot: usize);

    /// Write an entry pair into a hardware-chosen slot.
    fn random(&mut self, hi: EntryHi, lo: EntryLo);

    /// Raise the interrupt priority level to block preemption of a TLB
    /// update sequence.
    fn raise_priority(&mut self);

    /// Restore the interrupt priority level raised by
    /// [`raise_priority`](Self::raise_priority).
    fn lower_priority(&mut self);
}
