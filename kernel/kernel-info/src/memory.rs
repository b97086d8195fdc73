//! # Memory Layout
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │         User Space              │
//!             │  (code, data, heap, mappings,   │
//!             │   stack growing down from top)  │
//! USERSPACE_TOP ───────────────────────────────── 0x8000_0000
//!             │        Kernel Space             │
//!             │  (direct-mapped segments, not   │
//!             │   translated through the TLB    │
//!             │   refill path handled here)     │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```

use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualPage};

/// End of the user VA range; kernel space begins here.
pub const USERSPACE_TOP: VirtualAddress = VirtualAddress::new(0x8000_0000);

/// Initial user stack pointer. The stack region ends here and grows down.
pub const USERSTACK: VirtualAddress = USERSPACE_TOP;

/// Number of pages in the fixed-size user stack region.
pub const STACK_PAGES: u32 = 18;

/// Number of pages in the initial heap region seeded alongside the stack.
pub const HEAP_SEED_PAGES: u32 = 1;

/// Base of the user stack region.
#[must_use]
pub const fn stack_base() -> VirtualPage {
    VirtualPage::containing(VirtualAddress::new(
        USERSTACK.as_u32() - STACK_PAGES * PAGE_SIZE as u32,
    ))
}

const _: () = {
    assert!(USERSPACE_TOP.as_u32() % PAGE_SIZE as u32 == 0);
    assert!(STACK_PAGES > 0);
    assert!(HEAP_SEED_PAGES > 0);
    assert!(stack_base().base().as_u32() < USERSTACK.as_u32());
};
