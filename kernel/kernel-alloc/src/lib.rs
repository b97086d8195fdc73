//! # Physical Memory Collaborators
//!
//! Concrete implementations of the collaborator traits the virtual-memory
//! core is parameterized over:
//!
//! * [`BitmapFrameAlloc`] implements [`kernel_vm::FrameAlloc`]: 4 KiB frame
//!   allocation over a fixed physical region, one bit per frame, with a
//!   free count that makes leak checks a single comparison.
//! * [`LinearMemory`] implements [`kernel_vm::PhysMapper`]: an owned,
//!   page-aligned arena addressed through a linear physical-to-kernel
//!   mapping. On hardware the same role is played by the direct-mapped
//!   kernel segment; owning the storage lets the whole subsystem run and
//!   test on a host.
//!
//! Point both at the same physical range and the pair behaves like a small
//! machine's worth of RAM.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

pub mod frame_alloc;
pub mod linear_memory;

pub use frame_alloc::BitmapFrameAlloc;
pub use linear_memory::LinearMemory;
