//! # Kernel Configuration
//!
//! The authoritative source for the user address-space layout. These
//! constants are shared by the region map, the fault handler, and the
//! memory system calls, ensuring a single definition of where user
//! memory ends and how the initial stack and heap are seeded.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
