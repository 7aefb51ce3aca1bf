//! # brkalloc - A First-Fit Heap Allocator
//!
//! This crate provides a **first-fit free-list allocator** that carves
//! variable-sized blocks out of one contiguous region claimed with the
//! `sbrk` system call (or any other [`HeapGrower`]).
//!
//! ## Overview
//!
//! Every block starts with a header and the blocks tile the region without
//! gaps, so the block list is also the memory map:
//!
//! ```text
//!   Managed region:
//!
//!   ┌────────┬──────────┬────────┬──────┬────────┬──────────────────┐
//!   │ header │ payload  │ header │ free │ header │     payload      │
//!   │  used  │  (A)     │  free  │      │  used  │       (C)        │
//!   └────────┴──────────┴────────┴──────┴────────┴──────────────────┘
//!   ▲                                                               ▲
//!   │                                                               │
//!  Region start (root block)                              Program break
//!
//!   Blocks are linked both ways in address order.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - 4 byte granularity (align!, checked_align)
//!   ├── block      - Block header layout (internal)
//!   ├── config     - HeapConfig tunables
//!   ├── error      - AllocError
//!   ├── grower     - HeapGrower, Sbrk, Arena
//!   ├── heap       - Heap: search, split, fusion, growth, validation
//!   ├── inspect    - Block iterator, statistics, invariant checks
//!   └── locked     - LockedHeap, a Heap behind a mutex
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Arena, Heap};
//!
//! let mut heap = Heap::with_grower(Arena::new(4096));
//!
//! let ptr = heap.allocate(8) as *mut u32;
//!
//! unsafe {
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!
//!     heap.deallocate(ptr as *mut u8);
//! }
//!
//! assert!(heap.is_empty());
//! ```
//!
//! ## How It Works
//!
//! - **allocate** scans the blocks from the start for the first free one
//!   that is large enough. When the leftover can hold a header plus a
//!   minimum payload, the block is split and the leftover stays free.
//!   When nothing fits, the region grows by one header plus the payload.
//! - **deallocate** marks the block free, merges it into a free predecessor
//!   and absorbs a free successor. A free block at the end of the region is
//!   handed back to the grower.
//! - **reallocate** shrinks in place, grows into a free successor when that
//!   is enough, and otherwise moves the data to a fresh block.
//!
//! ```text
//!   Split:                          Fusion:
//!
//!   ┌───┬────────────────────┐      ┌───┬──────┬───┬──────┐
//!   │ H │        free        │      │ H │ free │ H │ free │
//!   └───┴────────────────────┘      └───┴──────┴───┴──────┘
//!            │                                 │
//!            ▼                                 ▼
//!   ┌───┬──────┬───┬─────────┐      ┌───┬─────────────────┐
//!   │ H │ used │ H │  free   │      │ H │      free       │
//!   └───┴──────┴───┴─────────┘      └───┴─────────────────┘
//! ```
//!
//! Pointers handed to `reallocate`/`deallocate` are checked against the
//! block they claim to start: null, foreign and interior pointers are
//! ignored instead of corrupting the heap.
//!
//! ## Limitations
//!
//! - **Single-threaded core**: use [`LockedHeap`] to share a heap
//! - **4 byte granularity**: payloads carry no stronger alignment guarantee
//! - **Linear search**: allocation cost grows with the number of blocks
//! - **Shared program break**: [`Sbrk`] competes with the system allocator
//!   for the break and gives up on shrinking when someone else moved it
//!
//! ## Safety
//!
//! Allocation is safe. Freeing and resizing take raw pointers and are
//! `unsafe`: a pointer into the heap that was not handed out by it may be
//! mistaken for a block.

pub mod align;
mod block;
mod config;
mod error;
mod grower;
mod heap;
mod inspect;
mod locked;

pub use block::HEADER_SIZE;
pub use config::{DEFAULT_MIN_SPLIT_PAYLOAD, HeapConfig};
pub use error::AllocError;
#[cfg(unix)]
pub use grower::Sbrk;
pub use grower::{Arena, HeapGrower};
pub use heap::Heap;
pub use inspect::{BlockInfo, Blocks, HeapStats, print_alloc};
pub use locked::LockedHeap;
