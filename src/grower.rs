//! Sources of heap memory.
//!
//! A [`HeapGrower`] behaves like a program break: it hands out memory by
//! moving a boundary up and takes it back by moving the boundary down.

use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use log::{debug, trace};

/// A movable boundary the heap claims memory from.
///
/// # Safety
///
/// Implementors must guarantee that the `delta` bytes starting at the address
/// returned by [`grow`](HeapGrower::grow) are initialized, readable and
/// writable, and stay so until the boundary is moved back below them with
/// [`release_to`](HeapGrower::release_to). When nobody else moves the
/// boundary, consecutive grows must return consecutive addresses.
pub unsafe trait HeapGrower {
  /// Current boundary (one past the last claimed byte).
  fn boundary(&self) -> *mut u8;

  /// Moves the boundary up by `delta` bytes and returns the previous
  /// boundary, or `None` when no more memory is available.
  fn grow(
    &mut self,
    delta: usize,
  ) -> Option<*mut u8>;

  /// Moves the boundary down to `addr`. Returns `false` when the memory could
  /// not be given back, in which case the boundary is unchanged.
  fn release_to(
    &mut self,
    addr: *mut u8,
  ) -> bool;
}

/// The process program break, moved with `sbrk(2)`.
///
/// Other code in the process (the system allocator in particular) may move
/// the break too. `Sbrk` remembers where it last left the break and refuses
/// to shrink when that no longer matches, so it never hands back memory it
/// does not own.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct Sbrk {
  last_break: Option<usize>,
}

#[cfg(unix)]
impl Sbrk {
  pub const fn new() -> Self {
    Self { last_break: None }
  }
}

#[cfg(unix)]
unsafe impl HeapGrower for Sbrk {
  fn boundary(&self) -> *mut u8 {
    unsafe { libc::sbrk(0) as *mut u8 }
  }

  fn grow(
    &mut self,
    delta: usize,
  ) -> Option<*mut u8> {
    let increment = libc::intptr_t::try_from(delta).ok()?;

    let previous = unsafe { libc::sbrk(increment) };

    if previous == usize::MAX as *mut libc::c_void {
      debug!("sbrk({}) failed", delta);
      return None;
    }

    self.last_break = Some(previous as usize + delta);
    trace!("sbrk({}) = {:?}", delta, previous);

    Some(previous as *mut u8)
  }

  fn release_to(
    &mut self,
    addr: *mut u8,
  ) -> bool {
    let current = self.boundary() as usize;

    if self.last_break != Some(current) {
      debug!(
        "program break moved to {:#x} behind our back, keeping memory",
        current
      );
      return false;
    }

    let Some(decrement) = current
      .checked_sub(addr as usize)
      .and_then(|delta| libc::intptr_t::try_from(delta).ok())
    else {
      return false;
    };

    if unsafe { libc::sbrk(-decrement) } == usize::MAX as *mut libc::c_void {
      return false;
    }

    self.last_break = Some(addr as usize);
    trace!("sbrk(-{}), break now {:?}", decrement, addr);

    true
  }
}

/// Alignment of the buffer backing an [`Arena`].
const ARENA_ALIGN: usize = 16;

/// A private, fixed-capacity program break.
///
/// The arena owns a zeroed buffer and moves its own boundary inside it, so
/// every heap built on an arena is independent from the process break and
/// from every other arena.
#[derive(Debug)]
pub struct Arena {
  base: NonNull<u8>,
  capacity: usize,
  len: usize,
}

// SAFETY: the arena exclusively owns its buffer.
unsafe impl Send for Arena {}

impl Arena {
  /// Creates an arena able to hand out `capacity` bytes.
  ///
  /// # Panics
  ///
  /// Panics if `capacity` exceeds `isize::MAX`, like `Vec::with_capacity`.
  pub fn new(capacity: usize) -> Self {
    let layout = Self::layout(capacity).expect("arena capacity overflow");

    let base = unsafe { alloc::alloc_zeroed(layout) };

    let Some(base) = NonNull::new(base) else {
      alloc::handle_alloc_error(layout);
    };

    Self {
      base,
      capacity,
      len: 0,
    }
  }

  fn layout(capacity: usize) -> Result<Layout, alloc::LayoutError> {
    Layout::from_size_align(capacity.max(1), ARENA_ALIGN)
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// Bytes currently claimed from the arena.
  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn base(&self) -> *mut u8 {
    self.base.as_ptr()
  }
}

unsafe impl HeapGrower for Arena {
  fn boundary(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.len)
  }

  fn grow(
    &mut self,
    delta: usize,
  ) -> Option<*mut u8> {
    let new_len = self.len.checked_add(delta)?;

    if new_len > self.capacity {
      debug!(
        "arena exhausted: {} + {} > {}",
        self.len, delta, self.capacity
      );
      return None;
    }

    let previous = self.boundary();
    self.len = new_len;

    Some(previous)
  }

  fn release_to(
    &mut self,
    addr: *mut u8,
  ) -> bool {
    let start = self.base.as_ptr() as usize;
    let target = addr as usize;

    if target < start || target > start + self.len {
      return false;
    }

    self.len = target - start;

    true
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    if let Ok(layout) = Self::layout(self.capacity) {
      unsafe { alloc::dealloc(self.base.as_ptr(), layout) };
    }
  }
}
