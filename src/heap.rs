use std::ptr::{self, NonNull};

use log::{debug, trace, warn};

#[cfg(unix)]
use crate::grower::Sbrk;
use crate::{
  align::{ALIGNMENT, checked_align},
  block::{Block, HEADER_SIZE, MAX_REGION_LEN},
  config::HeapConfig,
  error::AllocError,
  grower::HeapGrower,
};

/// Outcome of a first-fit scan over the block directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
  /// Offset of the first free block large enough for the request.
  Found(usize),
  /// Nothing fits. `last` is the tail of the directory, if any.
  Missed { last: Option<usize> },
}

/// First-fit heap over a single contiguous region claimed from a
/// [`HeapGrower`].
///
/// Every block is a [`Block`] header followed by its payload, and the blocks
/// tile the region without gaps: the directory order is the address order.
pub struct Heap<G: HeapGrower> {
  grower: G,
  config: HeapConfig,
  /// Start of the managed region, null while the heap is empty.
  base: *mut u8,
  /// Offset of the first block.
  root: Option<usize>,
  /// Length of the managed region in bytes.
  len: usize,
}

// SAFETY: the heap exclusively owns its region and its grower.
unsafe impl<G: HeapGrower + Send> Send for Heap<G> {}

#[cfg(unix)]
impl Heap<Sbrk> {
  /// Creates a heap on top of the process program break.
  pub const fn new() -> Self {
    Self::with_grower(Sbrk::new())
  }
}

#[cfg(unix)]
impl Default for Heap<Sbrk> {
  fn default() -> Self {
    Self::new()
  }
}

impl<G: HeapGrower> Heap<G> {
  pub const fn with_grower(grower: G) -> Self {
    Self {
      grower,
      config: HeapConfig::DEFAULT,
      base: ptr::null_mut(),
      root: None,
      len: 0,
    }
  }

  pub fn with_config(
    grower: G,
    config: HeapConfig,
  ) -> Self {
    Self {
      config,
      ..Self::with_grower(grower)
    }
  }

  pub fn config(&self) -> &HeapConfig {
    &self.config
  }

  pub fn grower(&self) -> &G {
    &self.grower
  }

  /// Returns `true` when no memory is currently claimed.
  pub fn is_empty(&self) -> bool {
    self.root.is_none()
  }

  /// Length in bytes of the managed region, headers included.
  pub fn region_len(&self) -> usize {
    self.len
  }

  /// Start of the managed region, null while the heap is empty.
  pub fn region_start(&self) -> *mut u8 {
    self.base
  }

  pub(crate) fn root(&self) -> Option<usize> {
    self.root
  }

  /// Allocates at least `size` bytes. Returns null when the grower is out of
  /// memory.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    self
      .try_allocate(size)
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Resizes the allocation at `ptr`, moving it if it cannot grow in place.
  ///
  /// A null `ptr` behaves like [`allocate`](Heap::allocate). Returns null if
  /// `ptr` is not a live allocation or if a move was needed and the heap is
  /// out of memory; in the latter case the original allocation is untouched.
  ///
  /// # Safety
  ///
  /// If `ptr` lies inside the managed region it must be a pointer returned by
  /// this heap. Any other address inside the region may be mistaken for a
  /// block when the bytes before it happen to look like a header. Null and
  /// addresses outside the region are always rejected safely.
  pub unsafe fn reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.try_reallocate(ptr, size) }
      .map_or(ptr::null_mut(), NonNull::as_ptr)
  }

  /// Frees the allocation at `ptr`. Null and unknown pointers are ignored.
  ///
  /// # Safety
  ///
  /// Same contract as [`reallocate`](Heap::reallocate).
  pub unsafe fn deallocate(
    &mut self,
    ptr: *mut u8,
  ) {
    if ptr.is_null() {
      return;
    }

    if let Err(err) = unsafe { self.try_deallocate(ptr) } {
      debug!("deallocate ignored: {}", err);
    }
  }

  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let size = request_size(size)?;

    let offset = match self.find_block(size) {
      Fit::Found(offset) => {
        self.claim(offset, size);
        offset
      }
      Fit::Missed { last } => self.extend_heap(last, size)?,
    };

    trace!("allocate({}) -> block {:#x}", size, offset);

    Ok(self.payload_ptr(offset))
  }

  /// # Safety
  ///
  /// See [`reallocate`](Heap::reallocate).
  pub unsafe fn try_reallocate(
    &mut self,
    ptr: *mut u8,
    size: usize,
  ) -> Result<NonNull<u8>, AllocError> {
    let Some(current) = NonNull::new(ptr) else {
      return self.try_allocate(size);
    };

    if !self.valid_addr(ptr) {
      return Err(AllocError::InvalidPointer { addr: ptr as usize });
    }

    let size = request_size(size)?;
    let offset = self.get_block(ptr);
    let block = self.read(offset);

    if block.size() >= size {
      self.trim(offset, size);
      return Ok(current);
    }

    if let Some(next) = block.next() {
      let successor = self.read(next);

      if successor.is_free() && block.size() + HEADER_SIZE + successor.size() >= size {
        trace!("reallocate: growing block {:#x} into its successor", offset);
        self.fusion(offset);
        self.trim(offset, size);
        return Ok(current);
      }
    }

    let moved = self.try_allocate(size)?;

    unsafe {
      ptr::copy_nonoverlapping(ptr, moved.as_ptr(), block.size().min(size));
    }

    self.release(offset);

    debug!("reallocate: moved {:?} -> {:?} ({} bytes)", ptr, moved, size);

    Ok(moved)
  }

  /// # Safety
  ///
  /// See [`reallocate`](Heap::reallocate).
  pub unsafe fn try_deallocate(
    &mut self,
    ptr: *mut u8,
  ) -> Result<(), AllocError> {
    if !self.valid_addr(ptr) {
      return Err(AllocError::InvalidPointer { addr: ptr as usize });
    }

    self.release(self.get_block(ptr));

    Ok(())
  }

  /// Scans the directory from the root for the first free block holding at
  /// least `size` bytes.
  fn find_block(
    &self,
    size: usize,
  ) -> Fit {
    let mut last = None;
    let mut current = self.root;

    while let Some(offset) = current {
      let block = self.read(offset);

      if block.is_free() && block.size() >= size {
        return Fit::Found(offset);
      }

      last = Some(offset);
      current = block.next();
    }

    Fit::Missed { last }
  }

  /// Marks a found block used, splitting off the excess when it is worth a
  /// block of its own.
  fn claim(
    &mut self,
    offset: usize,
    size: usize,
  ) {
    let mut block = self.read(offset);

    if block.size() - size >= self.config.split_threshold() {
      self.split_block(offset, size);
      block = self.read(offset);
    }

    block.set_free(false);
    self.write(offset, block);
  }

  /// Shrinks a used block to `size` bytes when the excess can stand as a free
  /// block, merging that remainder with a free successor.
  fn trim(
    &mut self,
    offset: usize,
    size: usize,
  ) {
    let block = self.read(offset);

    if block.size() - size < self.config.split_threshold() {
      return;
    }

    let remainder = self.split_block(offset, size);
    self.fusion(remainder);
  }

  /// Carves a free block out of the tail of the block at `offset`, leaving it
  /// exactly `size` bytes long. Returns the new block's offset.
  ///
  /// The caller guarantees the remainder keeps at least one header plus the
  /// minimum split payload.
  fn split_block(
    &mut self,
    offset: usize,
    size: usize,
  ) -> usize {
    let mut block = self.read(offset);

    debug_assert!(block.size() >= size + self.config.split_threshold());

    let split = block.payload() + size;
    let remainder = Block::new(
      split,
      block.size() - size - HEADER_SIZE,
      true,
      Some(offset),
      block.next(),
    );

    if let Some(next) = block.next() {
      let mut successor = self.read(next);
      successor.set_prev(Some(split));
      self.write(next, successor);
    }

    block.set_size(size);
    block.set_next(Some(split));

    self.write(split, remainder);
    self.write(offset, block);

    trace!(
      "split block {:#x}: {} + {} bytes free at {:#x}",
      offset, size, remainder.size(), split
    );

    split
  }

  /// Absorbs the successor of the block at `offset` if it is free.
  fn fusion(
    &mut self,
    offset: usize,
  ) -> usize {
    let mut block = self.read(offset);

    let Some(next) = block.next() else {
      return offset;
    };

    let successor = self.read(next);

    if !successor.is_free() {
      return offset;
    }

    block.set_size(block.size() + HEADER_SIZE + successor.size());
    block.set_next(successor.next());

    if let Some(after) = successor.next() {
      let mut following = self.read(after);
      following.set_prev(Some(offset));
      self.write(after, following);
    }

    self.write(offset, block);

    trace!("fused block {:#x} into {:#x}", next, offset);

    offset
  }

  /// Claims room for one more block from the grower and appends it after
  /// `last`, or makes it the root when the heap is empty.
  fn extend_heap(
    &mut self,
    last: Option<usize>,
    size: usize,
  ) -> Result<usize, AllocError> {
    let exhausted = AllocError::ResourceExhausted { requested: size };

    let total = HEADER_SIZE.checked_add(size).ok_or(exhausted)?;

    if self.len.checked_add(total).is_none_or(|len| len > MAX_REGION_LEN) {
      return Err(exhausted);
    }

    let previous = self.grower.grow(total).ok_or(exhausted)?;

    let offset = if self.base.is_null() {
      self.base = previous;
      0
    } else {
      let end = self.base.wrapping_add(self.len);

      if previous != end {
        warn!(
          "grower returned {:?} but the heap ends at {:?}, giving it back",
          previous, end
        );
        self.grower.release_to(previous);
        return Err(exhausted);
      }

      self.len
    };

    self.len += total;
    self.write(offset, Block::new(offset, size, false, last, None));

    match last {
      Some(tail) => {
        let mut tail_block = self.read(tail);
        tail_block.set_next(Some(offset));
        self.write(tail, tail_block);
      }
      None => self.root = Some(offset),
    }

    debug!(
      "extended heap by {} bytes, block {:#x}, region {} bytes",
      total, offset, self.len
    );

    Ok(offset)
  }

  /// Frees the block at `offset`, merges it with free neighbours and returns
  /// the region's tail to the grower when it ends up free.
  fn release(
    &mut self,
    offset: usize,
  ) {
    let mut block = self.read(offset);
    block.set_free(true);
    self.write(offset, block);

    let mut offset = offset;

    if let Some(prev) = block.prev() {
      if self.read(prev).is_free() {
        offset = self.fusion(prev);
      }
    }

    if self.read(offset).next().is_some() {
      self.fusion(offset);
    } else {
      self.shrink(offset);
    }
  }

  /// Gives the free tail block at `offset` back to the grower.
  fn shrink(
    &mut self,
    offset: usize,
  ) {
    let block = self.read(offset);
    let start = self.base.wrapping_add(offset);

    if !self.grower.release_to(start) {
      warn!(
        "grower refused to shrink to {:?}, keeping {} bytes as a free block",
        start,
        HEADER_SIZE + block.size()
      );
      return;
    }

    match block.prev() {
      Some(prev) => {
        let mut prev_block = self.read(prev);
        prev_block.set_next(None);
        self.write(prev, prev_block);
      }
      None => {
        self.root = None;
        self.base = ptr::null_mut();
      }
    }

    self.len = offset;

    debug!("shrank heap to {} bytes", self.len);
  }

  /// Header offset for a payload pointer. Performs no validation.
  fn get_block(
    &self,
    ptr: *const u8,
  ) -> usize {
    (ptr as usize)
      .wrapping_sub(self.base as usize)
      .wrapping_sub(HEADER_SIZE)
  }

  /// Returns `true` when `ptr` is the payload start of a block currently
  /// allocated from this heap.
  pub fn valid_addr(
    &self,
    ptr: *const u8,
  ) -> bool {
    if self.root.is_none() {
      return false;
    }

    let start = self.base as usize;
    let addr = ptr as usize;

    if addr <= start || addr >= start + self.len || addr - start < HEADER_SIZE {
      return false;
    }

    let offset = self.get_block(ptr);
    let block = self.read(offset);

    if block.payload() != addr - start || block.is_free() {
      return false;
    }

    // A header left behind by a merge still carries a matching payload
    // start, so require the directory to actually link to it.
    match block.prev() {
      None => self.root == Some(offset),
      Some(prev) if self.contains_header(prev) => self.read(prev).next() == Some(offset),
      Some(_) => false,
    }
  }

  fn contains_header(
    &self,
    offset: usize,
  ) -> bool {
    offset
      .checked_add(HEADER_SIZE)
      .is_some_and(|end| end <= self.len)
  }

  fn payload_ptr(
    &self,
    offset: usize,
  ) -> NonNull<u8> {
    let ptr = self.base.wrapping_add(offset + HEADER_SIZE);

    // SAFETY: `base` is non-null whenever a block exists.
    unsafe { NonNull::new_unchecked(ptr) }
  }

  pub(crate) fn read(
    &self,
    offset: usize,
  ) -> Block {
    debug_assert!(self.contains_header(offset));

    // SAFETY: callers only pass offsets of headers inside the managed region,
    // which the grower keeps readable. Any bit pattern is a valid `Block`.
    unsafe { ptr::read_unaligned(self.base.add(offset).cast::<Block>()) }
  }

  fn write(
    &mut self,
    offset: usize,
    block: Block,
  ) {
    debug_assert!(self.contains_header(offset));

    // SAFETY: as in `read`, and the region is writable.
    unsafe { ptr::write_unaligned(self.base.add(offset).cast::<Block>(), block) }
  }
}

/// Payload size actually reserved for a request of `size` bytes.
fn request_size(size: usize) -> Result<usize, AllocError> {
  checked_align(size)
    .map(|aligned| aligned.max(ALIGNMENT))
    .ok_or(AllocError::ResourceExhausted { requested: size })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::Arena;

  fn heap(capacity: usize) -> Heap<Arena> {
    Heap::with_grower(Arena::new(capacity))
  }

  #[test]
  fn test_request_size() {
    assert_eq!(request_size(0), Ok(4));
    assert_eq!(request_size(1), Ok(4));
    assert_eq!(request_size(4), Ok(4));
    assert_eq!(request_size(5), Ok(8));
    assert_eq!(
      request_size(usize::MAX),
      Err(AllocError::ResourceExhausted {
        requested: usize::MAX
      })
    );
  }

  #[test]
  fn test_alloc() {
    let mut heap = heap(4096);

    unsafe {
      let first_addr = heap.allocate(4) as *mut u32;

      *first_addr = 3u32;

      assert_eq!(*first_addr, 3);

      let size: usize = 6;

      let second_addr = heap.allocate(size * 2) as *mut u16;

      for i in 0..size {
        *(second_addr.add(i)) = (i + 1) as u16;
      }

      assert_eq!(*first_addr, 3);

      for i in 0..size {
        assert_eq!((i + 1) as u16, *(second_addr.add(i)))
      }

      heap.deallocate(first_addr as *mut u8);

      let third_addr = heap.allocate(2) as *mut u16;

      assert_eq!(first_addr as *mut u16, third_addr);

      heap.deallocate(third_addr as *mut u8);

      let fourth_addr = heap.allocate(16) as *mut u32;

      *fourth_addr = 25;

      assert!(fourth_addr as usize > third_addr as usize);

      assert_eq!(*fourth_addr, 25);
    }
  }

  #[test]
  fn test_find_block_is_first_fit() {
    let mut heap = heap(4096);

    let a = heap.allocate(64);
    let _b = heap.allocate(8);
    let c = heap.allocate(64);
    let d = heap.allocate(8);

    unsafe {
      heap.deallocate(a);
      heap.deallocate(c);
    }

    let a_block = heap.get_block(a);
    let d_block = heap.get_block(d);

    assert_eq!(heap.find_block(32), Fit::Found(a_block));
    assert_eq!(heap.find_block(64), Fit::Found(a_block));
    assert_eq!(heap.find_block(68), Fit::Missed { last: Some(d_block) });
  }

  #[test]
  fn test_find_block_on_empty_heap() {
    let heap = heap(64);

    assert_eq!(heap.find_block(4), Fit::Missed { last: None });
  }

  #[test]
  fn test_split_block_links_remainder() {
    let mut heap = heap(4096);

    let a = heap.allocate(200);
    let b = heap.allocate(8);
    let offset = heap.get_block(a);
    let b_offset = heap.get_block(b);

    let split = heap.split_block(offset, 40);

    let first = heap.read(offset);
    let remainder = heap.read(split);
    let last = heap.read(b_offset);

    assert_eq!(split, first.end());
    assert_eq!(first.size(), 40);
    assert_eq!(first.next(), Some(split));
    assert_eq!(remainder.size(), 200 - 40 - HEADER_SIZE);
    assert!(remainder.is_free());
    assert_eq!(remainder.prev(), Some(offset));
    assert_eq!(remainder.next(), Some(b_offset));
    assert_eq!(remainder.end(), b_offset);
    assert_eq!(last.prev(), Some(split));
  }

  #[test]
  fn test_fusion_only_absorbs_free_successor() {
    let mut heap = heap(4096);

    let a = heap.allocate(16);
    let b = heap.allocate(16);
    let c = heap.allocate(16);
    let a_offset = heap.get_block(a);
    let c_offset = heap.get_block(c);

    heap.fusion(a_offset);
    assert_eq!(heap.read(a_offset).size(), 16);

    let b_offset = heap.get_block(b);
    let mut b_block = heap.read(b_offset);
    b_block.set_free(true);
    heap.write(b_offset, b_block);

    heap.fusion(a_offset);

    let merged = heap.read(a_offset);
    assert_eq!(merged.size(), 16 + HEADER_SIZE + 16);
    assert_eq!(merged.next(), Some(c_offset));
    assert_eq!(heap.read(c_offset).prev(), Some(a_offset));
  }

  #[test]
  fn test_extend_heap_failure_leaves_heap_untouched() {
    let mut heap = heap(HEADER_SIZE + 16);

    let a = heap.allocate(16);
    assert!(!a.is_null());

    assert!(heap.allocate(4).is_null());
    assert_eq!(heap.region_len(), HEADER_SIZE + 16);
    assert_eq!(heap.read(0).next(), None);
  }

  #[test]
  fn test_valid_addr_rejects_interior_and_freed_pointers() {
    let mut heap = heap(4096);

    let a = heap.allocate(64);
    let b = heap.allocate(64);

    assert!(heap.valid_addr(a));
    assert!(heap.valid_addr(b));
    assert!(!heap.valid_addr(ptr::null()));
    assert!(!heap.valid_addr(a.wrapping_add(4)));
    assert!(!heap.valid_addr(heap.region_start()));
    assert!(!heap.valid_addr(a.wrapping_add(10_000)));

    unsafe { heap.deallocate(a) };

    assert!(!heap.valid_addr(a));
  }

  #[test]
  fn test_valid_addr_rejects_stale_headers() {
    let mut heap = heap(4096);

    let a = heap.allocate(200);
    let _guard = heap.allocate(8);

    unsafe { heap.deallocate(a) };

    // Re-splitting leaves the old header of `x` behind inside `a`.
    let x = heap.allocate(40);
    let y = heap.allocate(40);
    assert_eq!(x, a);

    unsafe {
      heap.deallocate(y);
      heap.deallocate(x);
    }

    let big = heap.allocate(200);
    assert_eq!(big, a);
    assert!(!heap.valid_addr(y));
  }

  #[test]
  fn test_valid_addr_rejects_forged_header() {
    let mut heap = heap(4096);

    let a = heap.allocate(200);
    let _b = heap.allocate(8);

    let fake_offset = heap.get_block(a) + HEADER_SIZE + 64;
    let fake = heap.payload_ptr(fake_offset).as_ptr();

    heap.write(fake_offset, Block::new(fake_offset, 16, false, Some(0), None));
    assert!(!heap.valid_addr(fake));

    heap.write(
      fake_offset,
      Block::new(fake_offset, 16, false, Some(usize::MAX - 8), None),
    );
    assert!(!heap.valid_addr(fake));

    heap.write(fake_offset, Block::new(fake_offset, 16, false, None, None));
    assert!(!heap.valid_addr(fake));
  }

  #[test]
  fn test_payload_write_then_realloc_in_place() {
    let mut heap = heap(4096);

    let a = heap.allocate(100);

    unsafe {
      ptr::write_bytes(a, 0x5A, 100);

      let same = heap.reallocate(a, 20);
      assert_eq!(same, a);

      let bytes = std::slice::from_raw_parts(same, 20);
      assert!(bytes.iter().all(|&b| b == 0x5A));
    }
  }
}
