use parking_lot::{Mutex, MutexGuard};

use crate::{grower::HeapGrower, heap::Heap};

/// A [`Heap`] shared between threads behind one coarse lock.
pub struct LockedHeap<G: HeapGrower> {
  inner: Mutex<Heap<G>>,
}

impl<G: HeapGrower> LockedHeap<G> {
  pub fn new(heap: Heap<G>) -> Self {
    Self {
      inner: Mutex::new(heap),
    }
  }

  /// Locks the heap for a sequence of operations.
  pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
    self.inner.lock()
  }

  pub fn allocate(
    &self,
    size: usize,
  ) -> *mut u8 {
    self.lock().allocate(size)
  }

  /// # Safety
  ///
  /// See [`Heap::reallocate`].
  pub unsafe fn reallocate(
    &self,
    ptr: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe { self.lock().reallocate(ptr, size) }
  }

  /// # Safety
  ///
  /// See [`Heap::deallocate`].
  pub unsafe fn deallocate(
    &self,
    ptr: *mut u8,
  ) {
    unsafe { self.lock().deallocate(ptr) }
  }

  pub fn into_inner(self) -> Heap<G> {
    self.inner.into_inner()
  }
}
