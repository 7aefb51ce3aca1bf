use thiserror::Error;

/// Failures reported by the `try_*` family of heap operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
  /// The grower could not provide more memory, or the request size overflows.
  #[error("heap exhausted while requesting {requested} bytes")]
  ResourceExhausted { requested: usize },

  /// The pointer is not the payload start of a block currently in the heap.
  #[error("{addr:#x} is not a live allocation")]
  InvalidPointer { addr: usize },

  /// The block directory violates one of its invariants.
  #[error("heap corrupted at offset {offset:#x}: {reason}")]
  Corrupted { offset: usize, reason: &'static str },
}
