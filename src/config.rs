use crate::{
  align::{ALIGNMENT, checked_align},
  block::HEADER_SIZE,
};

/// Smallest payload a split-off remainder may carry by default.
pub const DEFAULT_MIN_SPLIT_PAYLOAD: usize = 4;

/// Tunables for a [`Heap`](crate::Heap).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapConfig {
  min_split_payload: usize,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}

impl HeapConfig {
  pub const DEFAULT: Self = Self {
    min_split_payload: DEFAULT_MIN_SPLIT_PAYLOAD,
  };

  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the minimum payload a free remainder must keep for a block to be
  /// split. Rounded up to the allocator granularity, never below 4.
  pub fn min_split_payload(
    mut self,
    bytes: usize,
  ) -> Self {
    self.min_split_payload = checked_align(bytes)
      .unwrap_or(!(ALIGNMENT - 1))
      .max(DEFAULT_MIN_SPLIT_PAYLOAD);
    self
  }

  pub fn split_payload(&self) -> usize {
    self.min_split_payload
  }

  /// Bytes a block must have beyond the request before it is split.
  pub fn split_threshold(&self) -> usize {
    HEADER_SIZE.saturating_add(self.min_split_payload)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_threshold() {
    let config = HeapConfig::default();

    assert_eq!(config.split_payload(), 4);
    assert_eq!(config.split_threshold(), HEADER_SIZE + 4);
  }

  #[test]
  fn test_min_split_payload_is_rounded() {
    assert_eq!(HeapConfig::new().min_split_payload(0).split_payload(), 4);
    assert_eq!(HeapConfig::new().min_split_payload(9).split_payload(), 12);
    assert_eq!(HeapConfig::new().min_split_payload(64).split_payload(), 64);
  }
}
