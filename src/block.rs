use std::mem;

/// Size in bytes of the header that precedes every payload.
pub const HEADER_SIZE: usize = mem::size_of::<Block>();

/// Largest region a heap may manage. Header fields are 32-bit offsets.
pub const MAX_REGION_LEN: usize = NIL as usize;

/// Encoded "no link" value for `next` and `prev`.
const NIL: u32 = u32::MAX;

/// Block header stored in-band, right before the payload.
///
/// Links and the payload start are byte offsets from the beginning of the
/// managed region. Every field is a plain integer, so any bit pattern read
/// from the region is a valid `Block`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
  size: u32,
  next: u32,
  prev: u32,
  free: u32,
  payload: u32,
}

// Offsets and sizes handed to these methods never exceed `MAX_REGION_LEN`,
// which the heap enforces when it grows, so the casts are lossless.
impl Block {
  pub fn new(
    offset: usize,
    size: usize,
    is_free: bool,
    prev: Option<usize>,
    next: Option<usize>,
  ) -> Self {
    Self {
      size: size as u32,
      next: encode(next),
      prev: encode(prev),
      free: is_free as u32,
      payload: (offset + HEADER_SIZE) as u32,
    }
  }

  pub fn size(&self) -> usize {
    self.size as usize
  }

  pub fn set_size(
    &mut self,
    size: usize,
  ) {
    self.size = size as u32;
  }

  /// Offset of the first payload byte.
  pub fn payload(&self) -> usize {
    self.payload as usize
  }

  pub fn is_free(&self) -> bool {
    self.free != 0
  }

  pub fn set_free(
    &mut self,
    is_free: bool,
  ) {
    self.free = is_free as u32;
  }

  pub fn next(&self) -> Option<usize> {
    decode(self.next)
  }

  pub fn set_next(
    &mut self,
    next: Option<usize>,
  ) {
    self.next = encode(next);
  }

  pub fn prev(&self) -> Option<usize> {
    decode(self.prev)
  }

  pub fn set_prev(
    &mut self,
    prev: Option<usize>,
  ) {
    self.prev = encode(prev);
  }

  /// Offset one past the last payload byte, where the successor's header
  /// lives.
  pub fn end(&self) -> usize {
    self.payload() + self.size()
  }
}

fn encode(link: Option<usize>) -> u32 {
  link.map_or(NIL, |offset| offset as u32)
}

fn decode(raw: u32) -> Option<usize> {
  (raw != NIL).then_some(raw as usize)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_header_layout() {
    assert_eq!(HEADER_SIZE, 20);
    assert_eq!(HEADER_SIZE % crate::align::ALIGNMENT, 0);
  }

  #[test]
  fn test_links() {
    let mut block = Block::new(0, 16, false, None, Some(56));

    assert_eq!(block.payload(), HEADER_SIZE);
    assert_eq!(block.end(), HEADER_SIZE + 16);
    assert_eq!(block.prev(), None);
    assert_eq!(block.next(), Some(56));
    assert!(!block.is_free());

    block.set_next(None);
    block.set_prev(Some(0));
    block.set_free(true);
    block.set_size(8);

    assert_eq!(block.next(), None);
    assert_eq!(block.prev(), Some(0));
    assert!(block.is_free());
    assert_eq!(block.size(), 8);
  }

  #[test]
  fn test_any_bits_decode() {
    let block: Block = unsafe { mem::transmute([0xFFu8; HEADER_SIZE]) };

    assert_eq!(block.next(), None);
    assert_eq!(block.prev(), None);
    assert!(block.is_free());
    assert_eq!(block.size(), u32::MAX as usize);
  }
}
