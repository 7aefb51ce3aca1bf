//! Read-only views of a heap's block directory.

use crate::{
  align::ALIGNMENT,
  block::HEADER_SIZE,
  error::AllocError,
  grower::HeapGrower,
  heap::Heap,
};

/// Snapshot of one block in the directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
  /// Offset of the header from the start of the region.
  pub offset: usize,
  /// Payload size in bytes.
  pub size: usize,
  pub is_free: bool,
  /// Address handed out for this block.
  pub payload: *mut u8,
}

/// Iterator over the directory in address order.
pub struct Blocks<'a, G: HeapGrower> {
  heap: &'a Heap<G>,
  current: Option<usize>,
}

impl<G: HeapGrower> Iterator for Blocks<'_, G> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let offset = self.current?;
    let block = self.heap.read(offset);

    self.current = block.next();

    Some(BlockInfo {
      offset,
      size: block.size(),
      is_free: block.is_free(),
      payload: self.heap.region_start().wrapping_add(block.payload()),
    })
  }
}

/// Aggregate counters over the whole directory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub free_blocks: usize,
  pub used_bytes: usize,
  pub free_bytes: usize,
  /// Bytes claimed from the grower, headers included.
  pub region_len: usize,
}

impl<G: HeapGrower> Heap<G> {
  /// Walks the directory. The heap must satisfy [`check`](Heap::check).
  pub fn blocks(&self) -> Blocks<'_, G> {
    Blocks {
      heap: self,
      current: self.root(),
    }
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(
      HeapStats {
        region_len: self.region_len(),
        ..HeapStats::default()
      },
      |mut stats, block| {
        stats.blocks += 1;

        if block.is_free {
          stats.free_blocks += 1;
          stats.free_bytes += block.size;
        } else {
          stats.used_bytes += block.size;
        }

        stats
      },
    )
  }

  /// Verifies the directory invariants: blocks tile the region without gaps,
  /// back links mirror forward links, sizes respect the granularity and no
  /// two neighbours are both free.
  pub fn check(&self) -> Result<(), AllocError> {
    let corrupted = |offset, reason| Err(AllocError::Corrupted { offset, reason });

    let Some(root) = self.root() else {
      if self.region_len() != 0 {
        return corrupted(0, "empty heap still claims memory");
      }
      return Ok(());
    };

    if root != 0 {
      return corrupted(root, "root is not at the start of the region");
    }

    let mut prev: Option<(usize, bool)> = None;
    let mut offset = root;

    loop {
      if offset + HEADER_SIZE > self.region_len() {
        return corrupted(offset, "header past the end of the region");
      }

      let block = self.read(offset);

      if block.payload() != offset + HEADER_SIZE {
        return corrupted(offset, "payload start does not follow the header");
      }

      if block.size() % ALIGNMENT != 0 {
        return corrupted(offset, "size is not a multiple of 4");
      }

      if block.prev() != prev.map(|(offset, _)| offset) {
        return corrupted(offset, "back link does not match");
      }

      if block.is_free() && prev.is_some_and(|(_, free)| free) {
        return corrupted(offset, "two adjacent free blocks");
      }

      match block.next() {
        Some(next) if next == block.end() => {
          prev = Some((offset, block.is_free()));
          offset = next;
        }
        Some(_) => return corrupted(offset, "next block is not adjacent"),
        None if block.end() == self.region_len() => return Ok(()),
        None => return corrupted(offset, "last block does not end the region"),
      }
    }
  }
}

/// Prints an allocation together with the grower's current boundary.
pub fn print_alloc<G: HeapGrower>(
  heap: &Heap<G>,
  size: usize,
  addr: *mut u8,
) {
  println!(
    "Allocated {} bytes, address = {:?}, boundary = {:?}",
    size,
    addr,
    heap.grower().boundary()
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::grower::Arena;

  #[test]
  fn test_empty_heap() {
    let heap = Heap::with_grower(Arena::new(256));

    assert_eq!(heap.blocks().count(), 0);
    assert_eq!(heap.stats(), HeapStats::default());
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_stats_follow_directory() {
    let mut heap = Heap::with_grower(Arena::new(4096));

    let a = heap.allocate(10);
    let _b = heap.allocate(20);

    unsafe { heap.deallocate(a) };

    let blocks: Vec<_> = heap.blocks().map(|b| (b.size, b.is_free)).collect();
    assert_eq!(blocks, vec![(12, true), (20, false)]);

    assert_eq!(
      heap.stats(),
      HeapStats {
        blocks: 2,
        free_blocks: 1,
        used_bytes: 20,
        free_bytes: 12,
        region_len: 2 * HEADER_SIZE + 32,
      }
    );
    assert_eq!(heap.check(), Ok(()));
  }

  #[test]
  fn test_block_info_payload_matches_allocation() {
    let mut heap = Heap::with_grower(Arena::new(4096));

    let a = heap.allocate(16);
    let b = heap.allocate(16);

    let payloads: Vec<_> = heap.blocks().map(|b| b.payload).collect();

    assert_eq!(payloads, vec![a, b]);
  }
}
