use std::{io::Read, ptr};

use brkalloc::{Heap, HeapGrower, Sbrk, print_alloc};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`, `htop`,
/// `gdb`, or just visually track how allocations change the program break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break.
fn print_program_break(
  heap: &Heap<Sbrk>,
  label: &str,
) {
  println!(
    "[{}] PID = {}, program break = {:?}",
    label,
    std::process::id(),
    heap.grower().boundary(),
  );
}

/// Prints every block in the heap, in address order.
fn print_blocks(heap: &Heap<Sbrk>) {
  for block in heap.blocks() {
    println!(
      "    block @{:#06x}  {:>6} bytes  {}",
      block.offset,
      block.size,
      if block.is_free { "free" } else { "used" }
    );
  }
}

fn main() {
  let mut heap = Heap::new();

  unsafe {
    print_program_break(&heap, "start");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate space for a u32. The first allocation claims the region.
    // --------------------------------------------------------------------
    let first_block = heap.allocate(4);
    println!("\n[1] Allocate u32");
    print_alloc(&heap, 4, first_block);

    let first_ptr = first_block as *mut u32;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_ptr.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 13 bytes. The size is rounded up to 16.
    // --------------------------------------------------------------------
    let second_block = heap.allocate(13);
    println!("\n[2] Allocate [u8; 13]");
    print_alloc(&heap, 13, second_block);
    ptr::write_bytes(second_block, 0xAB, 13);
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate 200 bytes, then a small block behind it so it is not the
    //    tail of the heap.
    // --------------------------------------------------------------------
    let third_block = heap.allocate(200);
    let fourth_block = heap.allocate(8);
    println!("\n[3] Allocate 200 bytes and a small guard block");
    print_alloc(&heap, 200, third_block);
    print_alloc(&heap, 8, fourth_block);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Free the 200 byte block. It stays in the heap as a free block.
    // --------------------------------------------------------------------
    heap.deallocate(third_block);
    println!("\n[4] Deallocated third_block at {:?}", third_block);
    print_blocks(&heap);
    print_program_break(&heap, "after free");

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Two 40 byte requests are carved out of the freed block.
    // --------------------------------------------------------------------
    let fifth_block = heap.allocate(40);
    let sixth_block = heap.allocate(40);
    println!("\n[5] Allocate 2 x 40 bytes (split of the freed block)");
    print_alloc(&heap, 40, fifth_block);
    print_alloc(&heap, 40, sixth_block);
    println!(
      "[5] fifth_block == third_block? {}",
      if fifth_block == third_block {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) Free both halves again: they fuse back into one block.
    // --------------------------------------------------------------------
    heap.deallocate(fifth_block);
    heap.deallocate(sixth_block);
    println!("\n[6] Deallocated both 40 byte blocks");
    print_blocks(&heap);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 7) Allocate a large block to observe heap growth.
    // --------------------------------------------------------------------
    print_program_break(&heap, "before large alloc");

    let big_block = heap.allocate(64 * 1024);
    println!("\n[7] Allocate large 64 KiB block");
    print_alloc(&heap, 64 * 1024, big_block);

    print_program_break(&heap, "after large alloc");
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 8) Free everything. Free blocks at the end of the heap are handed
    //    back, so the break drops to where it started.
    // --------------------------------------------------------------------
    heap.deallocate(big_block);
    heap.deallocate(first_block);
    heap.deallocate(second_block);
    heap.deallocate(fourth_block);

    println!("\n[8] Everything freed, heap empty: {}", heap.is_empty());
    print_program_break(&heap, "end");
  }
}
