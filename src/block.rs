//! Block metadata: the header carved into the head of every 32 KiB slab
//! block, the super-allocation geometry, and the intrusive free list the
//! allocator recycles blocks through.

use crate::config::{BLOCK_SIZE, BLOCKS_PER_SUPER};
use crate::platform;
use core::ptr;
use core::sync::atomic::AtomicU32;

/// The 16-byte allocation granule inside a block.
pub const SLICE: usize = 16;
/// Slices per block, header included.
pub const BLOCK_SLICES: usize = BLOCK_SIZE / SLICE;
/// Bytes of one super-allocation (one mmap worth of blocks).
pub const SUPER_SIZE: usize = BLOCK_SIZE * BLOCKS_PER_SUPER;
/// Pages of one super-allocation.
pub const SUPER_PAGES: usize = SUPER_SIZE / platform::PAGE_SIZE;

/// Header at offset 0 of every block (and of every big-allocation mapping).
///
/// `reserved` doubles as the discriminant: zero for slab blocks, the byte
/// count of the whole mapping for big allocations. The `prev`/`next` links
/// are only live while the block sits on the global free list.
#[repr(C, align(16))]
pub struct Block {
    /// 0 for slab blocks; total mapping bytes for big allocations.
    pub reserved: usize,
    /// Index of this block within its super-allocation.
    pub root: u32,
    /// Next free slice index (header slices included).
    pub pos: u32,
    /// On root blocks: how many of the super-allocation's blocks still
    /// hold live data or sit in an arena.
    pub root_ref: AtomicU32,
    /// Live allocations carved from this block, +1 while an arena holds it.
    pub refs: AtomicU32,
    /// Free-list link.
    pub prev: *mut Block,
    /// Free-list link.
    pub next: *mut Block,
}

/// Header size in bytes; user slices start here.
pub const HEADER_SIZE: usize = size_of::<Block>();
/// Slices consumed by the header.
pub const HEADER_SLICES: usize = HEADER_SIZE / SLICE;

const _: () = assert!(HEADER_SIZE % SLICE == 0);
const _: () = assert!(HEADER_SLICES < BLOCK_SLICES);

impl Block {
    /// Recover the owning block from any address inside it. Blocks (and
    /// big-allocation mappings) are `BLOCK_SIZE`-aligned, so this is a
    /// round-down.
    #[inline]
    pub fn from_ptr(ptr: *const u8) -> *mut Block {
        ((ptr as usize) & !(BLOCK_SIZE - 1)) as *mut Block
    }

    /// Address of slice `idx` within this block.
    ///
    /// # Safety
    /// `self` must point at a live block and `idx` must be within it.
    #[inline]
    pub unsafe fn slice_at(block: *mut Block, idx: usize) -> *mut u8 {
        unsafe { (block as *mut u8).add(idx * SLICE) }
    }

    /// The root block of the super-allocation this block belongs to.
    ///
    /// # Safety
    /// `block` must point at a live slab block with a valid `root` index.
    #[inline]
    pub unsafe fn super_root(block: *mut Block) -> *mut Block {
        let root = unsafe { (*block).root } as usize;
        ((block as usize) - root * BLOCK_SIZE) as *mut Block
    }

    /// Slices still unclaimed in this block.
    ///
    /// # Safety
    /// `block` must point at a live slab block; the caller must hold the
    /// owning arena's lock.
    #[inline]
    pub unsafe fn remaining(block: *mut Block) -> usize {
        BLOCK_SLICES - unsafe { (*block).pos } as usize
    }
}

/// A doubly-linked intrusive list of free blocks, linked through the
/// headers. Exclusive access is the caller's problem (the global lock).
pub struct BlockList {
    pub head: *mut Block,
    pub count: usize,
}

impl Default for BlockList {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            count: 0,
        }
    }

    /// Prepend a block. LIFO keeps recently-touched blocks hot.
    ///
    /// # Safety
    /// `block` must be a valid block not already in a list.
    pub unsafe fn push(&mut self, block: *mut Block) {
        unsafe {
            (*block).next = self.head;
            (*block).prev = ptr::null_mut();
            if !self.head.is_null() {
                (*self.head).prev = block;
            }
            self.head = block;
            self.count += 1;
        }
    }

    /// Remove a specific block from the list.
    ///
    /// # Safety
    /// `block` must currently be in this list.
    pub unsafe fn remove(&mut self, block: *mut Block) {
        unsafe {
            let prev = (*block).prev;
            let next = (*block).next;
            if !prev.is_null() {
                (*prev).next = next;
            } else {
                self.head = next;
            }
            if !next.is_null() {
                (*next).prev = prev;
            }
            (*block).prev = ptr::null_mut();
            (*block).next = ptr::null_mut();
            self.count -= 1;
        }
    }

    /// Pop the most recently pushed block, or null when empty.
    ///
    /// # Safety
    /// The list's internal pointers must be valid.
    pub unsafe fn pop(&mut self) -> *mut Block {
        let block = self.head;
        if !block.is_null() {
            unsafe { self.remove(block) };
        }
        block
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SHIFT;

    fn grab_blocks(n: usize) -> (*mut u8, Vec<*mut Block>) {
        let mem = platform::page_alloc((n * BLOCK_SIZE) / platform::PAGE_SIZE, BLOCK_SHIFT);
        assert!(!mem.is_null());
        let blocks = (0..n)
            .map(|i| unsafe { mem.add(i * BLOCK_SIZE) } as *mut Block)
            .collect();
        (mem, blocks)
    }

    #[test]
    fn test_header_geometry() {
        assert_eq!(HEADER_SIZE % 16, 0);
        assert!(HEADER_SIZE <= 64);
        assert_eq!(align_of::<Block>(), 16);
    }

    #[test]
    fn test_from_ptr_round_down() {
        let (mem, blocks) = grab_blocks(2);
        let b0 = blocks[0];
        let b1 = blocks[1];
        unsafe {
            assert_eq!(Block::from_ptr(b0 as *const u8), b0);
            assert_eq!(Block::from_ptr((b0 as *const u8).add(HEADER_SIZE)), b0);
            assert_eq!(Block::from_ptr((b0 as *const u8).add(BLOCK_SIZE - 1)), b0);
            assert_eq!(Block::from_ptr(b1 as *const u8), b1);
            platform::page_free(mem, (2 * BLOCK_SIZE) / platform::PAGE_SIZE);
        }
    }

    #[test]
    fn test_super_root() {
        let (mem, blocks) = grab_blocks(4);
        unsafe {
            for (i, &b) in blocks.iter().enumerate() {
                (*b).root = i as u32;
                assert_eq!(Block::super_root(b), blocks[0]);
            }
            platform::page_free(mem, (4 * BLOCK_SIZE) / platform::PAGE_SIZE);
        }
    }

    #[test]
    fn test_block_list() {
        let (mem, blocks) = grab_blocks(3);
        let mut list = BlockList::new();
        assert!(list.is_empty());

        unsafe {
            list.push(blocks[0]);
            list.push(blocks[1]);
            list.push(blocks[2]);
            assert_eq!(list.count, 3);
            assert_eq!(list.head, blocks[2]);

            // Remove the middle element
            list.remove(blocks[1]);
            assert_eq!(list.count, 2);
            assert_eq!((*blocks[2]).next, blocks[0]);

            assert_eq!(list.pop(), blocks[2]);
            assert_eq!(list.pop(), blocks[0]);
            assert!(list.pop().is_null());
            assert!(list.is_empty());

            platform::page_free(mem, (3 * BLOCK_SIZE) / platform::PAGE_SIZE);
        }
    }
}
