//! The module-side allocator as seen from the host
//!
//! Marshalling only needs a handful of runtime services from the module:
//! allocate a managed object, pin/unpin it against the collector, and
//! byte access to linear memory. [`ModuleHeap`] is that seam; the live
//! instance implements it over its store, tests over a plain buffer.

use crate::error::Result;
use crate::ptr::Ptr;

/// Runtime id of `ArrayBuffer` (backing store of arrays and typed arrays).
pub const ARRAY_BUFFER_ID: u32 = 1;
/// Runtime id of `String`.
pub const STRING_ID: u32 = 2;

/// Offset (backwards from the payload) of the object's runtime id.
pub const RT_ID_OFFSET: u32 = 8;
/// Offset (backwards from the payload) of the object's payload byte size.
pub const RT_SIZE_OFFSET: u32 = 4;

pub trait ModuleHeap {
    /// Allocate a managed object of `size` payload bytes with runtime id `class_id`.
    fn alloc(&mut self, size: u32, class_id: u32) -> Result<Ptr>;

    /// Exempt an object from collection. Returns the pinned pointer.
    fn pin(&mut self, ptr: Ptr) -> Result<Ptr>;

    /// Make a pinned object collectible again.
    fn unpin(&mut self, ptr: Ptr) -> Result<()>;

    /// Current linear memory. May be a different region after any `alloc`.
    fn memory(&self) -> &[u8];

    fn memory_mut(&mut self) -> &mut [u8];
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use crate::error::BoundaryError;

    const PAGE: usize = 64 * 1024;
    const OBJECT_HEADER: u32 = 20;

    /// Bump allocator laid out like the AssemblyScript runtime. Growing
    /// reallocates the backing vector, so growth really relocates memory.
    pub(crate) struct MockHeap {
        pub memory: Vec<u8>,
        pub next: u32,
        pub pins: Vec<Ptr>,
        pub unpins: Vec<Ptr>,
        pub allocs: usize,
    }

    impl MockHeap {
        pub fn new() -> Self {
            Self {
                memory: vec![0; PAGE],
                next: 64,
                pins: Vec::new(),
                unpins: Vec::new(),
                allocs: 0,
            }
        }

        pub fn pinned_now(&self) -> usize {
            self.pins.len() - self.unpins.len()
        }
    }

    impl ModuleHeap for MockHeap {
        fn alloc(&mut self, size: u32, class_id: u32) -> Result<Ptr> {
            let ptr = (self.next + OBJECT_HEADER + 15) & !15;
            let end = (ptr + size) as usize;
            if end > self.memory.len() {
                let pages = end.div_ceil(PAGE);
                let mut grown = vec![0u8; pages * PAGE];
                grown[..self.memory.len()].copy_from_slice(&self.memory);
                self.memory = grown;
            }
            let at = ptr as usize;
            self.memory[at - RT_ID_OFFSET as usize..at - RT_SIZE_OFFSET as usize]
                .copy_from_slice(&class_id.to_le_bytes());
            self.memory[at - RT_SIZE_OFFSET as usize..at].copy_from_slice(&size.to_le_bytes());
            self.next = ptr + size;
            self.allocs += 1;
            Ok(Ptr::new(ptr))
        }

        fn pin(&mut self, ptr: Ptr) -> Result<Ptr> {
            if self.pins.contains(&ptr) && !self.unpins.contains(&ptr) {
                return Err(BoundaryError::Config(format!("{ptr} pinned twice")));
            }
            self.pins.push(ptr);
            Ok(ptr)
        }

        fn unpin(&mut self, ptr: Ptr) -> Result<()> {
            self.unpins.push(ptr);
            Ok(())
        }

        fn memory(&self) -> &[u8] {
            &self.memory
        }

        fn memory_mut(&mut self) -> &mut [u8] {
            &mut self.memory
        }
    }
}
