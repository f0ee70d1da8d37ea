//! Counted pinning of module allocations
//!
//! A pointer is pinned in the module's collector iff it has a strictly
//! positive count here. Nested retains only bump the count; the module is
//! asked to pin on the first retain and to unpin on the last release.

use crate::error::{BoundaryError, Result};
use crate::heap::ModuleHeap;
use crate::ptr::Ptr;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Registrar {
    counts: HashMap<Ptr, u32>,
}

impl Registrar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain<H: ModuleHeap + ?Sized>(&mut self, heap: &mut H, ptr: Ptr) -> Result<Ptr> {
        if ptr.is_null() {
            return Ok(ptr);
        }
        if let Some(count) = self.counts.get_mut(&ptr) {
            *count += 1;
            return Ok(ptr);
        }
        let pinned = heap.pin(ptr)?;
        tracing::trace!(%pinned, "pinned");
        self.counts.insert(pinned, 1);
        Ok(pinned)
    }

    pub fn release<H: ModuleHeap + ?Sized>(&mut self, heap: &mut H, ptr: Ptr) -> Result<()> {
        if ptr.is_null() {
            return Ok(());
        }
        match self.counts.get_mut(&ptr) {
            Some(count) if *count == 1 => {
                heap.unpin(ptr)?;
                self.counts.remove(&ptr);
                tracing::trace!(%ptr, "unpinned");
                Ok(())
            }
            Some(count) => {
                *count -= 1;
                Ok(())
            }
            None => Err(BoundaryError::InvalidRefcount { ptr, count: 0 }),
        }
    }

    /// Live count for `ptr` (0 when untracked).
    pub fn count(&self, ptr: Ptr) -> u32 {
        self.counts.get(&ptr).copied().unwrap_or(0)
    }

    pub fn is_pinned(&self, ptr: Ptr) -> bool {
        self.counts.contains_key(&ptr)
    }

    /// Number of distinct pinned pointers.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::mock::MockHeap;

    #[test]
    fn nested_retains_pin_and_unpin_once() {
        let mut heap = MockHeap::new();
        let mut registrar = Registrar::new();
        let ptr = heap.alloc(8, 2).unwrap();

        for n in 1..=5 {
            assert_eq!(registrar.retain(&mut heap, ptr).unwrap(), ptr);
            assert_eq!(registrar.count(ptr), n);
        }
        for _ in 0..5 {
            registrar.release(&mut heap, ptr).unwrap();
        }

        assert_eq!(heap.pins, vec![ptr]);
        assert_eq!(heap.unpins, vec![ptr]);
        assert!(!registrar.is_pinned(ptr));
        assert!(registrar.is_empty());
    }

    #[test]
    fn single_retain_release_pair() {
        let mut heap = MockHeap::new();
        let mut registrar = Registrar::new();
        let ptr = heap.alloc(4, 2).unwrap();

        registrar.retain(&mut heap, ptr).unwrap();
        assert!(registrar.is_pinned(ptr));
        assert_eq!(heap.pinned_now(), 1);
        registrar.release(&mut heap, ptr).unwrap();
        assert_eq!(heap.pinned_now(), 0);
    }

    #[test]
    fn release_without_retain_is_invalid() {
        let mut heap = MockHeap::new();
        let mut registrar = Registrar::new();
        let err = registrar.release(&mut heap, Ptr::new(128)).unwrap_err();
        assert!(matches!(err, BoundaryError::InvalidRefcount { count: 0, .. }));
        assert!(heap.unpins.is_empty());
    }

    #[test]
    fn extra_release_after_balance_is_invalid() {
        let mut heap = MockHeap::new();
        let mut registrar = Registrar::new();
        let ptr = heap.alloc(4, 2).unwrap();
        registrar.retain(&mut heap, ptr).unwrap();
        registrar.release(&mut heap, ptr).unwrap();
        assert!(registrar.release(&mut heap, ptr).is_err());
        assert_eq!(heap.unpins.len(), 1);
    }

    #[test]
    fn null_is_ignored() {
        let mut heap = MockHeap::new();
        let mut registrar = Registrar::new();
        assert_eq!(registrar.retain(&mut heap, Ptr::NULL).unwrap(), Ptr::NULL);
        registrar.release(&mut heap, Ptr::NULL).unwrap();
        assert!(heap.pins.is_empty());
        assert!(registrar.is_empty());
    }

    #[test]
    fn distinct_pointers_are_tracked_independently() {
        let mut heap = MockHeap::new();
        let mut registrar = Registrar::new();
        let a = heap.alloc(4, 2).unwrap();
        let b = heap.alloc(4, 2).unwrap();
        registrar.retain(&mut heap, a).unwrap();
        registrar.retain(&mut heap, b).unwrap();
        registrar.retain(&mut heap, b).unwrap();
        assert_eq!(registrar.len(), 2);
        registrar.release(&mut heap, a).unwrap();
        assert_eq!(registrar.count(b), 2);
        assert!(!registrar.is_pinned(a));
    }
}
