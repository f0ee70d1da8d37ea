//! Self-healing window over module memory
//!
//! The view caches the extent of the memory region it was built against.
//! Module-side allocation can grow (and relocate) the region at any call,
//! so every access is checked optimistically against the cached extent and,
//! on failure, the view is rebuilt from the current region and the access
//! retried exactly once.

use crate::error::{BoundaryError, Result};
use crate::ptr::Ptr;
use std::ops::Range;

#[derive(Debug, Clone, Default)]
pub struct MemoryView {
    extent: usize,
    rebuilds: u64,
}

impl MemoryView {
    /// Build a view over the region as it currently is.
    pub fn over(memory: &[u8]) -> Self {
        Self {
            extent: memory.len(),
            rebuilds: 0,
        }
    }

    /// Byte length of the region the view was last built against.
    #[inline]
    pub fn extent(&self) -> usize {
        self.extent
    }

    /// How many times a stale view had to be rebuilt.
    #[inline]
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    fn rebuild(&mut self, current: usize) {
        tracing::debug!(old = self.extent, new = current, "rebuilding stale memory view");
        self.extent = current;
        self.rebuilds += 1;
    }

    fn try_range(&self, current: usize, ptr: Ptr, len: u32) -> Option<Range<usize>> {
        let start = ptr.addr() as usize;
        let end = start.checked_add(len as usize)?;
        (end <= self.extent && end <= current).then_some(start..end)
    }

    fn locate(&mut self, current: usize, ptr: Ptr, len: u32) -> Result<Range<usize>> {
        if let Some(range) = self.try_range(current, ptr, len) {
            return Ok(range);
        }
        self.rebuild(current);
        self.try_range(current, ptr, len)
            .ok_or(BoundaryError::OutOfBounds {
                ptr,
                len,
                extent: current,
            })
    }

    /// Fail unless `len` bytes at `ptr` lie inside the region.
    pub fn check(&mut self, memory: &[u8], ptr: Ptr, len: u32) -> Result<()> {
        self.locate(memory.len(), ptr, len).map(drop)
    }

    pub fn read_u32(&mut self, memory: &[u8], ptr: Ptr) -> Result<u32> {
        let range = self.locate(memory.len(), ptr, 4)?;
        let mut word = [0u8; 4];
        word.copy_from_slice(&memory[range]);
        Ok(u32::from_le_bytes(word))
    }

    pub fn write_u32(&mut self, memory: &mut [u8], ptr: Ptr, value: u32) -> Result<()> {
        let range = self.locate(memory.len(), ptr, 4)?;
        memory[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_bytes<'m>(&mut self, memory: &'m [u8], ptr: Ptr, len: u32) -> Result<&'m [u8]> {
        let range = self.locate(memory.len(), ptr, len)?;
        Ok(&memory[range])
    }

    pub fn write_bytes(&mut self, memory: &mut [u8], ptr: Ptr, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| BoundaryError::OutOfBounds {
            ptr,
            len: u32::MAX,
            extent: memory.len(),
        })?;
        let range = self.locate(memory.len(), ptr, len)?;
        memory[range].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 64 * 1024;

    #[test]
    fn word_round_trip_is_little_endian() {
        let mut memory = vec![0u8; PAGE];
        let mut view = MemoryView::over(&memory);
        view.write_u32(&mut memory, Ptr::new(8), 0x0102_0304).unwrap();
        assert_eq!(&memory[8..12], &[4, 3, 2, 1]);
        assert_eq!(view.read_u32(&memory, Ptr::new(8)).unwrap(), 0x0102_0304);
        assert_eq!(view.rebuilds(), 0);
    }

    #[test]
    fn relocated_region_is_healed_by_a_single_retry() {
        let small = vec![0u8; PAGE];
        let mut view = MemoryView::over(&small);

        // Growth moves the region: a new, larger buffer with data past the old end.
        let mut grown = vec![0u8; 2 * PAGE];
        let addr = PAGE + 128;
        grown[addr..addr + 4].copy_from_slice(&0xCAFE_F00Du32.to_le_bytes());
        drop(small);

        assert_eq!(view.read_u32(&grown, Ptr::new(addr as u32)).unwrap(), 0xCAFE_F00D);
        assert_eq!(view.rebuilds(), 1);
        assert_eq!(view.extent(), 2 * PAGE);

        // Rebuilt view now serves the new region without further retries.
        assert_eq!(view.read_u32(&grown, Ptr::new(addr as u32)).unwrap(), 0xCAFE_F00D);
        assert_eq!(view.rebuilds(), 1);
    }

    #[test]
    fn stale_view_never_reads_the_old_buffer() {
        let mut old = vec![0u8; PAGE];
        old[16..20].copy_from_slice(&1u32.to_le_bytes());
        let mut view = MemoryView::over(&old);

        let mut new = vec![0u8; 2 * PAGE];
        new[16..20].copy_from_slice(&2u32.to_le_bytes());
        assert_eq!(view.read_u32(&new, Ptr::new(16)).unwrap(), 2);
    }

    #[test]
    fn shrunk_region_triggers_rebuild_then_fails() {
        let big = vec![0u8; 2 * PAGE];
        let mut view = MemoryView::over(&big);
        let small = vec![0u8; PAGE];
        let err = view.read_u32(&small, Ptr::new(PAGE as u32 + 4)).unwrap_err();
        assert!(matches!(err, BoundaryError::OutOfBounds { extent, .. } if extent == PAGE));
        assert_eq!(view.rebuilds(), 1);
    }

    #[test]
    fn out_of_bounds_after_retry_is_an_error() {
        let memory = vec![0u8; PAGE];
        let mut view = MemoryView::over(&memory);
        let err = view.read_u32(&memory, Ptr::new(PAGE as u32 - 2)).unwrap_err();
        assert!(matches!(err, BoundaryError::OutOfBounds { len: 4, .. }));
    }

    #[test]
    fn address_overflow_is_out_of_bounds() {
        let memory = vec![0u8; PAGE];
        let mut view = MemoryView::over(&memory);
        assert!(view.read_bytes(&memory, Ptr::new(u32::MAX), 8).is_err());
    }
}
