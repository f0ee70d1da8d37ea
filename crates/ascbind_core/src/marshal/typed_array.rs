use super::{scaled_len, Marshaller};
use crate::error::Result;
use crate::heap::{ModuleHeap, ARRAY_BUFFER_ID};
use crate::ptr::Ptr;
use bytemuck::Pod;
use std::mem::size_of;

/// `{ buffer, dataStart, byteLength }`
pub const TYPED_ARRAY_HEADER_SIZE: u32 = 12;

impl Marshaller {
    /// Lower a fixed-width numeric array as the typed-array class `class_id`.
    ///
    /// Element bytes are copied verbatim; both the host and the module are
    /// little-endian.
    pub fn lower_typed_array<H, T>(
        &mut self,
        heap: &mut H,
        values: Option<&[T]>,
        class_id: u32,
    ) -> Result<Ptr>
    where
        H: ModuleHeap + ?Sized,
        T: Pod,
    {
        let Some(values) = values else {
            return Ok(Ptr::NULL);
        };
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let byte_len = scaled_len(bytes.len(), 0, Ptr::NULL)?;
        let buffer = heap.alloc(byte_len, ARRAY_BUFFER_ID)?;
        self.with_pinned(heap, buffer, |m, heap| {
            let header = heap.alloc(TYPED_ARRAY_HEADER_SIZE, class_id)?;
            m.set_ptr(heap, header, buffer)?;
            m.set_ptr(heap, header.add(4), buffer)?;
            m.set_u32(heap, header.add(8), byte_len)?;
            m.set_bytes(heap, buffer, bytes)?;
            Ok(header)
        })
    }

    /// Copy a typed array out of module memory into a host-owned vector.
    pub fn lift_typed_array<H, T>(&mut self, heap: &H, ptr: Ptr) -> Result<Option<Vec<T>>>
    where
        H: ModuleHeap + ?Sized,
        T: Pod,
    {
        if ptr.is_null() {
            return Ok(None);
        }
        let data_start = self.get_ptr(heap, ptr.add(4))?;
        let byte_len = self.get_u32(heap, ptr.add(8))?;
        let usable = byte_len - byte_len % size_of::<T>() as u32;
        let bytes = self.view.read_bytes(heap.memory(), data_start, usable)?;
        Ok(Some(bytemuck::pod_collect_to_vec(bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::mock::MockHeap;

    const UINT8_ARRAY_ID: u32 = 9;
    const FLOAT64_ARRAY_ID: u32 = 13;

    #[test]
    fn bytes_round_trip_for_every_length() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        for len in 0..64usize {
            let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let ptr = m.lower_typed_array(&mut heap, Some(data.as_slice()), UINT8_ARRAY_ID).unwrap();
            assert_eq!(m.lift_typed_array::<_, u8>(&heap, ptr).unwrap(), Some(data));
        }
    }

    #[test]
    fn header_layout_matches_runtime() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let values = [1.5f64, -2.25, 1e300];
        let header = m
            .lower_typed_array(&mut heap, Some(&values[..]), FLOAT64_ARRAY_ID)
            .unwrap();
        let buffer = m.get_ptr(&heap, header).unwrap();
        assert_eq!(m.get_ptr(&heap, header.add(4)).unwrap(), buffer);
        assert_eq!(m.get_u32(&heap, header.add(8)).unwrap(), 24);
        assert_eq!(m.get_u32(&heap, header.sub(8)).unwrap(), FLOAT64_ARRAY_ID);
        assert_eq!(
            m.lift_typed_array::<_, f64>(&heap, header).unwrap().unwrap(),
            values.to_vec()
        );
    }

    #[test]
    fn buffer_is_pinned_only_during_the_write() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        m.lower_typed_array(&mut heap, Some(&[1u8, 2, 3][..]), UINT8_ARRAY_ID)
            .unwrap();
        assert_eq!(heap.pins.len(), 1);
        assert_eq!(heap.pinned_now(), 0);
    }

    #[test]
    fn lifted_array_is_a_snapshot() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let ptr = m
            .lower_typed_array(&mut heap, Some(&[9u8, 9, 9][..]), UINT8_ARRAY_ID)
            .unwrap();
        let lifted = m.lift_typed_array::<_, u8>(&heap, ptr).unwrap().unwrap();

        // The module recycles the buffer after the call.
        let data = m.get_ptr(&heap, ptr.add(4)).unwrap();
        m.set_bytes(&mut heap, data, &[0, 0, 0]).unwrap();

        assert_eq!(lifted, vec![9, 9, 9]);
        let module_range = heap.memory.as_ptr_range();
        assert!(!module_range.contains(&lifted.as_ptr()));
    }

    #[test]
    fn null_passes_through() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        assert_eq!(
            m.lower_typed_array::<_, u32>(&mut heap, None, 11).unwrap(),
            Ptr::NULL
        );
        assert_eq!(m.lift_typed_array::<_, u32>(&heap, Ptr::NULL).unwrap(), None);
    }
}
