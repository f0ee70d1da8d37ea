use super::{scaled_len, Managed, Marshaller};
use crate::error::{BoundaryError, Result};
use crate::heap::{ModuleHeap, ARRAY_BUFFER_ID};
use crate::ptr::Ptr;

/// `{ buffer, dataStart, byteLength, length }`
pub const ARRAY_HEADER_SIZE: u32 = 16;

/// Element alignment (log2 of the slot size) of pointer-sized elements.
pub const POINTER_ALIGN: u32 = 2;

impl Marshaller {
    /// Lower an ordered collection as the array class `class_id`.
    ///
    /// Slot `i` lives at `buffer + (i << align)` and is filled by
    /// `lower_element`. Buffer and header stay pinned until every element has
    /// been written, since element lowering may allocate.
    pub fn lower_array<H, T, F>(
        &mut self,
        heap: &mut H,
        values: Option<&[T]>,
        class_id: u32,
        align: u32,
        mut lower_element: F,
    ) -> Result<Ptr>
    where
        H: ModuleHeap + ?Sized,
        F: FnMut(&mut Self, &mut H, Ptr, &T) -> Result<()>,
    {
        let Some(values) = values else {
            return Ok(Ptr::NULL);
        };
        let byte_len = scaled_len(values.len(), align, Ptr::NULL)?;
        let buffer = heap.alloc(byte_len, ARRAY_BUFFER_ID)?;
        self.with_pinned(heap, buffer, |m, heap| {
            let header = heap.alloc(ARRAY_HEADER_SIZE, class_id)?;
            m.with_pinned(heap, header, |m, heap| {
                m.set_ptr(heap, header, buffer)?;
                m.set_ptr(heap, header.add(4), buffer)?;
                m.set_u32(heap, header.add(8), byte_len)?;
                m.set_u32(heap, header.add(12), values.len() as u32)?;
                for (i, value) in values.iter().enumerate() {
                    let slot = buffer.add((i as u32) << align);
                    lower_element(m, heap, slot, value)?;
                }
                Ok(header)
            })
        })
    }

    /// Lift an ordered collection, element by element, in order.
    pub fn lift_array<H, T, F>(
        &mut self,
        heap: &H,
        ptr: Ptr,
        align: u32,
        mut lift_element: F,
    ) -> Result<Option<Vec<T>>>
    where
        H: ModuleHeap + ?Sized,
        F: FnMut(&mut Self, &H, Ptr) -> Result<T>,
    {
        if ptr.is_null() {
            return Ok(None);
        }
        let data_start = self.get_ptr(heap, ptr.add(4))?;
        let length = self.get_u32(heap, ptr.add(12))?;
        let span = u32::try_from(u64::from(length) << align).map_err(|_| BoundaryError::OutOfBounds {
            ptr: data_start,
            len: u32::MAX,
            extent: heap.memory().len(),
        })?;
        self.view.check(heap.memory(), data_start, span)?;
        let mut values = Vec::with_capacity(length as usize);
        for i in 0..length {
            values.push(lift_element(self, heap, data_start.add(i << align))?);
        }
        Ok(Some(values))
    }

    /// Lower a collection of managed objects (strings, records, handles)
    /// into pointer slots. Elements are required.
    pub fn lower_managed_array<H, T>(
        &mut self,
        heap: &mut H,
        values: Option<&[T]>,
        class_id: u32,
    ) -> Result<Ptr>
    where
        H: ModuleHeap + ?Sized,
        T: Managed,
    {
        self.lower_array(heap, values, class_id, POINTER_ALIGN, |m, heap, slot, value| {
            let ptr = value.lower_managed(m, heap)?;
            let ptr = Marshaller::not_null(ptr, "element")?;
            m.set_ptr(heap, slot, ptr)
        })
    }

    /// Lift a collection of managed objects. A null element is a
    /// [`BoundaryError::NullConstraint`].
    pub fn lift_managed_array<H, T>(&mut self, heap: &H, ptr: Ptr) -> Result<Option<Vec<T>>>
    where
        H: ModuleHeap + ?Sized,
        T: Managed,
    {
        self.lift_array(heap, ptr, POINTER_ALIGN, |m, heap, slot| {
            let element = m.get_ptr(heap, slot)?;
            if element.is_null() {
                return Err(BoundaryError::NullConstraint { argument: "element" });
            }
            T::lift_managed(m, heap, element)
        })
    }

    /// Lift a collection whose pointer slots may hold null.
    pub fn lift_nullable_array<H, T>(
        &mut self,
        heap: &H,
        ptr: Ptr,
    ) -> Result<Option<Vec<Option<T>>>>
    where
        H: ModuleHeap + ?Sized,
        T: Managed,
    {
        self.lift_array(heap, ptr, POINTER_ALIGN, |m, heap, slot| {
            let element = m.get_ptr(heap, slot)?;
            m.lift(heap, element)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::mock::MockHeap;

    const STRING_ARRAY_ID: u32 = 5;
    const I32_ARRAY_ID: u32 = 6;

    #[test]
    fn string_sequence_keeps_order() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let values = vec!["a".to_string(), "bb".to_string()];
        let ptr = m
            .lower_managed_array(&mut heap, Some(values.as_slice()), STRING_ARRAY_ID)
            .unwrap();
        assert_eq!(
            m.lift_managed_array::<_, String>(&heap, ptr).unwrap(),
            Some(values)
        );
    }

    #[test]
    fn header_and_buffer_are_pinned_during_the_write_only() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let values = ["x".to_string(), "y".to_string(), "z".to_string()];
        let header = m
            .lower_managed_array(&mut heap, Some(&values[..]), STRING_ARRAY_ID)
            .unwrap();
        let buffer = m.get_ptr(&heap, header).unwrap();
        assert_eq!(heap.pins, vec![buffer, header]);
        assert_eq!(heap.unpins, vec![header, buffer]);
        assert_eq!(m.get_u32(&heap, header.add(8)).unwrap(), 12);
        assert_eq!(m.get_u32(&heap, header.add(12)).unwrap(), 3);
    }

    #[test]
    fn failing_element_still_unpins() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let err = m
            .lower_array(&mut heap, Some(&[1u32, 2][..]), I32_ARRAY_ID, 2, |_, _, _, _| {
                Err(BoundaryError::NullConstraint { argument: "element" })
            })
            .unwrap_err();
        assert!(matches!(err, BoundaryError::NullConstraint { .. }));
        assert_eq!(heap.pinned_now(), 0);
    }

    #[test]
    fn corrupt_length_is_out_of_bounds() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let values = ["a".to_string()];
        let header = m
            .lower_managed_array(&mut heap, Some(&values[..]), STRING_ARRAY_ID)
            .unwrap();
        m.set_u32(&mut heap, header.add(12), 0x1000_0000).unwrap();
        let err = m.lift_managed_array::<_, String>(&heap, header).unwrap_err();
        assert!(matches!(err, BoundaryError::OutOfBounds { .. }));

        m.set_u32(&mut heap, header.add(12), u32::MAX).unwrap();
        let err = m.lift_managed_array::<_, String>(&heap, header).unwrap_err();
        assert!(matches!(err, BoundaryError::OutOfBounds { len: u32::MAX, .. }));
    }

    #[test]
    fn inline_numeric_elements() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let values: Vec<u32> = (0..100).map(|i| i * 3).collect();
        let ptr = m
            .lower_array(&mut heap, Some(values.as_slice()), I32_ARRAY_ID, 2, |m, heap, slot, v| {
                m.set_u32(heap, slot, *v)
            })
            .unwrap();
        let lifted = m
            .lift_array(&heap, ptr, 2, |m, heap, slot| m.get_u32(heap, slot))
            .unwrap();
        assert_eq!(lifted, Some(values));
    }

    #[test]
    fn sequences_of_every_length() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        for len in 0..20 {
            let values: Vec<String> = (0..len).map(|i| "s".repeat(i)).collect();
            let ptr = m
                .lower_managed_array(&mut heap, Some(values.as_slice()), STRING_ARRAY_ID)
                .unwrap();
            assert_eq!(m.lift_managed_array::<_, String>(&heap, ptr).unwrap(), Some(values));
        }
    }

    #[test]
    fn null_slots_lift_as_none_when_allowed() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let values = [Some("a".to_string()), None];
        let ptr = m
            .lower_array(&mut heap, Some(&values[..]), STRING_ARRAY_ID, POINTER_ALIGN, |m, heap, slot, v| {
                let p = m.lower_string(heap, v.as_deref())?;
                m.set_ptr(heap, slot, p)
            })
            .unwrap();
        assert_eq!(
            m.lift_nullable_array::<_, String>(&heap, ptr).unwrap(),
            Some(values.to_vec())
        );
        assert!(matches!(
            m.lift_managed_array::<_, String>(&heap, ptr),
            Err(BoundaryError::NullConstraint { .. })
        ));
    }
}
