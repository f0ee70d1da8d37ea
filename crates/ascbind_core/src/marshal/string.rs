use super::{scaled_len, Marshaller};
use crate::error::Result;
use crate::heap::{ModuleHeap, RT_SIZE_OFFSET, STRING_ID};
use crate::ptr::Ptr;
use crate::view::MemoryView;

/// Read the UTF-16 units of the string object at `ptr`, `window` units at a time.
pub(crate) fn read_utf16(
    view: &mut MemoryView,
    memory: &[u8],
    ptr: Ptr,
    window: usize,
) -> Result<Option<Vec<u16>>> {
    if ptr.is_null() {
        return Ok(None);
    }
    let byte_len = view.read_u32(memory, ptr.sub(RT_SIZE_OFFSET))?;
    let units = (byte_len >> 1) as usize;
    // The length word comes from the module; never reserve past the region.
    view.check(memory, ptr, byte_len & !1)?;
    let mut out = Vec::with_capacity(units);
    let mut start = 0usize;
    while start < units {
        let take = window.min(units - start);
        let chunk = view.read_bytes(memory, ptr.add((start as u32) << 1), (take as u32) << 1)?;
        out.extend(
            chunk
                .chunks_exact(2)
                .map(|unit| u16::from_le_bytes([unit[0], unit[1]])),
        );
        start += take;
    }
    Ok(Some(out))
}

impl Marshaller {
    /// Lower raw UTF-16 code units. Surrogates are copied as-is.
    pub fn lower_utf16<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        units: Option<&[u16]>,
    ) -> Result<Ptr> {
        let Some(units) = units else {
            return Ok(Ptr::NULL);
        };
        let bytes: Vec<u8> = units.iter().flat_map(|unit| unit.to_le_bytes()).collect();
        self.lower_string_bytes(heap, units.len(), &bytes)
    }

    pub fn lower_string<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        value: Option<&str>,
    ) -> Result<Ptr> {
        let Some(value) = value else {
            return Ok(Ptr::NULL);
        };
        let bytes: Vec<u8> = value.encode_utf16().flat_map(u16::to_le_bytes).collect();
        self.lower_string_bytes(heap, bytes.len() >> 1, &bytes)
    }

    fn lower_string_bytes<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &mut H,
        units: usize,
        bytes: &[u8],
    ) -> Result<Ptr> {
        let size = scaled_len(units, 1, Ptr::NULL)?;
        let ptr = heap.alloc(size, STRING_ID)?;
        self.set_bytes(heap, ptr, bytes)?;
        Ok(ptr)
    }

    pub fn lift_utf16<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &H,
        ptr: Ptr,
    ) -> Result<Option<Vec<u16>>> {
        read_utf16(&mut self.view, heap.memory(), ptr, self.window)
    }

    /// Lift a string. Unpaired surrogates become U+FFFD; use
    /// [`lift_utf16`](Self::lift_utf16) to observe the exact units.
    pub fn lift_string<H: ModuleHeap + ?Sized>(
        &mut self,
        heap: &H,
        ptr: Ptr,
    ) -> Result<Option<String>> {
        Ok(self
            .lift_utf16(heap, ptr)?
            .map(|units| String::from_utf16_lossy(&units)))
    }
}
