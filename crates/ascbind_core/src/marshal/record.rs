//! Managed objects, record fields and fixed-layout records
//!
//! A [`Managed`] value lives in the module as an object referenced by a
//! pointer: strings, records and opaque handles. Record fields are
//! [`FieldCodec`]s, written at fixed offsets inside the record payload.
//! Records themselves are declared with [`define_record!`](crate::define_record).

use super::{Internref, Marshaller};
use crate::error::{BoundaryError, Result};
use crate::heap::ModuleHeap;
use crate::ptr::Ptr;

/// A value stored in the module as a managed object.
pub trait Managed: Sized {
    /// Lower into a fresh object (or forward an existing one).
    fn lower_managed<H: ModuleHeap + ?Sized>(&self, m: &mut Marshaller, heap: &mut H) -> Result<Ptr>;

    /// Lift from a non-null pointer.
    fn lift_managed<H: ModuleHeap + ?Sized>(m: &mut Marshaller, heap: &H, ptr: Ptr) -> Result<Self>;
}

/// A value that can occupy a field slot of a record.
pub trait FieldCodec: Sized {
    /// Byte width of the slot.
    const WIDTH: u32;

    fn lower_field<H: ModuleHeap + ?Sized>(
        &self,
        m: &mut Marshaller,
        heap: &mut H,
        at: Ptr,
        field: &'static str,
    ) -> Result<()>;

    fn lift_field<H: ModuleHeap + ?Sized>(
        m: &mut Marshaller,
        heap: &H,
        at: Ptr,
        field: &'static str,
    ) -> Result<Self>;
}

/// A class with an exact payload size and fixed field offsets.
pub trait Record: Sized {
    const CLASS_ID: u32;
    const SIZE: u32;

    fn lower_fields<H: ModuleHeap + ?Sized>(
        &self,
        m: &mut Marshaller,
        heap: &mut H,
        base: Ptr,
    ) -> Result<()>;

    fn lift_fields<H: ModuleHeap + ?Sized>(m: &mut Marshaller, heap: &H, base: Ptr) -> Result<Self>;
}

impl Marshaller {
    /// Lower an optional managed value; `None` becomes the null pointer.
    pub fn lower<H, T>(&mut self, heap: &mut H, value: Option<&T>) -> Result<Ptr>
    where
        H: ModuleHeap + ?Sized,
        T: Managed,
    {
        match value {
            Some(value) => value.lower_managed(self, heap),
            None => Ok(Ptr::NULL),
        }
    }

    pub fn lift<H, T>(&mut self, heap: &H, ptr: Ptr) -> Result<Option<T>>
    where
        H: ModuleHeap + ?Sized,
        T: Managed,
    {
        if ptr.is_null() {
            return Ok(None);
        }
        T::lift_managed(self, heap, ptr).map(Some)
    }

    /// Allocate `R::SIZE` bytes of class `R::CLASS_ID` and write every field.
    /// The record stays pinned while its fields are lowered.
    pub fn lower_record<H, R>(&mut self, heap: &mut H, value: &R) -> Result<Ptr>
    where
        H: ModuleHeap + ?Sized,
        R: Record,
    {
        let ptr = heap.alloc(R::SIZE, R::CLASS_ID)?;
        self.with_pinned(heap, ptr, |m, heap| {
            value.lower_fields(m, heap, ptr)?;
            Ok(ptr)
        })
    }

    pub fn lift_record<H, R>(&mut self, heap: &H, ptr: Ptr) -> Result<R>
    where
        H: ModuleHeap + ?Sized,
        R: Record,
    {
        R::lift_fields(self, heap, ptr)
    }
}

impl Managed for String {
    fn lower_managed<H: ModuleHeap + ?Sized>(&self, m: &mut Marshaller, heap: &mut H) -> Result<Ptr> {
        m.lower_string(heap, Some(self))
    }

    fn lift_managed<H: ModuleHeap + ?Sized>(m: &mut Marshaller, heap: &H, ptr: Ptr) -> Result<Self> {
        Ok(m.lift_string(heap, ptr)?.unwrap_or_default())
    }
}

impl Managed for Internref {
    fn lower_managed<H: ModuleHeap + ?Sized>(&self, m: &mut Marshaller, _heap: &mut H) -> Result<Ptr> {
        m.lower_internref(Some(self), None)
    }

    fn lift_managed<H: ModuleHeap + ?Sized>(m: &mut Marshaller, heap: &H, ptr: Ptr) -> Result<Self> {
        m.read_handle(heap, ptr)
    }
}

/// Required pointer slot: null is rejected in both directions.
impl<T: Managed> FieldCodec for T {
    const WIDTH: u32 = 4;

    fn lower_field<H: ModuleHeap + ?Sized>(
        &self,
        m: &mut Marshaller,
        heap: &mut H,
        at: Ptr,
        field: &'static str,
    ) -> Result<()> {
        let ptr = Marshaller::not_null(self.lower_managed(m, heap)?, field)?;
        m.set_ptr(heap, at, ptr)
    }

    fn lift_field<H: ModuleHeap + ?Sized>(
        m: &mut Marshaller,
        heap: &H,
        at: Ptr,
        field: &'static str,
    ) -> Result<Self> {
        let ptr = Marshaller::not_null(m.get_ptr(heap, at)?, field)?;
        T::lift_managed(m, heap, ptr)
    }
}

/// Nullable pointer slot.
impl<T: Managed> FieldCodec for Option<T> {
    const WIDTH: u32 = 4;

    fn lower_field<H: ModuleHeap + ?Sized>(
        &self,
        m: &mut Marshaller,
        heap: &mut H,
        at: Ptr,
        _field: &'static str,
    ) -> Result<()> {
        let ptr = m.lower(heap, self.as_ref())?;
        m.set_ptr(heap, at, ptr)
    }

    fn lift_field<H: ModuleHeap + ?Sized>(
        m: &mut Marshaller,
        heap: &H,
        at: Ptr,
        _field: &'static str,
    ) -> Result<Self> {
        let ptr = m.get_ptr(heap, at)?;
        m.lift(heap, ptr)
    }
}

macro_rules! numeric_field {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FieldCodec for $ty {
                const WIDTH: u32 = std::mem::size_of::<$ty>() as u32;

                fn lower_field<H: ModuleHeap + ?Sized>(
                    &self,
                    m: &mut Marshaller,
                    heap: &mut H,
                    at: Ptr,
                    _field: &'static str,
                ) -> Result<()> {
                    m.set_bytes(heap, at, &self.to_le_bytes())
                }

                fn lift_field<H: ModuleHeap + ?Sized>(
                    m: &mut Marshaller,
                    heap: &H,
                    at: Ptr,
                    _field: &'static str,
                ) -> Result<Self> {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&m.get_bytes(heap, at, Self::WIDTH)?);
                    Ok(<$ty>::from_le_bytes(raw))
                }
            }
        )*
    };
}

numeric_field!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

impl FieldCodec for bool {
    const WIDTH: u32 = 1;

    fn lower_field<H: ModuleHeap + ?Sized>(
        &self,
        m: &mut Marshaller,
        heap: &mut H,
        at: Ptr,
        field: &'static str,
    ) -> Result<()> {
        (*self as u8).lower_field(m, heap, at, field)
    }

    fn lift_field<H: ModuleHeap + ?Sized>(
        m: &mut Marshaller,
        heap: &H,
        at: Ptr,
        field: &'static str,
    ) -> Result<Self> {
        Ok(u8::lift_field(m, heap, at, field)? != 0)
    }
}

/// Error for an opaque handle whose class differs from the one expected.
#[doc(hidden)]
pub fn opaque_mismatch(expected: u32, handle: &Internref, instance: super::InstanceId) -> BoundaryError {
    BoundaryError::TypeMismatch {
        expected,
        found: handle.class_id(),
        instance: instance.get(),
        origin: handle.origin().get(),
    }
}

/// Declare a module class and how it crosses the boundary.
///
/// With fields, the class is marshalled structurally: `size` bytes of class
/// `class`, each field written at its declared offset. With an empty body the
/// class is opaque: the host only ever holds an [`Internref`] to it, checked
/// against `class` whenever it is passed back in.
///
/// ```ignore
/// define_record! {
///     pub struct TestData(class = 178, size = 4) {
///         key: String = 0,
///     }
/// }
///
/// define_record! {
///     pub struct FeatureVariationMap(class = 40) {}
/// }
/// ```
#[macro_export]
macro_rules! define_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident(class = $class:expr) {}
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis struct $name($crate::Internref);

        impl $name {
            pub const CLASS_ID: u32 = $class;

            pub fn handle(&self) -> $crate::Internref {
                self.0
            }
        }

        impl $crate::Managed for $name {
            fn lower_managed<H: $crate::ModuleHeap + ?Sized>(
                &self,
                m: &mut $crate::Marshaller,
                _heap: &mut H,
            ) -> $crate::Result<$crate::Ptr> {
                m.lower_internref(Some(&self.0), Some(Self::CLASS_ID))
            }

            fn lift_managed<H: $crate::ModuleHeap + ?Sized>(
                m: &mut $crate::Marshaller,
                heap: &H,
                ptr: $crate::Ptr,
            ) -> $crate::Result<Self> {
                let handle = <$crate::Internref as $crate::Managed>::lift_managed(m, heap, ptr)?;
                if handle.class_id() != Self::CLASS_ID {
                    return Err($crate::marshal::opaque_mismatch(Self::CLASS_ID, &handle, m.instance()));
                }
                Ok(Self(handle))
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident(class = $class:expr, size = $size:expr) {
            $( $(#[$fmeta:meta])* $field:ident : $fty:ty = $offset:expr ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        $vis struct $name {
            $( $(#[$fmeta])* pub $field: $fty, )+
        }

        impl $crate::Record for $name {
            const CLASS_ID: u32 = $class;
            const SIZE: u32 = $size;

            fn lower_fields<H: $crate::ModuleHeap + ?Sized>(
                &self,
                m: &mut $crate::Marshaller,
                heap: &mut H,
                base: $crate::Ptr,
            ) -> $crate::Result<()> {
                $(
                    const _: () = assert!($offset + <$fty as $crate::FieldCodec>::WIDTH <= $size);
                    <$fty as $crate::FieldCodec>::lower_field(
                        &self.$field, m, heap, base.add($offset), stringify!($field),
                    )?;
                )+
                Ok(())
            }

            fn lift_fields<H: $crate::ModuleHeap + ?Sized>(
                m: &mut $crate::Marshaller,
                heap: &H,
                base: $crate::Ptr,
            ) -> $crate::Result<Self> {
                Ok(Self {
                    $(
                        $field: <$fty as $crate::FieldCodec>::lift_field(
                            m, heap, base.add($offset), stringify!($field),
                        )?,
                    )+
                })
            }
        }

        impl $crate::Managed for $name {
            fn lower_managed<H: $crate::ModuleHeap + ?Sized>(
                &self,
                m: &mut $crate::Marshaller,
                heap: &mut H,
            ) -> $crate::Result<$crate::Ptr> {
                m.lower_record(heap, self)
            }

            fn lift_managed<H: $crate::ModuleHeap + ?Sized>(
                m: &mut $crate::Marshaller,
                heap: &H,
                ptr: $crate::Ptr,
            ) -> $crate::Result<Self> {
                m.lift_record(heap, ptr)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::heap::mock::MockHeap;
    use crate::{BoundaryError, Marshaller, Ptr};

    crate::define_record! {
        struct TestData(class = 178, size = 4) {
            key: String = 0,
        }
    }

    crate::define_record! {
        struct SortingItem(class = 179, size = 8) {
            value: String = 0,
            entry: TestData = 4,
        }
    }

    crate::define_record! {
        struct Mixed(class = 200, size = 24) {
            flag: bool = 0,
            count: u32 = 4,
            label: Option<String> = 8,
            ratio: f64 = 16,
        }
    }

    crate::define_record! {
        struct VariationMap(class = 40) {}
    }

    crate::define_record! {
        struct OtherClass(class = 41) {}
    }

    #[test]
    fn nested_records_round_trip() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let item = SortingItem {
            value: "b".into(),
            entry: TestData { key: "key-b".into() },
        };
        let ptr = m.lower(&mut heap, Some(&item)).unwrap();
        assert_eq!(m.get_u32(&heap, ptr.sub(8)).unwrap(), 179);
        assert_eq!(m.get_u32(&heap, ptr.sub(4)).unwrap(), 8);
        assert_eq!(m.lift::<_, SortingItem>(&heap, ptr).unwrap(), Some(item));
        assert_eq!(heap.pinned_now(), 0);
    }

    #[test]
    fn mixed_fields_sit_at_declared_offsets() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let value = Mixed {
            flag: true,
            count: 7,
            label: None,
            ratio: 0.25,
        };
        let ptr = m.lower(&mut heap, Some(&value)).unwrap();
        assert_eq!(heap.memory[ptr.addr() as usize], 1);
        assert_eq!(m.get_u32(&heap, ptr.add(4)).unwrap(), 7);
        assert_eq!(m.get_ptr(&heap, ptr.add(8)).unwrap(), Ptr::NULL);
        assert_eq!(m.lift::<_, Mixed>(&heap, ptr).unwrap(), Some(value));
    }

    #[test]
    fn null_required_field_is_rejected_when_lifting() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let ptr = crate::ModuleHeap::alloc(&mut heap, 4, 178).unwrap();
        let err = m.lift::<_, TestData>(&heap, ptr).unwrap_err();
        assert!(matches!(err, BoundaryError::NullConstraint { argument: "key" }));
    }

    #[test]
    fn fieldless_class_is_an_opaque_handle() {
        let mut heap = MockHeap::new();
        let mut m = Marshaller::new(&heap.memory, 1024);
        let raw = crate::ModuleHeap::alloc(&mut heap, 32, VariationMap::CLASS_ID).unwrap();

        let map: VariationMap = m.lift(&heap, raw).unwrap().unwrap();
        assert_eq!(map.handle().ptr(), raw);
        assert_eq!(m.lower(&mut heap, Some(&map)).unwrap(), raw);

        let err = m.lift::<_, OtherClass>(&heap, raw).unwrap_err();
        assert!(matches!(err, BoundaryError::TypeMismatch { expected: 41, found: 40, .. }));
    }
}
