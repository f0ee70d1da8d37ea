//! Module-memory addresses

use std::fmt;

/// Unsigned 32-bit offset into a module's linear memory.
///
/// Offset 0 is reserved: it always means "no value".
#[repr(transparent)]
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, bytemuck::Pod, bytemuck::Zeroable,
)]
pub struct Ptr(u32);

impl Ptr {
    pub const NULL: Ptr = Ptr(0);

    #[inline]
    pub const fn new(addr: u32) -> Self {
        Ptr(addr)
    }

    #[inline]
    pub const fn addr(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` past this one. Wraps like the module's own i32 arithmetic.
    #[inline]
    pub const fn add(self, bytes: u32) -> Ptr {
        Ptr(self.0.wrapping_add(bytes))
    }

    #[inline]
    pub const fn sub(self, bytes: u32) -> Ptr {
        Ptr(self.0.wrapping_sub(bytes))
    }

    /// Raw exports take and return pointers as i32.
    #[inline]
    pub const fn to_abi(self) -> i32 {
        self.0 as i32
    }

    #[inline]
    pub const fn from_abi(raw: i32) -> Self {
        Ptr(raw as u32)
    }

    /// `None` for null, otherwise the pointer itself.
    #[inline]
    pub fn non_null(self) -> Option<Ptr> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl From<u32> for Ptr {
    fn from(addr: u32) -> Self {
        Ptr(addr)
    }
}

impl fmt::Display for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}
