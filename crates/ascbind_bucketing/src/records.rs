//! Classes the module exchanges by value

use ascbind_core::define_record;

/// Runtime id of `Array<SortingArrayItem<TestData>>`.
pub const SORTING_ARRAY_ID: u32 = 180;

define_record! {
    pub struct TestData(class = 178, size = 4) {
        key: String = 0,
    }
}

define_record! {
    /// One entry of a sort request: `entry` ordered by `value`.
    pub struct SortingArrayItem(class = 179, size = 8) {
        value: String = 0,
        entry: TestData = 4,
    }
}

impl SortingArrayItem {
    pub fn new(value: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            entry: TestData { key: key.into() },
        }
    }
}

/// Direction accepted by the sort export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}
