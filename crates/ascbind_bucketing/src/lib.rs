//! ascbind bucketing
//!
//! Typed access to the feature-flag bucketing module: configuration and
//! platform data, variable evaluation, the event queue and the filter
//! helpers, each call marshalled through [`ascbind_core`].

pub mod error;
pub mod module;
pub mod records;
pub mod variable_type;

pub use ascbind_core::Arg;
pub use error::{BucketingError, Result};
pub use module::{BoundedHashes, BucketingModule, UINT8_ARRAY_ID};
pub use records::{SortDirection, SortingArrayItem, TestData, SORTING_ARRAY_ID};
pub use variable_type::{VariableType, VariableTypeCodes};
