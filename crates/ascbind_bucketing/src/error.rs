use ascbind_core::{BoundaryError, InstantiationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BucketingError {
    #[error(transparent)]
    Boundary(#[from] BoundaryError),

    #[error(transparent)]
    Instantiation(#[from] InstantiationError),

    #[error("`{export}` returned null where a value was required")]
    NullResult { export: &'static str },

    #[error("unknown variable type `{0}`")]
    UnknownVariableType(String),

    #[error("`{export}` exchanged malformed JSON: {source}")]
    Json {
        export: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T, E = BucketingError> = std::result::Result<T, E>;
