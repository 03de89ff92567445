use thiserror::Error;

/// Transport vs. data-shape failures from the cache adapter.
///
/// [`VkcError::Transport`] is retryable (the caller may see the cache
/// recover on the next call); the others indicate the cache returned data
/// that does not match what the Memory Engine expects and are not worth
/// retrying without first fixing the underlying record.
#[derive(Debug, Error)]
pub enum VkcError {
    #[error("cache transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("embedding has {got} dimensions, expected {expected}")]
    BadEmbeddingDim { got: usize, expected: usize },

    #[error("malformed cache record at key {key}: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("user_id must not be empty")]
    EmptyUserId,
}

pub type Result<T> = std::result::Result<T, VkcError>;
