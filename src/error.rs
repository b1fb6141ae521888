use thiserror::Error;

/// Errors surfaced by the store and its collaborators.
///
/// `Closed`, `NotFound`, `Io` and `Corruption` are the sentinels a caller is
/// expected to match on; `Allocator` wraps whatever the meta-store raised
/// while the allocator was looking for a free offset.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation attempted after `Store::close` finished (or started).
    #[error("store is closed")]
    Closed,

    /// Address absent from the meta-store.
    #[error("address not found")]
    NotFound,

    /// Underlying file I/O failure, surfaced verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read returned fewer bytes than the meta-store's recorded size.
    #[error("incomplete chunk data: expected {expected} bytes, observed {observed}")]
    Corruption { expected: usize, observed: usize },

    /// The meta-store failed while the allocator was looking for a free offset.
    #[error("allocator error: {0}")]
    Allocator(String),

    /// Payload exceeds the store's configured maximum chunk size.
    #[error("payload too large: max {max} bytes, got {actual}")]
    PayloadTooLarge { max: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, StoreError>;
