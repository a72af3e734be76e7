use ulid::Ulid;

/// Store-level failures, kept distinct so the engine never has to sniff
/// storage internals to classify a conflict.
#[derive(Debug)]
pub enum StoreError {
    /// The interval overlaps the identified live booking for the same room.
    Conflict(Ulid),
    /// Transient infrastructure failure (WAL write path). Retryable by the
    /// caller; the store never retries internally.
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Conflict(id) => write!(f, "interval overlaps existing booking {id}"),
            StoreError::Unavailable(e) => write!(f, "booking store unavailable: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}
