use ulid::Ulid;

use crate::model::Ms;
use crate::store::StoreError;

/// Every failure the engine surfaces, kept distinct so callers can map
/// them to their own outcome types without string matching. Only
/// `StoreUnavailable` is worth retrying; the rest are deterministic for
/// the same inputs.
#[derive(Debug)]
pub enum EngineError {
    /// No identity was supplied.
    Unauthenticated,
    /// Identity present but lacks privilege or ownership.
    Forbidden,
    /// `start < end` does not hold.
    InvalidInterval { start: Ms, end: Ms },
    RoomNotFound(Ulid),
    BookingNotFound(Ulid),
    /// The requested interval overlaps the identified live booking.
    OverlapConflict(Ulid),
    /// Transient store failure, propagated unchanged — no internal retry.
    StoreUnavailable(String),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(id) => EngineError::OverlapConflict(id),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Unauthenticated => write!(f, "authentication required"),
            EngineError::Forbidden => write!(f, "insufficient privilege"),
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval: [{start}, {end}) is empty or inverted")
            }
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::OverlapConflict(id) => {
                write!(f, "interval overlaps existing booking {id}")
            }
            EngineError::StoreUnavailable(e) => write!(f, "booking store unavailable: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
