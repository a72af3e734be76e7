use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// UTC day window `[midnight, next midnight)` for an availability query.
pub fn day_window(date: NaiveDate) -> Span {
    let start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    let end = (date + chrono::Days::new(1)).and_time(chrono::NaiveTime::MIN).and_utc();
    Span::new(start.timestamp_millis(), end.timestamp_millis())
}

/// A bookable room. Created once by the registration path, never deleted;
/// read-only to the booking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub location: String,
    pub capacity: u32,
}

/// A confirmed reservation. Immutable once persisted; the only transition
/// out of existence is deletion via cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

/// Caller identity, resolved per request by an external authentication
/// collaborator and passed explicitly into every engine operation.
/// An anonymous caller is `None` at the call site, not a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub role: Role,
    pub user_id: Option<Ulid>,
}

impl Identity {
    pub fn admin() -> Self {
        Self { role: Role::Admin, user_id: None }
    }

    pub fn user(user_id: Ulid) -> Self {
        Self { role: Role::User, user_id: Some(user_id) }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_owner(&self, target: Ulid) -> bool {
        self.user_id == Some(target)
    }
}

/// Per-room booking state as the store holds it. Bookings stay sorted by
/// `span.start`; the ordered `find_overlapping` contract depends on it.
#[derive(Debug, Clone)]
pub struct RoomSlots {
    pub room_id: Ulid,
    pub bookings: Vec<Booking>,
}

impl RoomSlots {
    pub fn new(room_id: Ulid) -> Self {
        Self { room_id, bookings: Vec::new() }
    }

    /// Insert keeping sort order by span.start.
    pub fn insert_sorted(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.span.start, |b| b.span.start)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    /// Bookings whose span overlaps the query window, in start order.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.span.start < query.end);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.span.end > query.start)
    }

    /// First live booking overlapping `span`, if any.
    pub fn first_conflict(&self, span: &Span) -> Option<&Booking> {
        self.overlapping(span).next()
    }
}

/// WAL record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated { booking: Booking },
    BookingCancelled { id: Ulid, room_id: Ulid },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking } => booking.room_id,
            Event::BookingCancelled { room_id, .. } => *room_id,
        }
    }
}

// ── Availability result types ────────────────────────────────────

/// One booked window inside a day, as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingWindow {
    pub id: Ulid,
    pub user_id: Ulid,
    pub start: Ms,
    pub end: Ms,
}

impl From<&Booking> for BookingWindow {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            user_id: b.user_id,
            start: b.span.start,
            end: b.span.end,
        }
    }
}

/// Availability report for one room over one day window: the booked
/// windows in start order plus the complementary free slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomDay {
    pub room: Room,
    pub bookings: Vec<BookingWindow>,
    pub free: Vec<Span>,
}
