use std::collections::HashMap;

use ulid::Ulid;

use crate::model::{Booking, BookingWindow, Room, RoomDay, Span};

// ── Free-slot computation ─────────────────────────────────────────

/// Complementary free intervals of `window` given that room's bookings,
/// which MUST arrive sorted by start (the store's `find_overlapping`
/// contract — no re-sorting here).
///
/// Single cursor pass: emit the gap before each booking, then advance.
/// The cursor never moves backward, so an interval contained in an
/// already-covered range contributes nothing.
pub fn free_slots(window: &Span, bookings: &[Booking]) -> Vec<Span> {
    let mut free = Vec::new();
    let mut cursor = window.start;

    for b in bookings {
        if b.span.start > cursor {
            free.push(Span::new(cursor, b.span.start));
        }
        cursor = cursor.max(b.span.end);
    }
    if cursor < window.end {
        free.push(Span::new(cursor, window.end));
    }
    free
}

/// Fold rooms and their in-window bookings into per-room day reports,
/// ordered by room id ascending regardless of registry iteration order.
/// `bookings` must be ordered by (room id, start), as `find_overlapping`
/// returns them.
pub fn day_availability(mut rooms: Vec<Room>, bookings: &[Booking], window: &Span) -> Vec<RoomDay> {
    let mut by_room: HashMap<Ulid, Vec<Booking>> = HashMap::new();
    for b in bookings {
        by_room.entry(b.room_id).or_default().push(*b);
    }

    rooms.sort_by_key(|r| r.id);
    rooms
        .into_iter()
        .map(|room| {
            let list = by_room.remove(&room.id).unwrap_or_default();
            let free = free_slots(window, &list);
            let bookings = list.iter().map(BookingWindow::from).collect();
            RoomDay { room, bookings, free }
        })
        .collect()
}
