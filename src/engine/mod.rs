mod error;

pub use error::EngineError;

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use ulid::Ulid;

use crate::availability::day_availability;
use crate::model::{Booking, Identity, Ms, RoomDay, Span, day_window};
use crate::policy;
use crate::registry::RoomRegistry;
use crate::store::BookingStore;

/// Stateless orchestrator over the injected store and registry. Holds no
/// locks and no booking state of its own; safe to share across any number
/// of concurrent tasks.
pub struct BookingEngine {
    store: Arc<BookingStore>,
    rooms: Arc<dyn RoomRegistry>,
}

impl BookingEngine {
    pub fn new(store: Arc<BookingStore>, rooms: Arc<dyn RoomRegistry>) -> Self {
        Self { store, rooms }
    }

    /// Reserve `[start, end)` on a room for the calling user.
    ///
    /// Checks run in a fixed order: authentication, authorization, interval
    /// shape, room existence — only then does the store see the request, so
    /// a rejected call leaves no trace.
    pub async fn create(
        &self,
        room_id: Ulid,
        start: Ms,
        end: Ms,
        identity: Option<&Identity>,
    ) -> Result<Booking, EngineError> {
        let identity = identity.ok_or(EngineError::Unauthenticated)?;
        let user_id = policy::create_owner(identity).ok_or(EngineError::Forbidden)?;
        if start >= end {
            return Err(EngineError::InvalidInterval { start, end });
        }
        let room = self
            .rooms
            .find_by_id(room_id)
            .await
            .ok_or(EngineError::RoomNotFound(room_id))?;

        let booking = self
            .store
            .insert(room.id, user_id, Span::new(start, end))
            .await?;
        debug!(booking = %booking.id, room = %room.id, %user_id, "booking created");
        Ok(booking)
    }

    /// Cancel a booking: fetch, authorize against the owner, then delete.
    /// A booking that vanishes between fetch and delete (a concurrent
    /// cancel won) still counts as success.
    pub async fn cancel(
        &self,
        booking_id: Ulid,
        identity: Option<&Identity>,
    ) -> Result<(), EngineError> {
        let identity = identity.ok_or(EngineError::Unauthenticated)?;
        let booking = self
            .store
            .get(booking_id)
            .await
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if !policy::can_cancel(identity, booking.user_id) {
            return Err(EngineError::Forbidden);
        }
        self.store.delete(booking_id).await?;
        Ok(())
    }

    /// Per-room bookings and free slots for one UTC day, ordered by room id
    /// ascending. Publicly readable — no identity required — and a pure
    /// function of stored state and date.
    pub async fn availability(&self, date: NaiveDate) -> Vec<RoomDay> {
        let window = day_window(date);
        let rooms = self.rooms.list_all().await;
        let bookings = self.store.find_overlapping(None, window).await;
        day_availability(rooms, &bookings, &window)
    }
}
