//! Exclusive time-slot booking of shared rooms.
//!
//! Users reserve half-open UTC intervals on rooms; the store guarantees
//! that no two live bookings for the same room ever overlap, even under
//! concurrent submission, and the engine reports per-room bookings and
//! free slots for any day.
//!
//! Serialization happens entirely at the [`store::BookingStore`]: each
//! room's state sits behind its own lock, held across the overlap check
//! and the WAL append, so the check-and-insert is atomic per room. The
//! [`engine::BookingEngine`] on top is a stateless orchestrator taking
//! an explicit [`model::Identity`] per call.

pub mod availability;
pub mod compactor;
pub mod config;
pub mod engine;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod registry;
pub mod store;
pub mod wal;
