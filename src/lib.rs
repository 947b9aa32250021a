//! innkeep — an in-memory hotel booking engine with WAL persistence.
//!
//! Rooms, reservations and a waitlist live behind per-entity locks; every
//! mutation is written ahead to a per-property log and replayed on startup.
//! Availability is conflict-driven: a room is free for a date range when no
//! active reservation's stay overlaps it, regardless of the room's current
//! housekeeping status.

pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod property;
pub mod reaper;
pub mod wal;
