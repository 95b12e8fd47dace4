//! SQLite participant connections

mod participant_impl;

pub use participant_impl::SqliteParticipant;
