//! Domain model for the journal migration engine.
//!
//! # Responsibility
//! - Define entries, collections and the calendar they are placed on.
//! - Keep placement changes as pure, testable transitions.
//!
//! # Invariants
//! - Every entry and collection has a stable UUID.
//! - Placement changes append a new entry and retire the old one by flag,
//!   never by deletion.

pub mod calendar;
pub mod collection;
pub mod entry;
pub mod transition;
