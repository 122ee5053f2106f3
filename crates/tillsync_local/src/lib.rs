//! # tillsync Local Store
//!
//! The terminal-resident durable store: embedded SQLite holding
//! - the business-row mirror (`rows`)
//! - the sync journal (`sync_journal`)
//! - conflict records (`sync_conflicts`)
//! - engine metadata (`sync_meta`)
//!
//! The local store is the only place writes can land while disconnected, and
//! it doubles as the remote store's read cache. Everything the engine
//! persists goes through this crate's transaction scope: an offline row
//! write and its journal entry commit together or not at all.
//!
//! ## Key Invariants
//!
//! - Journal status transitions are enforced in SQL; an illegal transition
//!   changes no rows and surfaces a typed error
//! - The journal sequence (`seq`) is assigned inside the enqueuing
//!   transaction, so replay order equals commit order
//! - Timestamps are stored as fixed-width RFC 3339 text, so lexicographic
//!   comparison in SQL equals chronological comparison

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflicts;
mod error;
mod journal;
mod meta;
mod rows;
mod schema;
mod sql;
mod store;

pub use error::{LocalError, LocalResult};
pub use journal::JournalCounts;
pub use store::{LocalStore, LocalTxn};
