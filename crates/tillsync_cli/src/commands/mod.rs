//! CLI command implementations.

pub mod cleanup;
pub mod conflicts;
pub mod journal;
pub mod node;
pub mod status;
pub mod sync;
