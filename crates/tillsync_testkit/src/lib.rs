//! # tillsync Testkit
//!
//! Test utilities for the tillsync engine.
//!
//! This crate provides:
//! - An in-memory authoritative store with fault injection
//! - Engine fixtures over the standard till table policy
//! - Point-of-sale row builders
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tillsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_offline_sale() {
//!     with_engine(|engine, remote| {
//!         engine.set_online(false);
//!         // ... journal writes, then bring the remote back and sync
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod remote;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::remote::*;
}

pub use fixtures::*;
pub use generators::*;
pub use remote::*;
