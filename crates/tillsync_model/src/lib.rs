//! # tillsync Model
//!
//! Shared value types for the tillsync offline-first engine.
//!
//! This crate provides:
//! - Record identity and schemaless row payloads
//! - Predicate queries (comparison, set membership, pattern match)
//! - Mutation descriptions (insert / update / delete)
//! - The table write policy and feature flags
//! - Edge node (terminal) identity
//!
//! Everything here is plain data: no I/O, no storage, no network.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod mutation;
mod node;
mod policy;
mod query;
mod record;

pub use error::{ModelError, ModelResult};
pub use mutation::{Mutation, MutationKind};
pub use node::{EdgeNode, NodeId, NodeStatus};
pub use policy::{FeatureFlags, TableAccess, WritePolicy};
pub use query::{Filter, Query, SortOrder};
pub use record::{field_subset_of, row_record_id, row_updated_at, FieldMap, RecordId};
