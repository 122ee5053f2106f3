//! # TillSync Engine
//!
//! Offline-first dual-store engine for point-of-sale terminals.
//!
//! This crate provides:
//! - Connectivity-aware routing between the remote and local stores
//! - A durable write journal with ordered replay
//! - Conflict detection, policy auto-resolution, and operator resolution
//! - Atomic server-side procedures (settlement, inventory transfer)
//! - HTTP transport abstraction with token refresh
//!
//! ## Architecture
//!
//! Every read and write enters through [`SyncEngine`]. The engine samples
//! connectivity once per operation: online operations go straight to the
//! authoritative remote store, offline writes are applied to the local
//! store together with a journal entry recording the mutation. A replay
//! cycle later walks the journal in order and settles each entry against
//! the remote store.
//!
//! ## Key Invariants
//!
//! - The remote store is authoritative; the local store is a cache plus a
//!   journal of not-yet-acknowledged writes
//! - Journal entries replay in `seq` order; entries behind an unresolved
//!   conflict on the same record wait for the operator
//! - Replay is idempotent: an entry whose effect is already visible
//!   remotely settles without writing
//! - Transport failures stop a replay cycle; data failures do not
//! - A local write and its journal entry commit in one transaction

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod config;
mod connectivity;
mod engine;
mod error;
mod http;
mod remote;
mod replay;
mod resolver;
mod router;

pub use atomic::{procedures, ProcedureCall};
pub use config::{ApplyMode, EngineConfig};
pub use connectivity::Connectivity;
pub use engine::{SyncEngine, SyncStatus};
pub use error::{EngineError, EngineResult};
pub use http::{
    HttpClient, HttpRemote, HttpResponse, LoopbackClient, LoopbackServer, StaticToken,
    TokenProvider,
};
pub use remote::RemoteStore;
pub use replay::SyncReport;
