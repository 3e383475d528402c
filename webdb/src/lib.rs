//! Main webdb crate: lazily-created document collections over a pluggable transport.
//!
//! This crate is the primary entry point. It re-exports the core types from
//! `webdb-core`, the in-memory transport from `webdb-memory`, and adds the
//! [`SetExt`](set::SetExt) adapter that multiplexes create, merge and delete behind a
//! single `set` call.
//!
//! # Features
//!
//! - **Lazy collections** - Collections are created on first use, exactly once per handle
//! - **Flexible querying** - Mango-style selectors or a typed query builder, evaluated
//!   natively by the transport or locally when it lacks an operator
//! - **Batch streaming** - Fixed-size pages over continuation tokens
//! - **Pluggable transports** - Anything implementing [`Transport`](transport::Transport)
//!
//! # Quick Start
//!
//! ```ignore
//! use webdb::{prelude::*, memory::InMemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> WebDbResult<()> {
//!     let db = Database::new(InMemoryTransport::new());
//!     let users = db.collection("users");
//!
//!     users
//!         .insert(vec![
//!             Document::with_id("alice").field("age", 30),
//!             Document::with_id("bob").field("age", 17),
//!         ])
//!         .await?;
//!
//!     let adults = users.list(Filter::gte("age", 18), FindOptions::new()).await?;
//!     println!("adults: {adults:?}");
//!
//!     users
//!         .batch(Query::all(), BatchOptions::new().size(100), |page| async move {
//!             println!("page of {}", page.len());
//!             Ok::<_, WebDbError>(())
//!         })
//!         .await?;
//!
//!     db.shutdown().await
//! }
//! ```
//!
//! # Set
//!
//! ```ignore
//! use webdb::prelude::*;
//!
//! // Create unless the id is taken.
//! users.set(Document::with_id("carol").field("age", 41)).await?;
//! // Merge into the first match.
//! users.set((Query::from(Filter::eq("id", "carol")), Some(Patch::new().set("age", 42)))).await?;
//! // Delete the first match.
//! users.set((Query::from(Filter::eq("id", "carol")), None)).await?;
//! ```
//!
//! # Dynamic Dispatch
//!
//! [`DynDatabase`](database::DynDatabase) erases the transport type so it can be chosen at
//! runtime:
//!
//! ```ignore
//! use std::sync::Arc;
//! use webdb::{prelude::*, memory::InMemoryTransport};
//!
//! let transport: Arc<dyn Transport> = Arc::new(InMemoryTransport::new());
//! let db: DynDatabase = Database::new(transport);
//! ```

#[allow(unused_extern_crates)]
extern crate self as webdb;

pub mod prelude;
pub mod set;

pub use webdb_core::{
    codec, collection, config, cursor, database, document, error, lifecycle, matcher, normalize,
    query, transport,
};

pub use set::{SetArgs, SetExt, SetOutcome};

// Re-export BSON types for convenience
pub use bson;

/// In-memory transport implementations.
pub mod memory {
    pub use webdb_memory::{InMemoryTransport, InMemoryTransportBuilder};
}
