//! In-memory storage transport for webdb.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Transport` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Revision checks** - Stale writes are rejected with a conflict, like a real document server
//! - **Full selector support** - Mango selectors, sorting and bookmark pagination
//! - **Configurable capabilities** - Narrow the native operator set to exercise local evaluation
//!
//! # Quick Start
//!
//! ```ignore
//! use webdb::{prelude::*, memory::InMemoryTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(InMemoryTransport::new());
//!     let users = db.collection("users");
//!
//!     users.insert(vec![Document::with_id("alice").field("age", 30)]).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as webdb_memory;

pub mod store;

pub use store::{InMemoryTransport, InMemoryTransportBuilder};
