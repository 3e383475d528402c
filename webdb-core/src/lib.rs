//! Lazily-initialized document collections over a pluggable storage transport.
//!
//! This crate is the core of the webdb project and provides:
//!
//! - **Documents and patches** ([`document`]) - Public document shape, typed record conversion, field patches
//! - **Queries** ([`query`]) - Query model, fluent builders, selector parsing
//! - **Predicate matching** ([`matcher`]) - In-memory evaluation and collation order
//! - **Normalization** ([`normalize`]) - Sort/projection normalization and selector pushdown
//! - **Transport abstraction** ([`transport`]) - The trait storage implementations provide
//! - **Collections** ([`collection`]) - Insert, get, list, update, remove, batch and friends
//! - **Cursors** ([`cursor`]) - Continuation-token pagination
//! - **Database** ([`database`]) - Collection registry plus database-wide operations
//! - **Configuration** ([`config`]) and **errors** ([`error`])
//!
//! # Example
//!
//! ```ignore
//! use webdb_core::{database::Database, document::Document, query::Filter, normalize::FindOptions};
//!
//! let db = Database::new(transport);
//! let users = db.collection("users");
//!
//! users.insert(vec![Document::with_id("alice").field("age", 30)]).await?;
//! let adults = users.list(Filter::gte("age", 18), FindOptions::new()).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as webdb_core;

pub mod codec;
pub mod collection;
pub mod config;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod lifecycle;
pub mod matcher;
pub mod normalize;
pub mod query;
pub mod transport;
