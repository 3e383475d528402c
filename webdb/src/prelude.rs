//! Convenient re-exports of commonly used types from webdb.
//!
//! ```ignore
//! use webdb::prelude::*;
//! ```
//!
//! This provides access to:
//! - Database, collection and cursor handles
//! - Documents and patches
//! - Query construction, sorting and projection
//! - The transport traits and error types

pub use webdb_core::{
    collection::{Affected, Collection},
    config::{DatabaseConfig, RevisionMode},
    cursor::{BatchOptions, BatchSummary, Cursor},
    database::{Database, DatabaseInfo, DynDatabase},
    document::{Document, Patch, PatchOp},
    error::{WebDbError, WebDbResult},
    normalize::{Capabilities, FindOptions},
    query::{
        Clause, FieldSpec, Filter, OperatorKind, Predicate, Query, QueryBuilder, QueryVisitor,
        Sort, SortDirection, SortSpec,
    },
    transport::{
        BulkOutcome, CollectionInfo, IndexOutcome, IndexSpec, Transport, TransportBuilder,
        WriteReceipt,
    },
};

pub use crate::set::{SetArgs, SetExt, SetOutcome};
