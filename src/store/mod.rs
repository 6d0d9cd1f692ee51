//! Fjall-based document store for the lifecycle engine.
//!
//! One keyspace, seven partitions: authoritative records plus their
//! order/composite-index entries, accounts and the ledger, the public
//! mirror, and per-user stats. See `keys.rs` for the exact layout.
//!
//! The store mimics the narrow contract of a hosted document database:
//! single-document get/set, atomic multi-write batches, per-user
//! serialized read-modify-write, ordered range reads with a cursor, and
//! a *typed* missing-index condition for filter/sort combinations that
//! were never declared.

pub mod docstore;
pub mod error;
pub mod index;
pub mod keys;

pub use docstore::DocStore;
pub use error::{Result, StoreError};
pub use index::{EqualityFilter, IndexRegistry, QueryPlan, StartAfter, INDEXABLE_FIELDS, SORT_FIELDS};
