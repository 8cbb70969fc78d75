//! Optimistic data-sync layer for a padel club client.
//!
//! A [`Store`] holds session, notifications, theme and a keyed result cache.
//! [`DataSync`] wraps remote mutations with optimistic apply, retry, and
//! commit or rollback, then invalidates the cache entries the change touched.

pub mod api;
pub mod cache;
pub mod config;
pub mod event;
pub mod query;
pub mod store;
pub mod sync;

pub use config::Config;
pub use event::{EventStream, Lagged, StoreEvent};
pub use query::{Query, QueryState};
pub use store::Store;
pub use sync::{BatchOptions, BatchReport, DataSync, MutationError, MutationOptions, RetryPolicy};
