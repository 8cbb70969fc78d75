//! Padel club REST API: typed client, resources, and their cache keys.

mod client;
pub mod keys;
pub mod types;

pub use client::ApiClient;
pub use keys::PadelQueryKey;
