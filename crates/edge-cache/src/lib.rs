//! Caching infrastructure for the fragment pipeline.
//!
//! This crate provides:
//! - `CacheStore` - Tiered key→entry map with lazy TTL expiry
//! - `TagIndex` - Tag → keys index for group invalidation
//! - `CacheTier` / `MemoryTier` - Storage tier abstraction
//! - `WriteTicket` - In-flight writes that invalidation can revoke
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use edge_cache::CacheStore;
//! use edge_core::Freshness;
//!
//! let store = CacheStore::new(metrics);
//! store.put("p1", data, ["products"], Freshness::timed(Duration::from_secs(60)));
//!
//! assert!(store.get("p1").is_fresh());
//! assert_eq!(store.invalidate_tag("products"), 1);
//! assert!(store.get("p1").is_miss());
//! ```

mod config;
mod entry;
mod store;
mod tags;
mod ticket;
mod tier;

pub use config::*;
pub use entry::*;
pub use store::*;
pub use tags::*;
pub use ticket::*;
pub use tier::*;
