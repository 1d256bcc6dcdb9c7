//! Fragment data access: fetch scheduling and revalidation.
//!
//! This crate provides:
//! - `FetchScheduler` - Concurrent fetch tasks with request coalescing
//! - `Subscription` - A caller's claim on an in-flight fetch
//! - `Revalidator` - Tag/key invalidation with in-flight write revocation
//! - `FetchConfig` - Fetch deadlines

mod config;
mod revalidate;
mod scheduler;

pub use config::*;
pub use revalidate::*;
pub use scheduler::*;
