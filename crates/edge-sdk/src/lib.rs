//! Public SDK for fragment-composed pages.
//!
//! This crate re-exports all pipeline functionality and wires it together:
//!
//! ```ignore
//! use edge_sdk::prelude::*;
//!
//! let pipeline = Pipeline::from_config(&PipelineConfig::load("pipeline.toml")?)?;
//!
//! let hero = FragmentDescriptor::builder("hero", fetch_fn(|ctx| async move {
//!     Ok(Bytes::from(format!("data for {}", ctx.cache_key)))
//! }))
//! .cache_key(cache_key!("product", 42, "hero"))
//! .tag("products")
//! .ttl(Duration::from_secs(30))
//! .build();
//!
//! let render = pipeline.compose_page(vec![hero], Fallbacks::html())?;
//! let page = render.collect().await?;
//!
//! // after a product update
//! pipeline.invalidate(&"tag:products".parse()?);
//! ```

mod config;
mod pipeline;

pub use config::*;
pub use pipeline::*;

pub use edge_cache;
pub use edge_core;
pub use edge_data;
pub use edge_executor;
pub use edge_observability;
pub use edge_streaming;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{ConfigError, Pipeline, PipelineConfig};
    pub use edge_cache::*;
    pub use edge_core::*;
    pub use edge_data::*;
    pub use edge_executor::*;
    pub use edge_observability::*;
    pub use edge_streaming::*;
}
