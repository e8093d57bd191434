//! Hierarchical taxonomy index with taxonomy-filtered vector similarity search.
//!
//! Categories are deduplicated by `(name, parent)`, entities are tagged with
//! any number of categories, and one embedding per entity can be ranked by
//! distance to a query, optionally restricted to the entities matching a
//! taxonomy filter. Everything is persisted in SQLite.

pub mod config;
pub mod distance;
pub mod error;
pub mod index;
pub mod tree;
pub mod types;

mod associations;
mod categories;
mod filter;
mod search;
mod store;
mod vectors;

pub use config::IndexConfig;
pub use distance::DistanceMetric;
pub use error::{IndexError, Result, StoreError};
pub use index::{TaxonomyIndex, UnitOfWork};
pub use tree::TaxonomyTree;
pub use types::{
	Association, Category, CategoryId, CategoryInfo, EmbeddingUpdate, EntityIngest, IngestReport,
	SearchHit, VectorEmbedding,
};
