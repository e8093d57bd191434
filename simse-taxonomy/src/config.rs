use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;

// ---------------------------------------------------------------------------
// Index configuration
// ---------------------------------------------------------------------------

/// Configuration for a `TaxonomyIndex`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
	/// SQLite database file. `None` keeps everything in memory.
	pub storage_path: Option<PathBuf>,
	/// Fixed embedding dimensionality. When unset, the first stored vector
	/// fixes it for the lifetime of the database.
	pub dimension: Option<usize>,
	pub metric: DistanceMetric,
	pub default_top_k: usize,
	pub max_taxonomy_depth: usize,
	pub search_deadline: Duration,
	/// Above this many ranked rows, search keeps a bounded top-k heap
	/// instead of sorting every distance.
	pub full_rank_threshold: usize,
	pub busy_timeout: Duration,
}

impl Default for IndexConfig {
	fn default() -> Self {
		Self {
			storage_path: None,
			dimension: None,
			metric: DistanceMetric::Euclidean,
			default_top_k: 10,
			max_taxonomy_depth: 64,
			search_deadline: Duration::from_secs(2),
			full_rank_threshold: 10_000,
			busy_timeout: Duration::from_secs(5),
		}
	}
}

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
	name = "simse-taxonomy-engine",
	about = "Taxonomy index with taxonomy-filtered vector similarity search"
)]
pub struct CliArgs {
	/// SQLite database path
	#[arg(long, default_value = "simse-taxonomy.db", env = "SIMSE_TAXONOMY_DB")]
	pub db: PathBuf,

	/// Fixed embedding dimension (defaults to the first stored vector's length)
	#[arg(long, env = "SIMSE_TAXONOMY_DIMENSION")]
	pub dimension: Option<usize>,

	/// Distance metric: "euclidean" or "cosine"
	#[arg(long, default_value = "euclidean", env = "SIMSE_TAXONOMY_METRIC")]
	pub metric: DistanceMetric,

	/// Search deadline in milliseconds
	#[arg(long, default_value = "2000", env = "SIMSE_TAXONOMY_SEARCH_DEADLINE_MS")]
	pub search_deadline_ms: u64,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "SIMSE_TAXONOMY_LOG_LEVEL")]
	pub log_level: String,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Tag an entity with a nested taxonomy given as JSON
	Ingest {
		entity_id: String,
		taxonomy: String,
	},
	/// Print the taxonomy tree associated with an entity
	Taxonomy { entity_id: String },
	/// List entities matching a taxonomy filter given as JSON
	Filter { filter: String },
	/// Store (or replace) the embedding of an entity
	PutVector {
		entity_id: String,
		/// JSON array of numbers
		vector: String,
		/// Optional JSON taxonomy snapshot
		#[arg(long)]
		snapshot: Option<String>,
	},
	GetVector { entity_id: String },
	DeleteVector { entity_id: String },
	/// Rank entities by distance to a query vector
	Search {
		/// JSON array of numbers
		vector: String,
		/// Optional JSON taxonomy filter
		#[arg(long)]
		filter: Option<String>,
		#[arg(long)]
		top_k: Option<usize>,
	},
	/// List every category with its entity count
	Categories,
}

impl CliArgs {
	pub fn index_config(&self) -> IndexConfig {
		IndexConfig {
			storage_path: Some(self.db.clone()),
			dimension: self.dimension,
			metric: self.metric,
			search_deadline: Duration::from_millis(self.search_deadline_ms),
			..IndexConfig::default()
		}
	}
}
