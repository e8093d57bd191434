use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tree::TaxonomyTree;

pub type CategoryId = Uuid;

/// A named taxonomy node, unique per `(name, parent_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
	pub id: CategoryId,
	pub name: String,
	#[serde(rename = "parentId")]
	pub parent_id: Option<CategoryId>,
	#[serde(rename = "createdAt")]
	pub created_at: DateTime<Utc>,
	#[serde(rename = "updatedAt")]
	pub updated_at: DateTime<Utc>,
}

/// Membership link between an entity and a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
	pub id: Uuid,
	#[serde(rename = "entityId")]
	pub entity_id: String,
	#[serde(rename = "categoryId")]
	pub category_id: CategoryId,
	#[serde(rename = "createdAt")]
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEmbedding {
	pub id: Uuid,
	#[serde(rename = "entityId")]
	pub entity_id: String,
	pub vector: Vec<f32>,
	#[serde(rename = "taxonomySnapshot")]
	pub taxonomy_snapshot: Option<serde_json::Value>,
	#[serde(rename = "createdAt")]
	pub created_at: DateTime<Utc>,
	#[serde(rename = "updatedAt")]
	pub updated_at: DateTime<Utc>,
}

/// Partial update for an embedding; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingUpdate {
	pub vector: Option<Vec<f32>>,
	#[serde(rename = "taxonomySnapshot")]
	pub taxonomy_snapshot: Option<serde_json::Value>,
}

impl EmbeddingUpdate {
	pub fn is_empty(&self) -> bool {
		self.vector.is_none() && self.taxonomy_snapshot.is_none()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
	#[serde(rename = "entityId")]
	pub entity_id: String,
	pub distance: f64,
}

/// Catalog listing row: a category plus how many entities are tagged with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryInfo {
	pub id: CategoryId,
	pub name: String,
	#[serde(rename = "parentId")]
	pub parent_id: Option<CategoryId>,
	#[serde(rename = "entityCount")]
	pub entity_count: usize,
}

/// Result of tagging an entity with a taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
	#[serde(rename = "entityId")]
	pub entity_id: String,
	/// Every category visited, in pre-order.
	#[serde(rename = "categoryIds")]
	pub category_ids: Vec<CategoryId>,
	/// Associations that did not exist before this ingest.
	#[serde(rename = "newAssociations")]
	pub new_associations: usize,
	pub embedding: Option<VectorEmbedding>,
}

/// Input for `TaxonomyIndex::ingest_entity`: tag an entity and optionally
/// store its embedding in one unit of work.
#[derive(Debug, Clone, Default)]
pub struct EntityIngest {
	pub entity_id: String,
	pub taxonomy: TaxonomyTree,
	pub vector: Option<Vec<f32>>,
	pub taxonomy_snapshot: Option<serde_json::Value>,
}
