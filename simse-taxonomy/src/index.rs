// ---------------------------------------------------------------------------
// TaxonomyIndex: public facade over the store
// ---------------------------------------------------------------------------
//
// Reads run against the handle's connection; every write runs inside an
// immediate transaction, either one per call or an explicit `UnitOfWork`
// spanning several steps. Store failures are reported as `TaxonomyWrite` on
// ingestion paths and as `Search` on taxonomy and similarity queries.
// ---------------------------------------------------------------------------

use rusqlite::Transaction;
use serde_json::Value;
use tracing::{debug, info, Span};

use crate::associations;
use crate::categories;
use crate::config::IndexConfig;
use crate::error::{IndexError, Result, StoreError};
use crate::filter;
use crate::search::{self, SearchRequest};
use crate::store::Store;
use crate::tree::TaxonomyTree;
use crate::types::{
	Association, Category, CategoryId, CategoryInfo, EmbeddingUpdate, EntityIngest, IngestReport,
	SearchHit, VectorEmbedding,
};
use crate::vectors;

pub struct TaxonomyIndex {
	store: Store,
	config: IndexConfig,
	span: Span,
}

impl TaxonomyIndex {
	/// Open the index described by `config`. A configured dimension must agree
	/// with the one already persisted in the database.
	pub fn open(config: IndexConfig) -> Result<Self> {
		let store = match &config.storage_path {
			Some(path) => Store::open(path, config.busy_timeout)?,
			None => Store::open_in_memory()?,
		};

		if let (Some(configured), Some(stored)) =
			(config.dimension, vectors::stored_dimension(store.conn())?)
		{
			if configured != stored {
				return Err(IndexError::DimensionMismatch {
					expected: stored,
					actual: configured,
				});
			}
		}

		let span = tracing::info_span!("taxonomy_index", path = ?config.storage_path);
		info!(
			path = ?store.path(),
			metric = config.metric.as_str(),
			"taxonomy index opened"
		);
		Ok(Self {
			store,
			config,
			span,
		})
	}

	pub fn in_memory() -> Result<Self> {
		Self::open(IndexConfig::default())
	}

	/// Replace the span every operation of this handle is recorded under.
	pub fn with_span(mut self, span: Span) -> Self {
		self.span = span;
		self
	}

	pub fn config(&self) -> &IndexConfig {
		&self.config
	}

	/// Configured dimension, or the one fixed by the first stored vector.
	pub fn dimension(&self) -> Result<Option<usize>> {
		match self.config.dimension {
			Some(dimension) => Ok(Some(dimension)),
			None => Ok(vectors::stored_dimension(self.store.conn())?),
		}
	}

	/// Begin a transaction covering several write steps. Dropping the unit of
	/// work without `commit` rolls every step back.
	pub fn unit_of_work(&mut self) -> Result<UnitOfWork<'_>> {
		let tx = self.store.begin().map_err(IndexError::TaxonomyWrite)?;
		Ok(UnitOfWork {
			tx,
			config: &self.config,
			span: self.span.clone(),
		})
	}

	// -- Taxonomy writes ----------------------------------------------------

	pub fn get_or_create_category(
		&mut self,
		name: &str,
		parent_id: Option<CategoryId>,
	) -> Result<CategoryId> {
		let uow = self.unit_of_work()?;
		let id = uow.get_or_create_category(name, parent_id)?;
		uow.commit()?;
		Ok(id)
	}

	pub fn process_taxonomy(&mut self, tree: &TaxonomyTree) -> Result<Vec<CategoryId>> {
		tree.validate(self.config.max_taxonomy_depth)?;
		let uow = self.unit_of_work()?;
		let ids = uow.process_taxonomy(tree)?;
		uow.commit()?;
		Ok(ids)
	}

	pub fn associate_entity_with_categories(
		&mut self,
		entity_id: &str,
		category_ids: &[CategoryId],
	) -> Result<usize> {
		validate_entity_id(entity_id)?;
		let uow = self.unit_of_work()?;
		let inserted = uow.associate(entity_id, category_ids)?;
		uow.commit()?;
		Ok(inserted)
	}

	/// Create the categories of `tree` and associate all of them with
	/// `entity_id`, atomically. Existing associations are kept.
	pub fn ingest_taxonomy(&mut self, entity_id: &str, tree: &TaxonomyTree) -> Result<IngestReport> {
		tree.validate(self.config.max_taxonomy_depth)?;
		self.ingest_entity(EntityIngest {
			entity_id: entity_id.to_string(),
			taxonomy: tree.clone(),
			..EntityIngest::default()
		})
	}

	/// Tag an entity and optionally store its embedding in one transaction.
	pub fn ingest_entity(&mut self, ingest: EntityIngest) -> Result<IngestReport> {
		validate_entity_id(&ingest.entity_id)?;
		ingest.taxonomy.validate(self.config.max_taxonomy_depth)?;
		if let Some(vector) = &ingest.vector {
			vectors::validate_vector(vector)?;
		}

		let _guard = self.span.clone().entered();
		let uow = self.unit_of_work()?;
		let category_ids = uow.process_taxonomy(&ingest.taxonomy)?;
		let new_associations = uow.associate(&ingest.entity_id, &category_ids)?;
		let embedding = match &ingest.vector {
			Some(vector) => Some(uow.put_vector(
				&ingest.entity_id,
				vector,
				ingest.taxonomy_snapshot.as_ref(),
			)?),
			None => None,
		};
		uow.commit()?;

		info!(
			entity_id = %ingest.entity_id,
			categories = category_ids.len(),
			new_associations,
			embedded = embedding.is_some(),
			"taxonomy ingested"
		);
		Ok(IngestReport {
			entity_id: ingest.entity_id,
			category_ids,
			new_associations,
			embedding,
		})
	}

	// -- Taxonomy reads -----------------------------------------------------

	pub fn get_taxonomy(&self, entity_id: &str) -> Result<Option<TaxonomyTree>> {
		let _guard = self.span.enter();
		validate_entity_id(entity_id)?;
		let tree = associations::build_taxonomy_tree(self.store.conn(), entity_id)
			.map_err(IndexError::Search)?;
		if let Some(tree) = &tree {
			let max_depth = self.config.max_taxonomy_depth;
			if tree.depth() > max_depth {
				return Err(IndexError::Search(StoreError::InvalidDbValue(format!(
					"stored taxonomy for \"{entity_id}\" is nested deeper than {max_depth}"
				))));
			}
		}
		Ok(tree)
	}

	/// Entities tagged with any leaf name of `filter`, sorted.
	pub fn search_by_taxonomy(&self, filter: &TaxonomyTree) -> Result<Vec<String>> {
		let _guard = self.span.enter();
		filter.validate(self.config.max_taxonomy_depth)?;
		let entities =
			filter::matching_entities(self.store.conn(), filter).map_err(IndexError::Search)?;
		debug!(matched = entities.len(), "search_by_taxonomy");
		Ok(entities.into_iter().collect())
	}

	pub fn list_categories(&self) -> Result<Vec<CategoryInfo>> {
		categories::list(self.store.conn()).map_err(IndexError::Search)
	}

	pub fn category(&self, id: CategoryId) -> Result<Option<Category>> {
		categories::get(self.store.conn(), id).map_err(IndexError::Search)
	}

	pub fn entity_associations(&self, entity_id: &str) -> Result<Vec<Association>> {
		validate_entity_id(entity_id)?;
		associations::for_entity(self.store.conn(), entity_id).map_err(IndexError::Search)
	}

	// -- Vectors ------------------------------------------------------------

	pub fn create_vector(
		&mut self,
		entity_id: &str,
		vector: Vec<f32>,
		taxonomy_snapshot: Option<Value>,
	) -> Result<VectorEmbedding> {
		validate_entity_id(entity_id)?;
		let uow = self.unit_of_work()?;
		let embedding = uow.create_vector(entity_id, &vector, taxonomy_snapshot.as_ref())?;
		uow.commit()?;
		Ok(embedding)
	}

	/// Store the embedding of `entity_id`, replacing any existing one.
	pub fn put_vector(
		&mut self,
		entity_id: &str,
		vector: Vec<f32>,
		taxonomy_snapshot: Option<Value>,
	) -> Result<VectorEmbedding> {
		validate_entity_id(entity_id)?;
		let uow = self.unit_of_work()?;
		let embedding = uow.put_vector(entity_id, &vector, taxonomy_snapshot.as_ref())?;
		uow.commit()?;
		Ok(embedding)
	}

	pub fn get_vector(&self, entity_id: &str) -> Result<Option<VectorEmbedding>> {
		validate_entity_id(entity_id)?;
		vectors::get(self.store.conn(), entity_id)
	}

	pub fn update_vector(&mut self, entity_id: &str, update: EmbeddingUpdate) -> Result<VectorEmbedding> {
		let _guard = self.span.clone().entered();
		validate_entity_id(entity_id)?;
		let tx = self.store.begin()?;
		let embedding = vectors::update(&tx, entity_id, &update, self.config.dimension)?;
		tx.commit()?;
		debug!(entity_id, "vector updated");
		Ok(embedding)
	}

	pub fn delete_vector(&mut self, entity_id: &str) -> Result<bool> {
		let _guard = self.span.clone().entered();
		validate_entity_id(entity_id)?;
		let tx = self.store.begin()?;
		let removed = vectors::delete(&tx, entity_id)?;
		tx.commit()?;
		debug!(entity_id, removed, "vector deleted");
		Ok(removed)
	}

	pub fn vector_count(&self) -> Result<usize> {
		Ok(vectors::count(self.store.conn())?)
	}

	// -- Search -------------------------------------------------------------

	/// Nearest entities to `query`, restricted to entities matching `filter`
	/// when one is given. `top_k` defaults to `IndexConfig::default_top_k`.
	pub fn similarity_search(
		&self,
		query: &[f32],
		filter: Option<&TaxonomyTree>,
		top_k: Option<usize>,
	) -> Result<Vec<SearchHit>> {
		let _guard = self.span.enter();
		let top_k = top_k.unwrap_or(self.config.default_top_k);
		if top_k == 0 {
			return Err(IndexError::invalid("top_k must be greater than zero"));
		}
		vectors::validate_vector(query)?;
		if let Some(tree) = filter {
			tree.validate(self.config.max_taxonomy_depth)?;
		}

		// One read snapshot for the filter and the ranking scan.
		let tx = self.store.read().map_err(IndexError::Search)?;
		let dimension = match self.config.dimension {
			Some(dimension) => Some(dimension),
			None => vectors::stored_dimension(&tx).map_err(IndexError::Search)?,
		};
		let request = SearchRequest {
			query,
			filter,
			top_k,
			dimension,
		};
		let hits = search::search(&tx, &request, &self.config)?;
		debug!(top_k = request.top_k, filtered = filter.is_some(), hits = hits.len(), "similarity_search");
		Ok(hits)
	}
}

// ---------------------------------------------------------------------------
// Unit of work
// ---------------------------------------------------------------------------

/// A write transaction spanning several index steps.
pub struct UnitOfWork<'a> {
	tx: Transaction<'a>,
	config: &'a IndexConfig,
	span: Span,
}

impl UnitOfWork<'_> {
	pub fn get_or_create_category(&self, name: &str, parent_id: Option<CategoryId>) -> Result<CategoryId> {
		let _guard = self.span.enter();
		validate_category_name(name)?;
		if let Some(parent) = parent_id {
			let max_depth = self.config.max_taxonomy_depth;
			let parent_depth =
				categories::depth(&self.tx, parent).map_err(IndexError::TaxonomyWrite)?;
			if parent_depth >= max_depth {
				return Err(IndexError::invalid(format!(
					"taxonomy nesting exceeds maximum depth of {max_depth}"
				)));
			}
		}
		categories::get_or_create(&self.tx, name, parent_id).map_err(IndexError::TaxonomyWrite)
	}

	pub fn process_taxonomy(&self, tree: &TaxonomyTree) -> Result<Vec<CategoryId>> {
		let _guard = self.span.enter();
		tree.validate(self.config.max_taxonomy_depth)?;
		let ids = categories::process_taxonomy(&self.tx, tree).map_err(IndexError::TaxonomyWrite)?;
		debug!(categories = ids.len(), "taxonomy processed");
		Ok(ids)
	}

	pub fn associate(&self, entity_id: &str, category_ids: &[CategoryId]) -> Result<usize> {
		let _guard = self.span.enter();
		validate_entity_id(entity_id)?;
		let inserted = associations::associate(&self.tx, entity_id, category_ids)
			.map_err(IndexError::TaxonomyWrite)?;
		debug!(entity_id, requested = category_ids.len(), inserted, "entity associated");
		Ok(inserted)
	}

	pub fn create_vector(
		&self,
		entity_id: &str,
		vector: &[f32],
		taxonomy_snapshot: Option<&Value>,
	) -> Result<VectorEmbedding> {
		let _guard = self.span.enter();
		validate_entity_id(entity_id)?;
		let embedding =
			vectors::create(&self.tx, entity_id, vector, taxonomy_snapshot, self.config.dimension)?;
		debug!(entity_id, dimension = vector.len(), "vector created");
		Ok(embedding)
	}

	pub fn put_vector(
		&self,
		entity_id: &str,
		vector: &[f32],
		taxonomy_snapshot: Option<&Value>,
	) -> Result<VectorEmbedding> {
		let _guard = self.span.enter();
		validate_entity_id(entity_id)?;
		let embedding =
			vectors::put(&self.tx, entity_id, vector, taxonomy_snapshot, self.config.dimension)?;
		debug!(entity_id, dimension = vector.len(), "vector stored");
		Ok(embedding)
	}

	pub fn commit(self) -> Result<()> {
		self.tx
			.commit()
			.map_err(|err| IndexError::TaxonomyWrite(err.into()))
	}
}

fn validate_entity_id(entity_id: &str) -> Result<()> {
	if entity_id.trim().is_empty() {
		return Err(IndexError::invalid("entity id must not be empty"));
	}
	Ok(())
}

fn validate_category_name(name: &str) -> Result<()> {
	if name.trim().is_empty() {
		return Err(IndexError::invalid("category name must not be blank"));
	}
	Ok(())
}
