// ---------------------------------------------------------------------------
// Similarity search: optional taxonomy pre-filter, then distance ranking
// ---------------------------------------------------------------------------
//
// Rows are streamed from the store and ranked as they arrive. Small result
// sets are collected and sorted; large ones keep a bounded top-k heap. The
// deadline is checked after every scanned row.
// ---------------------------------------------------------------------------

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::time::Instant;

use rusqlite::{params_from_iter, Connection, Rows};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result, StoreError};
use crate::filter;
use crate::store::{placeholders, MAX_BOUND_PARAMS};
use crate::tree::TaxonomyTree;
use crate::types::SearchHit;
use crate::vectors::{decode_vector_blob, validate_vector};

pub(crate) struct SearchRequest<'a> {
	pub query: &'a [f32],
	pub filter: Option<&'a TaxonomyTree>,
	pub top_k: usize,
	/// Index dimension; `None` when no vector has ever been stored.
	pub dimension: Option<usize>,
}

pub(crate) fn search(
	conn: &Connection,
	request: &SearchRequest<'_>,
	config: &IndexConfig,
) -> Result<Vec<SearchHit>> {
	if request.top_k == 0 {
		return Err(IndexError::invalid("top_k must be greater than zero"));
	}
	validate_vector(request.query)?;
	let Some(dimension) = request.dimension else {
		return Ok(Vec::new());
	};
	if dimension != request.query.len() {
		return Err(IndexError::DimensionMismatch {
			expected: dimension,
			actual: request.query.len(),
		});
	}

	let started = Instant::now();
	let mut scan = Scan {
		query: request.query,
		dimension,
		config,
		started,
		scanned: 0,
	};

	let ranker = match request.filter {
		Some(tree) => {
			let candidates = filter::matching_entities(conn, tree).map_err(IndexError::Search)?;
			if candidates.is_empty() {
				tracing::debug!("taxonomy filter matched no entities; skipping ranking");
				return Ok(Vec::new());
			}
			scan.filtered(conn, &candidates, request.top_k)?
		}
		None => scan.all(conn, request.top_k)?,
	};

	let hits = ranker.finish();
	tracing::debug!(
		scanned = scan.scanned,
		returned = hits.len(),
		elapsed_ms = started.elapsed().as_millis() as u64,
		"similarity search complete"
	);
	Ok(hits)
}

fn search_error(err: impl Into<StoreError>) -> IndexError {
	IndexError::Search(err.into())
}

// ---------------------------------------------------------------------------
// Scan
// ---------------------------------------------------------------------------

struct Scan<'a> {
	query: &'a [f32],
	dimension: usize,
	config: &'a IndexConfig,
	started: Instant,
	scanned: usize,
}

impl Scan<'_> {
	fn all(&mut self, conn: &Connection, top_k: usize) -> Result<Ranker> {
		let total: i64 = conn
			.query_row("SELECT COUNT(*) FROM vector_embeddings", [], |row| row.get(0))
			.map_err(search_error)?;
		let mut ranker = Ranker::new(top_k, usize::try_from(total).unwrap_or(usize::MAX), self.config);

		let mut stmt = conn
			.prepare_cached("SELECT entity_id, dimension, vector FROM vector_embeddings")
			.map_err(search_error)?;
		let rows = stmt.query([]).map_err(search_error)?;
		self.consume(rows, &mut ranker)?;
		Ok(ranker)
	}

	fn filtered(
		&mut self,
		conn: &Connection,
		candidates: &BTreeSet<String>,
		top_k: usize,
	) -> Result<Ranker> {
		let mut ranker = Ranker::new(top_k, candidates.len(), self.config);
		let ids: Vec<&str> = candidates.iter().map(String::as_str).collect();
		for chunk in ids.chunks(MAX_BOUND_PARAMS) {
			let sql = format!(
				"SELECT entity_id, dimension, vector FROM vector_embeddings WHERE entity_id IN ({})",
				placeholders(chunk.len())
			);
			let mut stmt = conn.prepare_cached(&sql).map_err(search_error)?;
			let rows = stmt.query(params_from_iter(chunk.iter())).map_err(search_error)?;
			self.consume(rows, &mut ranker)?;
		}
		Ok(ranker)
	}

	fn consume(&mut self, mut rows: Rows<'_>, ranker: &mut Ranker) -> Result<()> {
		while let Some(row) = rows.next().map_err(search_error)? {
			let entity_id: String = row.get(0).map_err(search_error)?;
			let dimension: i64 = row.get(1).map_err(search_error)?;
			let blob: Vec<u8> = row.get(2).map_err(search_error)?;
			self.scanned += 1;

			if usize::try_from(dimension).ok() == Some(self.dimension) {
				let vector = decode_vector_blob(&blob, self.dimension).map_err(IndexError::Search)?;
				if let Some(distance) = self.config.metric.distance(self.query, &vector) {
					ranker.push(Ranked { distance, entity_id });
				}
			} else {
				tracing::warn!(entity_id = %entity_id, dimension, "skipping embedding with foreign dimension");
			}

			let elapsed = self.started.elapsed();
			if elapsed >= self.config.search_deadline {
				return Err(IndexError::DeadlineExceeded {
					elapsed,
					limit: self.config.search_deadline,
				});
			}
		}
		Ok(())
	}
}

// ---------------------------------------------------------------------------
// Ranking
// ---------------------------------------------------------------------------

/// Ascending by distance, ties by entity id.
#[derive(Debug, Clone, PartialEq)]
struct Ranked {
	distance: f64,
	entity_id: String,
}

impl Eq for Ranked {}

impl Ord for Ranked {
	fn cmp(&self, other: &Self) -> Ordering {
		self.distance
			.total_cmp(&other.distance)
			.then_with(|| self.entity_id.cmp(&other.entity_id))
	}
}

impl PartialOrd for Ranked {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

enum Ranker {
	/// Collect everything, sort once.
	Full { hits: Vec<Ranked>, top_k: usize },
	/// Max-heap holding the best `top_k` seen so far; the root is the worst.
	Partial { heap: BinaryHeap<Ranked>, top_k: usize },
}

impl Ranker {
	fn new(top_k: usize, expected: usize, config: &IndexConfig) -> Self {
		if expected > config.full_rank_threshold {
			Self::Partial {
				heap: BinaryHeap::with_capacity(top_k.min(expected).saturating_add(1)),
				top_k,
			}
		} else {
			Self::Full {
				hits: Vec::with_capacity(expected),
				top_k,
			}
		}
	}

	fn push(&mut self, item: Ranked) {
		match self {
			Self::Full { hits, .. } => hits.push(item),
			Self::Partial { heap, top_k } => {
				if heap.len() < *top_k {
					heap.push(item);
				} else if heap.peek().is_some_and(|worst| item < *worst) {
					heap.pop();
					heap.push(item);
				}
			}
		}
	}

	fn finish(self) -> Vec<SearchHit> {
		let ranked = match self {
			Self::Full { mut hits, top_k } => {
				hits.sort();
				hits.truncate(top_k);
				hits
			}
			Self::Partial { heap, .. } => heap.into_sorted_vec(),
		};
		ranked
			.into_iter()
			.map(|r| SearchHit {
				entity_id: r.entity_id,
				distance: r.distance,
			})
			.collect()
	}
}
