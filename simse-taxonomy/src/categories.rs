// ---------------------------------------------------------------------------
// Categories: get-or-create by (name, parent) and taxonomy ingestion
// ---------------------------------------------------------------------------

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{datetime_column, now_ms, opt_uuid_column, uuid_column};
use crate::tree::TaxonomyTree;
use crate::types::{Category, CategoryId, CategoryInfo};

/// Return the id of the category `(name, parent_id)`, creating it when absent.
///
/// The insert is conditional on the `(name, IFNULL(parent_id, ''))` unique
/// index, so two writers racing on the same key both end up with the one row
/// that won. Callers run this inside an immediate transaction.
pub(crate) fn get_or_create(
	conn: &Connection,
	name: &str,
	parent_id: Option<CategoryId>,
) -> Result<CategoryId, StoreError> {
	let candidate = Uuid::new_v4();
	let now = now_ms();
	let parent = parent_id.map(|id| id.to_string());

	let inserted = conn
		.prepare_cached(
			r#"
			INSERT OR IGNORE INTO categories(id, name, parent_id, created_at_ms, updated_at_ms)
			VALUES (?1, ?2, ?3, ?4, ?4)
			"#,
		)?
		.execute(params![candidate.to_string(), name, parent, now])?;
	if inserted == 1 {
		tracing::debug!(category_id = %candidate, name, parent_id = ?parent_id, "created category");
		return Ok(candidate);
	}

	let existing = conn
		.prepare_cached(
			"SELECT id FROM categories WHERE name = ?1 AND IFNULL(parent_id, '') = IFNULL(?2, '')",
		)?
		.query_row(params![name, parent], |row| uuid_column(row, 0))
		.optional()?;
	existing.ok_or_else(|| {
		StoreError::InvalidDbValue(format!(
			"category \"{name}\" was neither inserted nor found"
		))
	})
}

/// Walk `tree` in pre-order, creating every key under its enclosing key, and
/// return the visited ids in that order.
pub(crate) fn process_taxonomy(
	conn: &Connection,
	tree: &TaxonomyTree,
) -> Result<Vec<CategoryId>, StoreError> {
	let mut ids = Vec::with_capacity(tree.node_count());
	let mut stack: Vec<(Option<CategoryId>, &str, &TaxonomyTree)> = tree
		.children()
		.rev()
		.map(|(name, child)| (None, name, child))
		.collect();

	while let Some((parent, name, node)) = stack.pop() {
		let id = get_or_create(conn, name, parent)?;
		ids.push(id);
		stack.extend(node.children().rev().map(|(n, c)| (Some(id), n, c)));
	}
	Ok(ids)
}

/// Nesting level of category `id`, counting a root as 1. Zero when `id` is
/// not a stored category.
pub(crate) fn depth(conn: &Connection, id: CategoryId) -> Result<usize, StoreError> {
	let depth: Option<i64> = conn
		.prepare_cached(
			r#"
			WITH RECURSIVE ancestors(id, depth) AS (
			  SELECT id, 1 FROM categories WHERE id = ?1
			  UNION ALL
			  SELECT c.parent_id, a.depth + 1
			  FROM categories c JOIN ancestors a ON c.id = a.id
			  WHERE c.parent_id IS NOT NULL
			)
			SELECT MAX(depth) FROM ancestors
			"#,
		)?
		.query_row(params![id.to_string()], |row| row.get(0))?;
	Ok(depth.map_or(0, |d| d as usize))
}

pub(crate) fn get(conn: &Connection, id: CategoryId) -> Result<Option<Category>, StoreError> {
	Ok(conn
		.query_row(
			r#"
			SELECT id, name, parent_id, created_at_ms, updated_at_ms
			FROM categories WHERE id = ?1
			"#,
			params![id.to_string()],
			|row| {
				Ok(Category {
					id: uuid_column(row, 0)?,
					name: row.get(1)?,
					parent_id: opt_uuid_column(row, 2)?,
					created_at: datetime_column(row, 3)?,
					updated_at: datetime_column(row, 4)?,
				})
			},
		)
		.optional()?)
}

/// Every category in creation order with the number of entities tagged with it.
pub(crate) fn list(conn: &Connection) -> Result<Vec<CategoryInfo>, StoreError> {
	let mut stmt = conn.prepare(
		r#"
		SELECT c.id, c.name, c.parent_id, COUNT(ec.entity_id)
		FROM categories c
		LEFT JOIN entity_categories ec ON ec.category_id = c.id
		GROUP BY c.id
		ORDER BY c.rowid
		"#,
	)?;
	let rows = stmt.query_map([], |row| {
		let count: i64 = row.get(3)?;
		Ok(CategoryInfo {
			id: uuid_column(row, 0)?,
			name: row.get(1)?,
			parent_id: opt_uuid_column(row, 2)?,
			entity_count: usize::try_from(count).unwrap_or(0),
		})
	})?;

	let mut out = Vec::new();
	for row in rows {
		out.push(row?);
	}
	Ok(out)
}
