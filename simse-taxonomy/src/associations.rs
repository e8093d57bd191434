// ---------------------------------------------------------------------------
// Associations: entity ↔ category membership and the per-entity tree view
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::{datetime_column, now_ms, opt_uuid_column, uuid_column};
use crate::tree::TaxonomyTree;
use crate::types::{Association, CategoryId};

/// Link `entity_id` to each category, skipping pairs that already exist.
/// Returns how many links were new.
pub(crate) fn associate(
	conn: &Connection,
	entity_id: &str,
	category_ids: &[CategoryId],
) -> Result<usize, StoreError> {
	let mut stmt = conn.prepare_cached(
		r#"
		INSERT OR IGNORE INTO entity_categories(id, entity_id, category_id, created_at_ms)
		VALUES (?1, ?2, ?3, ?4)
		"#,
	)?;
	let now = now_ms();
	let mut inserted = 0;
	for category_id in category_ids {
		inserted += stmt.execute(params![
			Uuid::new_v4().to_string(),
			entity_id,
			category_id.to_string(),
			now
		])?;
	}
	Ok(inserted)
}

pub(crate) fn for_entity(conn: &Connection, entity_id: &str) -> Result<Vec<Association>, StoreError> {
	let mut stmt = conn.prepare_cached(
		r#"
		SELECT id, entity_id, category_id, created_at_ms
		FROM entity_categories
		WHERE entity_id = ?1
		ORDER BY rowid
		"#,
	)?;
	let rows = stmt.query_map(params![entity_id], |row| {
		Ok(Association {
			id: uuid_column(row, 0)?,
			entity_id: row.get(1)?,
			category_id: uuid_column(row, 2)?,
			created_at: datetime_column(row, 3)?,
		})
	})?;

	let mut out = Vec::new();
	for row in rows {
		out.push(row?);
	}
	Ok(out)
}

/// Rebuild the nested view of an entity's categories.
///
/// A category sits under its parent only when the parent is associated with
/// the entity too; otherwise it is promoted to the top level. Returns `None`
/// when the entity has no associations.
pub(crate) fn build_taxonomy_tree(
	conn: &Connection,
	entity_id: &str,
) -> Result<Option<TaxonomyTree>, StoreError> {
	let mut stmt = conn.prepare_cached(
		r#"
		SELECT c.id, c.name, c.parent_id
		FROM entity_categories ec
		JOIN categories c ON c.id = ec.category_id
		WHERE ec.entity_id = ?1
		ORDER BY c.rowid
		"#,
	)?;
	let rows = stmt.query_map(params![entity_id], |row| {
		Ok((uuid_column(row, 0)?, row.get::<_, String>(1)?, opt_uuid_column(row, 2)?))
	})?;

	let mut names: HashMap<CategoryId, String> = HashMap::new();
	let mut order: Vec<(CategoryId, Option<CategoryId>)> = Vec::new();
	for row in rows {
		let (id, name, parent) = row?;
		names.insert(id, name);
		order.push((id, parent));
	}
	if order.is_empty() {
		return Ok(None);
	}

	let mut roots: Vec<CategoryId> = Vec::new();
	let mut children: HashMap<CategoryId, Vec<CategoryId>> = HashMap::new();
	for (id, parent) in &order {
		match parent {
			Some(p) if names.contains_key(p) => children.entry(*p).or_default().push(*id),
			_ => roots.push(*id),
		}
	}

	// Pre-order arena: parents precede children, siblings keep creation order.
	let mut arena: Vec<(Option<usize>, String)> = Vec::with_capacity(order.len());
	let mut stack: Vec<(Option<usize>, CategoryId)> =
		roots.iter().rev().map(|id| (None, *id)).collect();
	while let Some((parent_idx, id)) = stack.pop() {
		let idx = arena.len();
		let name = names.remove(&id).unwrap_or_default();
		arena.push((parent_idx, name));
		if let Some(kids) = children.get(&id) {
			stack.extend(kids.iter().rev().map(|kid| (Some(idx), *kid)));
		}
	}

	Ok(Some(TaxonomyTree::from_arena(arena)))
}
