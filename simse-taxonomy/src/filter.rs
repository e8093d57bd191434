use std::collections::BTreeSet;

use rusqlite::{params_from_iter, Connection};

use crate::error::StoreError;
use crate::store::{placeholders, MAX_BOUND_PARAMS};
use crate::tree::TaxonomyTree;

/// Entities associated with any category named like one of the filter's
/// leaves. Category position is ignored: `Climate Data` matches wherever it
/// sits in the stored hierarchy.
pub(crate) fn matching_entities(
	conn: &Connection,
	filter: &TaxonomyTree,
) -> Result<BTreeSet<String>, StoreError> {
	let leaves: Vec<String> = filter.leaf_names().into_iter().collect();
	if leaves.is_empty() {
		tracing::warn!("taxonomy filter has no leaf categories; nothing can match");
		return Ok(BTreeSet::new());
	}

	let mut entities = BTreeSet::new();
	for chunk in leaves.chunks(MAX_BOUND_PARAMS) {
		let sql = format!(
			r#"
			SELECT DISTINCT ec.entity_id
			FROM categories c
			JOIN entity_categories ec ON ec.category_id = c.id
			WHERE c.name IN ({})
			"#,
			placeholders(chunk.len())
		);
		let mut stmt = conn.prepare_cached(&sql)?;
		let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
		for row in rows {
			entities.insert(row?);
		}
	}

	tracing::debug!(leaves = leaves.len(), matched = entities.len(), "taxonomy filter resolved");
	Ok(entities)
}
