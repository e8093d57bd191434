// ---------------------------------------------------------------------------
// Integration tests for simse-taxonomy-engine
// ---------------------------------------------------------------------------
//
// Library tests drive `TaxonomyIndex` end to end; the CLI tests spawn the
// binary against a temporary database and read its JSON output.
// ---------------------------------------------------------------------------

use std::process::Command;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use simse_taxonomy_engine::{
	DistanceMetric, EntityIngest, IndexConfig, IndexError, TaxonomyIndex, TaxonomyTree,
};

fn tree(value: Value) -> TaxonomyTree {
	TaxonomyTree::from_json(&value).unwrap()
}

fn on_disk(dir: &tempfile::TempDir) -> IndexConfig {
	IndexConfig {
		storage_path: Some(dir.path().join("taxonomy.db")),
		..IndexConfig::default()
	}
}

// ---------------------------------------------------------------------------
// Taxonomy
// ---------------------------------------------------------------------------

#[test]
fn science_scenario() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	let science = json!({"Science": {"Physics": {"Quantum Mechanics": {}, "Astrophysics": {}}}});

	let report = index.ingest_taxonomy("E1", &tree(science.clone())).unwrap();
	assert_eq!(report.category_ids.len(), 4);
	assert_eq!(report.new_associations, 4);

	let categories = index.list_categories().unwrap();
	let by_name = |name: &str| categories.iter().find(|c| c.name == name).unwrap().clone();
	assert_eq!(categories.len(), 4);
	assert_eq!(by_name("Science").parent_id, None);
	assert_eq!(by_name("Physics").parent_id, Some(by_name("Science").id));
	assert_eq!(by_name("Quantum Mechanics").parent_id, Some(by_name("Physics").id));
	assert_eq!(by_name("Astrophysics").parent_id, Some(by_name("Physics").id));

	let quantum = by_name("Quantum Mechanics").id;
	index.associate_entity_with_categories("E2", &[quantum]).unwrap();

	assert_eq!(index.get_taxonomy("E1").unwrap().unwrap().to_json(), science);
	assert_eq!(
		index.get_taxonomy("E2").unwrap().unwrap().to_json(),
		json!({"Quantum Mechanics": {}})
	);
	assert_eq!(
		index.search_by_taxonomy(&tree(json!({"Science": {}}))).unwrap(),
		vec!["E1"]
	);

	index.put_vector("E1", vec![0.0, 0.0, 0.0], None).unwrap();
	index.put_vector("E2", vec![1.0, 1.0, 1.0], None).unwrap();
	let hits = index.similarity_search(&[0.0, 0.0, 0.1], None, Some(1)).unwrap();
	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].entity_id, "E1");
	assert!((hits[0].distance - 0.1).abs() < 1e-6);
}

#[test]
fn category_lookup_is_idempotent() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	let a = index.get_or_create_category("Science", None).unwrap();
	let b = index.get_or_create_category("Science", None).unwrap();
	assert_eq!(a, b);

	let child = index.get_or_create_category("Physics", Some(a)).unwrap();
	let stored = index.category(child).unwrap().unwrap();
	assert_eq!(stored.parent_id, Some(a));
	assert_eq!(index.list_categories().unwrap().len(), 2);
}

#[test]
fn ingestion_visits_every_key_once() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	let input = tree(json!({
		"Earth": {"Climate Data": {}, "Geology": {"Rocks": {}}},
		"Ocean": {"Climate Data": {}}
	}));
	let ids = index.process_taxonomy(&input).unwrap();
	assert_eq!(ids.len(), input.node_count());
	assert_eq!(index.list_categories().unwrap().len(), 6);

	let again = index.process_taxonomy(&input).unwrap();
	assert_eq!(ids, again);
}

#[test]
fn reassociation_is_a_no_op() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	let science = tree(json!({"Science": {}}));
	index.ingest_taxonomy("E1", &science).unwrap();
	let second = index.ingest_taxonomy("E1", &science).unwrap();

	assert_eq!(second.new_associations, 0);
	assert_eq!(index.entity_associations("E1").unwrap().len(), 1);
	assert_eq!(index.get_taxonomy("E1").unwrap().unwrap().to_json(), json!({"Science": {}}));
}

// Re-tagging is append-only: earlier associations survive a new ingest.
#[test]
fn reingest_keeps_previous_associations() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	index.ingest_taxonomy("E1", &tree(json!({"Science": {}}))).unwrap();
	index.ingest_taxonomy("E1", &tree(json!({"Art": {}}))).unwrap();

	let view = index.get_taxonomy("E1").unwrap().unwrap();
	assert_eq!(view.to_json(), json!({"Science": {}, "Art": {}}));
	assert_eq!(index.search_by_taxonomy(&tree(json!({"Science": {}}))).unwrap(), vec!["E1"]);
}

// Filters match category names wherever they sit in the hierarchy.
#[test]
fn filter_matches_names_under_any_parent() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	index.ingest_taxonomy("earth", &tree(json!({"Earth": {"Climate Data": {}}}))).unwrap();
	index.ingest_taxonomy("ocean", &tree(json!({"Ocean": {"Climate Data": {}}}))).unwrap();
	index.ingest_taxonomy("art", &tree(json!({"Art": {}}))).unwrap();

	let matched = index
		.search_by_taxonomy(&tree(json!({"Earth": {"Climate Data": {}}})))
		.unwrap();
	assert_eq!(matched, vec!["earth", "ocean"]);
}

#[test]
fn unknown_entities_and_filters_are_empty_not_errors() {
	let index = TaxonomyIndex::in_memory().unwrap();
	assert_eq!(index.get_taxonomy("nobody").unwrap(), None);
	assert!(index.search_by_taxonomy(&tree(json!({"Nothing": {}}))).unwrap().is_empty());
	assert!(index.search_by_taxonomy(&TaxonomyTree::new()).unwrap().is_empty());
}

#[test]
fn overly_deep_taxonomy_is_rejected_before_writing() {
	let mut index = TaxonomyIndex::open(IndexConfig {
		max_taxonomy_depth: 3,
		..IndexConfig::default()
	})
	.unwrap();
	let deep = tree(json!({"a": {"b": {"c": {"d": {}}}}}));
	let err = index.ingest_taxonomy("E1", &deep).unwrap_err();
	assert!(err.is_input_validation());
	assert!(index.list_categories().unwrap().is_empty());
}

#[test]
fn chained_categories_respect_max_depth() {
	let dir = tempfile::tempdir().unwrap();
	{
		let mut index = TaxonomyIndex::open(IndexConfig {
			max_taxonomy_depth: 6,
			..on_disk(&dir)
		})
		.unwrap();
		let mut chain = Vec::new();
		for level in 1..=6 {
			let id = index
				.get_or_create_category(&format!("L{level}"), chain.last().copied())
				.unwrap();
			chain.push(id);
		}
		let err = index.get_or_create_category("L7", chain.last().copied()).unwrap_err();
		assert!(err.is_input_validation());
		index.associate_entity_with_categories("E1", &chain).unwrap();
		assert_eq!(index.get_taxonomy("E1").unwrap().unwrap().depth(), 6);
	}

	let mut index = TaxonomyIndex::open(IndexConfig {
		max_taxonomy_depth: 3,
		..on_disk(&dir)
	})
	.unwrap();
	let leaf = index
		.list_categories()
		.unwrap()
		.into_iter()
		.find(|c| c.name == "L6")
		.unwrap();
	assert!(index.get_or_create_category("L7", Some(leaf.id)).unwrap_err().is_input_validation());
	assert!(index.get_taxonomy("E1").unwrap_err().is_search_failure());
	assert_eq!(index.list_categories().unwrap().len(), 6);
}

#[test]
fn failed_step_rolls_back_the_whole_unit_of_work() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	{
		let uow = index.unit_of_work().unwrap();
		uow.process_taxonomy(&tree(json!({"Science": {"Physics": {}}}))).unwrap();
		let err = uow.associate("E1", &[uuid::Uuid::new_v4()]).unwrap_err();
		assert!(matches!(err, IndexError::TaxonomyWrite(_)));
	}
	assert!(index.list_categories().unwrap().is_empty());
	assert_eq!(index.get_taxonomy("E1").unwrap(), None);
}

#[test]
fn unit_of_work_commits_every_step() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	let uow = index.unit_of_work().unwrap();
	let ids = uow.process_taxonomy(&tree(json!({"Science": {}}))).unwrap();
	uow.associate("E1", &ids).unwrap();
	uow.create_vector("E1", &[1.0, 0.0], Some(&json!({"Science": {}}))).unwrap();
	uow.commit().unwrap();

	assert_eq!(index.search_by_taxonomy(&tree(json!({"Science": {}}))).unwrap(), vec!["E1"]);
	assert!(index.get_vector("E1").unwrap().is_some());
}

// ---------------------------------------------------------------------------
// Concurrency and persistence
// ---------------------------------------------------------------------------

#[test]
fn concurrent_handles_create_one_category() {
	let dir = tempfile::tempdir().unwrap();
	let config = on_disk(&dir);
	drop(TaxonomyIndex::open(config.clone()).unwrap());

	let workers = 8;
	let barrier = Arc::new(Barrier::new(workers));
	let handles: Vec<_> = (0..workers)
		.map(|i| {
			let config = config.clone();
			let barrier = Arc::clone(&barrier);
			thread::spawn(move || {
				let mut index = TaxonomyIndex::open(config).unwrap();
				barrier.wait();
				let id = index.get_or_create_category("Science", None).unwrap();
				let entity = format!("E{i}");
				index.associate_entity_with_categories(&entity, &[id]).unwrap();
				id
			})
		})
		.collect();
	let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
	assert!(ids.windows(2).all(|w| w[0] == w[1]));

	let index = TaxonomyIndex::open(config).unwrap();
	let categories = index.list_categories().unwrap();
	assert_eq!(categories.len(), 1);
	assert_eq!(categories[0].entity_count, workers);
}

#[test]
fn data_survives_reopen() {
	let dir = tempfile::tempdir().unwrap();
	{
		let mut index = TaxonomyIndex::open(on_disk(&dir)).unwrap();
		index
			.ingest_entity(EntityIngest {
				entity_id: "E1".into(),
				taxonomy: tree(json!({"Science": {"Physics": {}}})),
				vector: Some(vec![0.5, 0.5]),
				taxonomy_snapshot: Some(json!({"Science": {"Physics": {}}})),
			})
			.unwrap();
	}

	let index = TaxonomyIndex::open(on_disk(&dir)).unwrap();
	assert_eq!(index.dimension().unwrap(), Some(2));
	assert_eq!(
		index.get_taxonomy("E1").unwrap().unwrap().to_json(),
		json!({"Science": {"Physics": {}}})
	);
	let embedding = index.get_vector("E1").unwrap().unwrap();
	assert_eq!(embedding.vector, vec![0.5, 0.5]);
	assert_eq!(embedding.taxonomy_snapshot, Some(json!({"Science": {"Physics": {}}})));
}

#[test]
fn configured_dimension_must_match_stored_one() {
	let dir = tempfile::tempdir().unwrap();
	{
		let mut index = TaxonomyIndex::open(on_disk(&dir)).unwrap();
		index.put_vector("E1", vec![1.0, 2.0, 3.0], None).unwrap();
	}
	let err = TaxonomyIndex::open(IndexConfig {
		dimension: Some(4),
		..on_disk(&dir)
	})
	.err()
	.unwrap();
	assert!(matches!(err, IndexError::DimensionMismatch { expected: 3, actual: 4 }));
}

// ---------------------------------------------------------------------------
// Vectors and search
// ---------------------------------------------------------------------------

#[test]
fn vector_lifecycle() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	assert_eq!(index.get_vector("E1").unwrap(), None);

	let created = index.create_vector("E1", vec![1.0, 0.0], None).unwrap();
	assert!(matches!(
		index.create_vector("E1", vec![0.0, 1.0], None).unwrap_err(),
		IndexError::AlreadyExists(_)
	));
	let replaced = index.put_vector("E1", vec![0.0, 1.0], Some(json!({"Art": {}}))).unwrap();
	assert_eq!(replaced.id, created.id);
	assert_eq!(replaced.vector, vec![0.0, 1.0]);

	assert!(matches!(
		index.put_vector("E2", vec![1.0], None).unwrap_err(),
		IndexError::DimensionMismatch { expected: 2, actual: 1 }
	));
	assert!(index.put_vector("E2", vec![f32::NAN, 1.0], None).unwrap_err().is_input_validation());

	assert!(index.delete_vector("E1").unwrap());
	assert!(!index.delete_vector("E1").unwrap());
	assert_eq!(index.vector_count().unwrap(), 0);
}

#[test]
fn search_results_are_ordered_and_bounded() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	for i in 0..20 {
		let x = i as f32;
		index.put_vector(&format!("e{i:02}"), vec![x, -x, 0.5 * x], None).unwrap();
	}

	let hits = index.similarity_search(&[3.0, -3.0, 1.0], None, Some(5)).unwrap();
	assert_eq!(hits.len(), 5);
	assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
	assert_eq!(hits[0].entity_id, "e03");

	let all = index.similarity_search(&[3.0, -3.0, 1.0], None, None).unwrap();
	assert_eq!(all.len(), index.config().default_top_k);
}

#[test]
fn filtered_search_only_ranks_candidates() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	for (entity, taxonomy, vector) in [
		("near-art", json!({"Art": {}}), vec![0.0, 0.0]),
		("far-science", json!({"Science": {"Physics": {}}}), vec![5.0, 5.0]),
		("mid-science", json!({"Science": {"Physics": {}}}), vec![1.0, 1.0]),
	] {
		index
			.ingest_entity(EntityIngest {
				entity_id: entity.into(),
				taxonomy: tree(taxonomy),
				vector: Some(vector),
				taxonomy_snapshot: None,
			})
			.unwrap();
	}

	let filter = tree(json!({"Science": {"Physics": {}}}));
	let hits = index.similarity_search(&[0.0, 0.0], Some(&filter), Some(10)).unwrap();
	let ids: Vec<&str> = hits.iter().map(|h| h.entity_id.as_str()).collect();
	assert_eq!(ids, vec!["mid-science", "far-science"]);
}

#[test]
fn empty_filter_match_returns_without_ranking() {
	let dir = tempfile::tempdir().unwrap();
	let mut index = TaxonomyIndex::open(IndexConfig {
		search_deadline: Duration::ZERO,
		..on_disk(&dir)
	})
	.unwrap();
	index.ingest_taxonomy("E1", &tree(json!({"Science": {}}))).unwrap();
	index.put_vector("E1", vec![0.0, 0.0], None).unwrap();

	// Any ranking scan would trip the zero deadline.
	let unmatched = tree(json!({"Art": {}}));
	assert!(index.similarity_search(&[0.0, 0.0], Some(&unmatched), None).unwrap().is_empty());
	let err = index.similarity_search(&[0.0, 0.0], None, None).unwrap_err();
	assert!(matches!(err, IndexError::DeadlineExceeded { .. }));
}

#[test]
fn invalid_queries_are_rejected() {
	let mut index = TaxonomyIndex::in_memory().unwrap();
	index.put_vector("E1", vec![0.0, 0.0, 0.0], None).unwrap();

	assert!(index.similarity_search(&[], None, None).unwrap_err().is_input_validation());
	assert!(index.similarity_search(&[0.0, 0.0], None, None).unwrap_err().is_input_validation());
	assert!(index.similarity_search(&[0.0, 0.0, 0.0], None, Some(0)).unwrap_err().is_input_validation());
	assert!(index.similarity_search(&[f32::INFINITY, 0.0, 0.0], None, None).unwrap_err().is_input_validation());
}

#[test]
fn malformed_queries_fail_without_reading_the_store() {
	let dir = tempfile::tempdir().unwrap();
	let config = on_disk(&dir);
	let path = config.storage_path.clone().unwrap();
	let index = TaxonomyIndex::open(config).unwrap();
	rusqlite::Connection::open(&path)
		.unwrap()
		.execute_batch("DROP TABLE meta")
		.unwrap();

	assert!(index.similarity_search(&[], None, None).unwrap_err().is_input_validation());
	assert!(index.similarity_search(&[f32::NAN], None, None).unwrap_err().is_input_validation());
	assert!(index.similarity_search(&[1.0], None, Some(0)).unwrap_err().is_input_validation());
	assert!(index.similarity_search(&[1.0], None, None).unwrap_err().is_search_failure());
}

#[test]
fn cosine_metric_ranks_by_angle() {
	let mut index = TaxonomyIndex::open(IndexConfig {
		metric: DistanceMetric::Cosine,
		..IndexConfig::default()
	})
	.unwrap();
	index.put_vector("same-direction", vec![10.0, 0.0], None).unwrap();
	index.put_vector("orthogonal", vec![0.0, 0.1], None).unwrap();

	let hits = index.similarity_search(&[1.0, 0.0], None, None).unwrap();
	assert_eq!(hits[0].entity_id, "same-direction");
	assert!(hits[0].distance.abs() < 1e-9);
	assert!((hits[1].distance - 1.0).abs() < 1e-9);
}

#[test]
fn partial_ranking_agrees_with_full_ranking() {
	let mut full = TaxonomyIndex::in_memory().unwrap();
	let mut partial = TaxonomyIndex::open(IndexConfig {
		full_rank_threshold: 1,
		..IndexConfig::default()
	})
	.unwrap();
	for i in 0..50 {
		let v = vec![(i % 7) as f32, (i % 3) as f32];
		full.put_vector(&format!("e{i}"), v.clone(), None).unwrap();
		partial.put_vector(&format!("e{i}"), v, None).unwrap();
	}

	let query = [2.0, 1.0];
	assert_eq!(
		full.similarity_search(&query, None, Some(7)).unwrap(),
		partial.similarity_search(&query, None, Some(7)).unwrap()
	);
}

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

fn cli(db: &std::path::Path, args: &[&str]) -> (bool, Value) {
	let output = Command::new(env!("CARGO_BIN_EXE_simse-taxonomy-engine"))
		.arg("--db")
		.arg(db)
		.args(args)
		.env_remove("SIMSE_TAXONOMY_DIMENSION")
		.env_remove("SIMSE_TAXONOMY_METRIC")
		.output()
		.expect("failed to spawn simse-taxonomy-engine");
	let stdout = String::from_utf8(output.stdout).unwrap();
	let parsed: Value = serde_json::from_str(stdout.trim())
		.unwrap_or_else(|e| panic!("invalid JSON from engine: {e}\nline: {stdout}"));
	(output.status.success(), parsed)
}

#[test]
fn cli_ingest_search_roundtrip() {
	let dir = tempfile::tempdir().unwrap();
	let db = dir.path().join("cli.db");

	let (ok, report) = cli(
		&db,
		&["ingest", "E1", r#"{"Science": {"Physics": {"Quantum Mechanics": {}}}}"#],
	);
	assert!(ok);
	assert_eq!(report["newAssociations"], 3);

	let (ok, view) = cli(&db, &["taxonomy", "E1"]);
	assert!(ok);
	assert_eq!(view["taxonomy"], json!({"Science": {"Physics": {"Quantum Mechanics": {}}}}));

	let (ok, _) = cli(&db, &["put-vector", "E1", "[0, 0, 0]"]);
	assert!(ok);
	let (ok, _) = cli(&db, &["put-vector", "E2", "[1, 1, 1]"]);
	assert!(ok);

	let (ok, found) = cli(&db, &["search", "[0, 0, 0.1]", "--filter", r#"{"Physics": {"Quantum Mechanics": {}}}"#]);
	assert!(ok);
	assert_eq!(found["hits"].as_array().unwrap().len(), 1);
	assert_eq!(found["hits"][0]["entityId"], "E1");

	let (ok, listed) = cli(&db, &["categories"]);
	assert!(ok);
	assert_eq!(listed["categories"].as_array().unwrap().len(), 3);
}

#[test]
fn cli_reports_errors_as_json() {
	let dir = tempfile::tempdir().unwrap();
	let db = dir.path().join("cli.db");

	let (ok, err) = cli(&db, &["ingest", "E1", r#"{"paper_type": "Dataset"}"#]);
	assert!(!ok);
	assert_eq!(err["code"], "TAXONOMY_INVALID_INPUT");
}
