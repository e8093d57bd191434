use clap::Parser;
use serde_json::{json, Value};
use simse_taxonomy_engine::config::{CliArgs, Command};
use simse_taxonomy_engine::{IndexError, Result, TaxonomyIndex, TaxonomyTree};

fn main() {
	let args = CliArgs::parse();

	// stdout carries command results only
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	match run(args) {
		Ok(output) => println!("{output}"),
		Err(e) => {
			tracing::error!(code = e.code(), "Command failed: {}", e);
			println!("{}", e.to_json());
			std::process::exit(1);
		}
	}
}

fn run(args: CliArgs) -> Result<Value> {
	let mut index = TaxonomyIndex::open(args.index_config())?;

	match args.command {
		Command::Ingest { entity_id, taxonomy } => {
			let tree = parse_tree(&taxonomy)?;
			let report = index.ingest_taxonomy(&entity_id, &tree)?;
			Ok(serde_json::to_value(report)?)
		}
		Command::Taxonomy { entity_id } => {
			let tree = index.get_taxonomy(&entity_id)?;
			Ok(json!({ "entityId": entity_id, "taxonomy": tree }))
		}
		Command::Filter { filter } => {
			let tree = parse_tree(&filter)?;
			Ok(json!({ "entityIds": index.search_by_taxonomy(&tree)? }))
		}
		Command::PutVector {
			entity_id,
			vector,
			snapshot,
		} => {
			let vector = parse_vector(&vector)?;
			let snapshot = snapshot.as_deref().map(parse_json).transpose()?;
			let embedding = index.put_vector(&entity_id, vector, snapshot)?;
			Ok(serde_json::to_value(embedding)?)
		}
		Command::GetVector { entity_id } => {
			let embedding = index.get_vector(&entity_id)?;
			Ok(json!({ "entityId": entity_id, "embedding": embedding }))
		}
		Command::DeleteVector { entity_id } => {
			let deleted = index.delete_vector(&entity_id)?;
			Ok(json!({ "entityId": entity_id, "deleted": deleted }))
		}
		Command::Search {
			vector,
			filter,
			top_k,
		} => {
			let query = parse_vector(&vector)?;
			let filter = filter.as_deref().map(parse_tree).transpose()?;
			let hits = index.similarity_search(&query, filter.as_ref(), top_k)?;
			Ok(json!({ "hits": hits }))
		}
		Command::Categories => Ok(json!({ "categories": index.list_categories()? })),
	}
}

fn parse_json(raw: &str) -> Result<Value> {
	serde_json::from_str(raw).map_err(|e| IndexError::InvalidInput(format!("invalid JSON: {e}")))
}

fn parse_tree(raw: &str) -> Result<TaxonomyTree> {
	TaxonomyTree::from_json(&parse_json(raw)?)
}

fn parse_vector(raw: &str) -> Result<Vec<f32>> {
	serde_json::from_str(raw)
		.map_err(|e| IndexError::InvalidInput(format!("vector must be a JSON array of numbers: {e}")))
}
