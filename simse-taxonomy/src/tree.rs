// ---------------------------------------------------------------------------
// TaxonomyTree: typed nested taxonomy payload
// ---------------------------------------------------------------------------
//
// A taxonomy is a mapping from category name to its children; an empty
// mapping is a leaf. The same shape is used for ingestion payloads, the
// per-entity view and search filters.
//
// Every traversal here uses an explicit work stack so that deeply nested
// input cannot exhaust the native call stack.
// ---------------------------------------------------------------------------

use std::collections::BTreeSet;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{IndexError, Result};

/// Insertion-ordered taxonomy tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaxonomyTree {
	children: IndexMap<String, TaxonomyTree>,
}

impl TaxonomyTree {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style insertion of a named subtree.
	pub fn with_child(mut self, name: impl Into<String>, child: TaxonomyTree) -> Self {
		self.children.insert(name.into(), child);
		self
	}

	/// Builder-style insertion of a leaf.
	pub fn with_leaf(self, name: impl Into<String>) -> Self {
		self.with_child(name, TaxonomyTree::new())
	}

	/// Get or insert the child named `name` and return it for further nesting.
	/// An existing child keeps its subtree.
	pub fn entry(&mut self, name: impl Into<String>) -> &mut TaxonomyTree {
		self.children.entry(name.into()).or_default()
	}

	pub fn get(&self, name: &str) -> Option<&TaxonomyTree> {
		self.children.get(name)
	}

	pub fn children(&self) -> impl DoubleEndedIterator<Item = (&str, &TaxonomyTree)> + ExactSizeIterator {
		self.children.iter().map(|(name, child)| (name.as_str(), child))
	}

	pub fn is_empty(&self) -> bool {
		self.children.is_empty()
	}

	pub fn is_leaf(&self) -> bool {
		self.children.is_empty()
	}

	/// Number of direct children.
	pub fn len(&self) -> usize {
		self.children.len()
	}

	/// Total number of keys across all nesting levels.
	pub fn node_count(&self) -> usize {
		let mut count = 0;
		let mut stack: Vec<&TaxonomyTree> = vec![self];
		while let Some(node) = stack.pop() {
			count += node.children.len();
			stack.extend(node.children.values());
		}
		count
	}

	/// Deepest nesting level; a tree with only top-level leaves has depth 1.
	pub fn depth(&self) -> usize {
		let mut max = 0;
		let mut stack: Vec<(&TaxonomyTree, usize)> = vec![(self, 0)];
		while let Some((node, level)) = stack.pop() {
			max = max.max(level);
			for child in node.children.values() {
				stack.push((child, level + 1));
			}
		}
		max
	}

	/// Names of every key without children, wherever it sits in the tree.
	pub fn leaf_names(&self) -> BTreeSet<String> {
		let mut names = BTreeSet::new();
		let mut stack: Vec<&TaxonomyTree> = vec![self];
		while let Some(node) = stack.pop() {
			for (name, child) in &node.children {
				if child.is_leaf() {
					names.insert(name.clone());
				} else {
					stack.push(child);
				}
			}
		}
		names
	}

	/// Reject blank names and trees nested deeper than `max_depth`.
	pub fn validate(&self, max_depth: usize) -> Result<()> {
		let mut stack: Vec<(&TaxonomyTree, usize)> = vec![(self, 1)];
		while let Some((node, level)) = stack.pop() {
			for (name, child) in &node.children {
				if name.trim().is_empty() {
					return Err(IndexError::invalid("category name must not be blank"));
				}
				if level > max_depth {
					return Err(IndexError::invalid(format!(
						"taxonomy nesting exceeds maximum depth of {max_depth}"
					)));
				}
				if !child.is_leaf() {
					stack.push((child, level + 1));
				}
			}
		}
		Ok(())
	}

	/// Build a tree from a JSON object. Values must be objects or `null`
	/// (leaf); any other value is rejected.
	pub fn from_json(value: &Value) -> Result<Self> {
		let root = match value {
			Value::Object(map) => map,
			Value::Null => return Ok(Self::new()),
			other => {
				return Err(IndexError::invalid(format!(
					"taxonomy must be a JSON object, got {}",
					json_kind(other)
				)));
			}
		};

		// Flatten into an arena where every child index is greater than its
		// parent's, then assemble bottom-up.
		let mut nodes: Vec<(Option<usize>, String)> = Vec::new();
		let mut stack: Vec<(Option<usize>, &Map<String, Value>)> = vec![(None, root)];
		while let Some((parent, map)) = stack.pop() {
			for (name, child) in map {
				let idx = nodes.len();
				nodes.push((parent, name.clone()));
				match child {
					Value::Object(inner) => stack.push((Some(idx), inner)),
					Value::Null => {}
					other => {
						return Err(IndexError::invalid(format!(
							"taxonomy value for \"{name}\" must be an object or null, got {}",
							json_kind(other)
						)));
					}
				}
			}
		}
		Ok(Self::from_arena(nodes))
	}

	/// Assemble a tree from `(parent index, name)` pairs where every parent
	/// index is smaller than its children's and siblings appear in order.
	pub(crate) fn from_arena(mut nodes: Vec<(Option<usize>, String)>) -> Self {
		let mut pending: Vec<Vec<(String, TaxonomyTree)>> = vec![Vec::new(); nodes.len()];
		let mut top: Vec<(String, TaxonomyTree)> = Vec::new();
		for idx in (0..nodes.len()).rev() {
			let mut subtree = TaxonomyTree::new();
			for (name, child) in std::mem::take(&mut pending[idx]).into_iter().rev() {
				subtree.merge(name, child);
			}
			let (parent, name) = std::mem::take(&mut nodes[idx]);
			match parent {
				Some(p) => pending[p].push((name, subtree)),
				None => top.push((name, subtree)),
			}
		}

		let mut tree = TaxonomyTree::new();
		for (name, child) in top.into_iter().rev() {
			tree.merge(name, child);
		}
		tree
	}

	/// Insert `subtree` under `name`, merging children into an existing key
	/// of the same name at every level instead of replacing it.
	pub fn merge(&mut self, name: impl Into<String>, subtree: TaxonomyTree) {
		let name = name.into();
		if !self.children.contains_key(&name) {
			self.children.insert(name, subtree);
			return;
		}

		let mut stack: Vec<(&mut TaxonomyTree, TaxonomyTree)> = Vec::new();
		let mut incoming = TaxonomyTree::new();
		incoming.children.insert(name, subtree);
		stack.push((self, incoming));
		while let Some((target, mut source)) = stack.pop() {
			let mut overlapping: IndexMap<String, TaxonomyTree> = IndexMap::new();
			for (key, child) in std::mem::take(&mut source.children) {
				if target.children.contains_key(&key) {
					overlapping.insert(key, child);
				} else {
					target.children.insert(key, child);
				}
			}
			for (key, existing) in target.children.iter_mut() {
				if let Some(child) = overlapping.shift_remove(key) {
					stack.push((existing, child));
				}
			}
		}
	}

	pub fn to_json(&self) -> Value {
		// Pre-order arena, then objects assembled bottom-up as in `from_arena`.
		let mut nodes: Vec<(Option<usize>, &str)> = Vec::new();
		let mut stack: Vec<(Option<usize>, &str, &TaxonomyTree)> =
			self.children().rev().map(|(n, c)| (None, n, c)).collect();
		while let Some((parent, name, node)) = stack.pop() {
			let idx = nodes.len();
			nodes.push((parent, name));
			stack.extend(node.children().rev().map(|(n, c)| (Some(idx), n, c)));
		}

		let mut pending: Vec<Vec<(String, Value)>> = vec![Vec::new(); nodes.len()];
		let mut top: Vec<(String, Value)> = Vec::new();
		for idx in (0..nodes.len()).rev() {
			let mut object = Map::new();
			for (name, value) in std::mem::take(&mut pending[idx]).into_iter().rev() {
				object.insert(name, value);
			}
			let (parent, name) = nodes[idx];
			match parent {
				Some(p) => pending[p].push((name.to_string(), Value::Object(object))),
				None => top.push((name.to_string(), Value::Object(object))),
			}
		}

		let mut out = Map::new();
		for (name, value) in top.into_iter().rev() {
			out.insert(name, value);
		}
		Value::Object(out)
	}
}

// Nested maps would otherwise drop recursively, one native frame per level.
impl Drop for TaxonomyTree {
	fn drop(&mut self) {
		let mut stack: Vec<TaxonomyTree> = self.children.drain(..).map(|(_, child)| child).collect();
		while let Some(mut node) = stack.pop() {
			stack.extend(node.children.drain(..).map(|(_, child)| child));
		}
	}
}

fn json_kind(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

impl Serialize for TaxonomyTree {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.children.serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for TaxonomyTree {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
		let value = Value::deserialize(deserializer)?;
		TaxonomyTree::from_json(&value).map_err(serde::de::Error::custom)
	}
}
