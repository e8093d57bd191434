use serde::{Deserialize, Serialize};

/// Distance used to rank embeddings; smaller is nearer for every metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
	#[default]
	Euclidean,
	Cosine,
}

impl DistanceMetric {
	/// Returns `None` when the vectors cannot be compared (length mismatch,
	/// empty input or a non-finite result).
	pub fn distance(self, a: &[f32], b: &[f32]) -> Option<f64> {
		match self {
			Self::Euclidean => euclidean_distance(a, b),
			Self::Cosine => cosine_distance(a, b),
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Euclidean => "euclidean",
			Self::Cosine => "cosine",
		}
	}
}

impl std::str::FromStr for DistanceMetric {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"euclidean" | "l2" => Ok(Self::Euclidean),
			"cosine" => Ok(Self::Cosine),
			other => Err(format!("unknown distance metric: {other}")),
		}
	}
}

/// L2 distance between two f32 vectors, accumulated in f64.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f64> {
	if a.len() != b.len() || a.is_empty() {
		return None;
	}

	let mut sum: f64 = 0.0;
	for (&x, &y) in a.iter().zip(b) {
		let d = x as f64 - y as f64;
		sum += d * d;
	}

	let result = sum.sqrt();
	result.is_finite().then_some(result)
}

/// Compute cosine similarity between two f32 vectors.
/// Returns 0.0 for zero-magnitude vectors or dimension mismatches.
/// Result clamped to [-1.0, 1.0].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
	if a.len() != b.len() || a.is_empty() {
		return 0.0;
	}

	let mut dot: f64 = 0.0;
	let mut norm_a: f64 = 0.0;
	let mut norm_b: f64 = 0.0;

	for (&x, &y) in a.iter().zip(b) {
		let ai = x as f64;
		let bi = y as f64;
		dot += ai * bi;
		norm_a += ai * ai;
		norm_b += bi * bi;
	}

	let denom = norm_a.sqrt() * norm_b.sqrt();
	if denom == 0.0 {
		return 0.0;
	}

	let result = dot / denom;
	if !result.is_finite() {
		return 0.0;
	}
	result.clamp(-1.0, 1.0)
}

/// `1 - cosine_similarity`, in [0.0, 2.0].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Option<f64> {
	if a.len() != b.len() || a.is_empty() {
		return None;
	}
	Some(1.0 - cosine_similarity(a, b))
}
