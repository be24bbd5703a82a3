use serde_json::{Map, Value};

use crate::{Error, Result};
use scout_config::{EmbeddingApiFormat, EmbeddingProviderConfig};

/// What the vectors are for. Asymmetric models embed queries and passages differently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingTask {
	Query,
	Document,
}
impl EmbeddingTask {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Query => "query",
			Self::Document => "document",
		}
	}
}

/// Embeds `texts` in one request. Vectors come back in input order.
pub async fn embed(
	cfg: &EmbeddingProviderConfig,
	texts: &[String],
	task: EmbeddingTask,
) -> Result<Vec<Vec<f32>>> {
	if texts.is_empty() {
		return Ok(Vec::new());
	}

	let client = crate::client(cfg.timeout_ms)?;
	let url = crate::endpoint(&cfg.api_base, &cfg.path);
	let body = request_body(cfg, texts, task);
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;
	let vectors = match cfg.api_format {
		EmbeddingApiFormat::OpenAi => parse_openai_response(json)?,
		EmbeddingApiFormat::Sidecar => parse_sidecar_response(json)?,
	};

	check_shape(&vectors, texts.len(), cfg.dimensions as usize)?;

	Ok(vectors)
}

fn request_body(cfg: &EmbeddingProviderConfig, texts: &[String], task: EmbeddingTask) -> Value {
	let mut body = Map::new();

	match cfg.api_format {
		EmbeddingApiFormat::OpenAi => {
			body.insert("model".to_string(), Value::from(cfg.model.clone()));
			body.insert("input".to_string(), Value::from(texts.to_vec()));
			body.insert("dimensions".to_string(), Value::from(cfg.dimensions));
		},
		EmbeddingApiFormat::Sidecar => {
			body.insert("texts".to_string(), Value::from(texts.to_vec()));
		},
	}

	if let Some(field) = cfg.input_type_field.as_deref() {
		body.insert(field.to_string(), Value::from(task.as_str()));
	}

	Value::Object(body)
}

fn parse_openai_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let data = json
		.get("data")
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Embedding response is missing data array."))?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item.get("embedding").ok_or_else(|| {
			Error::invalid_response("Embedding item is missing embedding array.")
		})?;

		indexed.push((index, parse_vector(embedding)?));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

fn parse_sidecar_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let embeddings = json
		.get("embeddings")
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Embedding response is missing embeddings array."))?;

	embeddings.iter().map(parse_vector).collect()
}

fn parse_vector(value: &Value) -> Result<Vec<f32>> {
	let items = value
		.as_array()
		.ok_or_else(|| Error::invalid_response("Embedding must be an array of numbers."))?;
	let mut vec = Vec::with_capacity(items.len());

	for item in items {
		let number =
			item.as_f64().ok_or_else(|| Error::invalid_response("Embedding value must be numeric."))?;

		vec.push(number as f32);
	}

	Ok(vec)
}

fn check_shape(vectors: &[Vec<f32>], expected_count: usize, dimensions: usize) -> Result<()> {
	if vectors.len() != expected_count {
		return Err(Error::invalid_response(format!(
			"Embedding response returned {} vectors for {expected_count} texts.",
			vectors.len()
		)));
	}
	if let Some(bad) = vectors.iter().find(|vec| vec.len() != dimensions) {
		return Err(Error::invalid_response(format!(
			"Embedding dimension {} does not match configured dimension {dimensions}.",
			bad.len()
		)));
	}

	Ok(())
}
