//! Set logic behind tenant and project scoping of vector searches.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Optional narrowing requested by the caller. At most one kind applies:
/// `file_id` wins over `file_ids`, which wins over `tags`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubFilter {
	#[serde(default)]
	pub file_id: Option<String>,
	#[serde(default)]
	pub file_ids: Option<Vec<String>>,
	#[serde(default)]
	pub tags: Option<Vec<String>>,
}
impl SubFilter {
	/// Drops blank entries and treats empty lists as absent.
	pub fn normalized(&self) -> Self {
		fn clean(values: &Option<Vec<String>>) -> Option<Vec<String>> {
			let cleaned: Vec<String> = values
				.iter()
				.flatten()
				.map(|value| value.trim())
				.filter(|value| !value.is_empty())
				.map(str::to_string)
				.collect();

			(!cleaned.is_empty()).then_some(cleaned)
		}

		Self {
			file_id: self
				.file_id
				.as_deref()
				.map(str::trim)
				.filter(|value| !value.is_empty())
				.map(str::to_string),
			file_ids: clean(&self.file_ids),
			tags: clean(&self.tags),
		}
	}

	pub fn wants_tags(&self) -> Option<&[String]> {
		if self.file_id.is_some() || self.file_ids.is_some() {
			return None;
		}

		self.tags.as_deref()
	}
}

/// A search predicate that always carries the tenant and at least one document id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetrievalFilter {
	tenant_id: String,
	document_ids: Vec<String>,
}
impl RetrievalFilter {
	pub fn new(tenant_id: impl Into<String>, document_ids: Vec<String>) -> Option<Self> {
		let tenant_id = tenant_id.into();

		if tenant_id.trim().is_empty() || document_ids.is_empty() {
			return None;
		}

		Some(Self { tenant_id, document_ids })
	}

	pub fn tenant_id(&self) -> &str {
		&self.tenant_id
	}

	pub fn document_ids(&self) -> &[String] {
		&self.document_ids
	}

	pub fn contains_document(&self, document_id: &str) -> bool {
		self.document_ids.iter().any(|id| id == document_id)
	}

	pub fn allows(&self, tenant_id: &str, document_id: &str) -> bool {
		self.tenant_id == tenant_id && self.contains_document(document_id)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterOutcome {
	Scoped(RetrievalFilter),
	NoMatch,
}

/// Narrows the project's documents by `sub_filter`.
///
/// `tag_document_ids` is the tenant-scoped tag lookup result and is only read when the sub-filter
/// selects by tags. Output keeps the project's document order.
pub fn resolve_filter(
	tenant_id: &str,
	project_document_ids: &[String],
	sub_filter: Option<&SubFilter>,
	tag_document_ids: &[String],
) -> FilterOutcome {
	let sub_filter = sub_filter.map(SubFilter::normalized).unwrap_or_default();
	let allowed: Option<HashSet<&str>> = if let Some(file_id) = sub_filter.file_id.as_deref() {
		Some(HashSet::from([file_id]))
	} else if let Some(file_ids) = sub_filter.file_ids.as_ref() {
		Some(file_ids.iter().map(String::as_str).collect())
	} else if sub_filter.tags.is_some() {
		Some(tag_document_ids.iter().map(String::as_str).collect())
	} else {
		None
	};
	let mut seen = HashSet::new();
	let document_ids: Vec<String> = project_document_ids
		.iter()
		.filter(|id| allowed.as_ref().is_none_or(|allowed| allowed.contains(id.as_str())))
		.filter(|id| seen.insert(id.as_str()))
		.cloned()
		.collect();

	match RetrievalFilter::new(tenant_id, document_ids) {
		Some(filter) => FilterOutcome::Scoped(filter),
		None => FilterOutcome::NoMatch,
	}
}
