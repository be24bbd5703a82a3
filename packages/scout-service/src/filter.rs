use crate::{Error, Result, ScoutService};
use scout_domain::filter::{self, FilterOutcome, SubFilter};

impl ScoutService {
	/// Confirms the project belongs to the tenant and returns its indexed document ids.
	///
	/// Ownership is checked on every call; only the document list is served from cache.
	pub async fn authorized_project_documents(
		&self,
		tenant_id: &str,
		project_id: &str,
	) -> Result<Vec<String>> {
		let owned = self.backends.catalog.project_owned_by(tenant_id, project_id).await?;

		if !owned {
			return Err(Error::ProjectAccessDenied {
				tenant_id: tenant_id.to_string(),
				project_id: project_id.to_string(),
			});
		}

		let key = (tenant_id.to_string(), project_id.to_string());

		if let Some(ids) = self.project_documents.get(&key) {
			return Ok(ids);
		}

		let ids = self.backends.catalog.project_document_ids(tenant_id, project_id).await?;

		self.project_documents.insert(key, ids.clone());

		Ok(ids)
	}

	/// Drops the cached document list, e.g. after a document was removed from the project.
	pub fn invalidate_project_documents(&self, tenant_id: &str, project_id: &str) {
		self.project_documents.invalidate(&(tenant_id.to_string(), project_id.to_string()));
	}

	/// Builds the tenant- and project-scoped search predicate.
	///
	/// An unknown project is `ProjectAccessDenied`, never an empty result. A sub-filter that selects
	/// nothing inside the project is `FilterOutcome::NoMatch`.
	pub async fn build_filter(
		&self,
		tenant_id: &str,
		project_id: &str,
		sub_filter: Option<&SubFilter>,
	) -> Result<FilterOutcome> {
		let project_ids = self.authorized_project_documents(tenant_id, project_id).await?;

		self.narrow_project_filter(tenant_id, &project_ids, sub_filter).await
	}

	/// Applies `sub_filter` to document ids that were already authorized for the tenant.
	pub(crate) async fn narrow_project_filter(
		&self,
		tenant_id: &str,
		project_ids: &[String],
		sub_filter: Option<&SubFilter>,
	) -> Result<FilterOutcome> {
		let normalized = sub_filter.map(SubFilter::normalized);
		let tag_ids = match normalized.as_ref().and_then(SubFilter::wants_tags) {
			Some(tags) => self.backends.catalog.document_ids_for_tags(tenant_id, tags).await?,
			None => Vec::new(),
		};

		Ok(filter::resolve_filter(tenant_id, project_ids, normalized.as_ref(), &tag_ids))
	}
}
