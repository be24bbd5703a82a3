/// Documents that are searchable. Other statuses are still being ingested or were removed.
pub const INDEXED_STATUS: &str = "indexed";

#[derive(Debug, sqlx::FromRow)]
pub struct DocumentName {
	pub document_id: String,
	pub display_name: String,
}

#[derive(Debug)]
pub struct ProjectRecord {
	pub tenant_id: String,
	pub project_id: String,
	pub name: String,
}

#[derive(Debug)]
pub struct DocumentRecord {
	pub tenant_id: String,
	pub project_id: String,
	pub document_id: String,
	pub display_name: String,
	pub status: String,
}
