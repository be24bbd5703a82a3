pub mod context_cache;
pub mod expansion;
pub mod filter;
pub mod fusion;
pub mod passage;
pub mod rerank_policy;
pub mod scoring;
pub mod time_serde;
