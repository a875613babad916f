// Library interface for newsdesk modules
// This allows tests and other binaries to import modules

pub mod llm;
pub mod types;
pub mod ingestion;
pub mod search;
pub mod scraping;
pub mod router;
pub mod presenter;
pub mod qa;
pub mod evaluator;
pub mod assistant;
pub mod sessions;
pub mod server;
