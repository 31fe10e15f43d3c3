pub mod cli;
pub mod config;
pub mod db;
pub mod governor;
pub mod indexer;
pub mod ledger;
pub mod prototype;
pub mod provider;
pub mod retriever;
pub mod store;
pub mod tagger;
pub mod utils;

pub use config::Opts;
pub use store::{EmbeddingRecord, MediaKind, VectorStore};
