pub mod assistant;
pub mod config;
pub mod jwt;
pub mod llm;
pub mod retrieval;
pub mod runtime;
pub mod web;

pub use praxis_app::logging;
pub use praxis_client as client;
pub use praxis_core::chat_types;
pub use praxis_core::error;
pub use praxis_core::timestamp;
pub use praxis_storage::db;
