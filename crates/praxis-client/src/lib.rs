//! Client side of the Praxis assistant: token persistence, the HTTP API
//! client with legacy fallback, and the chat view state machine.

pub mod api_client;
pub mod chat_view;
pub mod error;
pub mod session_gate;
pub mod token_store;

pub use api_client::{ApiClient, ApiMode};
pub use chat_view::{ChatView, Delivery, ViewMessage, ViewStatus};
pub use error::ClientError;
pub use session_gate::SessionGate;
pub use token_store::TokenStore;
