//! Types shared by the Praxis server and client crates.

pub mod chat_types;
pub mod error;
pub mod timestamp;
