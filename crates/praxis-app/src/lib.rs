//! Process-level concerns shared by the `praxis` binary.

pub mod logging;
