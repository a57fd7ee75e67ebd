//! Storage and persistence domain for Praxis.

pub mod db;
