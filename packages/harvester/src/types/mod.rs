//! Core data types.

pub mod config;
pub mod identity;
pub mod record;
pub mod target;
