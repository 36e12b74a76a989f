//! Core trait abstractions for the harvester.
//!
//! These are the seams to the external collaborators: browser automation,
//! field extraction, the summarization model, identity rotation, login, and
//! the durable key-value store.

pub mod browser;
pub mod kv;
pub mod session;
pub mod summarizer;
