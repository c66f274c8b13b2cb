//! Core trait abstractions.

pub mod embedder;
pub mod store;
