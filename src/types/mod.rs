//! Domain types for the reconciliation engine.

pub mod batch;
pub mod chemical;
pub mod config;
pub mod fact;
pub mod graph;
pub mod report;
pub mod value;
