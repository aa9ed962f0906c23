//! Resumable per-date aggregation of platform actor runs

pub mod cli;
pub mod services;
pub mod types;
