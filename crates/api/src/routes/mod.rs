//! Route handlers

pub mod schema;
pub mod scoring;
