//! Assessment recommendations from a fixed catalog by semantic vector search.

pub mod app;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod eval;
pub mod extract;
pub mod recommender;
pub mod semantic;
#[cfg(test)]
mod tests;
pub mod web;
