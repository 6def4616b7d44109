//! # Citation Drift Core
//!
//! I/O-free logic for Citation Drift: data models, stable chunk identity,
//! sentence-aligned chunking, the in-memory chunk index, draft parsing,
//! vector math, and the accept/flag decision rule.
//!
//! This crate performs no filesystem or network access. Extraction, the
//! embedding cache, providers, and artifact persistence live in the
//! `citation-drift` app crate.

pub mod chunk;
pub mod decision;
pub mod draft;
pub mod embedding;
pub mod error;
pub mod ident;
pub mod index;
pub mod models;
