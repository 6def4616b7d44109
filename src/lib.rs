//! # Citation Drift
//!
//! Flags sentences in an AI-generated summary whose meaning has drifted
//! from the source passages they cite.
//!
//! A run ingests a document corpus into stably-identified chunks, embeds
//! them through a content-addressed cache, and persists a chunk index.
//! A draft that cites chunks with `[C-<chunk_id>]` markers (or a
//! structured JSON draft) is then checked sentence by sentence: each
//! sentence is compared with its cited chunks by cosine similarity and
//! flagged when the best match falls below the threshold, optionally
//! with an LLM judge ruling on borderline cases.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────────┐   ┌────────────┐
//! │  Corpus  │──▶│ Chunk+Embed │──▶│  Chunk index │──▶│   Drift    │──▶ flags.json
//! │ pdf/docx │   │ (cached)    │   │ (persisted)  │   │  detector  │
//! └──────────┘   └─────────────┘   └──────────────┘   └─────▲──────┘
//!                                                           │
//!                                                  draft (md / json)
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`corpus`] | File discovery and per-file extraction + chunking |
//! | [`extract`] | Page text from PDF, DOCX, PPTX, markdown and text |
//! | [`embedding`] | Providers, retry, on-disk cache, batching client |
//! | [`index_store`] | Build, save and load the chunk index |
//! | [`judge`] | LLM judge for borderline sentences |
//! | [`drift`] | Per-sentence scoring and verdicts |
//! | [`flags`] | The `flags.json` artifact |
//! | [`report`] | Run summary |
//! | [`pipeline`] | `ingest` and `check` end to end |
//!
//! Chunk identity, chunking, the in-memory index, draft parsing and the
//! decision rule live in the `citation-drift-core` crate.

pub mod atomic;
pub mod config;
pub mod corpus;
pub mod drift;
pub mod embedding;
pub mod extract;
pub mod flags;
pub mod index_store;
pub mod judge;
pub mod pipeline;
pub mod progress;
pub mod report;
