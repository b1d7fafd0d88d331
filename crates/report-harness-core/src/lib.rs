//! # Report Harness Core
//!
//! Shared, WASM-safe logic for Report Harness: chunking, the flat L2 vector
//! index, retrieval, the LLM client contract, prompt construction, parsing
//! of LLM output, draft compilation and the report assembly state machine.
//!
//! This crate contains no tokio, filesystem I/O, or network code. The
//! `report-harness` app crate supplies concrete embedding providers, the
//! HTTP LLM client and file persistence.
//!
//! ## Pipeline
//!
//! ```text
//! build:  documents ─▶ chunk ─▶ embed ─▶ FlatL2Index (+ chunk list)
//! query:  query ─▶ embed ─▶ search ─▶ chunk texts ─▶ LLM ─▶ report
//! ```

pub mod chunk;
pub mod compile;
pub mod embedding;
pub mod error;
pub mod index;
pub mod llm;
pub mod models;
pub mod parse;
pub mod prompts;
pub mod report;
pub mod retrieve;
