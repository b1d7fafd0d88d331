//! # Report Harness
//!
//! A local-first toolkit for writing long professional reports with a hosted
//! chat-completion model, grounded in a folder of your own documents.
//!
//! Report Harness builds a retrieval knowledge base from a folder of text,
//! PDF and CSV files, then assembles a report step by step: outline, parsed
//! template, one retrieved-and-written paragraph per placeholder, compiled
//! draft, and a windowed optimization pass over the draft.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌────────────────┐
//! │   Loader    │──▶│ Chunk+Embed │──▶│ chunks.json +  │
//! │ txt/pdf/csv │   │             │   │ index.bin      │
//! └─────────────┘   └─────────────┘   └───────┬────────┘
//!                                             │ retrieve
//!                                             ▼
//!  outline ─▶ template ─▶ paragraphs ─▶ draft ─▶ optimized report
//!                  (ReportAssembler + HttpLlmClient)
//! ```
//!
//! The pipeline logic (chunking, index, retrieval, prompts, parsing, the
//! report state machine) lives in the `report-harness-core` crate; this crate
//! adds configuration, file I/O, HTTP clients and the `rh` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! rh kb build ./data/policies
//! rh report outline --title "经开区发展报告" --requirements "突出人口变化"
//! rh report parse --title "经开区发展报告"
//! rh report paragraphs --title "经开区发展报告" --kb ./data/policies
//! rh report compile --title "经开区发展报告"
//! rh report optimize --title "经开区发展报告" --all
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`loader`] | Folder walking and text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | HTTP chat-completion client |
//! | [`progress`] | Streaming and build progress on stderr |
//! | [`kb`] | Knowledge-base build, search and Q&A |
//! | [`report_cmd`] | Report workspace and commands |
//! | [`tables`] | Table extraction and interpretation |
//! | [`doc_cmd`] | PDF cleanup |
//! | [`export`] | HTML export of a finished report |

pub mod config;
pub mod doc_cmd;
pub mod embedding;
pub mod export;
pub mod kb;
pub mod llm;
pub mod loader;
pub mod progress;
pub mod report_cmd;
pub mod tables;
