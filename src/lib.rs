//! # docqa
//!
//! Question answering over uploaded documents by retrieval-augmented
//! generation.
//!
//! A document is extracted to text, split into overlapping chunks, embedded
//! through an OpenAI-compatible API and indexed per filename. Questions are
//! embedded the same way, matched against the document's index by cosine
//! similarity, and answered by a chat model that is told to use only the
//! retrieved chunks.
//!
//! ## Architecture
//!
//! ```text
//! upload ─▶ extract ─▶ chunk ─▶ embedding ─▶ index ─▶ store (per filename)
//!                                                        │
//! question ─▶ embedding ─▶ retrieval ◀───────────────────┘
//!                              │
//!                              ▼
//!                          synthesis ─▶ answer + cited chunks
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! docqa process ./paper.pdf
//! docqa query "What is the main result?" --file paper.pdf
//! docqa serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / plain-text extraction |
//! | [`chunk`] | Fixed-size overlapping chunking |
//! | [`retry`] | Timeout and exponential backoff for service calls |
//! | [`embedding`] | Embedding providers and the batching embedder |
//! | [`index`] | Exact cosine vector index |
//! | [`store`] | Per-document index store with atomic swap |
//! | [`retrieval`] | Question → ranked chunks |
//! | [`generation`] | Chat-completion providers |
//! | [`synthesis`] | Grounded answers with citations |
//! | [`pipeline`] | Process / query / delete orchestration |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod index;
pub mod models;
mod openai;
pub mod pipeline;
pub mod retrieval;
pub mod retry;
pub mod server;
pub mod store;
pub mod synthesis;
