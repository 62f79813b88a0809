#![deny(missing_docs)]

//! Core library for the Rusty Digest summarization server.

/// HTTP routing, health and metrics handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Page-by-page document text extraction.
pub mod extraction;
/// Text-generation backend abstraction and the Ollama adapter.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Session and chunk counters.
pub mod metrics;
/// Chunking, summarization and pipeline orchestration.
pub mod processing;
/// Document sessions and their WebSocket transport.
pub mod session;
/// Host memory sampling and identification.
pub mod system;
