#![deny(missing_docs)]

//! Core library for docrelay, a PDF ingestion backend for retrieval-augmented chat.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Page extraction, chunking, and relayed persistence of PDF documents.
pub mod ingestion;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Qdrant vector store integration.
pub mod qdrant;
