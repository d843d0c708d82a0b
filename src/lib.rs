//! # VectorMind: retrieval-augmented-generation MCP server
//!
//! Chunks documents and agent memories, embeds them through an HTTP
//! feature-extraction provider, stores the vectors in a local sqlite-vec
//! database or a remote index service, and serves similarity search to AI
//! assistants via the Model Context Protocol (MCP).
//!
//! ## Architecture
//!
//! - **[`config`]**: JSON configuration, environment secrets, validation
//! - **[`indexer`]**: file type detection, text extraction, sentence chunking
//! - **[`embedder`]**: embedding providers plus batching and retry
//! - **[`db`]**: vector index backends and the two-collection store
//! - **[`retrieval`]**: ingest, search, memory lifecycle, stats and clear
//! - **[`mcp`]**: MCP server exposing every operation as a tool (stdio via rmcp)

pub mod config;
pub mod db;
pub mod embedder;
pub mod indexer;
pub mod mcp;
pub mod retrieval;
