//! Tessera - tiered knowledge store
//!
//! Records live in a ranked set of tiers (in-memory LRU caches, file-backed
//! disk tiers and one write-once "crystal" tier) and move between them by
//! access frequency and idleness. Mutable records keep a bounded version
//! history; crystal records carry a SHA-256 signature checked on every read.
//! Around the store sit a relationship graph, backups, an API-key
//! gatekeeper with rate limiting, multi-mode search and an HTTP API.

pub mod access;
pub mod api;
pub mod backup;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod graph;
pub mod maintenance;
pub mod record;
pub mod search;
pub mod storage;
pub mod testing;

pub use engine::Engine;
pub use error::{Result, TesseraError};
