//! CQDAM server: a single-threaded Redis-compatible in-memory key-value store
//!
//! This crate provides a RESP2 server whose throughput under pipelining
//! follows the batched-service model `T(p) = p / (t0 + t1·p)`.
//!
//! # Architecture
//!
//! - One mio-based event loop serves every client; no worker threads
//! - Zero-copy request framing over `bytes::Bytes`
//! - DJB2-hashed chained table with power-of-two buckets
//! - Per-connection reply coalescing flushed with vectored writes

/// Configuration management for the server
pub mod config;

/// Error types and result aliases
pub mod error;

/// Reply buffering and vectored writes
pub mod io;

/// Throughput model fitting
pub mod model;

/// Network layer for connection management
pub mod network;

/// Redis protocol (RESP) implementation
pub mod protocol;

/// Core server implementation
pub mod server;

/// Server counters reported by INFO
pub mod stats;

/// Keyspace and hash table
pub mod store;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{Server, ShutdownHandle};
