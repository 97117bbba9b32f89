//! Contextual FAQ assistant: answers questions from a vector-matched knowledge
//! base and falls back to a generative model when nothing is close enough.
//!
//! Every answered question feeds back into the knowledge base through a
//! durable write-back queue: local hits refresh the matched entry, generated
//! answers are stored as new entries. The next similar question is then
//! answered locally.
//!
//! # Architecture
//!
//! - **Storage**: SQLite with [sqlite-vec](https://github.com/asg017/sqlite-vec)
//!   for cosine KNN, partitioned by collection
//! - **Embeddings**: OpenAI embeddings API or local ONNX Runtime
//!   (all-MiniLM-L6-v2), behind an LRU cache
//! - **Generation**: OpenAI chat completions with an IT-topic gate
//! - **Write-back**: SQLite-backed task queue drained by tokio workers
//! - **Transport**: JSON lines over stdio
//!
//! # Modules
//!
//! - [`config`]: configuration from TOML files and environment variables
//! - [`db`]: pool, schema, migrations, bootstrap with retry, health checks
//! - [`knowledge`]: entries, collections, and similarity search
//! - [`embedding`]: embedding providers and the caching service
//! - [`responder`]: generative fallback
//! - [`router`]: per-question routing
//! - [`writeback`]: the write-back pipeline, queue, and workers
//! - [`seed`]: initial population from an FAQ file
//! - [`app`]: wiring
//! - [`server`]: the stdio front end

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod knowledge;
pub mod responder;
pub mod router;
pub mod seed;
pub mod server;
pub mod writeback;
