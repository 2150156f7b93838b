//! kbforge: tenant-scoped knowledge ingestion and retrieval
//!
//! Changes are recorded as outbox events in SQLite, relayed onto a message
//! transport, and turned into chunks and vectors by idempotent consumer
//! workers. Queries embed the question and search the vector store within
//! the tenant's knowledge base.

pub mod chunk;
pub mod commands;
pub mod config;
pub mod consumer;
pub mod embed;
pub mod enqueue;
pub mod error;
pub mod ingest;
pub mod merge;
pub mod meta;
pub mod mq;
pub mod outbox;
pub mod reader;
pub mod retrieve;
pub mod shutdown;
pub mod store;
