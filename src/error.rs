//! Error types for the indexing pipeline.
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Fatal configuration and
//! invariant failures abort startup; per-job failures are logged, counted,
//! and retried by the driver.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{JobId, WorkerId};

/// Main error type for driver and worker operations
#[derive(Error, Debug)]
pub enum IndexError {
    /// Configuration errors - fatal at startup
    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Failed to read compilation database '{path}': {source}")]
    CompdbRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse compilation database '{path}': {source}")]
    CompdbParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// File system errors
    #[error("Failed to read file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Parsing errors
    #[error("Failed to parse '{path}': {reason}")]
    Parse { path: PathBuf, reason: String },

    /// IPC errors
    #[error("Message queue '{queue}' is full")]
    QueueFull { queue: String },

    #[error("Failed to send on queue '{queue}': {source}")]
    QueueSend {
        queue: String,
        source: std::io::Error,
    },

    #[error("Failed to encode message for queue '{queue}': {source}")]
    QueueEncode {
        queue: String,
        source: serde_json::Error,
    },

    #[error("Peer sent unparseable payload: {payload}")]
    MalformedMessage { payload: String },

    /// Worker lifecycle errors - driver side, per-job retryable
    #[error("Failed to spawn worker {worker_id}: {source}")]
    WorkerSpawn {
        worker_id: WorkerId,
        source: std::io::Error,
    },

    #[error("Worker {worker_id} timed out on job {job_id}")]
    JobTimeout { worker_id: WorkerId, job_id: JobId },

    #[error("Worker {worker_id} exited unexpectedly")]
    WorkerCrash { worker_id: WorkerId },

    /// Shard merge errors
    #[error("Failed to decode index shard '{path}': {source}")]
    ShardDecode {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Result type alias for driver and worker operations
pub type IndexResult<T> = Result<T, IndexError>;
