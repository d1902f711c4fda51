//! Typed request/response envelopes between driver and workers.
//!
//! Every message is one self-describing JSON record on a line; tagged
//! variants carry their payload under `details` so both directions share
//! one decoding path.

pub mod queue;

use std::cmp::Ordering;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::compdb::CompileCommand;
use crate::types::{AbsolutePath, HashValue, JobId, WorkerId};

pub use queue::{LineReceiver, Received, SendQueue};

/// Queue carrying work from the driver to one worker.
pub fn driver_to_worker_queue_name(driver_id: &str, worker_id: WorkerId) -> String {
    format!("scip-cxx-{driver_id}-worker-{worker_id}-recv")
}

/// Shared queue carrying responses from all workers to the driver.
pub fn worker_to_driver_queue_name(driver_id: &str) -> String {
    format!("scip-cxx-{driver_id}-worker-send")
}

/// A header observed with exactly one preprocessor-effect hash in a TU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessedFileInfo {
    pub path: AbsolutePath,
    pub hash_value: HashValue,
}

impl Ord for PreprocessedFileInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.hash_value
            .cmp(&other.hash_value)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl PartialOrd for PreprocessedFileInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A header observed with more than one hash within a single TU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessedFileInfoMulti {
    pub path: AbsolutePath,
    /// Sorted, distinct.
    pub hash_values: Vec<HashValue>,
}

impl Ord for PreprocessedFileInfoMulti {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path
            .cmp(&other.path)
            .then_with(|| self.hash_values.cmp(&other.hash_values))
    }
}

impl PartialOrd for PreprocessedFileInfoMulti {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticAnalysisJobDetails {
    pub command: CompileCommand,
}

/// Phase B job payload. Carries the compile command as well as the file
/// list so any worker can serve the job, not just the one that ran the
/// semantic analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitIndexJobDetails {
    pub command: CompileCommand,
    pub files_to_be_indexed: Vec<AbsolutePath>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details")]
pub enum IndexJob {
    SemanticAnalysis(SemanticAnalysisJobDetails),
    EmitIndex(EmitIndexJobDetails),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticAnalysisJobResult {
    pub well_behaved_files: Vec<PreprocessedFileInfo>,
    pub ill_behaved_files: Vec<PreprocessedFileInfoMulti>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexingStatistics {
    pub total_time_micros: u64,
    pub translation_units_parsed: u64,
    pub documents_emitted: u64,
    pub occurrences_emitted: u64,
}

impl IndexingStatistics {
    pub fn accumulate(&mut self, other: &IndexingStatistics) {
        self.total_time_micros += other.total_time_micros;
        self.translation_units_parsed += other.translation_units_parsed;
        self.documents_emitted += other.documents_emitted;
        self.occurrences_emitted += other.occurrences_emitted;
    }
}

/// On-disk locations of the two shards one Phase B job produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardPaths {
    pub docs_and_externals: PathBuf,
    pub forward_decls: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitIndexJobResult {
    pub statistics: IndexingStatistics,
    pub shard_paths: ShardPaths,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details")]
pub enum IndexJobResult {
    SemanticAnalysis(SemanticAnalysisJobResult),
    EmitIndex(EmitIndexJobResult),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJobRequest {
    pub id: JobId,
    pub job: IndexJob,
}

/// Driver→worker wire message: a job or the shutdown sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum DriverMessage {
    Job(IndexJobRequest),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJobResponse {
    pub worker_id: WorkerId,
    pub job_id: JobId,
    pub result: IndexJobResult,
}

/// Minimal payload for transport round-trip tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcTestMessage {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn abs(p: &str) -> AbsolutePath {
        AbsolutePath::new(Path::new(p)).unwrap()
    }

    fn sample_command() -> CompileCommand {
        CompileCommand {
            directory: "/proj".to_string(),
            file: "src/a.cpp".to_string(),
            output: "a.o".to_string(),
            arguments: vec!["clang++".to_string(), "-c".to_string(), "src/a.cpp".to_string()],
        }
    }

    #[test]
    fn test_queue_names_embed_driver_and_worker_ids() {
        assert_eq!(
            driver_to_worker_queue_name("d1", 3),
            "scip-cxx-d1-worker-3-recv"
        );
        assert_eq!(worker_to_driver_queue_name("d1"), "scip-cxx-d1-worker-send");
    }

    #[test]
    fn test_ipc_test_message_round_trips() {
        for content in ["", "hello", "line\nbreak", "unicode ✓ {\"quoted\"}"] {
            let msg = IpcTestMessage {
                content: content.to_string(),
            };
            let encoded = serde_json::to_string(&msg).unwrap();
            let decoded: IpcTestMessage = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_index_job_request_round_trips() {
        let request = IndexJobRequest {
            id: JobId::new(12, 0),
            job: IndexJob::SemanticAnalysis(SemanticAnalysisJobDetails {
                command: sample_command(),
            }),
        };
        let encoded = serde_json::to_string(&request).unwrap();
        let decoded: IndexJobRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, request);

        let emit = IndexJobRequest {
            id: JobId::new(12, 1),
            job: IndexJob::EmitIndex(EmitIndexJobDetails {
                command: sample_command(),
                files_to_be_indexed: vec![abs("/proj/src/a.cpp"), abs("/proj/include/h.h")],
            }),
        };
        let encoded = serde_json::to_string(&emit).unwrap();
        let decoded: IndexJobRequest = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, emit);
    }

    #[test]
    fn test_index_job_response_round_trips() {
        let response = IndexJobResponse {
            worker_id: 2,
            job_id: JobId::new(5, 0),
            result: IndexJobResult::SemanticAnalysis(SemanticAnalysisJobResult {
                well_behaved_files: vec![PreprocessedFileInfo {
                    path: abs("/proj/include/h.h"),
                    hash_value: HashValue(42),
                }],
                ill_behaved_files: vec![PreprocessedFileInfoMulti {
                    path: abs("/proj/include/ill.h"),
                    hash_values: vec![HashValue(1), HashValue(2)],
                }],
            }),
        };
        let encoded = serde_json::to_string(&response).unwrap();
        let decoded: IndexJobResponse = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, response);
    }

    #[test]
    fn test_shutdown_message_round_trips() {
        let encoded = serde_json::to_string(&DriverMessage::Shutdown).unwrap();
        let decoded: DriverMessage = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, DriverMessage::Shutdown);
    }

    #[test]
    fn test_preprocessed_file_info_orders_by_hash_then_path() {
        let a = PreprocessedFileInfo {
            path: abs("/z.h"),
            hash_value: HashValue(1),
        };
        let b = PreprocessedFileInfo {
            path: abs("/a.h"),
            hash_value: HashValue(2),
        };
        assert!(a < b);

        let c = PreprocessedFileInfo {
            path: abs("/a.h"),
            hash_value: HashValue(1),
        };
        assert!(c < a);
    }
}
