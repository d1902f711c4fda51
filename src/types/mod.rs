//! Core identifier and range types shared across driver and workers.

pub mod paths;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use paths::{AbsolutePath, RootPath, RootRelativePath, StableFileId};

/// Index of a compile command in the compilation database. One per task.
pub type TaskId = u32;

/// Identifier the driver assigns to a worker process at spawn time.
pub type WorkerId = u32;

/// Identity of one job: a task plus the phase within that task.
///
/// Serialized as a single u64 on the wire: task id in the high 32 bits,
/// subtask id in the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId {
    task_id: TaskId,
    subtask_id: u32,
}

impl JobId {
    pub const SEMANTIC_ANALYSIS_SUBTASK: u32 = 0;
    pub const EMIT_INDEX_SUBTASK: u32 = 1;

    pub fn new(task_id: TaskId, subtask_id: u32) -> Self {
        Self {
            task_id,
            subtask_id,
        }
    }

    pub fn from_u64(raw: u64) -> Self {
        Self {
            task_id: (raw >> 32) as u32,
            subtask_id: (raw & 0xffff_ffff) as u32,
        }
    }

    pub fn to_u64(self) -> u64 {
        (u64::from(self.task_id) << 32) | u64::from(self.subtask_id)
    }

    pub fn task_id(self) -> TaskId {
        self.task_id
    }

    pub fn subtask_id(self) -> u32 {
        self.subtask_id
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.task_id, self.subtask_id)
    }
}

impl Serialize for JobId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.to_u64())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u64::deserialize(deserializer)?;
        Ok(Self::from_u64(raw))
    }
}

/// Digest of the preprocessor-observed byte stream of one header inclusion.
///
/// Two inclusions of the same header that take different conditional
/// branches or expand macros differently produce different values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct HashValue(pub u64);

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Inclusive source range within one file, 1-based lines and columns.
///
/// Field order gives the lexicographic ordering used to sort occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileRange {
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl FileRange {
    pub fn new(start_line: u32, start_column: u32, end_line: u32, end_column: u32) -> Self {
        Self {
            start_line,
            start_column,
            end_line,
            end_column,
        }
    }

    /// Convert a tree-sitter range (0-based, end-exclusive) to 1-based
    /// inclusive coordinates.
    pub fn from_ts_range(range: &tree_sitter::Range) -> Self {
        let end_column = if range.end_point.column == 0 {
            1
        } else {
            range.end_point.column as u32
        };
        Self {
            start_line: range.start_point.row as u32 + 1,
            start_column: range.start_point.column as u32 + 1,
            end_line: range.end_point.row as u32 + 1,
            end_column,
        }
    }

    /// Zero-width range at a single location.
    pub fn make_empty(line: u32, column: u32) -> Self {
        Self {
            start_line: line,
            start_column: column,
            end_line: line,
            end_column: column,
        }
    }

    /// Encode in the SCIP occurrence convention: 0-based, end-exclusive
    /// columns, collapsed to three elements for single-line ranges.
    pub fn to_scip_range(&self) -> Vec<i32> {
        let start_line = self.start_line as i32 - 1;
        let start_col = self.start_column as i32 - 1;
        let end_line = self.end_line as i32 - 1;
        let end_col = self.end_column as i32;
        if start_line == end_line {
            vec![start_line, start_col, end_col]
        } else {
            vec![start_line, start_col, end_line, end_col]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_round_trips_through_u64() {
        for raw in [
            0u64,
            1,
            0xffff_ffff,
            0x1_0000_0000,
            0xdead_beef_cafe_f00d,
            u64::MAX,
        ] {
            assert_eq!(JobId::from_u64(raw).to_u64(), raw);
        }
        let id = JobId::new(7, 1);
        assert_eq!(JobId::from_u64(id.to_u64()), id);
        assert_eq!(id.to_string(), "7.1");
    }

    #[test]
    fn test_job_id_serializes_as_u64() {
        let id = JobId::new(3, 1);
        let encoded = serde_json::to_string(&id).unwrap();
        assert_eq!(encoded, id.to_u64().to_string());
        let decoded: JobId = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_file_range_ordering_is_lexicographic() {
        let a = FileRange::new(1, 1, 1, 5);
        let b = FileRange::new(1, 2, 1, 3);
        let c = FileRange::new(2, 1, 2, 2);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_scip_range_single_line_collapses() {
        let r = FileRange::new(3, 5, 3, 8);
        assert_eq!(r.to_scip_range(), vec![2, 4, 8]);
        let multi = FileRange::new(3, 5, 4, 2);
        assert_eq!(multi.to_scip_range(), vec![2, 4, 3, 2]);
    }

    #[test]
    fn test_empty_range_is_zero_width() {
        let r = FileRange::make_empty(1, 1);
        assert_eq!(r.start_line, r.end_line);
        assert_eq!(r.start_column, r.end_column);
    }
}
