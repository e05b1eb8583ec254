//! Valgrind Massif output parser library.
//!
//! This library parses `massif.out.<pid>` files from any `Read`-able source
//! into a [`RunRecord`]: the run metadata plus every snapshot, with the heap
//! allocation tree of detailed and peak snapshots rebuilt from indentation.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use massif_parse::RunRecord;
//!
//! let file = File::open("massif.out.1234").unwrap();
//! let record = RunRecord::parse(file).unwrap();
//!
//! println!("Command: {}", record.command);
//! println!("Snapshots: {}", record.snapshots.len());
//! if let Some(peak) = record.peak_snapshot() {
//!     println!("Peak heap: {} bytes", peak.mem_heap_b);
//! }
//! ```
//!
//! Callers that want to stream snapshots instead of collecting them drive a
//! [`MassifParser`] directly:
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::BufReader;
//! use massif_parse::{MassifParser, SnapshotStep};
//!
//! let file = BufReader::new(File::open("massif.out.1234").unwrap());
//! let mut parser = MassifParser::new(file);
//! let metadata = parser.read_metadata().unwrap();
//!
//! while let SnapshotStep::Snapshot(snapshot) = parser.read_snapshot().unwrap() {
//!     println!("{} {}: {}", snapshot.time, metadata.time_unit, snapshot.mem_heap_b);
//! }
//! ```

pub mod heap_tree;
pub mod lines;
pub mod parser;

pub use heap_tree::{HeapTreeBuilder, HeapTreeNode, INDENT_PER_LEVEL};
pub use parser::{MassifParser, ParserConfig, SnapshotStep};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{BufReader, Read};
use std::num::ParseIntError;
use thiserror::Error;

/// Errors that can occur during Massif parsing.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("format error at line {line}: expected {expected}, found {found:?}")]
    Format {
        line: usize,
        expected: String,
        found: String,
    },

    #[error("invalid integer for '{field}' at line {line}: {value:?}")]
    Conversion {
        line: usize,
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("unexpected end of input after line {line}: expected {expected}")]
    UnexpectedEof { line: usize, expected: String },

    #[error("parser misuse: {0}")]
    Usage(&'static str),
}

/// Broad classification of a [`ParseError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    /// A line does not follow the expected grammar.
    Format,
    /// A numeric field is not an integer.
    Conversion,
    /// The input ended where a line was required.
    UnexpectedEof,
    /// Recognizers were called out of order or after a failure.
    Usage,
}

impl ParseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParseError::Io(_) => ErrorKind::Io,
            ParseError::Format { .. } => ErrorKind::Format,
            ParseError::Conversion { .. } => ErrorKind::Conversion,
            ParseError::UnexpectedEof { .. } => ErrorKind::UnexpectedEof,
            ParseError::Usage(_) => ErrorKind::Usage,
        }
    }

    /// Line the error points at, when there is one.
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::Format { line, .. }
            | ParseError::Conversion { line, .. }
            | ParseError::UnexpectedEof { line, .. } => Some(*line),
            ParseError::Io(_) | ParseError::Usage(_) => None,
        }
    }
}

/// Result type for Massif parsing operations.
pub type Result<T> = std::result::Result<T, ParseError>;

// ============================================================================
// Header types
// ============================================================================

/// Unit of the `time=` field, from the `time_unit:` header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    /// Instructions executed (`i`).
    #[serde(rename = "i")]
    Instructions,
    /// Bytes allocated and deallocated (`B`).
    #[serde(rename = "B")]
    Bytes,
    /// Wall-clock milliseconds (`ms`).
    #[serde(rename = "ms")]
    Milliseconds,
    #[serde(rename = "auto")]
    Auto,
}

impl TimeUnit {
    /// Map a header token to a unit.
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "i" => Some(TimeUnit::Instructions),
            "B" => Some(TimeUnit::Bytes),
            "ms" => Some(TimeUnit::Milliseconds),
            "auto" => Some(TimeUnit::Auto),
            _ => None,
        }
    }

    /// The token Massif writes for this unit.
    pub fn as_token(self) -> &'static str {
        match self {
            TimeUnit::Instructions => "i",
            TimeUnit::Bytes => "B",
            TimeUnit::Milliseconds => "ms",
            TimeUnit::Auto => "auto",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

/// The three header lines of a Massif log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Massif options the run was started with (`desc:`).
    #[serde(rename = "desc")]
    pub description: String,
    /// Profiled command line (`cmd:`).
    #[serde(rename = "cmd")]
    pub command: String,
    #[serde(rename = "timeUnit")]
    pub time_unit: TimeUnit,
}

// ============================================================================
// Snapshot types
// ============================================================================

/// One point-in-time memory measurement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Snapshot number as declared in the log.
    pub id: u64,
    /// Time in the run's [`TimeUnit`].
    pub time: u64,
    /// Useful heap bytes.
    pub mem_heap_b: u64,
    /// Allocator bookkeeping and alignment overhead.
    pub mem_heap_extra_b: u64,
    #[serde(rename = "memStacks")]
    pub mem_stacks_b: u64,
    /// Set for the snapshot Massif marked as the heap peak.
    #[serde(default)]
    pub is_peak: bool,
    /// Present for detailed and peak snapshots only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heap_tree: Option<HeapTreeNode>,
}

impl Snapshot {
    pub fn is_detailed(&self) -> bool {
        self.heap_tree.is_some()
    }

    /// Heap, heap overhead and stack bytes together, saturating at `u64::MAX`.
    pub fn total_bytes(&self) -> u64 {
        self.mem_heap_b
            .saturating_add(self.mem_heap_extra_b)
            .saturating_add(self.mem_stacks_b)
    }
}

// ============================================================================
// Main RunRecord type
// ============================================================================

/// A parsed Massif log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(rename = "desc")]
    pub description: String,
    #[serde(rename = "cmd")]
    pub command: String,
    #[serde(rename = "timeUnit")]
    pub time_unit: TimeUnit,
    /// Snapshots in the order they appear in the log.
    pub snapshots: Vec<Snapshot>,
}

impl RunRecord {
    /// Start a record from a parsed header, with no snapshots yet.
    pub fn new(metadata: Metadata) -> Self {
        Self {
            description: metadata.description,
            command: metadata.command,
            time_unit: metadata.time_unit,
            snapshots: Vec::new(),
        }
    }

    /// Parse a complete Massif log from any `Read`-able source.
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        Self::parse_with_config(reader, ParserConfig::default())
    }

    /// Parse a complete Massif log with a custom parser configuration.
    pub fn parse_with_config<R: Read>(reader: R, config: ParserConfig) -> Result<Self> {
        let mut parser = MassifParser::with_config(BufReader::new(reader), config);
        let mut record = RunRecord::new(parser.read_metadata()?);

        while let SnapshotStep::Snapshot(snapshot) = parser.read_snapshot()? {
            record.snapshots.push(snapshot);
        }

        Ok(record)
    }

    /// The header fields of this record.
    pub fn metadata(&self) -> Metadata {
        Metadata {
            description: self.description.clone(),
            command: self.command.clone(),
            time_unit: self.time_unit,
        }
    }

    /// The snapshot Massif flagged as the heap peak.
    pub fn peak_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.is_peak)
    }

    /// Snapshot with the largest `mem_heap_B`. The first one wins on ties.
    pub fn max_heap_snapshot(&self) -> Option<&Snapshot> {
        self.snapshots.iter().rev().max_by_key(|s| s.mem_heap_b)
    }

    /// Snapshots that carry a heap tree.
    pub fn detailed_snapshots(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter().filter(|s| s.is_detailed())
    }

    /// Look up a snapshot by its declared id.
    pub fn snapshot_by_id(&self, id: u64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.id == id)
    }
}
