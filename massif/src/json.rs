//! Write parsed Massif runs as JSON.
//!
//! Two layouts are supported:
//!
//! - **Document**: one JSON object with `desc`, `cmd`, `timeUnit` and a
//!   `snapshots` array, optionally pretty-printed.
//! - **NDJSON**: one record per line, tagged with a `type` field: a single
//!   `header` record followed by one `snapshot` record per snapshot. This
//!   layout is streamed while parsing, so a large log is never held in memory
//!   as a whole.
//!
//! # Example
//!
//! ```no_run
//! use massif::json::JsonEmitter;
//! use massif::massif_parse::RunRecord;
//! use std::fs::File;
//!
//! let record = RunRecord::parse(File::open("massif.out.1234").unwrap()).unwrap();
//! JsonEmitter::new().write(&record, std::io::stdout()).unwrap();
//! ```

use massif_parse::{MassifParser, Metadata, ParseError, RunRecord, Snapshot, SnapshotStep};
use serde::Serialize;
use serde_json::Value;
use std::io::{BufReader, Read, Write};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while emitting JSON.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
}

pub type Result<T> = std::result::Result<T, EmitError>;

/// Output layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// A single JSON document.
    #[default]
    Document,
    /// Newline-delimited records with a `type` tag.
    Ndjson,
}

/// Configuration for the emitter.
#[derive(Debug, Clone)]
pub struct EmitConfig {
    pub format: OutputFormat,
    /// Pretty-print the document. Ignored for NDJSON.
    pub pretty: bool,
    /// Keep `heapTree` on detailed snapshots.
    pub include_heap_trees: bool,
}

impl Default for EmitConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Document,
            pretty: false,
            include_heap_trees: true,
        }
    }
}

/// Writes [`RunRecord`]s, or Massif logs parsed on the fly, as JSON.
#[derive(Debug, Clone, Default)]
pub struct JsonEmitter {
    config: EmitConfig,
}

impl JsonEmitter {
    /// Create an emitter with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an emitter with custom configuration.
    pub fn with_config(config: EmitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmitConfig {
        &self.config
    }

    /// Write an already parsed record.
    pub fn write<W: Write>(&self, record: &RunRecord, writer: W) -> Result<()> {
        match self.config.format {
            OutputFormat::Document => self.write_document(record, writer),
            OutputFormat::Ndjson => {
                let mut ndjson = self.ndjson_writer(writer);
                ndjson.write_header(&record.metadata())?;
                for snapshot in &record.snapshots {
                    ndjson.write_snapshot(snapshot)?;
                }
                Ok(())
            }
        }
    }

    /// Parse a Massif log from `reader` and write it to `writer`.
    ///
    /// Returns the number of snapshots written. In NDJSON mode records are
    /// written as they are parsed, so output before a parse error is kept.
    pub fn convert<R: Read, W: Write>(&self, reader: R, writer: W) -> Result<usize> {
        match self.config.format {
            OutputFormat::Document => {
                let record = RunRecord::parse(reader)?;
                self.write_document(&record, writer)?;
                Ok(record.snapshots.len())
            }
            OutputFormat::Ndjson => {
                let mut parser = MassifParser::new(BufReader::new(reader));
                let mut ndjson = self.ndjson_writer(writer);

                ndjson.write_header(&parser.read_metadata()?)?;

                let mut count = 0;
                while let SnapshotStep::Snapshot(snapshot) = parser.read_snapshot()? {
                    ndjson.write_snapshot(&snapshot)?;
                    count += 1;
                }
                debug!(snapshots = count, lines = parser.line_num(), "streamed ndjson");
                Ok(count)
            }
        }
    }

    fn ndjson_writer<W: Write>(&self, writer: W) -> NdjsonWriter<W> {
        NdjsonWriter::new(writer).include_heap_trees(self.config.include_heap_trees)
    }

    fn write_document<W: Write>(&self, record: &RunRecord, mut writer: W) -> Result<()> {
        let mut value = serde_json::to_value(record)?;

        if !self.config.include_heap_trees {
            if let Some(Value::Array(snapshots)) = value.get_mut("snapshots") {
                for snapshot in snapshots {
                    strip_heap_tree(snapshot);
                }
            }
        }

        if self.config.pretty {
            serde_json::to_writer_pretty(&mut writer, &value)?;
        } else {
            serde_json::to_writer(&mut writer, &value)?;
        }
        writeln!(writer)?;
        Ok(())
    }
}

fn strip_heap_tree(snapshot: &mut Value) {
    if let Value::Object(obj) = snapshot {
        obj.remove("heapTree");
    }
}

/// Writer for NDJSON output, one record at a time.
///
/// This is useful for callers that drive a [`MassifParser`] themselves and
/// never build a full [`RunRecord`].
pub struct NdjsonWriter<W: Write> {
    writer: W,
    include_heap_trees: bool,
}

impl<W: Write> NdjsonWriter<W> {
    /// Create a new NDJSON writer that keeps heap trees.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            include_heap_trees: true,
        }
    }

    /// Keep or drop `heapTree` on snapshot records.
    pub fn include_heap_trees(mut self, include: bool) -> Self {
        self.include_heap_trees = include;
        self
    }

    /// Write the header record. This should be called first.
    pub fn write_header(&mut self, metadata: &Metadata) -> Result<()> {
        self.write_record("header", metadata)
    }

    /// Write a snapshot record.
    pub fn write_snapshot(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut value = serde_json::to_value(snapshot)?;
        if !self.include_heap_trees {
            strip_heap_tree(&mut value);
        }
        self.write_value("snapshot", value)
    }

    fn write_record<T: Serialize>(&mut self, record_type: &str, data: &T) -> Result<()> {
        let value = serde_json::to_value(data)?;
        self.write_value(record_type, value)
    }

    fn write_value(&mut self, record_type: &str, mut value: Value) -> Result<()> {
        if let Value::Object(ref mut obj) = value {
            obj.insert("type".to_string(), Value::String(record_type.to_string()));
        }
        writeln!(self.writer, "{}", serde_json::to_string(&value)?)?;
        Ok(())
    }

    /// Get a reference to the underlying writer.
    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Get a mutable reference to the underlying writer.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume this writer and return the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}
