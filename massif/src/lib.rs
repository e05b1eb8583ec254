//! Massif conversion tools.
//!
//! This crate turns Valgrind Massif logs, parsed by [`massif_parse`], into
//! JSON for other tools to consume.
//!
//! # Modules
//!
//! - [`json`] - Write a parsed run as one JSON document or as an NDJSON stream
//!
//! # Example
//!
//! ```no_run
//! use massif::json::{EmitConfig, JsonEmitter, OutputFormat};
//! use std::fs::File;
//! use std::io::{BufReader, BufWriter};
//!
//! let input = BufReader::new(File::open("massif.out.1234").unwrap());
//! let output = BufWriter::new(File::create("massif.json").unwrap());
//!
//! let emitter = JsonEmitter::with_config(EmitConfig {
//!     format: OutputFormat::Ndjson,
//!     ..EmitConfig::default()
//! });
//! emitter.convert(input, output).unwrap();
//! ```

pub mod json;

// Re-export massif_parse for convenience
pub use massif_parse;

/// Install a stderr `tracing` subscriber for the command-line tools.
///
/// `RUST_LOG` still applies; `verbose` raises the floor to `debug`.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}
