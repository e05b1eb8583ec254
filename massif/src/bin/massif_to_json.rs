//! Convert Valgrind Massif output files to JSON.
//!
//! This binary reads a `massif.out.<pid>` file and writes the parsed run as a
//! JSON document, or as NDJSON with one record per snapshot.
//!
//! # Usage
//!
//! ```bash
//! massif_to_json massif.out.1234 -o massif.json
//! massif_to_json massif.out.1234 --ndjson --no-trees
//! massif_to_json massif.out.1234  # outputs to massif.out.json
//! ```

use clap::Parser;
use massif::json::{EmitConfig, JsonEmitter, OutputFormat};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "massif_to_json")]
#[command(about = "Convert Valgrind Massif output to JSON")]
#[command(version)]
struct Args {
    /// Input Massif output file
    input: PathBuf,

    /// Output JSON file (defaults to input filename with .json extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write newline-delimited records instead of a single document
    #[arg(long)]
    ndjson: bool,

    /// Pretty-print the JSON document
    #[arg(short, long, conflicts_with = "ndjson")]
    pretty: bool,

    /// Leave heap trees out of the output
    #[arg(long)]
    no_trees: bool,

    /// Log parsing progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    // Determine output path
    let output_path = args.output.unwrap_or_else(|| {
        let mut path = args.input.clone();
        path.set_extension("json");
        path
    });

    let config = EmitConfig {
        format: if args.ndjson {
            OutputFormat::Ndjson
        } else {
            OutputFormat::Document
        },
        pretty: args.pretty,
        include_heap_trees: !args.no_trees,
    };

    // Open input
    let input_file = File::open(&args.input).map_err(|e| {
        format!(
            "Failed to open input file '{}': {}",
            args.input.display(),
            e
        )
    })?;
    let reader = BufReader::new(input_file);

    // Create output
    let output_file = File::create(&output_path).map_err(|e| {
        format!(
            "Failed to create output file '{}': {}",
            output_path.display(),
            e
        )
    })?;
    let mut writer = BufWriter::new(output_file);

    let snapshots = JsonEmitter::with_config(config).convert(reader, &mut writer)?;
    writer.flush()?;

    eprintln!(
        "Converted '{}' -> '{}' ({} snapshots)",
        args.input.display(),
        output_path.display(),
        snapshots
    );

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    massif::init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
