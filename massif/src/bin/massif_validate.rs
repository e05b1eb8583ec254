//! Check that a Massif output file parses and print a short summary.

use clap::Parser;
use massif::massif_parse::RunRecord;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "massif_validate")]
#[command(about = "Validate a Valgrind Massif output file")]
#[command(version)]
struct Args {
    /// Massif output file
    input: PathBuf,

    /// Log parsing progress to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    massif::init_tracing(args.verbose);
    let path = args.input.display();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match RunRecord::parse(file) {
        Ok(record) => {
            println!("Valid Massif file: {}", path);
            println!("  Command: {}", record.command);
            println!("  Description: {}", record.description);
            println!("  Time unit: {}", record.time_unit);
            println!("  Snapshots: {}", record.snapshots.len());
            println!("  Detailed: {}", record.detailed_snapshots().count());
            if let Some(peak) = record.peak_snapshot() {
                println!(
                    "  Peak: snapshot {} at {} {} ({} heap bytes)",
                    peak.id, peak.time, record.time_unit, peak.mem_heap_b
                );
                if let Some(tree) = &peak.heap_tree {
                    println!("  Peak tree nodes: {}", tree.node_count());
                }
            } else if let Some(max) = record.max_heap_snapshot() {
                println!(
                    "  Max heap: snapshot {} ({} heap bytes)",
                    max.id, max.mem_heap_b
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid Massif file '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
