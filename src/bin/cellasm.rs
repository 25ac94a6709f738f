//! Assembly to instruction stream compiler CLI.
//!
//! Reads assembly source files and writes serialized instruction streams
//! that `cellvm run` loads directly.
//!
//! # Usage
//! ```text
//! cellasm <input.cvm> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input.cvm`: Assembly source file to compile
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<input>.bin`)
//! - `-d, --disassemble`: Print the instruction listing instead of writing
//!   (accepts source or a serialized stream)
//!
//! # Examples
//! ```text
//! cellasm program.cvm
//! cellasm program.cvm -o output.bin
//! cellasm output.bin -d
//! ```

use cellvm::utils::log;
use cellvm::virtual_machine::assembler::{assemble_source, render_diagnostic};
use cellvm::virtual_machine::program::InstructionStream;
use cellvm::{error, info};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    log::init_from_env();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut disassemble = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = Some(args[i].clone());
                i += 1;
            }
            "--disassemble" | "-d" => {
                disassemble = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let bytes = fs::read(input_path).unwrap_or_else(|e| {
        error!("Failed to read {}: {}", input_path, e);
        process::exit(2);
    });

    let stream = if InstructionStream::is_serialized(&bytes) {
        InstructionStream::from_bytes(&bytes).unwrap_or_else(|e| {
            error!("Invalid stream {}: {}", input_path, e);
            process::exit(e.exit_code());
        })
    } else {
        let source = String::from_utf8(bytes).unwrap_or_else(|_| {
            error!("Input is not UTF-8 text: {}", input_path);
            process::exit(1);
        });
        assemble_source(&source).unwrap_or_else(|e| {
            eprint!("{}", render_diagnostic(input_path, &source, &e));
            process::exit(e.exit_code());
        })
    };

    if let Err(fault) = stream.validate() {
        error!("Malformed stream: {fault}");
        process::exit(1);
    }

    if disassemble {
        println!("{stream}");
        return;
    }

    let output_path = output_path.unwrap_or_else(|| {
        let p = Path::new(input_path);
        let stem = p.file_stem().unwrap_or_default().to_string_lossy();
        let parent = p.parent().unwrap_or(Path::new("."));
        parent
            .join(format!("{}.bin", stem))
            .to_string_lossy()
            .into_owned()
    });

    if let Some(parent) = Path::new(&output_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(2);
    }

    let encoded = stream.to_bytes();
    if let Err(e) = fs::write(&output_path, &encoded) {
        error!("Failed to write output file: {}", e);
        process::exit(2);
    }

    info!(
        "Compiled {} -> {} ({} slot(s), {} bytes)",
        input_path,
        output_path,
        stream.len(),
        encoded.len()
    );
}

const USAGE: &str = "\
cellvm assembler

USAGE:
    {program} <input> [OPTIONS]

ARGS:
    <input>    Assembly source file (or a serialized stream with -d)

OPTIONS:
    -o, --output <file>    Output file path (defaults to <input>.bin)
    -d, --disassemble      Print the instruction listing instead of writing
    -h, --help             Print this help message

EXAMPLES:
    {program} program.cvm
    {program} program.cvm -o build/program.bin
    {program} build/program.bin -d
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
