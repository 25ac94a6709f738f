//! cellvm command-line front end.
//!
//! Runs one program or starts the interactive command loop.
//!
//! # Usage
//! ```text
//! cellvm run <file> [OPTIONS]
//! cellvm repl [OPTIONS]
//! ```
//!
//! `<file>` is either assembly source or a stream serialized by `cellasm`;
//! the two are told apart by the serialized header.
//!
//! # Exit codes
//! - `0`: the program halted normally
//! - `1`: syntax error or execution fault
//! - `2`: I/O failure (unreadable program, failed file access, snapshot write)

use cellvm::repl::Session;
use cellvm::utils::log;
use cellvm::virtual_machine::assembler::render_diagnostic;
use cellvm::virtual_machine::config::{MemoryMode, VmConfig};
use cellvm::virtual_machine::errors::VMError;
use cellvm::virtual_machine::files::{DirectoryFiles, FileAccess, NoFiles};
use cellvm::virtual_machine::program::InstructionStream;
use cellvm::virtual_machine::snapshot::Snapshot;
use cellvm::virtual_machine::vm::execute;
use cellvm::{error, info};
use std::env;
use std::fs;
use std::io;
use std::process;

/// Options shared by `run` and `repl`.
#[derive(Default)]
struct Options {
    memory_mode: Option<MemoryMode>,
    files_root: Option<String>,
    save: Option<String>,
    trace: bool,
}

fn main() {
    log::init_from_env();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let code = match args[1].as_str() {
        "run" => {
            if args.len() < 3 || args[2].starts_with('-') {
                error!("run requires a program file");
                print_usage(&args[0]);
                process::exit(1);
            }
            let options = parse_options(&args[0], &args[3..], true);
            run_program(&args[2], &options)
        }
        "repl" => {
            let options = parse_options(&args[0], &args[2..], false);
            run_repl(&options)
        }
        other => {
            error!("Unknown command: {}\n", other);
            print_usage(&args[0]);
            1
        }
    };
    process::exit(code);
}

fn parse_options(program: &str, args: &[String], allow_run_flags: bool) -> Options {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--encrypted" => {
                options.memory_mode = Some(MemoryMode::Encrypted);
                i += 1;
            }
            "--plain" => {
                options.memory_mode = Some(MemoryMode::Plain);
                i += 1;
            }
            "--files" => {
                i += 1;
                if i >= args.len() {
                    error!("--files requires a directory");
                    process::exit(1);
                }
                options.files_root = Some(args[i].clone());
                i += 1;
            }
            "--save" if allow_run_flags => {
                i += 1;
                if i >= args.len() {
                    error!("--save requires a file");
                    process::exit(1);
                }
                options.save = Some(args[i].clone());
                i += 1;
            }
            "--trace" if allow_run_flags => {
                options.trace = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(program);
                process::exit(1);
            }
        }
    }
    options
}

/// Environment first, command-line flags on top.
fn build_config(options: &Options) -> VmConfig {
    let config = VmConfig::from_env().unwrap_or_else(|e| {
        error!("{e}");
        process::exit(e.exit_code());
    });
    match options.memory_mode {
        Some(mode) => config.with_memory_mode(mode),
        None => config,
    }
}

fn file_access(options: &Options) -> Box<dyn FileAccess> {
    match &options.files_root {
        Some(root) => Box::new(DirectoryFiles::new(root)),
        None => Box::new(NoFiles),
    }
}

/// Loads `path`, printing a source excerpt to stderr on a syntax error.
fn load_program(path: &str) -> Result<InstructionStream, VMError> {
    InstructionStream::load(path).inspect_err(|e| {
        if let VMError::SyntaxError { .. } = e
            && let Ok(source) = fs::read_to_string(path)
        {
            eprint!("{}", render_diagnostic(path, &source, e));
        }
    })
}

fn run_program(path: &str, options: &Options) -> i32 {
    let config = build_config(options);
    let stream = match load_program(path) {
        Ok(stream) => stream,
        Err(e @ VMError::SyntaxError { .. }) => return e.exit_code(),
        Err(e) => {
            error!("Failed to load {path}: {e}");
            return e.exit_code();
        }
    };

    info!(
        "Running {path} ({} slot(s), {} memory)",
        stream.len(),
        config.memory_mode()
    );
    let mut files = file_access(options);
    let report = execute(&config, stream, files.as_mut());

    for text in report.outputs() {
        println!("{text}");
    }
    if options.trace {
        for record in &report.trace {
            eprintln!("{record}");
        }
    }

    if let Some(save) = &options.save {
        if let Err(e) = Snapshot::from_report(&report).save(save) {
            error!("Failed to save snapshot to {save}: {e}");
            return e.exit_code();
        }
        info!("Saved snapshot to {save}");
    }

    match &report.fault {
        Some(fault) => {
            error!("{fault}");
            fault.error.exit_code()
        }
        None => {
            info!(
                "Halted after {} step(s) with {} binding(s)",
                report.trace.len(),
                report.bindings.len()
            );
            0
        }
    }
}

fn run_repl(options: &Options) -> i32 {
    let config = build_config(options);
    let mut files = file_access(options);
    let mut session = Session::new(config);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    session
        .run_loop(stdin.lock(), &mut stdout, files.as_mut())
        .unwrap_or_else(|e| {
            error!("Terminal I/O failed: {e}");
            2
        })
}

const USAGE: &str = "\
cellvm

USAGE:
    {program} run <file> [OPTIONS]
    {program} repl [OPTIONS]

ARGS:
    <file>    Assembly source or a stream serialized by cellasm

OPTIONS:
    --encrypted       Seal memory cells with XChaCha20-Poly1305
    --plain           Store memory cells unencrypted (default)
    --files <dir>     Serve readFile/writeFile from <dir> (disabled otherwise)
    --save <file>     (run) Write bindings and trace to a snapshot
    --trace           (run) Print the execution trace to stderr
    -h, --help        Print this help message

ENVIRONMENT:
    CELLVM_MEMORY     plain | encrypted
    CELLVM_TRUSTED    Comma-separated builtins callable with `call`
    CELLVM_LOG        info | warn | error | off
    CELLVM_LOG_TIMESTAMPS  0 to drop the timestamp prefix from log lines

EXAMPLES:
    {program} run program.cvm --trace
    {program} run program.bin --encrypted --files ./data --save state.snap
    {program} repl

FILES:
    ~/.cellvm/snapshots/<name>    REPL snapshots saved under a bare name
";

/// Prints usage information to stderr.
fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
