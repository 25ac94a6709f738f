//! Interactive command loop.
//!
//! A [`Session`] keeps the bindings and trace of the last successful run.
//! Each `run` starts a fresh dispatch loop seeded with those bindings; a
//! faulted run is reported and discarded, leaving the session as it was
//! (apart from its trace, which is kept for inspection).
//!
//! Commands: `run <file>`, `save <file>`, `load <file>`, `bindings`,
//! `trace`, `help`, `exit`.

use crate::virtual_machine::config::VmConfig;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::files::FileAccess;
use crate::virtual_machine::program::InstructionStream;
use crate::virtual_machine::snapshot::Snapshot;
use crate::virtual_machine::vm::VM;
use crate::virtual_machine::vm::bindings::Bindings;
use crate::virtual_machine::vm::context::RunState;
use crate::virtual_machine::vm::trace::TraceRecord;
use crate::{info, warn};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

const PROMPT: &str = "cellvm> ";

const HELP: &str = "\
Commands:
  run <file>    Execute a source or serialized stream with the session bindings
  save <file>   Write the session bindings and trace to a snapshot
  load <file>   Replace the session with a saved snapshot
  bindings      Show the current bindings
  trace         Show the trace of the last run
  help          Show this message
  exit          Leave the session

Bare snapshot names are stored under the snapshot directory.";

/// Default snapshot directory: `~/.cellvm/snapshots`.
pub fn default_snapshot_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".cellvm").join("snapshots"))
}

/// What the loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Exit,
}

/// REPL state carried between commands.
pub struct Session {
    config: VmConfig,
    bindings: Bindings,
    trace: Vec<TraceRecord>,
    snapshot_dir: Option<PathBuf>,
    /// Exit code of the most recent command.
    status: i32,
}

impl Session {
    pub fn new(config: VmConfig) -> Self {
        Self {
            config,
            bindings: Bindings::new(),
            trace: Vec::new(),
            snapshot_dir: default_snapshot_dir(),
            status: 0,
        }
    }

    /// Overrides where bare snapshot names are resolved; `None` keeps them
    /// relative to the working directory.
    pub fn with_snapshot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.snapshot_dir = dir;
        self
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    /// Exit code of the most recent command: 0 on success, otherwise the
    /// failing error's [`exit_code`](VMError::exit_code).
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Reads commands until `exit` or end of input and returns the final status.
    pub fn run_loop<R, W, F>(&mut self, input: R, out: &mut W, files: &mut F) -> io::Result<i32>
    where
        R: BufRead,
        W: Write,
        F: FileAccess + ?Sized,
    {
        write!(out, "{PROMPT}")?;
        out.flush()?;
        for line in input.lines() {
            let line = line?;
            match self.execute_line(&line, out, files) {
                Ok(Control::Exit) => return Ok(self.status),
                Ok(Control::Continue) => {}
                Err(err) => {
                    writeln!(out, "error: {err}")?;
                }
            }
            write!(out, "{PROMPT}")?;
            out.flush()?;
        }
        writeln!(out)?;
        Ok(self.status)
    }

    /// Executes one command line.
    ///
    /// Failures update [`status`](Self::status) and are returned as errors.
    /// They never end the session.
    pub fn execute_line<W, F>(&mut self, line: &str, out: &mut W, files: &mut F) -> Result<Control, VMError>
    where
        W: Write,
        F: FileAccess + ?Sized,
    {
        let result = self.dispatch(line, out, files);
        self.status = match &result {
            Ok(_) => 0,
            Err(err) => err.exit_code(),
        };
        result
    }

    fn dispatch<W, F>(&mut self, line: &str, out: &mut W, files: &mut F) -> Result<Control, VMError>
    where
        W: Write,
        F: FileAccess + ?Sized,
    {
        let line = line.trim();
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, rest.trim()),
            None => (line, ""),
        };

        match command {
            "" => {}
            "run" => self.cmd_run(require(command, arg)?, out, files)?,
            "save" => {
                let path = self.resolve(require(command, arg)?);
                Snapshot::new(&self.bindings, &self.trace).save(&path)?;
                info!("Saved snapshot to {}", path.display());
                writeln!(out, "saved {}", path.display())?;
            }
            "load" => {
                let path = self.resolve(require(command, arg)?);
                let snapshot = Snapshot::load(&path)?;
                self.bindings = snapshot.bindings();
                self.trace = snapshot.trace().to_vec();
                writeln!(
                    out,
                    "loaded {} binding(s), {} trace record(s)",
                    self.bindings.len(),
                    self.trace.len()
                )?;
            }
            "bindings" => writeln!(out, "{}", self.bindings)?,
            "trace" => {
                for record in &self.trace {
                    writeln!(out, "{record}")?;
                }
            }
            "help" => writeln!(out, "{HELP}")?,
            "exit" | "quit" => return Ok(Control::Exit),
            other => {
                return Err(VMError::SyntaxError {
                    line: 1,
                    column: 1,
                    message: format!("unknown command '{other}' (try 'help')"),
                });
            }
        }
        Ok(Control::Continue)
    }

    fn cmd_run<W, F>(&mut self, file: &str, out: &mut W, files: &mut F) -> Result<(), VMError>
    where
        W: Write,
        F: FileAccess + ?Sized,
    {
        let stream = InstructionStream::load(file)?;
        let mut vm = VM::with_bindings(&self.config, stream, self.bindings.clone());
        let result = vm.run(files);
        let report = vm.into_report();

        for text in report.outputs() {
            writeln!(out, "{text}")?;
        }
        self.trace = report.trace;

        match result {
            Ok(()) => {
                self.bindings = report.bindings;
                writeln!(
                    out,
                    "{} after {} step(s), {} worker(s) spawned",
                    RunState::Halted,
                    self.trace.len(),
                    report.workers_spawned
                )?;
                Ok(())
            }
            Err(fault) => {
                warn!("Run of {file} faulted: {fault}");
                writeln!(out, "{} at instruction {}", RunState::Faulted, fault.index)?;
                Err(fault.error)
            }
        }
    }

    /// Bare names go to the snapshot directory; anything with a directory
    /// component is used as given.
    fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        let bare = path.parent().is_none_or(|p| p.as_os_str().is_empty());
        match &self.snapshot_dir {
            Some(dir) if bare => dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

fn require<'a>(command: &str, arg: &'a str) -> Result<&'a str, VMError> {
    if arg.is_empty() {
        return Err(VMError::SyntaxError {
            line: 1,
            column: command.len() + 1,
            message: format!("'{command}' expects a file argument"),
        });
    }
    Ok(arg)
}
