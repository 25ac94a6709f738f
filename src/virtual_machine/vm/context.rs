use super::bindings::Bindings;
use super::memory::MemoryStore;
use crate::virtual_machine::config::MemoryMode;
use std::fmt;

/// Lifecycle of an execution context.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunState {
    Ready,
    Running,
    Halted,
    Faulted,
}

impl RunState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            RunState::Ready => "ready",
            RunState::Running => "running",
            RunState::Halted => "halted",
            RunState::Faulted => "faulted",
        }
    }

    /// True once the context halted or faulted and can no longer step.
    pub const fn is_terminated(&self) -> bool {
        matches!(self, RunState::Halted | RunState::Faulted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable state owned by one dispatch loop.
pub struct ExecContext {
    /// Index of the next opcode slot.
    pub pc: usize,
    pub bindings: Bindings,
    pub memory: MemoryStore,
    pub state: RunState,
}

impl ExecContext {
    pub fn new(mode: MemoryMode, bindings: Bindings) -> Self {
        Self {
            pc: 0,
            bindings,
            memory: MemoryStore::new(mode),
            state: RunState::Ready,
        }
    }
}
