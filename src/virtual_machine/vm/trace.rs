use crate::virtual_machine::operand::{Operand, Value};
use cellvm_derive::BinaryCodec;
use std::fmt;

/// Observable effect of one executed instruction.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Outcome {
    /// Marker instruction with no state change (`run`, `else`, `try`).
    Marker,
    /// A binding was declared or updated.
    Bound { name: String, value: Value },
    /// Arithmetic result, reported but not bound.
    Computed(Value),
    /// Conditional evaluated; `skip` slots were jumped over when not taken.
    Branch { taken: bool, skip: u64 },
    /// Value reported by `print`.
    Output(String),
    Allocated { name: String, address: u64, size: u64 },
    Freed { address: u64 },
    Stored { address: u64, value: Value },
    FileRead { file: String, value: Value },
    FileWritten { file: String, data: Value },
    Caught(Value),
    Halt,
    /// Instruction failed; the run stopped here.
    Fault { kind: String, message: String },
}

impl Outcome {
    /// Slots skipped in addition to the instruction's own width.
    pub fn skipped(&self) -> usize {
        match self {
            Outcome::Branch { skip, .. } => *skip as usize,
            _ => 0,
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Outcome::Fault { .. })
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Marker => f.write_str("ok"),
            Outcome::Bound { name, value } => write!(f, "{name}={value}"),
            Outcome::Computed(value) => write!(f, "= {value}"),
            Outcome::Branch { taken: true, .. } => f.write_str("taken"),
            Outcome::Branch { taken: false, skip } => {
                write!(f, "not taken, skipped {skip} slot(s)")
            }
            Outcome::Output(text) => write!(f, "output: {text}"),
            Outcome::Allocated {
                name,
                address,
                size,
            } => write!(f, "{name}=@{address} ({size} cell(s))"),
            Outcome::Freed { address } => write!(f, "freed @{address}"),
            Outcome::Stored { address, value } => write!(f, "@{address} <- {value}"),
            Outcome::FileRead { file, value } => write!(f, "read {file}: {value}"),
            Outcome::FileWritten { file, data } => write!(f, "wrote {file}: {data}"),
            Outcome::Caught(value) => write!(f, "caught {value}"),
            Outcome::Halt => f.write_str("halt"),
            Outcome::Fault { kind, message } => write!(f, "fault {kind}: {message}"),
        }
    }
}

/// One step of an execution trace.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TraceRecord {
    /// Stream slot index of the instruction.
    pub index: u64,
    pub mnemonic: String,
    pub operands: Vec<Operand>,
    pub outcome: Outcome,
}

impl TraceRecord {
    pub fn new(
        index: usize,
        mnemonic: impl Into<String>,
        operands: Vec<Operand>,
        outcome: Outcome,
    ) -> Self {
        Self {
            index: index as u64,
            mnemonic: mnemonic.into(),
            operands,
            outcome,
        }
    }
}

/// Renders as `[0004] if 0 -> not taken, skipped 3 slot(s)`.
impl fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:04}] {}", self.index, self.mnemonic)?;
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        write!(f, " -> {}", self.outcome)
    }
}
