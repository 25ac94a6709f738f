use crate::types::encoding::DecodeError;
use cellvm_derive::Error;

/// Errors raised while building, decoding, or executing an instruction stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VMError {
    /// Source line the instruction stream builder could not translate.
    #[error("line {line}:{column}: {message}")]
    SyntaxError {
        line: usize,
        column: usize,
        message: String,
    },
    /// Opcode byte with no entry in the opcode table.
    #[error("unknown opcode 0x{opcode:02X}")]
    UnknownOpcode { opcode: u8 },
    /// Operand slot found where an opcode slot was expected.
    #[error("expected an opcode, found an operand slot")]
    ExpectedOpcode,
    /// Stream ended, or another opcode began, before all operands were read.
    #[error("{mnemonic} expects {expected} operand(s), found {available}")]
    TruncatedInstruction {
        mnemonic: &'static str,
        expected: usize,
        available: usize,
    },
    /// Address that is not currently allocated.
    #[error("invalid address {address}")]
    InvalidAddress { address: u64 },
    /// Allocation request with a non-positive or overflowing size.
    #[error("invalid allocation size {size}")]
    InvalidAllocation { size: i64 },
    /// Stored payload that could not be decrypted or decoded.
    #[error("corrupted cell at address {address}")]
    CorruptedCell { address: u64 },
    /// Read or assignment of a name that was never declared.
    #[error("undeclared variable '{name}'")]
    UndeclaredVariable { name: String },
    /// Operand of the wrong type for the instruction.
    #[error("{mnemonic} expected {expected} for operand {position} but got {actual}")]
    TypeMismatch {
        mnemonic: &'static str,
        position: usize,
        expected: &'static str,
        actual: &'static str,
    },
    /// Call target outside the trusted set.
    #[error("call to untrusted function '{name}'")]
    UnsafeCall { name: String },
    /// Asynchronous call worker that failed or panicked.
    #[error("async call to '{name}' failed: {reason}")]
    AsyncWorkerFailure { name: String, reason: String },
    /// Delegated file access that returned a failure.
    #[error("file access to '{name}' failed: {reason}")]
    FileAccess { name: String, reason: String },
    /// Step requested on a context that already halted or faulted.
    #[error("execution context is {state} and cannot be resumed")]
    ContextTerminated { state: &'static str },
    /// Unusable configuration value.
    #[error("invalid configuration {key}={value}")]
    InvalidConfig { key: &'static str, value: String },
    /// Serialized artifact that failed validation.
    #[error("decoding error: {reason}")]
    DecodeError { reason: String },
    /// Host I/O failure outside the dispatch loop.
    #[error("io error: {0}")]
    Io(String),
}

impl VMError {
    /// Stable name of the error kind, used in traces and reports.
    pub const fn kind(&self) -> &'static str {
        match self {
            VMError::SyntaxError { .. } => "SyntaxError",
            VMError::UnknownOpcode { .. } => "UnknownOpcode",
            VMError::ExpectedOpcode => "ExpectedOpcode",
            VMError::TruncatedInstruction { .. } => "TruncatedInstruction",
            VMError::InvalidAddress { .. } => "InvalidAddress",
            VMError::InvalidAllocation { .. } => "InvalidAllocation",
            VMError::CorruptedCell { .. } => "CorruptedCell",
            VMError::UndeclaredVariable { .. } => "UndeclaredVariable",
            VMError::TypeMismatch { .. } => "TypeMismatch",
            VMError::UnsafeCall { .. } => "UnsafeCall",
            VMError::AsyncWorkerFailure { .. } => "AsyncWorkerFailure",
            VMError::FileAccess { .. } => "FileAccess",
            VMError::ContextTerminated { .. } => "ContextTerminated",
            VMError::InvalidConfig { .. } => "InvalidConfig",
            VMError::DecodeError { .. } => "DecodeError",
            VMError::Io(_) => "Io",
        }
    }

    /// Process exit code for the command surface: 2 for I/O failures, 1 otherwise.
    pub const fn exit_code(&self) -> i32 {
        match self {
            VMError::Io(_) | VMError::FileAccess { .. } => 2,
            _ => 1,
        }
    }
}

impl From<DecodeError> for VMError {
    fn from(err: DecodeError) -> Self {
        VMError::DecodeError {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for VMError {
    fn from(err: std::io::Error) -> Self {
        VMError::Io(err.to_string())
    }
}

/// Error that stopped a run, tagged with the offending instruction index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("instruction {index}: {error}")]
pub struct Fault {
    /// Stream slot index of the instruction being executed.
    pub index: usize,
    pub error: VMError,
}

impl Fault {
    pub fn new(index: usize, error: VMError) -> Self {
        Self { index, error }
    }

    pub const fn kind(&self) -> &'static str {
        self.error.kind()
    }
}
