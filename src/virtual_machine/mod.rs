//! Opcode-table bytecode virtual machine with a guarded memory store.
//!
//! Programs are flat instruction streams: each instruction is an opcode slot
//! followed by a fixed number of operand slots. The dispatch loop executes
//! them strictly forward, recording one trace entry per step.
//!
//! # Architecture
//!
//! - **Opcode table**: 21 instructions, each with a mnemonic and operand kinds
//! - **Bindings**: flat name to [`operand::Value`] map, no scoping
//! - **Memory**: integer-addressed cells, optionally sealed with XChaCha20-Poly1305
//! - **Calls**: builtins run on a worker thread after an allow-list check
//! - **Files**: delegated to a [`files::FileAccess`] collaborator
//!
//! # Modules
//!
//! - [`assembler`]: Text assembly parsing and diagnostics
//! - [`config`]: Memory mode and trusted-call configuration
//! - [`errors`]: Assembly and execution error types
//! - [`files`]: File access collaborators
//! - [`isa`]: Instruction set definition and opcode mappings
//! - [`operand`]: Runtime values and instruction operands
//! - [`program`]: Instruction streams and the on-disk artifact envelope
//! - [`snapshot`]: Persisted bindings and trace
//! - [`vm`]: Dispatch loop, execution context and call workers

pub mod assembler;
pub mod config;
pub mod errors;
pub mod files;
pub mod isa;
#[cfg(test)]
mod isa_static_check;
pub mod operand;
pub mod program;
pub mod snapshot;
pub mod vm;
