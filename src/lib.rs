//! cellvm library.
//!
//! A small bytecode virtual machine: an opcode table, a dispatch loop over
//! flat instruction streams, an address-indexed memory store with optional
//! per-cell encryption, and an interactive command loop.

pub mod crypto;
pub mod repl;
pub mod types;
pub mod utils;
pub mod virtual_machine;
