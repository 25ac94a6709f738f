//! Opcode table.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical instruction definitions and invokes a callback macro for code
//! generation, so the dispatch loop, the assembler and the ISA fingerprint
//! check all expand the same list.
//!
//! This module generates:
//! - The [`Instruction`] enum with opcode mappings
//! - `TryFrom<u8>` for decoding opcodes
//! - Mnemonic lookup in both directions and per-instruction operand kinds
//!
//! # Stream Layout
//!
//! An instruction occupies `1 + operand_count` consecutive slots of an
//! [`InstructionStream`](super::program::InstructionStream): one opcode slot
//! followed by one operand slot per declared operand.

use crate::virtual_machine::errors::VMError;
use std::fmt;

/// Invokes a callback macro with the complete instruction definition list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Lifecycle
            // =========================
            /// run ; marks the start of execution
            Run = 0x01, "run" => [],
            /// exit ; terminates execution
            Exit = 0xFF, "exit" => [],
            // =========================
            // Bindings
            // =========================
            /// let name, value ; declares or overwrites a binding
            Let = 0x10, "let" => [name: Name, value: Value],
            /// assign name, value ; updates an existing binding
            Assign = 0x11, "assign" => [name: Name, value: Value],
            // =========================
            // Calls and output
            // =========================
            /// call target, [args] ; runs a trusted builtin on a worker, result -> `result`
            Call = 0x30, "call" => [target: Name, args: Args],
            /// print value ; reports value as output
            Print = 0x40, "print" => [value: Value],
            // =========================
            // Control flow
            // =========================
            /// if cond ; skips the following instruction when cond is falsy
            If = 0x50, "if" => [cond: Value],
            /// else ; marker, always executes
            Else = 0x52, "else" => [],
            /// while cond ; one-shot skip of the following instruction when cond is falsy
            While = 0x60, "while" => [cond: Value],
            // =========================
            // Integer arithmetic
            // =========================
            /// add a, b ; a + b (wrapping)
            Add = 0x71, "add" => [lhs: Value, rhs: Value],
            /// sub a, b ; a - b (wrapping)
            Sub = 0x72, "sub" => [lhs: Value, rhs: Value],
            /// mul a, b ; a * b (wrapping)
            Mul = 0x73, "mul" => [lhs: Value, rhs: Value],
            /// div a, b ; floor(a / b), undefined when b is zero
            Div = 0x74, "div" => [lhs: Value, rhs: Value],
            // =========================
            // Memory
            // =========================
            /// alloc name, size ; allocates size cells, base address -> name
            Alloc = 0x90, "alloc" => [name: Name, size: Value],
            /// free addr ; releases the block starting at addr
            Free = 0x91, "free" => [addr: Value],
            /// load name, addr ; cell at addr -> name
            Load = 0x92, "load" => [name: Name, addr: Value],
            /// store addr, value ; value -> cell at addr
            Store = 0x93, "store" => [addr: Value, value: Value],
            // =========================
            // Delegated file access
            // =========================
            /// readFile name ; reads through the file collaborator
            ReadFile = 0xB1, "readFile" => [file: Value],
            /// writeFile name, data ; writes through the file collaborator
            WriteFile = 0xB2, "writeFile" => [file: Value, data: Value],
            // =========================
            // Exceptions
            // =========================
            /// try ; marks a protected region
            Try = 0xC0, "try" => [],
            /// catch value ; reports a caught exception value
            Catch = 0xC1, "catch" => [exception: Value],
        }
    };
}

/// Operand kinds an instruction slot can declare.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OperandKind {
    /// Identifier taken literally (binding or call target name).
    Name,
    /// Evaluated operand: literal, identifier lookup, or list.
    Value,
    /// Bracketed argument list.
    Args,
}

impl OperandKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            OperandKind::Name => "name",
            OperandKind::Value => "value",
            OperandKind::Args => "argument list",
        }
    }
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident = $opcode:expr, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name = $opcode,
            )*
        }

        impl TryFrom<u8> for Instruction {
            type Error = VMError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $opcode => Ok(Instruction::$name), )*
                    _ => Err(VMError::UnknownOpcode { opcode: value }),
                }
            }
        }

        impl Instruction {
            /// Every instruction, in table order.
            pub const ALL: &'static [Instruction] = &[ $( Instruction::$name, )* ];

            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name => $mnemonic, )*
                }
            }

            /// Looks up an instruction by its assembly mnemonic.
            pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
                match mnemonic {
                    $( $mnemonic => Some(Instruction::$name), )*
                    _ => None,
                }
            }

            /// Declared operand kinds, in slot order.
            pub const fn operand_kinds(&self) -> &'static [OperandKind] {
                match self {
                    $( Instruction::$name => &[ $( OperandKind::$kind ),* ], )*
                }
            }

            /// Operand names used in diagnostics, in slot order.
            pub const fn operand_names(&self) -> &'static [&'static str] {
                match self {
                    $( Instruction::$name => &[ $( stringify!($field) ),* ], )*
                }
            }
        }
    };
}

for_each_instruction!(define_instructions);

impl Instruction {
    pub const fn opcode(&self) -> u8 {
        *self as u8
    }

    pub const fn operand_count(&self) -> usize {
        self.operand_kinds().len()
    }

    /// Number of stream slots this instruction occupies.
    pub const fn width(&self) -> usize {
        1 + self.operand_count()
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
