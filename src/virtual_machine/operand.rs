//! Runtime values and the operand slots that produce them.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, decode_seq};
use crate::virtual_machine::errors::VMError;
use std::fmt;

/// Deepest list nesting the assembler accepts and the decoder rebuilds.
pub const MAX_LIST_DEPTH: usize = 64;

/// Runtime payload held by bindings, memory cells and trace records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Value {
    #[default]
    Undefined,
    Int(i64),
    Bool(bool),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "Undefined",
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "Str",
            Value::List(_) => "List",
        }
    }

    /// `Undefined`, `0`, `false`, `""` and `[]` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Int(n) => *n != 0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
        }
    }

    pub fn as_int(&self, mnemonic: &'static str, position: usize) -> Result<i64, VMError> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(VMError::TypeMismatch {
                mnemonic,
                position,
                expected: "Int",
                actual: other.type_name(),
            }),
        }
    }

    pub fn as_str(&self, mnemonic: &'static str, position: usize) -> Result<&str, VMError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(VMError::TypeMismatch {
                mnemonic,
                position,
                expected: "Str",
                actual: other.type_name(),
            }),
        }
    }

    /// Text form used for output: strings unquoted, everything else as displayed.
    pub fn to_output(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

fn write_list<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    f.write_str("[")?;
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    f.write_str("]")
}

/// Renders in assembler syntax, so displayed values can be reassembled.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write_quoted(f, s),
            Value::List(items) => write_list(f, items),
        }
    }
}

/// Payload of an operand slot in an instruction stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operand {
    /// Literal value.
    Lit(Value),
    /// Identifier: a binding lookup in value position, a literal name otherwise.
    Ident(String),
    /// Nested operand list, evaluated element-wise.
    List(Vec<Operand>),
}

impl Operand {
    pub fn ident(name: impl Into<String>) -> Self {
        Operand::Ident(name.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Operand::Lit(value.into())
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Operand::Lit(value) => value.type_name(),
            Operand::Ident(_) => "Ident",
            Operand::List(_) => "List",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Lit(value) => write!(f, "{value}"),
            Operand::Ident(name) => f.write_str(name),
            Operand::List(items) => write_list(f, items),
        }
    }
}

// Both enums keep the derived layout: a `u8` variant tag, then the fields.
// Decoding is hand-written so list nesting is bounded.

const VALUE_UNDEFINED: u8 = 0;
const VALUE_INT: u8 = 1;
const VALUE_BOOL: u8 = 2;
const VALUE_STR: u8 = 3;
const VALUE_LIST: u8 = 4;

const OPERAND_LIT: u8 = 0;
const OPERAND_IDENT: u8 = 1;
const OPERAND_LIST: u8 = 2;

fn enter_list(depth: usize) -> Result<usize, DecodeError> {
    if depth >= MAX_LIST_DEPTH {
        return Err(DecodeError::TooDeep);
    }
    Ok(depth + 1)
}

impl Value {
    fn decode_nested(input: &mut &[u8], depth: usize) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            VALUE_UNDEFINED => Ok(Value::Undefined),
            VALUE_INT => Ok(Value::Int(i64::decode(input)?)),
            VALUE_BOOL => Ok(Value::Bool(bool::decode(input)?)),
            VALUE_STR => Ok(Value::Str(String::decode(input)?)),
            VALUE_LIST => {
                let depth = enter_list(depth)?;
                decode_seq(input, |input| Value::decode_nested(input, depth)).map(Value::List)
            }
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl Encode for Value {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            Value::Undefined => VALUE_UNDEFINED.encode(out),
            Value::Int(n) => {
                VALUE_INT.encode(out);
                n.encode(out);
            }
            Value::Bool(b) => {
                VALUE_BOOL.encode(out);
                b.encode(out);
            }
            Value::Str(s) => {
                VALUE_STR.encode(out);
                s.encode(out);
            }
            Value::List(items) => {
                VALUE_LIST.encode(out);
                items.encode(out);
            }
        }
    }
}

impl Decode for Value {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Value::decode_nested(input, 0)
    }
}

impl Operand {
    fn decode_nested(input: &mut &[u8], depth: usize) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            OPERAND_LIT => Ok(Operand::Lit(Value::decode_nested(input, depth)?)),
            OPERAND_IDENT => Ok(Operand::Ident(String::decode(input)?)),
            OPERAND_LIST => {
                let depth = enter_list(depth)?;
                decode_seq(input, |input| Operand::decode_nested(input, depth))
                    .map(Operand::List)
            }
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl Encode for Operand {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            Operand::Lit(value) => {
                OPERAND_LIT.encode(out);
                value.encode(out);
            }
            Operand::Ident(name) => {
                OPERAND_IDENT.encode(out);
                name.encode(out);
            }
            Operand::List(items) => {
                OPERAND_LIST.encode(out);
                items.encode(out);
            }
        }
    }
}

impl Decode for Operand {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Operand::decode_nested(input, 0)
    }
}
