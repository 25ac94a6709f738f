//! Instruction stream builder.
//!
//! Converts line-oriented source text into an [`InstructionStream`].
//!
//! # Syntax
//!
//! ```text
//! mnemonic operand1, operand2  # optional comment
//! ```
//!
//! - One instruction per line; mnemonics come from the opcode table (`let`, `readFile`, ...)
//! - Integers are decimal (e.g. `42`, `-1`)
//! - String literals are double-quoted with `\"`, `\\` and `\n` escapes
//! - `true`, `false` and `undefined` are literals
//! - Identifiers start with a letter or `_`
//! - Lists are bracketed and may nest up to 64 levels: `[a, 1, "s", [2]]`
//! - Comments start with `#`; commas between operands are optional

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::{Instruction, OperandKind};
use crate::virtual_machine::operand::{MAX_LIST_DEPTH, Operand, Value};
use crate::virtual_machine::program::InstructionStream;
use std::fmt::Write;
use std::fs;
use std::path::Path;

const COMMENT_CHAR: u8 = b'#';

/// Formats a compiler-style diagnostic for a builder failure.
///
/// Syntax errors get a source excerpt with a caret under the offending
/// column; other errors render as a single `error:` line.
pub fn render_diagnostic(file: &str, source: &str, err: &VMError) -> String {
    let VMError::SyntaxError {
        line,
        column,
        message,
    } = err
    else {
        return format!("error: {err}\n");
    };

    let mut diag = String::new();
    let _ = writeln!(diag, "error: {message}");
    let _ = writeln!(diag, " --> {file}:{line}:{column}");

    if let Some(raw_line) = source.lines().nth(line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let underline = " ".repeat(column.saturating_sub(1));
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", line, line_text);
        let _ = writeln!(diag, "  | {}^", underline);
    }

    diag
}

fn syntax_error(line: usize, column: usize, message: impl Into<String>) -> VMError {
    VMError::SyntaxError {
        line,
        column,
        message: message.into(),
    }
}

#[derive(Debug, Clone)]
struct Token<'a> {
    text: &'a str,
    /// 1-based column offset in the line.
    offset: usize,
}

/// Tokenize a fragment of one source line.
///
/// Rules:
/// - `#` outside a string starts a comment
/// - commas and whitespace separate tokens outside strings and brackets
/// - a bracketed list is a single token
///
/// `base` is the column of the fragment's first byte, so nested list
/// contents report columns relative to the whole line.
fn tokenize(line_no: usize, line: &str, base: usize) -> Result<Vec<Token<'_>>, VMError> {
    let mut out = Vec::with_capacity(4);

    let mut start: Option<usize> = None;
    let mut in_str = false;
    let mut escaped = false;
    let mut depth: usize = 0;
    let mut open_col = 0;

    let bytes = line.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if in_str {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_str = false;
            }
            i += 1;
            continue;
        }

        if b == COMMENT_CHAR {
            break;
        }

        match b {
            b',' | b' ' | b'\t' | b'\r' if depth == 0 => {
                if let Some(s) = start.take() {
                    out.push(Token {
                        text: &line[s..i],
                        offset: base + s,
                    });
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
                match b {
                    b'"' => {
                        in_str = true;
                        open_col = base + i;
                    }
                    b'[' => {
                        if depth == 0 {
                            open_col = base + i;
                        }
                        depth += 1;
                        if depth > MAX_LIST_DEPTH {
                            return Err(syntax_error(
                                line_no,
                                base + i,
                                format!("list literal nests deeper than {MAX_LIST_DEPTH} levels"),
                            ));
                        }
                    }
                    b']' => {
                        if depth == 0 {
                            return Err(syntax_error(line_no, base + i, "unmatched ']'"));
                        }
                        depth -= 1;
                    }
                    _ => {}
                }
            }
        }
        i += 1;
    }

    if in_str {
        return Err(syntax_error(
            line_no,
            open_col,
            "unterminated string literal (missing closing quote)",
        ));
    }
    if depth > 0 {
        return Err(syntax_error(line_no, open_col, "unclosed '[' in list literal"));
    }

    if let Some(s) = start {
        out.push(Token {
            text: &line[s..i],
            offset: base + s,
        });
    }

    Ok(out)
}

/// Decodes the body of a string literal (without its quotes).
fn unescape(line_no: usize, tok: &Token<'_>, body: &str) -> Result<String, VMError> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some(other) => {
                return Err(syntax_error(
                    line_no,
                    tok.offset,
                    format!("unknown escape sequence '\\{other}'"),
                ));
            }
            None => {
                return Err(syntax_error(line_no, tok.offset, "dangling '\\' in string literal"));
            }
        }
    }
    Ok(out)
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse one operand token into an [`Operand`].
fn parse_operand(line_no: usize, tok: &Token<'_>) -> Result<Operand, VMError> {
    let text = tok.text;

    if let Some(rest) = text.strip_prefix('"') {
        let Some(body) = rest.strip_suffix('"') else {
            return Err(syntax_error(line_no, tok.offset, "malformed string literal"));
        };
        return Ok(Operand::Lit(Value::Str(unescape(line_no, tok, body)?)));
    }

    if let Some(rest) = text.strip_prefix('[') {
        let Some(inner) = rest.strip_suffix(']') else {
            return Err(syntax_error(line_no, tok.offset, "malformed list literal"));
        };
        let items = tokenize(line_no, inner, tok.offset + 1)?
            .iter()
            .map(|item| parse_operand(line_no, item))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Operand::List(items));
    }

    match text {
        "true" => return Ok(Operand::Lit(Value::Bool(true))),
        "false" => return Ok(Operand::Lit(Value::Bool(false))),
        "undefined" => return Ok(Operand::Lit(Value::Undefined)),
        _ => {}
    }

    let digits = text.strip_prefix(['-', '+']).unwrap_or(text);
    if digits.starts_with(|c: char| c.is_ascii_digit()) {
        return text
            .parse::<i64>()
            .map(|n| Operand::Lit(Value::Int(n)))
            .map_err(|_| {
                syntax_error(
                    line_no,
                    tok.offset,
                    format!("invalid integer literal '{text}'"),
                )
            });
    }

    if is_identifier(text) {
        return Ok(Operand::Ident(text.to_string()));
    }

    Err(syntax_error(line_no, tok.offset, format!("invalid operand '{text}'")))
}

/// Checks a parsed operand against the kind the opcode table declares.
fn check_kind(
    line_no: usize,
    tok: &Token<'_>,
    instr: Instruction,
    index: usize,
    kind: OperandKind,
    operand: &Operand,
) -> Result<(), VMError> {
    let ok = match kind {
        OperandKind::Name => matches!(operand, Operand::Ident(_)),
        OperandKind::Args => matches!(operand, Operand::List(_)),
        OperandKind::Value => true,
    };
    if ok {
        return Ok(());
    }
    let field = instr.operand_names().get(index).copied().unwrap_or("operand");
    let expected = match kind {
        OperandKind::Name => "a name",
        OperandKind::Args => "an argument list",
        OperandKind::Value => "a value",
    };
    Err(syntax_error(
        line_no,
        tok.offset,
        format!(
            "'{}' expects {expected} for `{field}`, found '{}'",
            instr.mnemonic(),
            tok.text
        ),
    ))
}

/// Builder state accumulated across source lines.
#[derive(Debug, Default)]
pub struct AsmContext {
    stream: InstructionStream,
    instructions: usize,
}

impl AsmContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of instructions emitted so far.
    pub fn instructions(&self) -> usize {
        self.instructions
    }

    /// Translates one source line, appending at most one instruction.
    pub fn assemble_line(&mut self, line_no: usize, line: &str) -> Result<(), VMError> {
        let tokens = tokenize(line_no, line, 1)?;
        let Some((head, rest)) = tokens.split_first() else {
            return Ok(());
        };

        let instr = Instruction::from_mnemonic(head.text).ok_or_else(|| {
            syntax_error(
                line_no,
                head.offset,
                format!("unknown instruction '{}'", head.text),
            )
        })?;

        let kinds = instr.operand_kinds();
        if rest.len() != kinds.len() {
            let column = match rest.get(kinds.len()) {
                Some(extra) => extra.offset,
                None => line.trim_end().len() + 1,
            };
            return Err(syntax_error(
                line_no,
                column,
                format!(
                    "'{}' expects {} operand(s), found {}",
                    instr.mnemonic(),
                    kinds.len(),
                    rest.len()
                ),
            ));
        }

        let mut operands = Vec::with_capacity(kinds.len());
        for (index, (tok, kind)) in rest.iter().zip(kinds).enumerate() {
            let operand = parse_operand(line_no, tok)?;
            check_kind(line_no, tok, instr, index, *kind, &operand)?;
            operands.push(operand);
        }

        self.stream.push(instr, operands);
        self.instructions += 1;
        Ok(())
    }

    pub fn finish(self) -> InstructionStream {
        self.stream
    }
}

/// Assemble a full source string into an instruction stream.
///
/// Stops at the first malformed line with a [`VMError::SyntaxError`].
pub fn assemble_source(source: &str) -> Result<InstructionStream, VMError> {
    let mut ctx = AsmContext::new();
    for (index, line) in source.lines().enumerate() {
        ctx.assemble_line(index + 1, line)?;
    }
    Ok(ctx.finish())
}

/// Convenience: assemble directly from file path
pub fn assemble_file<P: AsRef<Path>>(path: P) -> Result<InstructionStream, VMError> {
    let path_ref = path.as_ref();
    let source = fs::read_to_string(path_ref)
        .map_err(|e| VMError::Io(format!("{}: {e}", path_ref.display())))?;
    assemble_source(&source)
}
