//! Instruction stream representation and serialization.
//!
//! An [`InstructionStream`] is a flat sequence of [`Slot`]s: an opcode slot
//! followed by that opcode's operand slots, repeated. Streams and snapshots
//! share one envelope format (see [`seal_artifact`]).

use crate::types::encoding::{Decode, Encode};
use crate::types::hash::Hash;
use crate::virtual_machine::errors::{Fault, VMError};
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::Operand;
use cellvm_derive::BinaryCodec;
use std::fmt;
use std::path::Path;

/// Magic bytes opening every serialized artifact; the kind tag follows directly.
const MAGIC: &[u8; 4] = b"CVM_";

/// Kind tag of serialized instruction streams.
pub(crate) const STREAM_KIND: &[u8; 6] = b"STREAM";

/// Current artifact format version.
const CURRENT_VERSION: Version = Version::new(0, 1, 0);

/// Semantic version for artifact format compatibility.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, BinaryCodec)]
struct Version {
    major: u8,
    minor: u8,
    patch: u8,
}

impl Version {
    const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Serializes `body` as `MAGIC | kind | version | sha3(body) | body`.
pub(crate) fn seal_artifact<const N: usize, T: Encode>(kind: &[u8; N], body: &T) -> Vec<u8> {
    let payload = body.to_bytes();
    let mut out = Vec::with_capacity(MAGIC.len() + N + 3 + 32 + payload.len());
    MAGIC.encode(&mut out);
    kind.encode(&mut out);
    CURRENT_VERSION.encode(&mut out);
    Hash::digest(&payload).encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// Validates the envelope written by [`seal_artifact`] and decodes the body.
pub(crate) fn open_artifact<const N: usize, T: Decode>(
    kind: &[u8; N],
    mut input: &[u8],
) -> Result<T, VMError> {
    let decode_error = |reason: &str| VMError::DecodeError {
        reason: reason.to_string(),
    };

    if input.len() < MAGIC.len() + N {
        return Err(decode_error("truncated"));
    }
    if &<[u8; 4]>::decode(&mut input)? != MAGIC {
        return Err(decode_error("bad magic"));
    }
    if &<[u8; N]>::decode(&mut input)? != kind {
        return Err(decode_error("bad prefix"));
    }
    if Version::decode(&mut input)? != CURRENT_VERSION {
        return Err(decode_error("unsupported version"));
    }
    let checksum = Hash::decode(&mut input)?;
    if Hash::digest(input) != checksum {
        return Err(decode_error("checksum mismatch"));
    }
    T::from_bytes(input).map_err(VMError::from)
}

/// Returns true when `bytes` starts with the envelope header for `kind`.
pub(crate) fn has_artifact_header<const N: usize>(kind: &[u8; N], bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() + N
        && &bytes[..MAGIC.len()] == MAGIC
        && &bytes[MAGIC.len()..MAGIC.len() + N] == kind
}

/// One position of an instruction stream.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub enum Slot {
    /// Opcode byte, looked up in the opcode table at dispatch time.
    Op(u8),
    /// Inline operand belonging to the preceding opcode.
    Arg(Operand),
}

impl From<Instruction> for Slot {
    fn from(instr: Instruction) -> Self {
        Slot::Op(instr.opcode())
    }
}

impl From<Operand> for Slot {
    fn from(operand: Operand) -> Self {
        Slot::Arg(operand)
    }
}

/// Instruction decoded from a stream position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decoded {
    pub instruction: Instruction,
    pub operands: Vec<Operand>,
}

/// Linear program consumed by the dispatch loop.
#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct InstructionStream {
    slots: Vec<Slot>,
}

impl InstructionStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Appends an instruction and its operands.
    pub fn push(&mut self, instruction: Instruction, operands: impl IntoIterator<Item = Operand>) {
        self.slots.push(instruction.into());
        self.slots.extend(operands.into_iter().map(Slot::Arg));
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Decodes the opcode at `pc` without reading its operands.
    pub fn instruction_at(&self, pc: usize) -> Result<Instruction, VMError> {
        match self.slots.get(pc) {
            Some(Slot::Op(code)) => Instruction::try_from(*code),
            Some(Slot::Arg(_)) | None => Err(VMError::ExpectedOpcode),
        }
    }

    /// Decodes the instruction at `pc` together with exactly its operand slots.
    pub fn decode_at(&self, pc: usize) -> Result<Decoded, VMError> {
        let instruction = self.instruction_at(pc)?;
        let expected = instruction.operand_count();
        let mut operands = Vec::with_capacity(expected);
        for slot in self.slots.iter().skip(pc + 1).take(expected) {
            match slot {
                Slot::Arg(operand) => operands.push(operand.clone()),
                Slot::Op(_) => break,
            }
        }
        if operands.len() < expected {
            return Err(VMError::TruncatedInstruction {
                mnemonic: instruction.mnemonic(),
                expected,
                available: operands.len(),
            });
        }
        Ok(Decoded {
            instruction,
            operands,
        })
    }

    /// Walks the whole stream and reports the first malformed instruction.
    pub fn validate(&self) -> Result<(), Fault> {
        let mut pc = 0;
        while pc < self.slots.len() {
            let decoded = self.decode_at(pc).map_err(|err| Fault::new(pc, err))?;
            pc += decoded.instruction.width();
        }
        Ok(())
    }

    /// Serializes the stream to a portable binary format with header and checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        seal_artifact(STREAM_KIND, self)
    }

    /// Deserializes a stream, rejecting bad headers, versions and checksums.
    pub fn from_bytes(input: &[u8]) -> Result<Self, VMError> {
        open_artifact(STREAM_KIND, input)
    }

    /// Returns true when `bytes` looks like a serialized stream rather than source text.
    pub fn is_serialized(bytes: &[u8]) -> bool {
        has_artifact_header(STREAM_KIND, bytes)
    }

    /// Loads a stream from disk, accepting either source text or a serialized stream.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VMError> {
        let bytes = std::fs::read(path)?;
        if Self::is_serialized(&bytes) {
            return Self::from_bytes(&bytes);
        }
        let source = String::from_utf8(bytes).map_err(|_| VMError::DecodeError {
            reason: "program is neither a serialized stream nor UTF-8 text".to_string(),
        })?;
        crate::virtual_machine::assembler::assemble_source(&source)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VMError> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

impl FromIterator<Slot> for InstructionStream {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        Self::from_slots(iter.into_iter().collect())
    }
}

/// Disassembles one instruction per line. Unknown opcodes render as `0xNN`.
impl fmt::Display for InstructionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                Slot::Op(code) => {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    match Instruction::try_from(*code) {
                        Ok(instr) => write!(f, "{instr}")?,
                        Err(_) => write!(f, "0x{code:02X}")?,
                    }
                }
                Slot::Arg(operand) => {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{operand}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::operand::Value;

    fn sample() -> InstructionStream {
        let mut stream = InstructionStream::new();
        stream.push(Instruction::Let, [Operand::ident("x"), Operand::lit(10i64)]);
        stream.push(Instruction::Print, [Operand::lit("hi")]);
        stream.push(Instruction::Exit, []);
        stream
    }

    #[test]
    fn push_lays_out_slots() {
        let stream = sample();
        assert_eq!(stream.len(), 6);
        assert_eq!(stream.slots()[0], Slot::Op(0x10));
        assert_eq!(stream.slots()[3], Slot::Op(0x40));
        assert_eq!(stream.slots()[5], Slot::Op(0xFF));
    }

    #[test]
    fn decode_reads_exact_operands() {
        let stream = sample();
        let decoded = stream.decode_at(0).unwrap();
        assert_eq!(decoded.instruction, Instruction::Let);
        assert_eq!(decoded.operands, vec![Operand::ident("x"), Operand::lit(10i64)]);
        assert_eq!(stream.decode_at(3).unwrap().instruction, Instruction::Print);
    }

    #[test]
    fn decode_rejects_operand_in_opcode_position() {
        let stream = sample();
        assert_eq!(stream.decode_at(1), Err(VMError::ExpectedOpcode));
    }

    #[test]
    fn truncated_at_end_of_stream() {
        let stream: InstructionStream = [Slot::Op(0x10), Slot::Arg(Operand::ident("x"))]
            .into_iter()
            .collect();
        assert_eq!(
            stream.decode_at(0),
            Err(VMError::TruncatedInstruction {
                mnemonic: "let",
                expected: 2,
                available: 1,
            })
        );
    }

    #[test]
    fn truncated_by_next_opcode() {
        let stream: InstructionStream = [Slot::Op(0x40), Slot::Op(0xFF)].into_iter().collect();
        assert!(matches!(
            stream.decode_at(0),
            Err(VMError::TruncatedInstruction { available: 0, .. })
        ));
    }

    #[test]
    fn validate_reports_first_bad_index() {
        assert!(sample().validate().is_ok());
        let stream: InstructionStream = [
            Slot::Op(0x01),
            Slot::Op(0x40),
            Slot::Arg(Operand::lit(1i64)),
            Slot::Op(0x42),
        ]
        .into_iter()
        .collect();
        let fault = stream.validate().unwrap_err();
        assert_eq!(fault.index, 3);
        assert_eq!(fault.error, VMError::UnknownOpcode { opcode: 0x42 });
    }

    #[test]
    fn serialization_round_trips() {
        let stream = sample();
        let bytes = stream.to_bytes();
        assert!(InstructionStream::is_serialized(&bytes));
        assert_eq!(InstructionStream::from_bytes(&bytes).unwrap(), stream);
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut bytes = sample().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(
            InstructionStream::from_bytes(&bytes),
            Err(VMError::DecodeError {
                reason: "checksum mismatch".into()
            })
        );
    }

    /// Body bytes sealed as-is, for streams the builder cannot produce.
    struct RawBody(Vec<u8>);

    impl Encode for RawBody {
        fn encode<S: crate::types::encoding::EncodeSink>(&self, out: &mut S) {
            out.write(&self.0);
        }
    }

    #[test]
    fn deeply_nested_operand_is_a_decode_error() {
        // slots: [Op(print), Arg(List([List([... Ident("") ...])]))]
        let mut body = Vec::new();
        body.extend_from_slice(&2u64.to_le_bytes());
        body.extend_from_slice(&[0, Instruction::Print.opcode(), 1]);
        for _ in 0..100_000 {
            body.push(2);
            body.extend_from_slice(&1u64.to_le_bytes());
        }
        body.push(1);
        body.extend_from_slice(&0u64.to_le_bytes());

        let bytes = seal_artifact(STREAM_KIND, &RawBody(body));
        assert!(InstructionStream::is_serialized(&bytes));
        assert_eq!(
            InstructionStream::from_bytes(&bytes),
            Err(VMError::DecodeError {
                reason: "nesting exceeds depth limit".into()
            })
        );
    }

    #[test]
    fn wrong_magic_and_kind_are_rejected() {
        let bytes = sample().to_bytes();
        let mut bad_magic = bytes.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            InstructionStream::from_bytes(&bad_magic),
            Err(VMError::DecodeError { reason }) if reason == "bad magic"
        ));
        let mut bad_kind = bytes;
        bad_kind[4] = b'X';
        assert!(!InstructionStream::is_serialized(&bad_kind));
        assert!(matches!(
            InstructionStream::from_bytes(&bad_kind),
            Err(VMError::DecodeError { reason }) if reason == "bad prefix"
        ));
        assert!(InstructionStream::from_bytes(b"CVM").is_err());
    }

    #[test]
    fn display_disassembles() {
        let stream = sample();
        assert_eq!(stream.to_string(), "let x 10\nprint \"hi\"\nexit");
        let odd: InstructionStream = [Slot::Op(0x42), Slot::Arg(Operand::Lit(Value::Undefined))]
            .into_iter()
            .collect();
        assert_eq!(odd.to_string(), "0x42 undefined");
    }

    #[test]
    fn load_accepts_source_and_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("prog.cvm.txt");
        std::fs::write(&text, "let x 10\nprint \"hi\"\nexit\n").unwrap();
        assert_eq!(InstructionStream::load(&text).unwrap(), sample());

        let bin = dir.path().join("prog.cvm");
        sample().save(&bin).unwrap();
        assert_eq!(InstructionStream::load(&bin).unwrap(), sample());
    }

    #[test]
    fn load_keeps_syntax_error_positions_for_diagnostics() {
        use crate::virtual_machine::assembler::render_diagnostic;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cvm");
        std::fs::write(&path, "run
let 5 1
").unwrap();

        let err = InstructionStream::load(&path).unwrap_err();
        assert!(matches!(err, VMError::SyntaxError { line: 2, column: 5, .. }));

        let source = std::fs::read_to_string(&path).unwrap();
        let diag = render_diagnostic("bad.cvm", &source, &err);
        assert!(diag.contains(" --> bad.cvm:2:5"));
        assert!(diag.contains("   2 | let 5 1"));

        std::fs::write(&path, [0xFFu8, 0xFE]).unwrap();
        assert!(matches!(
            InstructionStream::load(&path),
            Err(VMError::DecodeError { .. })
        ));
    }
}
