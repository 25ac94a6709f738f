//! Binary encoding and decoding traits used by every serialized artifact.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - `usize`: encoded as `u64`
//! - `bool`: one byte (0 = false, 1 = true)
//! - `Vec<T>`/`String`: 8-byte length prefix followed by the elements
//! - `Option<T>`: 1-byte tag (0 = None, 1 = Some) followed by the value
//! - Arrays `[T; N]` and tuples: elements in order, no prefix
//!
//! Structs and enums get their impls from `#[derive(BinaryCodec)]`.

use cellvm_derive::Error;

/// Destination for encoded bytes.
///
/// Implemented by byte buffers and by the SHA3 checksum builder so that a
/// value can be hashed without first materializing its encoding.
pub trait EncodeSink {
    fn write(&mut self, bytes: &[u8]);
}

/// Counts bytes without storing them, used to size buffers exactly.
#[derive(Default)]
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Types with a deterministic binary representation.
pub trait Encode {
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Encodes into a fresh buffer allocated with the exact encoded size.
    fn to_bytes(&self) -> Vec<u8> {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        let mut out = Vec::with_capacity(counter.len());
        self.encode(&mut out);
        out
    }
}

/// Errors raised while decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid value")]
    InvalidValue,
    #[error("length prefix exceeds limit")]
    LengthOverflow,
    #[error("nesting exceeds depth limit")]
    TooDeep,
}

/// Types that can be rebuilt from their [`Encode`] representation.
pub trait Decode: Sized {
    /// Decodes one value and advances `input` past it.
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Decodes a value that must span the whole of `data`.
    fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        let mut input = data;
        let value = Self::decode(&mut input)?;
        if !input.is_empty() {
            return Err(DecodeError::InvalidValue);
        }
        Ok(value)
    }
}

/// Upper bound on decoded collection lengths.
const MAX_LEN: usize = 1 << 24;

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], DecodeError> {
    if input.len() < n {
        return Err(DecodeError::UnexpectedEof);
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

fn decode_len(input: &mut &[u8]) -> Result<usize, DecodeError> {
    let len = usize::decode(input)?;
    if len > MAX_LEN {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(len)
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encode for $t {
                fn encode<S: EncodeSink>(&self, out: &mut S) {
                    out.write(&self.to_le_bytes());
                }
            }

            impl Decode for $t {
                fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
                    let mut buf = [0u8; std::mem::size_of::<$t>()];
                    let n = buf.len();
                    buf.copy_from_slice(take(input, n)?);
                    Ok(<$t>::from_le_bytes(buf))
                }
            }
        )*
    };
}

impl_int!(u8, u16, u32, u64, i64);

impl Encode for usize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        (*self as u64).encode(out);
    }
}

impl Decode for usize {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        usize::try_from(u64::decode(input)?).map_err(|_| DecodeError::LengthOverflow)
    }
}

impl Encode for bool {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self as u8]);
    }
}

impl Decode for bool {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        for item in self {
            item.encode(out);
        }
    }
}

/// Decodes a length-prefixed sequence with `item`, in the `Vec<T>` format.
///
/// Lets recursive types thread extra state (such as nesting depth) through
/// their element decoder.
pub fn decode_seq<T>(
    input: &mut &[u8],
    mut item: impl FnMut(&mut &[u8]) -> Result<T, DecodeError>,
) -> Result<Vec<T>, DecodeError> {
    let len = decode_len(input)?;
    // Each element takes at least one byte, so a length beyond the
    // remaining input cannot be honest.
    let mut out = Vec::with_capacity(len.min(input.len()));
    for _ in 0..len {
        out.push(item(input)?);
    }
    Ok(out)
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        decode_seq(input, T::decode)
    }
}

impl Encode for String {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_str().encode(out);
    }
}

impl Encode for str {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.len().encode(out);
        out.write(self.as_bytes());
    }
}

impl Decode for String {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode_len(input)?;
        let bytes = take(input, len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidValue)
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        match self {
            None => 0u8.encode(out),
            Some(v) => {
                1u8.encode(out);
                v.encode(out);
            }
        }
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        match u8::decode(input)? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input)?)),
            _ => Err(DecodeError::InvalidValue),
        }
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

impl<const N: usize> Decode for [u8; N] {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(take(input, N)?);
        Ok(buf)
    }
}

impl<A: Encode, B: Encode> Encode for (A, B) {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.0.encode(out);
        self.1.encode(out);
    }
}

impl<A: Decode, B: Decode> Decode for (A, B) {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok((A::decode(input)?, B::decode(input)?))
    }
}
