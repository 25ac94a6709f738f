//! Shared primitive types.
//!
//! - [`encoding`]: deterministic binary `Encode`/`Decode` traits
//! - [`hash`]: SHA3-256 checksums over encoded data

pub mod encoding;
pub mod hash;
