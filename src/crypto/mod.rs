//! Cryptographic primitives for cell encryption at rest.

pub mod cell_cipher;
