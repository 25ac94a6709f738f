use crate::crypto::cell_cipher::{CellCipher, CellCodec, PlainCodec};
use crate::types::encoding::{Decode, Encode};
use crate::virtual_machine::config::MemoryMode;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::Value;
use std::collections::{BTreeMap, HashMap};

/// Largest block a single allocation may request.
pub const MAX_BLOCK_CELLS: u64 = 1 << 16;

/// Address-indexed cell storage, independent of variable bindings.
///
/// Layout: blocks of consecutive addresses handed out by [`allocate`](Self::allocate).
/// - Addresses start at 1 and only ever increase; freed addresses are never reused.
/// - Each live cell holds the encoded [`Value`] passed through the store's
///   [`CellCodec`], so encrypted stores never hold plaintext payloads.
pub struct MemoryStore {
    codec: Box<dyn CellCodec>,
    mode: MemoryMode,
    /// Sealed payload per live address.
    cells: HashMap<u64, Vec<u8>>,
    /// Live blocks: base address -> size.
    blocks: BTreeMap<u64, u64>,
    /// Next address to hand out.
    next: u64,
}

impl MemoryStore {
    pub fn new(mode: MemoryMode) -> Self {
        let codec: Box<dyn CellCodec> = match mode {
            MemoryMode::Plain => Box::new(PlainCodec),
            MemoryMode::Encrypted => Box::new(CellCipher::new()),
        };
        Self::with_codec(mode, codec)
    }

    pub fn with_codec(mode: MemoryMode, codec: Box<dyn CellCodec>) -> Self {
        Self {
            codec,
            mode,
            cells: HashMap::new(),
            blocks: BTreeMap::new(),
            next: 1,
        }
    }

    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    /// Reserves `size` fresh consecutive cells initialized to `Undefined`.
    ///
    /// Returns the base address.
    pub fn allocate(&mut self, size: u64) -> Result<u64, VMError> {
        let invalid = VMError::InvalidAllocation {
            size: i64::try_from(size).unwrap_or(i64::MAX),
        };
        if size == 0 || size > MAX_BLOCK_CELLS {
            return Err(invalid);
        }
        let base = self.next;
        let end = base.checked_add(size).ok_or(invalid)?;

        let mut sealed = Vec::with_capacity(size as usize);
        for address in base..end {
            sealed.push((address, self.seal(address, &Value::Undefined)?));
        }
        self.cells.extend(sealed);
        self.blocks.insert(base, size);
        self.next = end;
        Ok(base)
    }

    /// Releases the whole block starting at `address`.
    ///
    /// Interior addresses, freed blocks and never-allocated addresses are
    /// all [`VMError::InvalidAddress`].
    pub fn free(&mut self, address: u64) -> Result<(), VMError> {
        let size = self
            .blocks
            .remove(&address)
            .ok_or(VMError::InvalidAddress { address })?;
        for cell in address..address + size {
            self.cells.remove(&cell);
        }
        Ok(())
    }

    pub fn read(&self, address: u64) -> Result<Value, VMError> {
        let sealed = self
            .cells
            .get(&address)
            .ok_or(VMError::InvalidAddress { address })?;
        let plain = self
            .codec
            .open(address, sealed)
            .map_err(|_| VMError::CorruptedCell { address })?;
        Value::from_bytes(&plain).map_err(|_| VMError::CorruptedCell { address })
    }

    pub fn write(&mut self, address: u64, value: &Value) -> Result<(), VMError> {
        if !self.cells.contains_key(&address) {
            return Err(VMError::InvalidAddress { address });
        }
        let sealed = self.seal(address, value)?;
        self.cells.insert(address, sealed);
        Ok(())
    }

    pub fn is_allocated(&self, address: u64) -> bool {
        self.cells.contains_key(&address)
    }

    pub fn live_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn live_blocks(&self) -> usize {
        self.blocks.len()
    }

    fn seal(&self, address: u64, value: &Value) -> Result<Vec<u8>, VMError> {
        self.codec
            .seal(address, &value.to_bytes())
            .map_err(|_| VMError::CorruptedCell { address })
    }

    /// Raw stored payload, for asserting what is held at rest.
    #[cfg(test)]
    pub(crate) fn raw_cell(&self, address: u64) -> Option<&[u8]> {
        self.cells.get(&address).map(Vec::as_slice)
    }

    /// Flips one byte of a stored payload.
    #[cfg(test)]
    pub(crate) fn corrupt(&mut self, address: u64) {
        if let Some(bytes) = self.cells.get_mut(&address)
            && let Some(last) = bytes.last_mut()
        {
            *last ^= 0xFF;
        }
    }
}
