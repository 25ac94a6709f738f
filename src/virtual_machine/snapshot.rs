//! Persisted bindings and execution trace.
//!
//! Snapshots use the same envelope as serialized instruction streams
//! (magic, kind tag `SNAP`, version, SHA3-256 checksum, body), so a
//! truncated or edited file is rejected on load instead of silently
//! restoring partial state.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::Value;
use crate::virtual_machine::program::{has_artifact_header, open_artifact, seal_artifact};
use crate::virtual_machine::vm::RunReport;
use crate::virtual_machine::vm::bindings::Bindings;
use crate::virtual_machine::vm::trace::TraceRecord;
use cellvm_derive::BinaryCodec;
use std::fs;
use std::path::Path;

const SNAPSHOT_KIND: &[u8; 4] = b"SNAP";

#[derive(Clone, Debug, Default, PartialEq, Eq, BinaryCodec)]
pub struct Snapshot {
    bindings: Vec<(String, Value)>,
    trace: Vec<TraceRecord>,
}

impl Snapshot {
    pub fn new(bindings: &Bindings, trace: &[TraceRecord]) -> Self {
        Self {
            bindings: bindings.to_pairs(),
            trace: trace.to_vec(),
        }
    }

    pub fn from_report(report: &RunReport) -> Self {
        Self::new(&report.bindings, &report.trace)
    }

    pub fn bindings(&self) -> Bindings {
        self.bindings.iter().cloned().collect()
    }

    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        seal_artifact(SNAPSHOT_KIND, self)
    }

    pub fn from_bytes(input: &[u8]) -> Result<Self, VMError> {
        open_artifact(SNAPSHOT_KIND, input)
    }

    pub fn is_snapshot(bytes: &[u8]) -> bool {
        has_artifact_header(SNAPSHOT_KIND, bytes)
    }

    /// Writes the snapshot, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), VMError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, VMError> {
        Self::from_bytes(&fs::read(path)?)
    }
}
