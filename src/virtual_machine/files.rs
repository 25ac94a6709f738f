//! Delegated file access for `readFile` and `writeFile`.
//!
//! The dispatch loop never touches the filesystem itself. It hands every
//! file operation to a [`FileAccess`] collaborator and turns a failure into
//! [`VMError::FileAccess`](super::errors::VMError::FileAccess).

use crate::virtual_machine::operand::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// File collaborator interface.
///
/// Failures carry a human-readable reason.
pub trait FileAccess {
    /// Reads the file called `name`.
    fn read(&mut self, name: &str) -> Result<Value, String>;
    /// Writes `data` to the file called `name`, replacing previous contents.
    fn write(&mut self, name: &str, data: &Value) -> Result<(), String>;
}

/// Rejects every access.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFiles;

impl FileAccess for NoFiles {
    fn read(&mut self, _name: &str) -> Result<Value, String> {
        Err("file access is disabled".to_string())
    }

    fn write(&mut self, _name: &str, _data: &Value) -> Result<(), String> {
        Err("file access is disabled".to_string())
    }
}

/// In-memory file map.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryFiles {
    files: BTreeMap<String, Value>,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_files<I, S>(files: I) -> Self
    where
        I: IntoIterator<Item = (S, Value)>,
        S: Into<String>,
    {
        Self {
            files: files.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.files.get(name)
    }
}

impl FileAccess for MemoryFiles {
    fn read(&mut self, name: &str) -> Result<Value, String> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| "no such file".to_string())
    }

    fn write(&mut self, name: &str, data: &Value) -> Result<(), String> {
        self.files.insert(name.to_string(), data.clone());
        Ok(())
    }
}

/// Files under one root directory.
///
/// Names must be relative paths that stay inside the root: absolute paths,
/// `..` components and empty names are rejected. Reads return the contents
/// as `Str`; writes store strings verbatim and other values in their
/// displayed form.
#[derive(Debug, Clone)]
pub struct DirectoryFiles {
    root: PathBuf,
}

impl DirectoryFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, String> {
        let path = Path::new(name);
        if name.is_empty() {
            return Err("empty file name".to_string());
        }
        for component in path.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(format!("path '{name}' escapes the sandbox")),
            }
        }
        Ok(self.root.join(path))
    }
}

impl FileAccess for DirectoryFiles {
    fn read(&mut self, name: &str) -> Result<Value, String> {
        let path = self.resolve(name)?;
        fs::read_to_string(&path)
            .map(Value::Str)
            .map_err(|e| e.to_string())
    }

    fn write(&mut self, name: &str, data: &Value) -> Result<(), String> {
        let path = self.resolve(name)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(&path, data.to_output()).map_err(|e| e.to_string())
    }
}
