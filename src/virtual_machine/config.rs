//! Immutable VM configuration: memory mode and the trusted call set.

use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::vm::worker;
use std::collections::BTreeSet;
use std::fmt;

/// Environment variable selecting the memory mode (`plain` or `encrypted`).
pub const MEMORY_ENV: &str = "CELLVM_MEMORY";
/// Environment variable replacing the trusted call set (comma separated).
pub const TRUSTED_ENV: &str = "CELLVM_TRUSTED";

/// Builtins callable out of the box.
pub const DEFAULT_TRUSTED: &[&str] = &[
    "add", "sub", "mul", "div", "max", "min", "concat", "len", "echo",
];

/// How memory cells are stored at rest.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MemoryMode {
    #[default]
    Plain,
    Encrypted,
}

impl MemoryMode {
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "plain" => Some(MemoryMode::Plain),
            "encrypted" => Some(MemoryMode::Encrypted),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            MemoryMode::Plain => "plain",
            MemoryMode::Encrypted => "encrypted",
        }
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration built once and passed by reference into every dispatch loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmConfig {
    memory_mode: MemoryMode,
    trusted: BTreeSet<String>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            memory_mode: MemoryMode::Plain,
            trusted: DEFAULT_TRUSTED.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from [`MEMORY_ENV`] and [`TRUSTED_ENV`], falling
    /// back to defaults for unset variables.
    pub fn from_env() -> Result<Self, VMError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VMError> {
        let mut config = Self::default();
        if let Some(mode) = lookup(MEMORY_ENV) {
            let parsed = MemoryMode::parse(&mode).ok_or(VMError::InvalidConfig {
                key: MEMORY_ENV,
                value: mode.clone(),
            })?;
            config = config.with_memory_mode(parsed);
        }
        if let Some(list) = lookup(TRUSTED_ENV) {
            let names: Vec<&str> = list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect();
            config = config.with_trusted(names)?;
        }
        Ok(config)
    }

    pub fn with_memory_mode(mut self, mode: MemoryMode) -> Self {
        self.memory_mode = mode;
        self
    }

    /// Replaces the trusted set. Every name must be a known builtin.
    pub fn with_trusted<I, S>(mut self, names: I) -> Result<Self, VMError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trusted = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            if worker::builtin(name).is_none() {
                return Err(VMError::InvalidConfig {
                    key: TRUSTED_ENV,
                    value: name.to_string(),
                });
            }
            trusted.insert(name.to_string());
        }
        self.trusted = trusted;
        Ok(self)
    }

    pub fn memory_mode(&self) -> MemoryMode {
        self.memory_mode
    }

    pub fn is_trusted(&self, name: &str) -> bool {
        self.trusted.contains(name)
    }

    pub fn trusted(&self) -> impl Iterator<Item = &str> {
        self.trusted.iter().map(String::as_str)
    }
}
