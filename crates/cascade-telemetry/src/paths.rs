//! Path resolution for config, knowledge base and journals

use std::path::PathBuf;

/// Overrides the data home (defaults to `~/.cascade`)
pub const HOME_ENV: &str = "CASCADE_HOME";

/// Resolves standard file locations under the data home
#[derive(Debug, Clone)]
pub struct Paths {
    pub home: PathBuf,
}

impl Paths {
    /// Resolve from `$CASCADE_HOME`, falling back to `~/.cascade`
    pub fn new() -> std::io::Result<Self> {
        if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
            return Ok(Self::at(home));
        }

        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "home directory not found")
        })?;
        Ok(Self::at(home.join(".cascade")))
    }

    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Router configuration
    pub fn config_file(&self) -> PathBuf {
        self.home.join("cascade.json")
    }

    /// Knowledge-base passages for retrieval
    pub fn knowledge_file(&self) -> PathBuf {
        self.home.join("knowledge.json")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.home.join("journal")
    }

    /// Sealed query traces
    pub fn traces_file(&self) -> PathBuf {
        self.journal_dir().join("traces.jsonl")
    }

    /// Live agent escalations
    pub fn handoffs_file(&self) -> PathBuf {
        self.journal_dir().join("handoffs.jsonl")
    }
}
