//! Ledger sources and sinks
//!
//! The reconciliation engine reads one document from a [`LedgerSource`] and
//! writes one document to a [`LedgerSink`]. [`JsonFileStore`] is the on-disk
//! implementation; [`MemoryStore`] backs tests and embedding callers.

use crate::{
    error::{Error, Result},
    types::LedgerDocument,
};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::path::{Path, PathBuf};

/// Supplies the ledger document to reconcile
pub trait LedgerSource {
    /// Read the full document
    fn load(&self) -> Result<LedgerDocument>;
}

/// Persists a ledger document, replacing whatever was there
pub trait LedgerSink {
    /// Write the full document
    fn store(&mut self, document: &LedgerDocument) -> Result<()>;
}

/// JSON file on the local filesystem
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or an empty ledger when the file does not exist yet
    pub fn load_or_default(&self) -> Result<LedgerDocument> {
        if !self.path.exists() {
            tracing::info!("No ledger at {}, starting empty", self.path.display());
            return Ok(LedgerDocument::default());
        }
        self.load()
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerSource for JsonFileStore {
    fn load(&self) -> Result<LedgerDocument> {
        let content = std::fs::read_to_string(&self.path)?;
        let document: LedgerDocument = serde_json::from_str(&content).map_err(|e| {
            Error::MalformedInput(format!("{}: {}", self.path.display(), e))
        })?;
        document.validate()?;

        tracing::debug!(
            path = %self.path.display(),
            entries = document.history.len(),
            badges = document.badges_earned.len(),
            "Loaded ledger"
        );
        Ok(document)
    }
}

impl LedgerSink for JsonFileStore {
    fn store(&mut self, document: &LedgerDocument) -> Result<()> {
        let bytes = to_pretty_json(document)?;

        // Write next to the target, then swap it in
        let tmp = self.temp_path();
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), bytes = bytes.len(), "Stored ledger");
        Ok(())
    }
}

/// Serialize with four-space indentation
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    buf.push(b'\n');
    Ok(buf)
}

/// In-memory source and sink
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    document: Option<LedgerDocument>,
    writes: usize,
}

impl MemoryStore {
    /// Store holding `document`
    pub fn new(document: LedgerDocument) -> Self {
        Self {
            document: Some(document),
            writes: 0,
        }
    }

    /// Current document, if any
    pub fn document(&self) -> Option<&LedgerDocument> {
        self.document.as_ref()
    }

    /// Number of completed `store` calls
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl LedgerSource for MemoryStore {
    fn load(&self) -> Result<LedgerDocument> {
        let document = self
            .document
            .clone()
            .ok_or_else(|| Error::MalformedInput("memory store is empty".to_string()))?;
        document.validate()?;
        Ok(document)
    }
}

impl LedgerSink for MemoryStore {
    fn store(&mut self, document: &LedgerDocument) -> Result<()> {
        self.document = Some(document.clone());
        self.writes += 1;
        Ok(())
    }
}
