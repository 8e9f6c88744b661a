//! Engine dispatch
//!
//! Maps a case-insensitive engine identifier to exactly one backend.
//! Adding a backend means adding an `EngineKind` variant and its arms below.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{HubError, Result};

use super::{EngineHandle, EngineOptions, LogDb, LsmDb, MemDb};

/// Supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    MemDb,
    LogDb,
    LsmDb,
}

impl EngineKind {
    /// Every supported backend
    pub const ALL: [EngineKind; 3] = [EngineKind::MemDb, EngineKind::LogDb, EngineKind::LsmDb];

    /// Canonical (lowercase) identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::MemDb => "memdb",
            EngineKind::LogDb => "logdb",
            EngineKind::LsmDb => "lsmdb",
        }
    }

    /// Open this backend at `path`
    pub fn open(&self, path: &Path, options: &EngineOptions) -> Result<EngineHandle> {
        let handle: EngineHandle = match self {
            EngineKind::MemDb => Arc::new(MemDb::open(path, options)?),
            EngineKind::LogDb => Arc::new(LogDb::open(path, options)?),
            EngineKind::LsmDb => Arc::new(LsmDb::open(path, options)?),
        };
        Ok(handle)
    }
}

impl FromStr for EngineKind {
    type Err = HubError;

    fn from_str(identifier: &str) -> Result<Self> {
        EngineKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(identifier))
            .ok_or_else(|| HubError::UnsupportedEngine {
                identifier: identifier.to_string(),
            })
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open the engine named by `identifier` at `path` with default options
pub fn open(identifier: &str, path: &Path) -> Result<EngineHandle> {
    open_with(identifier, path, &EngineOptions::default())
}

/// Open the engine named by `identifier` at `path`
///
/// An unknown identifier fails with `UnsupportedEngine` before anything
/// touches the filesystem.
pub fn open_with(identifier: &str, path: &Path, options: &EngineOptions) -> Result<EngineHandle> {
    let kind: EngineKind = identifier.parse()?;
    tracing::debug!(engine = %kind, path = %path.display(), "opening engine");
    kind.open(path, options)
}

// =============================================================================
// Opener Seam
// =============================================================================

/// Opens an engine handle for a database directory
///
/// The registry talks to engines only through this trait.
pub trait EngineOpener: Send + Sync {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Open (creating if needed) the database at `path`
    fn open(&self, path: &Path) -> Result<EngineHandle>;
}

/// The production opener: one configured backend plus its tunables
#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    kind: EngineKind,
    options: EngineOptions,
}

impl Dispatcher {
    /// Resolve `identifier` once, up front
    pub fn new(identifier: &str, options: EngineOptions) -> Result<Self> {
        Ok(Self {
            kind: identifier.parse()?,
            options,
        })
    }

    pub fn kind(&self) -> EngineKind {
        self.kind
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}

impl EngineOpener for Dispatcher {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn open(&self, path: &Path) -> Result<EngineHandle> {
        self.kind.open(path, &self.options)
    }
}
