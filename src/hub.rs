//! Process-level entry point
//!
//! Owns the database registry and the id generator for the life of the
//! process. Pass `&Hub` (or `Arc<Hub>`) to whatever needs database access.

use crate::config::Config;
use crate::error::Result;
use crate::id::IdGenerator;
use crate::registry::{Registry, ScanReport};

/// The registry and the id generator, created together at startup
pub struct Hub {
    registry: Registry,
    ids: IdGenerator,
}

impl Hub {
    /// Build both components and run the startup scan
    ///
    /// Configuration errors (unknown engine, node id out of range) and an
    /// unusable storage root fail startup; individual databases that fail to
    /// open are only reported.
    pub fn start(config: &Config) -> Result<(Self, ScanReport)> {
        let ids = IdGenerator::new(config.node_id)?;
        let (registry, report) = Registry::open(config)?;

        tracing::info!(
            engine = registry.engine_name(),
            storage_dir = %registry.storage_dir().display(),
            node_id = ids.node_id(),
            databases = registry.len(),
            "hub started"
        );

        Ok((Self { registry, ids }, report))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    /// Sync every open database before the process exits
    pub fn shutdown(self) -> Result<()> {
        tracing::info!(databases = self.registry.len(), "hub shutting down");
        self.registry.sync_all()
    }
}
