//! # KvHub
//!
//! The database-registry layer of a multi-engine key-value server:
//! - Lazy, concurrency-safe get-or-open of databases by name
//! - Engine dispatch over a closed set of storage backends
//! - Startup recovery scan of the storage root
//! - Process-wide unique id generation
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Caller (protocol layer / CLI)                │
//! └───────────────┬─────────────────────────────┬───────────────┘
//!                 │ get_or_open(name)           │ next_int / next_string
//! ┌───────────────▼──────────────┐      ┌───────▼───────────────┐
//! │           Registry           │      │      IdGenerator      │
//! │ DashMap<name, EngineHandle>  │      │   (atomic stamp)      │
//! └───────────────┬──────────────┘      └───────────────────────┘
//!                 │ miss
//! ┌───────────────▼──────────────┐
//! │     Dispatcher (EngineKind)  │
//! └──────┬─────────┬─────────┬───┘
//!        ▼         ▼         ▼
//!     memdb      logdb     lsmdb
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod engine;
pub mod registry;
pub mod id;
pub mod hub;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, SyncStrategy};
pub use engine::{EngineHandle, EngineKind, KvEngine};
pub use error::{HubError, Result};
pub use hub::Hub;
pub use id::IdGenerator;
pub use registry::{Registry, ScanReport};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of KvHub
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
