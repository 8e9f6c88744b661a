//! Startup Recovery Scan
//!
//! Opens every database directory found under the storage root.
//!
//! Best effort: a database that fails to open is logged and recorded in the
//! report, and the remaining databases are still opened. Only failing to
//! create or list the storage root itself is an error.

use std::fs;
use std::path::Path;

use crossbeam::channel;
use crossbeam::queue::SegQueue;

use crate::error::{HubError, Result};

use super::Registry;

/// Outcome of a startup scan
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Databases opened (or already open), sorted by name
    pub opened: Vec<String>,

    /// One `HubError::ScanFailure` per database that could not be opened
    pub failed: Vec<HubError>,
}

impl ScanReport {
    /// True when every discovered database opened
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Names of the databases that failed, in report order
    pub fn failed_names(&self) -> Vec<&str> {
        self.failed
            .iter()
            .filter_map(|e| match e {
                HubError::ScanFailure { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Registry {
    /// Open every database directory under the storage root
    ///
    /// Creates the storage root if it is missing. Regular files and other
    /// non-directories are skipped. Work is spread over `scan_workers`
    /// threads, each going through `get_or_open`.
    pub fn load_existing(&self) -> Result<ScanReport> {
        fs::create_dir_all(&self.storage_dir)?;
        let names = discover(&self.storage_dir)?;

        let workers = self.scan_workers.min(names.len()).max(1);
        tracing::info!(
            storage_dir = %self.storage_dir.display(),
            databases = names.len(),
            workers,
            "starting startup scan"
        );

        let queue = SegQueue::new();
        for name in names {
            queue.push(name);
        }
        let (result_tx, result_rx) = channel::unbounded::<(String, Result<()>)>();

        let scanned = crossbeam::scope(|s| {
            for _ in 0..workers {
                let queue = &queue;
                let results = result_tx.clone();
                s.spawn(move |_| {
                    while let Some(name) = queue.pop() {
                        let outcome = self.get_or_open(&name).map(|_| ());
                        if results.send((name, outcome)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        if let Err(panic) = scanned {
            std::panic::resume_unwind(panic);
        }
        drop(result_tx);

        let mut report = ScanReport::default();
        for (name, outcome) in result_rx.iter() {
            match outcome {
                Ok(()) => report.opened.push(name),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "skipping database during startup scan");
                    report.failed.push(HubError::ScanFailure {
                        name,
                        source: Box::new(e),
                    });
                }
            }
        }
        report.opened.sort();

        tracing::info!(
            opened = report.opened.len(),
            failed = report.failed.len(),
            "startup scan complete"
        );
        Ok(report)
    }
}

/// Names of the immediate subdirectories of `root`, sorted
fn discover(root: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }

        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(raw) => {
                tracing::warn!(name = ?raw, "skipping directory with non UTF-8 name");
            }
        }
    }

    names.sort();
    Ok(names)
}
