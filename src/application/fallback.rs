//! Pre-committed data used instead of live fetches (CI, missing credentials).

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::infra::{
    error::InfraError,
    json_store::{empty_document_for, write_json_pretty},
};

#[derive(Debug, Clone)]
pub struct FallbackStore {
    dir: PathBuf,
    enabled: bool,
}

impl FallbackStore {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    /// Whether live fetches should be replaced by fallback data.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `<dir>/<filename>` into `target_dir`. Returns false when there is no such file.
    pub fn restore(&self, filename: &str, target_dir: &Path) -> Result<bool, InfraError> {
        let source = self.dir.join(filename);
        if !source.is_file() {
            warn!(
                target = "sitebake::fallback",
                op = "restore",
                result = "missing",
                path = %source.display(),
                "No fallback file available"
            );
            return Ok(false);
        }

        fs::create_dir_all(target_dir)?;
        let destination = target_dir.join(filename);
        fs::copy(&source, &destination)?;
        info!(
            target = "sitebake::fallback",
            op = "restore",
            result = "success",
            from = %source.display(),
            to = %destination.display(),
            "Restored fallback data"
        );
        Ok(true)
    }

    /// Restore `filename`, or write a typed-empty document when no fallback exists.
    pub fn restore_or_empty(&self, filename: &str, target_dir: &Path) -> Result<bool, InfraError> {
        if self.restore(filename, target_dir)? {
            return Ok(true);
        }
        write_json_pretty(&target_dir.join(filename), &empty_document_for(filename))?;
        Ok(false)
    }
}
