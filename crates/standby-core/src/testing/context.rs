//! TestContext - temporary directory owned by one test

use crate::config::{LedgerConfig, StandbyConfig};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// LMDB map size used by test stores
pub const TEST_MAP_SIZE: usize = 10 * 1024 * 1024;

/// Context for managing test resources and lifecycle
///
/// The temporary directory is removed when the context is dropped, so keep it
/// alive for as long as any store opened inside it.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new TestContext with a unique temporary directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        std::fs::create_dir_all(temp_dir.path()).expect("Failed to create test directory");
        Self { temp_dir }
    }

    /// Get the path to the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Directory for the ledger's LMDB environment
    pub fn ledger_dir(&self) -> PathBuf {
        self.temp_dir.path().join("ledger")
    }

    /// Ledger configuration pointing inside this context
    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            data_dir: self.ledger_dir(),
            map_size: TEST_MAP_SIZE,
        }
    }

    /// Full configuration with the ledger inside this context
    pub fn config(&self) -> StandbyConfig {
        StandbyConfig {
            ledger: self.ledger_config(),
            ..StandbyConfig::default()
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_creates_directory() {
        let ctx = TestContext::new();
        assert!(ctx.path().is_dir());
        assert!(ctx.ledger_dir().starts_with(ctx.path()));
    }

    #[test]
    fn test_context_cleanup_on_drop() {
        let path = {
            let ctx = TestContext::new();
            std::fs::write(ctx.path().join("marker"), "x").unwrap();
            ctx.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
