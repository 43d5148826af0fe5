//! Data directory structure
//!
//! A store opened with `Haystack::open_dir` keeps all of its state in one
//! directory:
//!
//! ```text
//! <dir>/
//! ├── haystack.toml    # Configuration
//! ├── .lock            # Exclusive process lock
//! ├── index/
//! │   └── index.log    # Index batch log
//! └── piles/
//!     ├── pile-000000.pile
//!     └── ...
//! ```

use super::config::CONFIG_FILE_NAME;
use std::path::{Path, PathBuf};

/// Paths within a data directory
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Create paths from root directory
    pub fn from_root(root: impl AsRef<Path>) -> Self {
        DataDir {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root data directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `haystack.toml`
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// Process lock file
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(".lock")
    }

    /// Directory holding the index log
    pub fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    /// Directory holding pile files
    pub fn piles_dir(&self) -> PathBuf {
        self.root.join("piles")
    }

    /// Create the full directory structure
    pub fn create_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.index_dir())?;
        std::fs::create_dir_all(self.piles_dir())?;
        Ok(())
    }
}
