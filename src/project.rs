//! Project root discovery and derived paths.
//!
//! An RT-Thread BSP root is identified by its `rtconfig.py`; everything else
//! (flash script, log directory) hangs off that directory.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

/// Marker file whose presence identifies the BSP root.
pub const BUILD_MARKER: &str = "rtconfig.py";

/// Flashing script, expected directly under the BSP root.
pub const FLASH_SCRIPT: &str = "flash.sh";

/// Log directory name under the BSP root.
pub const LOGS_DIR: &str = "logs";

/// Resolved project paths. Created once after discovery, read-only after.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub root: PathBuf,
    pub flash_script: PathBuf,
    pub logs_dir: PathBuf,
    /// Timestamped log file path; `Some` only when logging is enabled.
    pub log_file: Option<PathBuf>,
}

impl ProjectContext {
    /// Walk upward from `start` until a directory containing the build
    /// marker is found.
    pub fn locate(start: &Path) -> Result<Self> {
        for dir in start.ancestors() {
            if dir.join(BUILD_MARKER).is_file() {
                return Ok(Self::at(dir));
            }
        }
        bail!(
            "no RT-Thread project found: {} is not present in {} or any parent.\n\
             Run rtbuild from inside a BSP directory.",
            BUILD_MARKER,
            start.display()
        );
    }

    /// Discover from the current working directory.
    pub fn discover() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::locate(&cwd)
    }

    fn at(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            flash_script: root.join(FLASH_SCRIPT),
            logs_dir: root.join(LOGS_DIR),
            log_file: None,
        }
    }

    /// Pick the timestamped log file name for this run.
    pub fn set_log_file(&mut self, stamp: &str) {
        self.log_file = Some(self.logs_dir.join(format!("build_{stamp}.log")));
    }
}
