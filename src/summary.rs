//! Post-build artifact summary.
//!
//! Classifies the expected build outputs by size so an obviously broken
//! image is flagged before (or right after) it lands on the target.

use crate::logger::Logger;
use crate::project::ProjectContext;
use anyhow::Result;
use std::path::Path;

/// Artifact names scons is expected to leave in the BSP root.
pub const ARTIFACT_NAMES: &[&str] = &[
    "rt-thread.bin",
    "rtthread.bin",
    "rt-thread.elf",
    "rtthread.elf",
];

/// Anything smaller than this is almost certainly a truncated image.
pub const MIN_ARTIFACT_BYTES: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactState {
    Missing,
    Empty,
    Undersized(u64),
    Valid(u64),
}

/// Classify one expected artifact path.
pub fn classify(path: &Path) -> Result<ArtifactState> {
    if !path.is_file() {
        return Ok(ArtifactState::Missing);
    }
    let len = std::fs::metadata(path)?.len();
    Ok(match len {
        0 => ArtifactState::Empty,
        n if n < MIN_ARTIFACT_BYTES => ArtifactState::Undersized(n),
        n => ArtifactState::Valid(n),
    })
}

/// Log one line per expected artifact and warn when a flash happened (or
/// was about to) with nothing valid to flash. Returns the valid count.
pub fn report(ctx: &ProjectContext, logger: &Logger, flashed: bool) -> Result<usize> {
    logger.info("=== Build artifacts ===");

    let mut valid = 0;
    for name in ARTIFACT_NAMES {
        let path = ctx.root.join(name);
        match classify(&path)? {
            ArtifactState::Missing => logger.info(&format!("  {name:16} no files found")),
            ArtifactState::Empty => logger.warn(&format!("  {name:16} empty (0 bytes)")),
            ArtifactState::Undersized(n) => logger.warn(&format!(
                "  {name:16} undersized ({n} bytes, expected at least {MIN_ARTIFACT_BYTES})"
            )),
            ArtifactState::Valid(n) => {
                valid += 1;
                logger.success(&format!("  {name:16} {n} bytes"));
            }
        }
    }

    if valid == 0 && flashed {
        logger.warn("flash ran but no valid build artifact was found");
    }

    Ok(valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_classify_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let state = classify(&tmp.path().join("rt-thread.bin")).unwrap();
        assert_eq!(state, ArtifactState::Missing);
    }

    #[test]
    fn test_classify_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rt-thread.bin");
        fs::write(&path, b"").unwrap();
        assert_eq!(classify(&path).unwrap(), ArtifactState::Empty);
    }

    #[test]
    fn test_classify_undersized() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rt-thread.bin");
        fs::write(&path, vec![0u8; 512]).unwrap();
        assert_eq!(classify(&path).unwrap(), ArtifactState::Undersized(512));
    }

    #[test]
    fn test_classify_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("rt-thread.bin");
        fs::write(&path, vec![0u8; 2048]).unwrap();
        assert_eq!(classify(&path).unwrap(), ArtifactState::Valid(2048));
    }

    #[test]
    fn test_report_counts_valid_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(crate::project::BUILD_MARKER), "").unwrap();
        let ctx = ProjectContext::locate(tmp.path()).unwrap();
        let logger = Logger::console_only();

        fs::write(tmp.path().join("rt-thread.bin"), vec![0u8; 4096]).unwrap();
        fs::write(tmp.path().join("rt-thread.elf"), vec![0u8; 100]).unwrap();

        let valid = report(&ctx, &logger, true).unwrap();
        assert_eq!(valid, 1);
    }
}
