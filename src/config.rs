//! Run configuration resolved from the command line.
//!
//! Built once before anything touches the filesystem; immutable afterwards.

use crate::cli::Cli;
use anyhow::{bail, Result};

/// Validated, effective configuration for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub assume_yes: bool,
    pub skip_pkgs: bool,
    pub skip_flash: bool,
    pub force_clean: bool,
    pub flash_only: bool,
    pub log_enabled: bool,
    pub log_retention_days: Option<u32>,
    pub debug: bool,
}

impl RunConfig {
    /// Resolve the raw flags into an effective configuration.
    ///
    /// `--flash-only --skip-flash` is contradictory and rejected. With
    /// `--flash-only`, explicit `--clean` / `--skip-pkgs` are overridden
    /// (never clean, always skip pkgs); each override is returned as a
    /// warning so the caller can log it once the logger exists.
    pub fn resolve(cli: &Cli) -> Result<(Self, Vec<String>)> {
        if cli.flash_only && cli.skip_flash {
            bail!("--flash-only and --skip-flash are mutually exclusive");
        }

        let mut warnings = Vec::new();
        let mut skip_pkgs = cli.skip_pkgs;
        let mut force_clean = cli.clean;

        if cli.flash_only {
            if cli.clean {
                warnings.push("--clean has no effect with --flash-only; ignoring".to_string());
                force_clean = false;
            }
            if cli.skip_pkgs {
                warnings.push(
                    "--skip-pkgs is implied by --flash-only; package update never runs"
                        .to_string(),
                );
            }
            skip_pkgs = true;
        }

        Ok((
            Self {
                assume_yes: cli.yes,
                skip_pkgs,
                skip_flash: cli.skip_flash,
                force_clean,
                flash_only: cli.flash_only,
                log_enabled: cli.log,
                log_retention_days: cli.keep_logs,
                debug: cli.debug,
            },
            warnings,
        ))
    }
}
