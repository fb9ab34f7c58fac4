//! # rtbuild
//!
//! Staged build-and-flash orchestrator for RT-Thread BSPs.
//!
//! ## Usage
//!
//! ```bash
//! rtbuild                  # update packages, compile, flash, summarize
//! rtbuild -y -l            # no prompts, mirror output to logs/
//! rtbuild -c               # scons -c before compiling
//! rtbuild -F               # flash-only: skip update and compile
//! rtbuild --check          # preflight report, no stages
//! rtbuild --keep-logs 7    # purge logs older than a week first
//! ```
//!
//! Every stage runs behind a [Y/n] gate and through a single execution
//! gateway; the first failing stage aborts the run with its exit code.

use anyhow::Result;
use clap::Parser;

mod cli;
mod config;
mod confirm;
mod exec;
mod interrupt;
mod logger;
mod pipeline;
mod preflight;
mod project;
mod summary;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // clap's usage-error exit code is 2; this tool's contract is 1
    let cli = match cli::Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return code;
        }
    };

    match orchestrate(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!(
                "{}[ERROR]{} {err:#}",
                logger::colors::RED,
                logger::colors::RESET
            );
            1
        }
    }
}

fn orchestrate(cli: &cli::Cli) -> Result<i32> {
    interrupt::install()?;

    let (cfg, warnings) = config::RunConfig::resolve(cli)?;

    if cli.check {
        let ok = preflight::report(cli.json)?;
        return Ok(i32::from(!ok));
    }

    let mut ctx = project::ProjectContext::discover()?;

    // retention runs before anything else touches the log directory
    let purged = match cfg.log_retention_days {
        Some(days) => logger::purge_old_logs(&ctx.logs_dir, days)?,
        None => 0,
    };

    let logger = logger::Logger::init(&cfg, &mut ctx)?;
    if purged > 0 {
        logger.info(&format!("purged {purged} old log file(s)"));
    }
    for warning in &warnings {
        logger.warn(warning);
    }
    logger.debug(&format!("effective configuration: {cfg:?}"));
    logger.debug(&format!("project root: {}", ctx.root.display()));

    logger.info(&format!("project root: {}", ctx.root.display()));
    if let Some(log) = &ctx.log_file {
        logger.info(&format!("logging to {}", log.display()));
    }

    let outcome = pipeline::Pipeline::new(&cfg, &ctx, &logger).run()?;
    Ok(interrupt::finalize(&outcome, &ctx, &logger))
}
