//! The staged build/flash state machine.
//!
//! Stages run in a fixed order, each behind the confirmation gate and
//! executed through the exec gateway. The first failed stage ends the run
//! with that stage's exit code; a refused confirmation ends it cleanly.
//! An interrupt observed at any gate aborts the remaining stages, even
//! when it arrived while a prompt was open.

use crate::config::RunConfig;
use crate::confirm::confirm_stage;
use crate::exec::{run_stage, CommandSpec, StageOutcome};
use crate::interrupt;
use crate::logger::Logger;
use crate::preflight;
use crate::project::ProjectContext;
use crate::summary;
use anyhow::Result;

/// Pipeline states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DependencyCheck,
    EnvironmentCheck,
    PackageUpdate,
    Clean,
    Compile,
    Flash,
    Summary,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::DependencyCheck => "dependency check",
            Stage::EnvironmentCheck => "environment check",
            Stage::PackageUpdate => "package update",
            Stage::Clean => "clean",
            Stage::Compile => "compile",
            Stage::Flash => "flash",
            Stage::Summary => "summary",
        }
    }
}

/// Record of one stage that actually ran.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: &'static str,
    pub command: String,
    pub exit_code: i32,
}

/// Terminal state of a whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// User answered "no" at a gate. Not an error.
    Cancelled,
    StageFailed {
        stage: &'static str,
        command: String,
        code: i32,
    },
    Interrupted {
        code: i32,
    },
}

/// External commands behind stages 3-6. Split out so tests can substitute
/// harmless stand-ins for the real build tools.
pub struct StageCommands {
    pub pkgs_update: CommandSpec,
    pub clean: CommandSpec,
    pub compile: CommandSpec,
    pub flash: CommandSpec,
}

impl StageCommands {
    pub fn for_project(ctx: &ProjectContext) -> Self {
        Self {
            pkgs_update: CommandSpec::new("pkgs").arg("--update").current_dir(&ctx.root),
            clean: CommandSpec::new("scons").arg("-c").current_dir(&ctx.root),
            compile: CommandSpec::new("scons")
                .arg(format!("-j{}", cpus()))
                .current_dir(&ctx.root),
            flash: CommandSpec::new(ctx.flash_script.display().to_string())
                .current_dir(&ctx.root),
        }
    }
}

fn cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(1)
}

pub struct Pipeline<'a> {
    cfg: &'a RunConfig,
    ctx: &'a ProjectContext,
    logger: &'a Logger,
    commands: StageCommands,
    results: Vec<StageResult>,
    /// Confirmation gate; substituted in tests like `commands`.
    confirm: fn(&str, &str, bool) -> Result<bool>,
    /// Interrupt flag reader, consulted at every gate and before success.
    interrupted: fn() -> bool,
}

/// What a gated stage decided about the rest of the run.
enum Flow {
    Continue,
    Stop(RunOutcome),
}

impl<'a> Pipeline<'a> {
    pub fn new(cfg: &'a RunConfig, ctx: &'a ProjectContext, logger: &'a Logger) -> Self {
        let commands = StageCommands::for_project(ctx);
        Self::with_commands(cfg, ctx, logger, commands)
    }

    pub fn with_commands(
        cfg: &'a RunConfig,
        ctx: &'a ProjectContext,
        logger: &'a Logger,
        commands: StageCommands,
    ) -> Self {
        Self {
            cfg,
            ctx,
            logger,
            commands,
            results: Vec::new(),
            confirm: confirm_stage,
            interrupted: interrupt::was_interrupted,
        }
    }

    /// Drive the whole state machine to a terminal state.
    pub fn run(mut self) -> Result<RunOutcome> {
        if self.cfg.flash_only {
            return self.run_flash_only();
        }

        match self.run_check_stages()? {
            Flow::Stop(outcome) => return Ok(outcome),
            Flow::Continue => {}
        }
        self.run_build_stages()
    }

    /// Stages 1 and 2: in-process gates, fatal on failure.
    fn run_check_stages(&mut self) -> Result<Flow> {
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }

        if !(self.confirm)(
            Stage::DependencyCheck.name(),
            "verify required tools on PATH",
            self.cfg.assume_yes,
        )? {
            return Ok(self.cancelled());
        }
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }
        preflight::check_tools(self.logger)?;

        if !(self.confirm)(
            Stage::EnvironmentCheck.name(),
            "verify a Python virtualenv is active",
            self.cfg.assume_yes,
        )? {
            return Ok(self.cancelled());
        }
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }
        preflight::check_venv(self.logger)?;

        Ok(Flow::Continue)
    }

    /// Stages 3 through 7.
    fn run_build_stages(&mut self) -> Result<RunOutcome> {
        if self.cfg.skip_pkgs {
            self.logger.info("skipping package update");
        } else {
            let spec = self.commands.pkgs_update.clone();
            match self.gated(Stage::PackageUpdate, &spec)? {
                Flow::Stop(outcome) => return Ok(outcome),
                Flow::Continue => {}
            }
        }

        if self.cfg.force_clean {
            let spec = self.commands.clean.clone();
            match self.gated(Stage::Clean, &spec)? {
                Flow::Stop(outcome) => return Ok(outcome),
                Flow::Continue => {}
            }
        }

        let spec = self.commands.compile.clone();
        match self.gated(Stage::Compile, &spec)? {
            Flow::Stop(outcome) => return Ok(outcome),
            Flow::Continue => {}
        }

        let mut flashed = false;
        if self.cfg.skip_flash {
            self.logger.info("skipping flash");
        } else {
            match self.flash_stage()? {
                Flow::Stop(outcome) => return Ok(outcome),
                Flow::Continue => flashed = true,
            }
        }

        if !(self.confirm)(
            Stage::Summary.name(),
            "inspect build artifacts",
            self.cfg.assume_yes,
        )? {
            self.logger.info("run cancelled by user");
            return Ok(RunOutcome::Cancelled);
        }
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(outcome);
        }
        summary::report(self.ctx, self.logger, flashed)?;

        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(outcome);
        }
        self.logger.success(&format!(
            "all done ({} stage command{} executed)",
            self.results.len(),
            if self.results.len() == 1 { "" } else { "s" }
        ));
        Ok(RunOutcome::Success)
    }

    /// Shortcut path: venv and script verification, one confirmation, flash.
    /// No summary stage.
    fn run_flash_only(&mut self) -> Result<RunOutcome> {
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(outcome);
        }
        self.logger.info("flash-only mode");
        preflight::check_venv(self.logger)?;

        match self.flash_stage()? {
            Flow::Stop(outcome) => Ok(outcome),
            Flow::Continue => {
                if let Some(outcome) = self.interrupted_outcome() {
                    return Ok(outcome);
                }
                self.logger.success("flash finished");
                Ok(RunOutcome::Success)
            }
        }
    }

    /// The flash stage. The script must exist before the prompt, but the
    /// execute-permission grant waits for a positive answer so a refusal
    /// leaves the filesystem untouched.
    fn flash_stage(&mut self) -> Result<Flow> {
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }
        flash_script_present(self.ctx)?;

        let spec = self.commands.flash.clone();
        if !(self.confirm)(Stage::Flash.name(), &spec.render(), self.cfg.assume_yes)? {
            return Ok(self.cancelled());
        }
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }

        grant_flash_exec(self.ctx, self.logger)?;
        self.execute(Stage::Flash, &spec)
    }

    /// Confirmation gate plus exec gateway for one command stage.
    fn gated(&mut self, stage: Stage, spec: &CommandSpec) -> Result<Flow> {
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }

        if !(self.confirm)(stage.name(), &spec.render(), self.cfg.assume_yes)? {
            return Ok(self.cancelled());
        }

        // a Ctrl-C during the prompt must win over the approval
        if let Some(outcome) = self.interrupted_outcome() {
            return Ok(Flow::Stop(outcome));
        }

        self.execute(stage, spec)
    }

    fn execute(&mut self, stage: Stage, spec: &CommandSpec) -> Result<Flow> {
        match run_stage(stage.name(), spec, self.logger)? {
            StageOutcome::Completed => {
                let result = StageResult {
                    stage: stage.name(),
                    command: spec.render(),
                    exit_code: 0,
                };
                self.logger.debug(&format!("stage result: {result:?}"));
                self.results.push(result);
                Ok(Flow::Continue)
            }
            StageOutcome::Failed(code) => Ok(Flow::Stop(RunOutcome::StageFailed {
                stage: stage.name(),
                command: spec.render(),
                code,
            })),
            StageOutcome::Interrupted(code) => {
                Ok(Flow::Stop(RunOutcome::Interrupted { code }))
            }
        }
    }

    fn interrupted_outcome(&self) -> Option<RunOutcome> {
        (self.interrupted)().then_some(RunOutcome::Interrupted { code: 130 })
    }

    fn cancelled(&self) -> Flow {
        self.logger.info("run cancelled by user");
        Flow::Stop(RunOutcome::Cancelled)
    }
}

/// Fail early when the flash script is absent.
fn flash_script_present(ctx: &ProjectContext) -> Result<()> {
    if !ctx.flash_script.is_file() {
        anyhow::bail!(
            "flash script not found: {}\n\
             Expected it next to {} in the project root.",
            ctx.flash_script.display(),
            crate::project::BUILD_MARKER
        );
    }
    Ok(())
}

/// Grant `u+x` on the flash script once if the bit is missing. A failed
/// grant is fatal.
fn grant_flash_exec(ctx: &ProjectContext, logger: &Logger) -> Result<()> {
    #[cfg(unix)]
    {
        use anyhow::Context;
        use std::os::unix::fs::PermissionsExt;
        let meta = std::fs::metadata(&ctx.flash_script)?;
        let mut perms = meta.permissions();
        if perms.mode() & 0o111 == 0 {
            logger.warn(&format!(
                "{} is not executable; granting u+x",
                ctx.flash_script.display()
            ));
            perms.set_mode(perms.mode() | 0o100);
            std::fs::set_permissions(&ctx.flash_script, perms).with_context(|| {
                format!(
                    "failed to grant execute permission on {}",
                    ctx.flash_script.display()
                )
            })?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (ctx, logger);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn cfg_from(args: &[&str]) -> RunConfig {
        let cli = Cli::parse_from(std::iter::once("rtbuild").chain(args.iter().copied()));
        RunConfig::resolve(&cli).unwrap().0
    }

    fn project(dir: &Path) -> ProjectContext {
        fs::write(dir.join(crate::project::BUILD_MARKER), "").unwrap();
        ProjectContext::locate(dir).unwrap()
    }

    fn sh(script: &str, dir: &Path) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script).current_dir(dir)
    }

    /// Commands that leave a marker file behind when they run.
    fn tracing_commands(dir: &Path, compile_exit: i32) -> StageCommands {
        StageCommands {
            pkgs_update: sh("touch ran_pkgs", dir),
            clean: sh("touch ran_clean", dir),
            compile: sh(&format!("touch ran_compile; exit {compile_exit}"), dir),
            flash: sh("touch ran_flash", dir),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_full_run_executes_stages_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        fs::write(&ctx.flash_script, "#!/bin/sh\n").unwrap();
        let cfg = cfg_from(&["-y", "-c"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(outcome, RunOutcome::Success);
        assert!(tmp.path().join("ran_pkgs").exists());
        assert!(tmp.path().join("ran_clean").exists());
        assert!(tmp.path().join("ran_compile").exists());
        assert!(tmp.path().join("ran_flash").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_failure_stops_before_flash() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        fs::write(&ctx.flash_script, "#!/bin/sh\n").unwrap();
        let cfg = cfg_from(&["-y"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 2));
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(
            outcome,
            RunOutcome::StageFailed {
                stage: "compile",
                command: "sh -c touch ran_compile; exit 2".to_string(),
                code: 2,
            }
        );
        assert!(!tmp.path().join("ran_flash").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_compile_failure_code_wins_even_with_skip_flash() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        let cfg = cfg_from(&["-y", "-f"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 2));
        let outcome = pipeline.run_build_stages().unwrap();
        assert!(matches!(outcome, RunOutcome::StageFailed { code: 2, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_skip_flags_suppress_stages() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        let cfg = cfg_from(&["-y", "-p", "-f"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(outcome, RunOutcome::Success);
        assert!(!tmp.path().join("ran_pkgs").exists());
        assert!(!tmp.path().join("ran_clean").exists());
        assert!(!tmp.path().join("ran_flash").exists());
        assert!(tmp.path().join("ran_compile").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_refusal_at_compile_cancels_and_blocks_flash() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        fs::write(&ctx.flash_script, "#!/bin/sh\n").unwrap();
        let cfg = cfg_from(&[]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        pipeline.confirm = |stage, _, _| Ok(stage != "compile");
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(interrupt::finalize(&outcome, &ctx, &logger), 0);
        assert!(tmp.path().join("ran_pkgs").exists());
        assert!(!tmp.path().join("ran_compile").exists());
        assert!(!tmp.path().join("ran_flash").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_before_any_stage_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        let cfg = cfg_from(&["-y"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        pipeline.interrupted = || true;
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(outcome, RunOutcome::Interrupted { code: 130 });
        assert!(!tmp.path().join("ran_pkgs").exists());
        assert!(!tmp.path().join("ran_compile").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_during_prompt_wins_over_approval() {
        static HIT: AtomicBool = AtomicBool::new(false);

        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        let cfg = cfg_from(&["-p", "-f"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        // the signal lands while the prompt is open; the user then approves
        pipeline.confirm = |_, _, _| {
            HIT.store(true, Ordering::SeqCst);
            Ok(true)
        };
        pipeline.interrupted = || HIT.load(Ordering::SeqCst);
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(outcome, RunOutcome::Interrupted { code: 130 });
        assert!(!tmp.path().join("ran_compile").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_interrupt_at_summary_prompt_is_observed() {
        static AT_SUMMARY: AtomicBool = AtomicBool::new(false);

        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        let cfg = cfg_from(&["-p", "-f"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        pipeline.confirm = |stage, _, _| {
            if stage == "summary" {
                AT_SUMMARY.store(true, Ordering::SeqCst);
            }
            Ok(true)
        };
        pipeline.interrupted = || AT_SUMMARY.load(Ordering::SeqCst);
        let outcome = pipeline.run_build_stages().unwrap();

        assert_eq!(outcome, RunOutcome::Interrupted { code: 130 });
        assert!(tmp.path().join("ran_compile").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_flash_only_interrupt_aborts_before_flash() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        fs::write(&ctx.flash_script, "#!/bin/sh\n").unwrap();
        let cfg = cfg_from(&["-y", "-F"]);
        let logger = Logger::console_only();

        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        pipeline.interrupted = || true;
        let outcome = pipeline.run_flash_only().unwrap();

        assert_eq!(outcome, RunOutcome::Interrupted { code: 130 });
        assert!(!tmp.path().join("ran_flash").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_flash_script_gets_execute_bit_after_approval() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        fs::write(&ctx.flash_script, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&ctx.flash_script).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&ctx.flash_script, perms).unwrap();

        let cfg = cfg_from(&["-y", "-p", "-f"]);
        let logger = Logger::console_only();
        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        pipeline.flash_stage().unwrap();

        let mode = fs::metadata(&ctx.flash_script).unwrap().permissions().mode();
        assert_ne!(mode & 0o100, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_refused_flash_leaves_permissions_alone() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        fs::write(&ctx.flash_script, "#!/bin/sh\n").unwrap();
        let mut perms = fs::metadata(&ctx.flash_script).unwrap().permissions();
        perms.set_mode(0o644);
        fs::set_permissions(&ctx.flash_script, perms).unwrap();

        let cfg = cfg_from(&[]);
        let logger = Logger::console_only();
        let mut pipeline =
            Pipeline::with_commands(&cfg, &ctx, &logger, tracing_commands(tmp.path(), 0));
        pipeline.confirm = |_, _, _| Ok(false);
        let flow = pipeline.flash_stage().unwrap();

        assert!(matches!(flow, Flow::Stop(RunOutcome::Cancelled)));
        let mode = fs::metadata(&ctx.flash_script).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0);
        assert!(!tmp.path().join("ran_flash").exists());
    }

    #[test]
    fn test_missing_flash_script_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = project(tmp.path());
        let err = flash_script_present(&ctx).unwrap_err();
        assert!(err.to_string().contains("flash script not found"));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::PackageUpdate.name(), "package update");
        assert_eq!(Stage::Flash.name(), "flash");
    }
}
