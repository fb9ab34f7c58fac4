//! Interruption observation and terminal-state reporting.
//!
//! The SIGINT handler only records that the signal happened; children keep
//! the default disposition and die on their own. Control flow reacts to
//! either the recorded flag or the child's signal-death exit status, so no
//! mid-run trap reassignment decides what happens next.

use crate::logger::{Logger, DEBUG_LOG_NAME};
use crate::pipeline::RunOutcome;
use crate::project::ProjectContext;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static FINALIZED: AtomicBool = AtomicBool::new(false);

pub fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Install the SIGINT flag handler. Once per process, at startup.
#[cfg(unix)]
pub fn install() -> Result<()> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    extern "C" fn on_sigint(_: nix::libc::c_int) {
        INTERRUPTED.store(true, Ordering::SeqCst);
    }

    let action = SigAction::new(
        SigHandler::Handler(on_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe { sigaction(Signal::SIGINT, &action) }?;
    Ok(())
}

#[cfg(not(unix))]
pub fn install() -> Result<()> {
    Ok(())
}

/// Turn the pipeline's terminal state into the process exit code, printing
/// the closing message (and recovery guidance on failure) exactly once.
pub fn finalize(outcome: &RunOutcome, ctx: &ProjectContext, logger: &Logger) -> i32 {
    let code = exit_code(outcome);
    if FINALIZED.swap(true, Ordering::SeqCst) {
        return code;
    }

    match outcome {
        RunOutcome::Success | RunOutcome::Cancelled => {}
        RunOutcome::Interrupted { code } => {
            logger.warn(&format!("interrupted by user (exit code {code})"));
        }
        RunOutcome::StageFailed {
            stage,
            command,
            code,
        } => {
            logger.error(&format!("{stage} failed with exit code {code}"));
            logger.error("recovery suggestions:");
            logger.error("  1. make sure the project virtualenv is active (source .venv/bin/activate)");
            logger.error(&format!(
                "  2. re-run the failing command by hand: cd {} && {}",
                ctx.root.display(),
                command
            ));
            if let Some(log) = &ctx.log_file {
                logger.error(&format!("  3. inspect the run log: {}", log.display()));
            }
            if logger.debug_enabled() {
                logger.error(&format!(
                    "  4. inspect the debug log: {}",
                    std::env::temp_dir().join(DEBUG_LOG_NAME).display()
                ));
            }
        }
    }

    code
}

fn exit_code(outcome: &RunOutcome) -> i32 {
    match outcome {
        // explicit cancellation is not an error
        RunOutcome::Success | RunOutcome::Cancelled => 0,
        RunOutcome::StageFailed { code, .. } | RunOutcome::Interrupted { code } => *code,
    }
}
