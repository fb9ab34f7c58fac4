//! Stage command execution.
//!
//! Commands are structured descriptors (program + argument list), never
//! shell-interpolated strings. The gateway mirrors stage output to the log
//! file when one is open and folds the child's exit status into a
//! [`StageOutcome`] for the pipeline to match on.

use crate::logger::Logger;
use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

/// A stage command: program, arguments, optional working directory.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Human-readable rendering for prompts, banners and logs.
    pub fn render(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }
}

/// How a stage command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    Failed(i32),
    /// Killed by a signal; carries the conventional 128+signo code.
    Interrupted(i32),
}

impl StageOutcome {
    pub fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(0) => StageOutcome::Completed,
            Some(code) => StageOutcome::Failed(code),
            None => StageOutcome::Interrupted(signal_code(status)),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            StageOutcome::Completed => 0,
            StageOutcome::Failed(code) | StageOutcome::Interrupted(code) => code,
        }
    }
}

#[cfg(unix)]
fn signal_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map_or(130, |sig| 128 + sig)
}

#[cfg(not(unix))]
fn signal_code(_status: ExitStatus) -> i32 {
    130
}

/// Run one stage command to completion and classify the result.
///
/// The banner and the literal command go to stderr; the child's stdout
/// passes through to our stdout so tool output stays pipeable. With file
/// logging on, both child streams are tee'd line-by-line into the log
/// between bracketed begin/end markers.
pub fn run_stage(desc: &str, spec: &CommandSpec, logger: &Logger) -> Result<StageOutcome> {
    logger.info(&format!("{desc}: {}", spec.render()));
    logger.debug(&format!("spawning {:?}", spec));

    let status = if logger.file_logging_enabled() {
        logger.raw(&format!("[BEGIN {desc}] {}", spec.render()));
        let status = run_tee(spec, logger)?;
        logger.raw(&format!(
            "[END {desc} exit={}]",
            StageOutcome::from_status(status).code()
        ));
        status
    } else {
        spec.command()
            .status()
            .with_context(|| format!("failed to run {}", spec.render()))?
    };

    let outcome = StageOutcome::from_status(status);
    match outcome {
        StageOutcome::Completed => logger.success(&format!("{desc} finished")),
        StageOutcome::Failed(code) => {
            logger.error(&format!("{desc} failed with exit code {code}"));
        }
        StageOutcome::Interrupted(code) => {
            logger.warn(&format!("{desc} interrupted (exit code {code})"));
        }
    }
    Ok(outcome)
}

/// Run with both child streams piped, echoing each line to the matching
/// parent stream and appending it to the log. The two pump threads live
/// only until the child closes its pipes; all decisions happen after both
/// have joined.
fn run_tee(spec: &CommandSpec, logger: &Logger) -> Result<ExitStatus> {
    let mut child = spec
        .command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to run {}", spec.render()))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    std::thread::scope(|s| {
        if let Some(out) = stdout {
            s.spawn(|| pump(out, false, logger));
        }
        if let Some(err) = stderr {
            s.spawn(|| pump(err, true, logger));
        }
    });

    child
        .wait()
        .with_context(|| format!("failed to wait for {}", spec.render()))
}

fn pump(stream: impl Read, to_stderr: bool, logger: &Logger) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if to_stderr {
                    eprintln!("{line}");
                } else {
                    println!("{line}");
                }
                logger.raw(line);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(_) => break,
        }
    }
}
