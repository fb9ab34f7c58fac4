//! Per-stage confirmation gate.
//!
//! Prints the stage and the exact command about to run, then reads one
//! line per prompt. Empty input and `y`/`yes` approve; `n`/`no` cancels the
//! whole run; anything else re-prompts. Reading strictly line-by-line means
//! a stray buffered keypress can answer at most one prompt.

use crate::logger::colors;
use anyhow::{Context, Result};
use std::io::{BufRead, Write};

/// Ask for approval on `input`/`prompt_out`. Returns `false` on `n`/`no`
/// or end-of-input (closed stdin counts as refusal, not approval).
pub fn ask(
    stage: &str,
    command: &str,
    input: &mut impl BufRead,
    prompt_out: &mut impl Write,
) -> Result<bool> {
    loop {
        write!(
            prompt_out,
            "{}{}{} — {} [Y/n] ",
            colors::BOLD,
            stage,
            colors::RESET,
            command
        )?;
        prompt_out.flush()?;

        let mut line = String::new();
        let n = input.read_line(&mut line).context("failed to read confirmation")?;
        if n == 0 {
            return Ok(false);
        }

        match line.trim().to_ascii_lowercase().as_str() {
            "" | "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            other => {
                writeln!(prompt_out, "unrecognized answer '{other}', expected y or n")?;
            }
        }
    }
}

/// Interactive gate over stdin/stderr; auto-approves under `assume_yes`.
pub fn confirm_stage(stage: &str, command: &str, assume_yes: bool) -> Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut err = std::io::stderr();
    ask(stage, command, &mut input, &mut err)
}
