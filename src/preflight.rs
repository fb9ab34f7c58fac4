//! Preflight gates: external tools and the Python virtualenv.
//!
//! The tool check runs before the venv check on purpose: a missing
//! venv-provided command would otherwise surface as a confusing stage
//! failure much later.

use crate::logger::Logger;
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::PathBuf;

/// One external command the workflow depends on.
pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    pub install_hint: &'static str,
}

/// Commands that must resolve before any stage runs.
pub const REQUIRED_TOOLS: &[Tool] = &[
    Tool {
        name: "scons",
        description: "SCons build tool",
        install_hint: "pip3 install scons",
    },
    Tool {
        name: "arm-none-eabi-gcc",
        description: "ARM GCC cross compiler",
        install_hint: "apt install gcc-arm-none-eabi",
    },
    Tool {
        name: "arm-none-eabi-objcopy",
        description: "ARM objcopy",
        install_hint: "apt install binutils-arm-none-eabi",
    },
    Tool {
        name: "arm-none-eabi-size",
        description: "ARM size tool",
        install_hint: "apt install binutils-arm-none-eabi",
    },
];

/// Nice-to-have commands, reported by `--check` but never gating.
pub const OPTIONAL_TOOLS: &[Tool] = &[
    Tool {
        name: "arm-none-eabi-gdb",
        description: "GDB debugger",
        install_hint: "apt install gdb-multiarch",
    },
    Tool {
        name: "openocd",
        description: "OpenOCD programmer",
        install_hint: "apt install openocd",
    },
    Tool {
        name: "picocom",
        description: "serial terminal",
        install_hint: "apt install picocom",
    },
];

/// Environment variable a virtualenv activation sets.
pub const VENV_VAR: &str = "VIRTUAL_ENV";

/// Verify every required command resolves on PATH.
pub fn check_tools(logger: &Logger) -> Result<()> {
    let mut missing = Vec::new();

    for tool in REQUIRED_TOOLS {
        match which::which(tool.name) {
            Ok(path) => {
                logger.info(&format!("[OK] {} ({})", tool.name, path.display()));
            }
            Err(_) => {
                logger.error(&format!("[FAIL] {} not found in PATH", tool.name));
                missing.push(tool);
            }
        }
    }

    if !missing.is_empty() {
        let hints: Vec<String> = missing
            .iter()
            .map(|t| format!("  {} ({}): {}", t.name, t.description, t.install_hint))
            .collect();
        bail!(
            "missing required command{}:\n{}",
            if missing.len() == 1 { "" } else { "s" },
            hints.join("\n")
        );
    }

    Ok(())
}

/// Verify a Python virtualenv is active.
pub fn check_venv(logger: &Logger) -> Result<()> {
    match std::env::var_os(VENV_VAR) {
        Some(v) if !v.is_empty() => {
            logger.info(&format!("[OK] virtualenv active ({})", v.to_string_lossy()));
            Ok(())
        }
        _ => bail!(
            "no Python virtualenv is active ({VENV_VAR} is unset).\n\
             Activate the project environment first, e.g.:\n\
             \x20 source .venv/bin/activate"
        ),
    }
}

/// Result of one `--check` probe, JSON-serializable.
#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<&'static str>,
}

fn probe(tool: &'static Tool, required: bool) -> CheckResult {
    let found = which::which(tool.name).ok();
    CheckResult {
        name: tool.name,
        description: tool.description,
        required,
        ok: found.is_some(),
        install_hint: if found.is_some() {
            None
        } else {
            Some(tool.install_hint)
        },
        path: found,
    }
}

/// Probe every tool plus the venv without aborting on failures.
pub fn probe_all() -> Vec<CheckResult> {
    let mut results: Vec<CheckResult> = REQUIRED_TOOLS.iter().map(|t| probe(t, true)).collect();
    results.extend(OPTIONAL_TOOLS.iter().map(|t| probe(t, false)));
    results.push(CheckResult {
        name: VENV_VAR,
        description: "Python virtualenv active",
        required: true,
        ok: venv_active(),
        path: None,
        install_hint: if venv_active() {
            None
        } else {
            Some("source .venv/bin/activate")
        },
    });
    results
}

fn venv_active() -> bool {
    std::env::var_os(VENV_VAR).is_some_and(|v| !v.is_empty())
}

/// `--check` mode: report every probe and return whether all required ones
/// passed. With `json`, the report goes to stdout as a JSON array.
pub fn report(json: bool) -> Result<bool> {
    let results = probe_all();
    let all_ok = results.iter().all(|r| r.ok || !r.required);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(all_ok);
    }

    for r in &results {
        let status = if r.ok {
            "[OK]  "
        } else if r.required {
            "[FAIL]"
        } else {
            "[WARN]"
        };
        match (&r.path, r.install_hint) {
            (Some(path), _) => eprintln!("{status} {:24} {}", r.name, path.display()),
            (None, Some(hint)) => eprintln!("{status} {:24} missing, try: {hint}", r.name),
            (None, None) => eprintln!("{status} {:24} {}", r.name, r.description),
        }
    }

    Ok(all_ok)
}
