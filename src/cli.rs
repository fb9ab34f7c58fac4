use clap::Parser;

/// Command-line surface for the orchestrator.
///
/// Short forms follow the original workflow script; `--keep-logs` takes the
/// retention window in days.
#[derive(Parser, Debug)]
#[command(name = "rtbuild")]
#[command(about = "Staged build-and-flash orchestrator for RT-Thread BSPs")]
pub struct Cli {
    /// Answer yes to every per-stage confirmation
    #[arg(short = 'y', long = "yes")]
    pub yes: bool,

    /// Skip the package-manager update stage (pkgs --update)
    #[arg(short = 'p', long = "skip-pkgs")]
    pub skip_pkgs: bool,

    /// Skip the flash stage
    #[arg(short = 'f', long = "skip-flash")]
    pub skip_flash: bool,

    /// Run `scons -c` before compiling
    #[arg(short = 'c', long = "clean")]
    pub clean: bool,

    /// Flash only: skip package update, clean and compile
    #[arg(short = 'F', long = "flash-only")]
    pub flash_only: bool,

    /// Mirror all console output to a timestamped log file under logs/
    #[arg(short = 'l', long = "log")]
    pub log: bool,

    /// Delete logs/build_*.log files older than DAYS before running
    #[arg(long = "keep-logs", value_name = "DAYS")]
    pub keep_logs: Option<u32>,

    /// Write verbose trace records to the debug log
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,

    /// Run the preflight checks only and exit
    #[arg(long = "check")]
    pub check: bool,

    /// With --check: print the results as JSON on stdout
    #[arg(long = "json", requires = "check")]
    pub json: bool,
}
