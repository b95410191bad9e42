use anyhow::Result;
use clap::{Parser, Subcommand};
use dllscan::commands::{patterns_command, scan_command, OutputFormat, ScanArgs};
use dllscan::logging::init_tracing;

/// Native library inventory and dependency confirmation CLI.
///
/// This CLI is a thin wrapper around `dllscan-core` (exposed in code as `dllscan_core`).
/// All substantive logic lives in the library so it can be tested thoroughly
/// and reused from other frontends.
#[derive(Parser, Debug)]
#[command(
    name = "dllscan",
    version,
    about = "Inventory DLLs in a tree and confirm which ones the source code uses",
    long_about = None
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). Logs go to stderr;
    /// version-extraction details are also kept in
    /// `~/.dll-scanner/logs/dll_version_extraction.log` (or `$DLLSCAN_LOG_DIR`).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan a directory (or a single file) for DLLs and extract their metadata.
    ///
    /// With `--source` (or `--confirm`) the source tree is also searched for
    /// evidence that each discovered library is actually used.
    Scan {
        /// Directory to scan, or a single binary.
        path: String,

        /// Only scan the top-level directory.
        #[arg(long, default_value_t = false)]
        no_recursive: bool,

        /// Worker threads. Defaults to the config value, then available parallelism.
        #[arg(long)]
        workers: Option<usize>,

        /// Source tree to search for library references.
        #[arg(long)]
        source: Option<String>,

        /// Confirm dependencies; without `--source` the scanned directory is searched.
        #[arg(long, default_value_t = false)]
        confirm: bool,

        /// YAML or JSON scan config.
        #[arg(long)]
        config: Option<String>,

        /// Report format written to stdout (or `--output`).
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Write the report to a file instead of stdout.
        #[arg(long, short)]
        output: Option<String>,

        /// Also write a CycloneDX 1.6 SBOM to this file.
        #[arg(long)]
        cyclonedx: Option<String>,

        /// Project name recorded in the SBOM. Defaults to the scanned directory name.
        #[arg(long)]
        project_name: Option<String>,

        /// Project version recorded in the SBOM.
        #[arg(long, default_value = "1.0.0")]
        project_version: String,
    },

    /// List the languages and confirmation rules known to the pattern registry.
    Patterns {
        /// Include rules from this config's `extra_patterns`.
        #[arg(long)]
        config: Option<String>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.json_logs);

    match cli.command {
        Command::Scan {
            path,
            no_recursive,
            workers,
            source,
            confirm,
            config,
            format,
            output,
            cyclonedx,
            project_name,
            project_version,
        } => scan_command(&ScanArgs {
            path,
            recursive: !no_recursive,
            workers,
            source,
            confirm,
            config,
            format,
            output,
            cyclonedx,
            project_name,
            project_version,
        })?,
        Command::Patterns { config, json } => patterns_command(config.as_deref(), json)?,
    }

    Ok(())
}
