//! Spool CLI - operator surface over spool durable blob storage.
//!
//! Subcommands map onto the storage API:
//! - `put`: persist a payload as a new blob
//! - `take`: lease the oldest available blob, emit it, delete it
//! - `list`: show every entry in the storage directory
//! - `maintain`: run a maintenance sweep
//! - `status`: show usage and entry counts

mod exit_codes;
mod logging;
mod settings;

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use spool_storage::{
    BlobProvider, EntryState, EntrySummary, MaintenanceReport, StorageError, StorageStatus,
};
use tracing::{debug, info};

use crate::exit_codes::ExitCode;
use crate::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use crate::settings::{Overrides, SettingsError, ENV_CONFIG, ENV_DIR};

/// Spool - durable on-disk buffer for telemetry blobs
#[derive(Parser)]
#[command(name = "spool")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Storage directory
    #[arg(long, global = true, env = ENV_DIR)]
    dir: Option<PathBuf>,

    /// TOML config file with storage settings
    #[arg(long, global = true, env = ENV_CONFIG)]
    config: Option<PathBuf>,

    /// Byte ceiling for the storage directory
    #[arg(long, global = true)]
    max_size_bytes: Option<u64>,

    /// Maximum number of blobs kept
    #[arg(long, global = true)]
    max_blobs: Option<usize>,

    /// Append maintenance events as JSONL to this directory
    #[arg(long, global = true)]
    event_log_dir: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, value_enum, default_value_t = OutputFormat::Human)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Log format (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Persist a payload (from a file or stdin) as a new blob
    Put(PutArgs),

    /// Lease the oldest available blob and write its payload out
    Take(TakeArgs),

    /// List every entry in the storage directory
    List,

    /// Run a maintenance sweep now
    Maintain,

    /// Show storage usage and entry counts
    Status,
}

// ============================================================================
// Command argument structs
// ============================================================================

#[derive(Args, Debug)]
struct PutArgs {
    /// Read the payload from this file instead of stdin
    #[arg(long)]
    file: Option<PathBuf>,

    /// Publish the blob already leased for this many milliseconds
    #[arg(long, default_value_t = 0)]
    lease_ms: u64,
}

#[derive(Args, Debug)]
struct TakeArgs {
    /// Lease period in milliseconds (default: configured lease)
    #[arg(long)]
    lease_ms: Option<u64>,

    /// Write the payload to this file instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,

    /// Release the blob instead of deleting it
    #[arg(long)]
    keep: bool,
}

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = if e.use_stderr() {
                ExitCode::ArgsError
            } else {
                // --help and --version
                ExitCode::Clean
            };
            std::process::exit(code.as_i32());
        }
    };

    let log_config = LogConfig::from_env(cli.global.log_level, cli.global.log_format);
    init_logging(&log_config);

    let exit_code = match open_provider(&cli.global) {
        Ok(provider) => match &cli.command {
            Commands::Put(args) => run_put(&cli.global, &provider, args),
            Commands::Take(args) => run_take(&cli.global, &provider, args),
            Commands::List => run_list(&cli.global, &provider),
            Commands::Maintain => run_maintain(&cli.global, &provider),
            Commands::Status => run_status(&cli.global, &provider),
        },
        Err(e) => output_error(&cli.global, &e),
    };

    std::process::exit(exit_code.as_i32());
}

/// Failure surfaced to the user, with the exit code it maps to.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    fn io(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        CliError::Io {
            op,
            path: path.display().to_string(),
            source,
        }
    }

    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::Settings(_) => ExitCode::ArgsError,
            CliError::Storage(e) => ExitCode::from(e),
            CliError::Io { .. } => ExitCode::IoError,
        }
    }
}

fn open_provider(global: &GlobalOpts) -> Result<BlobProvider, CliError> {
    let overrides = Overrides {
        directory: global.dir.clone(),
        max_size_bytes: global.max_size_bytes,
        max_blobs: global.max_blobs,
        event_log_dir: global.event_log_dir.clone(),
    };
    let (config, _source) = settings::resolve(global.config.as_deref(), &overrides)?;
    Ok(BlobProvider::new(config)?)
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_put(global: &GlobalOpts, provider: &BlobProvider, args: &PutArgs) -> ExitCode {
    let payload = match read_payload(args.file.as_deref()) {
        Ok(payload) => payload,
        Err(e) => return output_error(global, &e),
    };

    let lease = (args.lease_ms > 0).then(|| Duration::from_millis(args.lease_ms));
    let blob = match provider.create_blob(&payload, lease) {
        Ok(blob) => blob,
        Err(e) => return output_error(global, &e.into()),
    };

    let file_name = blob
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    info!("Stored {} bytes as {}", payload.len(), file_name);

    match global.format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "status": "stored",
            "blob": file_name,
            "path": blob.path().display().to_string(),
            "size_bytes": payload.len(),
            "lease_expires_at": blob.lease_expiry(),
        })),
        OutputFormat::Human => println!("{}", file_name),
    }
    ExitCode::Clean
}

fn run_take(global: &GlobalOpts, provider: &BlobProvider, args: &TakeArgs) -> ExitCode {
    let lease = args.lease_ms.map(Duration::from_millis);
    let Some(mut blob) = provider.lease_next(lease) else {
        debug!("No blob available in {}", provider.directory().root().display());
        if global.format == OutputFormat::Json && args.out.is_some() {
            print_json(&serde_json::json!({ "status": "empty" }));
        }
        return ExitCode::NothingAvailable;
    };

    let result = blob.read().map_err(CliError::from).and_then(|payload| {
        write_payload(args.out.as_deref(), &payload)?;
        Ok(payload.len())
    });
    let size = match result {
        Ok(size) => size,
        Err(e) => {
            // Leave the blob for the next taker.
            blob.try_release();
            return output_error(global, &e);
        }
    };

    let file_name = blob
        .path()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let disposition = if args.keep {
        if let Err(e) = blob.release() {
            return output_error(global, &e.into());
        }
        "released"
    } else {
        if let Err(e) = blob.delete() {
            return output_error(global, &e.into());
        }
        "deleted"
    };
    info!("Took {} ({} bytes, {})", file_name, size, disposition);

    if let (OutputFormat::Json, Some(out)) = (global.format, &args.out) {
        print_json(&serde_json::json!({
            "status": disposition,
            "blob": file_name,
            "size_bytes": size,
            "out": out.display().to_string(),
        }));
    }
    ExitCode::Clean
}

fn run_list(global: &GlobalOpts, provider: &BlobProvider) -> ExitCode {
    let entries = match provider.directory().scan() {
        Ok(entries) => entries,
        Err(e) => return output_error(global, &e.into()),
    };
    let now = chrono::Utc::now();
    let summaries: Vec<EntrySummary> = entries.iter().map(|e| e.summary(now)).collect();

    match global.format {
        OutputFormat::Json => print_json(&summaries),
        OutputFormat::Human => {
            if summaries.is_empty() {
                println!("(empty)");
            }
            for s in &summaries {
                let lease = s
                    .lease_expires_at
                    .map(|at| format!("  lease until {}", at.to_rfc3339()))
                    .unwrap_or_default();
                println!(
                    "{:<13} {:>10}  {:>6}s  {}{}",
                    state_label(s.state),
                    format_bytes(s.size_bytes),
                    s.age_secs,
                    s.file_name,
                    lease
                );
            }
        }
    }
    ExitCode::Clean
}

fn run_maintain(global: &GlobalOpts, provider: &BlobProvider) -> ExitCode {
    let report = match provider.maintain() {
        Ok(report) => report,
        Err(e) => return output_error(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Human => print_maintenance_report(&report),
    }
    ExitCode::Clean
}

fn run_status(global: &GlobalOpts, provider: &BlobProvider) -> ExitCode {
    let status = match provider.status() {
        Ok(status) => status,
        Err(e) => return output_error(global, &e.into()),
    };

    match global.format {
        OutputFormat::Json => print_json(&status),
        OutputFormat::Human => print_status(&status),
    }
    ExitCode::Clean
}

// ============================================================================
// Input / output helpers
// ============================================================================

fn read_payload(file: Option<&Path>) -> Result<Vec<u8>, CliError> {
    match file {
        Some(path) => std::fs::read(path).map_err(|e| CliError::io("read", path, e)),
        None => {
            let mut payload = Vec::new();
            std::io::stdin()
                .read_to_end(&mut payload)
                .map_err(|e| CliError::io("read", Path::new("<stdin>"), e))?;
            Ok(payload)
        }
    }
}

fn write_payload(out: Option<&Path>, payload: &[u8]) -> Result<(), CliError> {
    match out {
        Some(path) => std::fs::write(path, payload).map_err(|e| CliError::io("write", path, e)),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout
                .write_all(payload)
                .and_then(|()| stdout.flush())
                .map_err(|e| CliError::io("write", Path::new("<stdout>"), e))
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to serialize output: {}", e),
    }
}

fn print_maintenance_report(report: &MaintenanceReport) {
    println!("# Maintenance");
    println!();
    println!(
        "Before: {} in {} blobs",
        format_bytes(report.before.total_bytes),
        report.before.blob_count
    );
    println!(
        "After:  {} in {} blobs",
        format_bytes(report.after.total_bytes),
        report.after.blob_count
    );
    if !report.capacity_satisfied {
        println!("Warning: still over capacity; remaining blobs are leased");
    }
    println!();
    if report.events.is_empty() {
        println!("No actions taken.");
    }
    for event in &report.events {
        println!(
            "  {} ({}, {}s old) - {:?}",
            event.file_name,
            format_bytes(event.size_bytes),
            event.age_secs,
            event.reason
        );
    }
}

fn print_status(status: &StorageStatus) {
    println!("# Storage Status");
    println!();
    println!("Directory: {}", status.root_dir);
    println!(
        "Usage:     {} / {} ({:.1}%)",
        format_bytes(status.total_bytes),
        format_bytes(status.max_size_bytes),
        status.budget_used_pct
    );
    if let Some(max_blobs) = status.max_blobs {
        println!(
            "Blobs:     {} / {}",
            status.committed + status.leased + status.lease_expired,
            max_blobs
        );
    }
    println!();
    println!("Committed:     {}", status.committed);
    println!("Leased:        {}", status.leased);
    println!("Lease expired: {}", status.lease_expired);
    println!("In flight:     {}", status.temp);
    println!("Foreign:       {}", status.foreign);
    if let Some(age) = status.oldest_blob_age_secs {
        println!();
        println!("Oldest blob: {}s", age);
    }
    if status.retention_eligible > 0 {
        println!("Past retention: {}", status.retention_eligible);
    }
}

fn state_label(state: EntryState) -> &'static str {
    match state {
        EntryState::Committed => "committed",
        EntryState::Leased => "leased",
        EntryState::LeaseExpired => "lease_expired",
        EntryState::Temp => "temp",
        EntryState::Foreign => "foreign",
    }
}

fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Report an error on stderr in the selected format.
fn output_error(global: &GlobalOpts, error: &CliError) -> ExitCode {
    let exit_code = error.exit_code();

    match global.format {
        OutputFormat::Json => {
            let response = serde_json::json!({
                "status": "error",
                "error": {
                    "code": exit_code.as_i32(),
                    "kind": exit_code.to_string(),
                    "message": error.to_string(),
                }
            });
            match serde_json::to_string_pretty(&response) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("Error: {}", error),
            }
        }
        OutputFormat::Human => eprintln!("Error: {}", error),
    }

    exit_code
}
