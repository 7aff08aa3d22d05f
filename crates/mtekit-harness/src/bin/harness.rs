//! CLI entrypoint for the mtekit scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mtekit::MteConfig;
use mtekit_harness::structured_log::{
    ArtifactIndex, LogEmitter, LogEntry, LogLevel, StreamKind, validate_log_file,
};
use mtekit_harness::{ScenarioOptions, probe, run_all};

const SUITE: &str = "mtekit";

/// Contract scenarios and host probing for mtekit.
#[derive(Debug, Parser)]
#[command(name = "mtekit-harness")]
#[command(about = "Scenario harness for mtekit tagging primitives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every contract scenario on the shadow backend.
    Scenarios {
        /// Alignment checks (`full`, `relaxed` or `off`); defaults to the build's level.
        #[arg(long)]
        align_checks: Option<String>,
        /// Mask out-of-range tags to their low nibble instead of aborting.
        #[arg(long)]
        no_tag_checks: bool,
        /// Use single-granule stores only.
        #[arg(long)]
        no_double_granule: bool,
        /// Random draws per excluded tag.
        #[arg(long, default_value_t = 1000)]
        iterations: u32,
        /// Shadow generator seed (decimal or 0x...).
        #[arg(long, default_value = "0x5EED")]
        seed: String,
        /// Run identifier used in trace ids.
        #[arg(long, default_value = "local")]
        run_id: String,
        /// Structured JSONL log path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// JSON report path (if omitted, prints to stdout).
        #[arg(long)]
        report: Option<PathBuf>,
        /// Artifact index path, hashing the log and report.
        #[arg(long)]
        artifact_index: Option<PathBuf>,
    },
    /// Report MTE support of this host and build.
    Probe {
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        #[arg(long)]
        log: PathBuf,
    },
}

fn parse_seed(raw: &str) -> Result<u64, Box<dyn std::error::Error>> {
    let s = raw.trim();
    let seed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        let hex = hex.replace('_', "");
        u64::from_str_radix(&hex, 16)?
    } else {
        let dec = s.replace('_', "");
        dec.parse::<u64>()?
    };
    Ok(seed)
}

fn write_or_print(path: Option<&PathBuf>, body: &str) -> std::io::Result<()> {
    match path {
        Some(path) => std::fs::write(path, body),
        None => {
            println!("{body}");
            Ok(())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Scenarios {
            align_checks,
            no_tag_checks,
            no_double_granule,
            iterations,
            seed,
            run_id,
            log,
            report,
            artifact_index,
        } => {
            let alignment = ScenarioOptions::alignment_from_arg(align_checks.as_deref())?;
            let config = MteConfig::BUILD
                .with_alignment(alignment)
                .with_tag_checks(!no_tag_checks)
                .with_double_granule(!no_double_granule);
            let options = ScenarioOptions {
                config,
                iterations,
                seed: parse_seed(&seed)?,
            };
            let started = std::time::Instant::now();
            let result = run_all(&options);

            if let Some(path) = &log {
                let mut emitter = LogEmitter::to_file(path, SUITE, &run_id)?;
                result.emit_to(&mut emitter)?;
                let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                emitter.emit_entry(
                    LogEntry::new("", LogLevel::Info, "harness_exit")
                        .with_stream(StreamKind::Scenario)
                        .with_duration_ms(elapsed),
                )?;
                emitter.flush()?;
            }
            write_or_print(report.as_ref(), &serde_json::to_string_pretty(&result)?)?;

            for r in result.results.iter().filter(|r| r.message.is_some()) {
                eprintln!(
                    "{:?} {}: {}",
                    r.outcome,
                    r.name,
                    r.message.as_deref().unwrap_or_default()
                );
            }
            eprintln!(
                "scenarios: {} passed, {} failed, {} skipped (alignment={}, tag_checks={}, double_granule={})",
                result.passed,
                result.failed,
                result.skipped,
                result.alignment,
                result.tag_checks,
                result.double_granule,
            );

            if let Some(index_path) = &artifact_index {
                let mut index = ArtifactIndex::new(&run_id, SUITE);
                if let Some(path) = &log {
                    index.add_file(path, "log")?;
                }
                if let Some(path) = &report {
                    index.add_file(path, "report")?;
                }
                std::fs::write(index_path, index.to_json()?)?;
            }

            if !result.all_passed() {
                return Err(format!("{} scenario(s) failed", result.failed).into());
            }
        }
        Command::Probe { output } => {
            let report = probe();
            write_or_print(output.as_ref(), &serde_json::to_string_pretty(&report)?)?;
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for err in &errors {
                eprintln!("{err}");
            }
            if !errors.is_empty() {
                return Err(format!("{} error(s) in {lines} line(s)", errors.len()).into());
            }
            eprintln!("{}: {lines} valid line(s)", log.display());
        }
    }

    Ok(())
}
