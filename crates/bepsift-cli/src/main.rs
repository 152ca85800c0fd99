//! bepsift - Summarize Bazel build failures from a BEP file
//!
//! This tool reads a `--build_event_binary_file` stream, extracts failing
//! targets with their diagnostics and source locations, prints a summary,
//! and optionally publishes it as a Buildkite annotation.

use anyhow::{Context, Result};
use bepsift_core::error::EXIT_INPUT_ERROR;
use bepsift_core::publish::DEFAULT_CONTEXT;
use bepsift_core::{
    publish_blocking, AnalysisReport, Analyzer, AnalyzerConfig, Annotation, Cancellation, JsonRenderer,
    MarkdownRenderer, PublishError, Publisher, Renderer, RetryPolicy, SourceLinker, TextRenderer,
};
use clap::{Parser, ValueEnum};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Summarize Bazel build failures from a BEP file
#[derive(Parser, Debug)]
#[command(name = "bepsift")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the binary BEP file (--build_event_binary_file)
    bep_file: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    output_format: OutputFormat,

    /// Print nothing and exit 0 when no failures are found
    #[arg(long)]
    skip_if_no_failures: bool,

    /// Reject BEP files larger than this many MiB
    #[arg(long, default_value = "100")]
    max_file_size_mb: u64,

    /// Maximum number of failures to report
    #[arg(long, default_value = "50")]
    max_failures: usize,

    /// Stop reading after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Publish the summary as a Buildkite annotation
    #[arg(long)]
    annotate: bool,

    /// Annotation context; annotations with the same context replace each other
    #[arg(long, env = "BUILDKITE_STEP_KEY", default_value = DEFAULT_CONTEXT)]
    annotation_context: String,

    /// Path to the buildkite-agent executable
    #[arg(long, value_name = "PATH", default_value = "buildkite-agent")]
    buildkite_agent: PathBuf,

    /// Repository URL used to link source locations
    #[arg(long, env = "BUILDKITE_REPO", hide = true)]
    repo_url: Option<String>,

    /// Commit used to link source locations
    #[arg(long, env = "BUILDKITE_COMMIT", hide = true)]
    commit: Option<String>,
}

/// Output format for the summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Pretty-printed JSON
    Json,
}

/// Publishes annotations through `buildkite-agent annotate`
struct BuildkiteAgent {
    program: PathBuf,
}

impl Publisher for BuildkiteAgent {
    fn publish(&self, annotation: &Annotation) -> std::result::Result<(), PublishError> {
        let mut child = Command::new(&self.program)
            .arg("annotate")
            .arg("--style")
            .arg(&annotation.style)
            .arg("--context")
            .arg(&annotation.context)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(annotation.body.as_bytes())?;
        }

        let mut stderr = String::new();
        if let Some(mut pipe) = child.stderr.take() {
            pipe.read_to_string(&mut stderr)?;
        }

        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(PublishError::Rejected(format!("{}: {}", status, stderr.trim())))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Library errors carry their own exit code; anything else is an input problem
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<bepsift_core::Error>()
        .map_or(EXIT_INPUT_ERROR, bepsift_core::Error::exit_code)
}

fn run(cli: &Cli) -> Result<()> {
    let config = AnalyzerConfig::new()
        .max_file_size_mb(cli.max_file_size_mb)
        .max_failures(cli.max_failures);

    let mut cancellation = Cancellation::new();
    if let Some(secs) = cli.timeout {
        cancellation = cancellation.with_timeout(Duration::from_secs(secs));
    }
    let handle = cancellation.clone();
    if let Err(e) = ctrlc::set_handler(move || handle.cancel()) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    info!("Analyzing BEP file: {}", cli.bep_file.display());
    let report = analyze(&Analyzer::new(config).with_cancellation(cancellation), &cli.bep_file)?;
    print_summary(&report);

    if !report.has_failures() && cli.skip_if_no_failures {
        debug!("No failures found, skipping output");
        return Ok(());
    }

    let rendered = match cli.output_format {
        OutputFormat::Text => TextRenderer.render_to_string(&report.failures),
        OutputFormat::Json => JsonRenderer.render_to_string(&report.failures),
    }
    .context("failed to render summary")?;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(rendered.as_bytes())
        .and_then(|()| stdout.flush())
        .context("failed to write summary")?;

    if cli.annotate && report.has_failures() {
        annotate(cli, &report)?;
    }

    Ok(())
}

fn analyze(analyzer: &Analyzer, path: &Path) -> Result<AnalysisReport> {
    analyzer.analyze_path(path).map_err(|e| {
        let context = match &e {
            bepsift_core::Error::FileNotFound { .. } => None,
            e if e.is_input_access() => Some("cannot read BEP file"),
            _ => Some("analysis aborted"),
        };
        match context {
            Some(context) => anyhow::Error::new(e).context(context),
            None => anyhow::Error::new(e),
        }
    })
}

/// Publish failures as an annotation; exhausted retries are only a warning
fn annotate(cli: &Cli, report: &AnalysisReport) -> Result<()> {
    let linker = SourceLinker::new(cli.repo_url.as_deref(), cli.commit.as_deref());
    if !linker.is_enabled() {
        debug!("Repository or commit unknown, source locations will not be linked");
    }

    let body = MarkdownRenderer::new(linker)
        .render_to_string(&report.failures)
        .context("failed to render annotation")?;
    let annotation = Annotation::new(body, cli.annotation_context.as_str());

    let agent = BuildkiteAgent {
        program: cli.buildkite_agent.clone(),
    };
    match publish_blocking(&agent, &annotation, &RetryPolicy::default()) {
        Ok(()) => info!("Annotation '{}' published", annotation.context),
        Err(e) => warn!("Failed to publish annotation: {}", e),
    }
    Ok(())
}

fn print_summary(report: &AnalysisReport) {
    let stats = &report.stats;
    info!(
        "Summary: {} records ({} empty, {} corrupt), {} successes, {} ambiguous, {} failures ({} duplicates), {} bytes",
        stats.records,
        stats.empty_records,
        stats.corrupt_records,
        stats.successes,
        stats.ambiguous,
        stats.failures_seen,
        stats.duplicates,
        stats.bytes_read
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert()
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["bepsift", "events.pb"]).unwrap();
        assert_eq!(cli.bep_file, PathBuf::from("events.pb"));
        assert_eq!(cli.output_format, OutputFormat::Text);
        assert_eq!(cli.max_file_size_mb, 100);
        assert_eq!(cli.max_failures, 50);
        assert!(!cli.skip_if_no_failures);
        assert!(!cli.annotate);
    }

    #[test]
    fn test_exit_codes() {
        let missing = anyhow::Error::new(bepsift_core::Error::file_not_found("x.pb"));
        assert_eq!(exit_code(&missing), 1);

        let aborted = anyhow::Error::new(bepsift_core::Error::Cancelled { records: 3 }).context("analysis aborted");
        assert_eq!(exit_code(&aborted), 2);
        assert_eq!(
            format!("{:#}", aborted),
            "analysis aborted: analysis cancelled after 3 records"
        );
    }
}
