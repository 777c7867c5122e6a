use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use podsweep_k8s::{KubeClusterClient, ProcessEnv};
use podsweep_scan::{MatcherConfig, ScanConfig, ScanOutcome, ScanResult, run_scan};

/// Podsweep - scan Kubernetes pod logs for error markers after a deploy
#[derive(Parser, Debug)]
#[command(name = "podsweep")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespaces to scan, in order (default: ui orders)
    #[arg(value_name = "NAMESPACE")]
    namespaces: Vec<String>,

    /// TOML config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Kubeconfig context (default: current-context)
    #[arg(long)]
    context: Option<String>,

    /// Case-insensitive substring that marks an error line
    #[arg(long, group = "matcher")]
    marker: Option<String>,

    /// Case-insensitive regex that marks an error line
    #[arg(long, group = "matcher")]
    regex: Option<String>,

    /// Flag lines whose parsed level is at or above this (e.g. warn, error)
    #[arg(long, group = "matcher")]
    severity: Option<String>,

    /// Pods scanned at once within a namespace
    #[arg(long)]
    concurrency: Option<usize>,

    /// Bound on fetching and scanning one pod's log
    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    /// Bound on the `aws eks get-token` exchange
    #[arg(long)]
    exchange_timeout_secs: Option<u64>,

    /// Only read the last N lines of each container
    #[arg(long)]
    tail_lines: Option<i64>,

    /// Only read lines newer than this many seconds
    #[arg(long)]
    since_seconds: Option<i64>,

    /// Reuse EKS tokens across runs
    #[arg(long)]
    token_cache: bool,

    /// AWS region passed to the token exchange
    #[arg(long)]
    region: Option<String>,

    /// AWS profile passed to the token exchange
    #[arg(long)]
    profile: Option<String>,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Exit 0 when the only problems are pods or namespaces that could not be scanned
    #[arg(long)]
    allow_scan_errors: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Overlay flags on top of the file/default config
    fn apply(&self, config: &mut ScanConfig) {
        if !self.namespaces.is_empty() {
            config.namespaces = self.namespaces.clone();
        }
        if let Some(context) = &self.context {
            config.context = Some(context.clone());
        }
        if let Some(marker) = &self.marker {
            config.matcher = MatcherConfig::Marker {
                marker: marker.clone(),
            };
        }
        if let Some(pattern) = &self.regex {
            config.matcher = MatcherConfig::Regex {
                pattern: pattern.clone(),
            };
        }
        if let Some(threshold) = &self.severity {
            config.matcher = MatcherConfig::Severity {
                threshold: threshold.clone(),
            };
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(secs) = self.fetch_timeout_secs {
            config.fetch_timeout_secs = secs;
        }
        if let Some(secs) = self.exchange_timeout_secs {
            config.exchange_timeout_secs = secs;
        }
        if self.tail_lines.is_some() {
            config.tail_lines = self.tail_lines;
        }
        if self.since_seconds.is_some() {
            config.since_seconds = self.since_seconds;
        }
        if self.token_cache {
            config.token_cache = true;
        }
        if self.region.is_some() {
            config.aws_region = self.region.clone();
        }
        if self.profile.is_some() {
            config.aws_profile = self.profile.clone();
        }
    }

    fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            _ => tracing::Level::DEBUG,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(args.log_level().into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args).await {
        Ok(result) => ExitCode::from(exit_code(result.outcome(), args.allow_scan_errors)),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(args: &Args) -> Result<ScanResult> {
    let mut config = ScanConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let client = KubeClusterClient::new(config.context.clone(), config.log_options())
        .context("failed to load kubeconfig")?;

    let result = run_scan(
        &ProcessEnv,
        Arc::new(config.token_provider()),
        Arc::new(client),
        config.scanner()?,
        config.settings(),
        &config.namespace_refs(),
    )
    .await
    .context("scan could not run")?;

    let mut stdout = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut stdout, &result)?;
        writeln!(stdout)?;
    } else {
        write_report(&mut stdout, &result)?;
    }

    Ok(result)
}

/// 0 clean, 1 findings, 3 scan errors only; fatal errors exit 2
fn exit_code(outcome: ScanOutcome, allow_scan_errors: bool) -> u8 {
    match outcome {
        ScanOutcome::Clean => 0,
        ScanOutcome::FindingsPresent => 1,
        ScanOutcome::Incomplete if allow_scan_errors => 0,
        ScanOutcome::Incomplete => 3,
    }
}

fn write_report(out: &mut impl Write, result: &ScanResult) -> std::io::Result<()> {
    for finding in result.findings() {
        match &finding.container {
            Some(container) => writeln!(
                out,
                "{}[{}]:{} {}",
                finding.pod, container, finding.line_number, finding.reason
            )?,
            None => writeln!(
                out,
                "{}:{} {}",
                finding.pod, finding.line_number, finding.reason
            )?,
        }
    }

    for error in result.errors() {
        match &error.pod {
            Some(pod) => writeln!(
                out,
                "{} {}/{} {}",
                error.kind, error.namespace, pod, error.message
            )?,
            None => writeln!(out, "{} {} {}", error.kind, error.namespace, error.message)?,
        }
    }

    writeln!(
        out,
        "{} pods scanned, {} findings, {} scan errors",
        result.pods_scanned(),
        result.findings().len(),
        result.errors().len()
    )
}
