//! CLI binary for edgequake-ingest.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, collects documents from keys, notification files or a
//! landing scan, and prints one report per run.

use anyhow::{bail, Context, Result};
use clap::Parser;
use edgequake_ingest::{
    BatchStats, DocumentReference, FieldQuery, HttpAnalysisService, LocalObjectStore,
    ObjectStore, OutputFormat, PipelineConfig, ProgressCallback, RunReport, RunState, Validator,
    Workflow, WorkflowProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over the batch, one log line per
/// finished run. Runs complete out of order, so every line names its document.
struct CliProgressCallback {
    bar: ProgressBar,
    failures: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            failures: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Ingesting");
    }
}

impl WorkflowProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_runs: usize) {
        self.activate_bar(total_runs);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_runs} documents…"))
        ));
    }

    fn on_transition(&self, _run_id: Uuid, _from: RunState, to: RunState) {
        if !to.is_terminal() {
            self.bar.set_message(to.to_string());
        }
    }

    fn on_run_complete(&self, report: &RunReport) {
        let elapsed = dim(&format!("{:.1}s", report.duration_ms as f64 / 1000.0));
        match &report.failure {
            None => self.bar.println(format!(
                "  {} {}  →  {}  {}",
                green("✓"),
                report.document.key,
                report
                    .results_location
                    .as_ref()
                    .map(|r| r.key.as_str())
                    .unwrap_or("-"),
                elapsed,
            )),
            Some(reason) => {
                self.failures.fetch_add(1, Ordering::SeqCst);
                let msg = reason.to_string();
                let msg = if msg.chars().count() > 80 {
                    format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
                } else {
                    msg
                };
                self.bar.println(format!(
                    "  {} {}  {}  {}  {}",
                    red("✗"),
                    report.document.key,
                    dim(&report.state.to_string()),
                    red(&msg),
                    elapsed,
                ));
            }
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_runs: usize, succeeded: usize) {
        self.bar.finish_and_clear();
        let failed = self.failures.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!(
                "{} {} documents ingested successfully",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents ingested  ({} failed)",
                if succeeded == 0 { red("✘") } else { cyan("⚠") },
                bold(&succeeded.to_string()),
                total_runs,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest one uploaded document (bucket = directory under --root)
  ingest --root ./buckets --bucket documents --analysis-url http://localhost:8080 landing/cert.pdf

  # Handle object-created notifications saved as JSON
  ingest --root ./buckets --analysis-url http://localhost:8080 --event event.json

  # Process everything currently waiting under the landing prefix
  ingest --root ./buckets --bucket documents --analysis-url http://localhost:8080 --scan

  # Check admissibility only (no analysis service needed)
  ingest --bucket documents --validate-only landing/cert.pdf landing/notes.txt

  # CSV records, custom questions, JSON run reports
  ingest --bucket documents --scan --format csv --queries queries.json --json

QUERIES FILE:
  A JSON array of field queries:
    [{"text": "What is the certificate number?", "alias": "cert_number", "pages": [1], "required": true}]

EXIT STATUS:
  0 when every run reached `succeeded`, 1 otherwise.

ENVIRONMENT VARIABLES:
  Every flag has an INGEST_* counterpart, e.g. INGEST_ROOT, INGEST_BUCKET,
  INGEST_ANALYSIS_URL, INGEST_MAX_POLL_WAIT. RUST_LOG overrides the log filter.
"#;

/// Validate, extract and archive uploaded documents.
#[derive(Parser, Debug)]
#[command(
    name = "ingest",
    version,
    about = "Validate, extract fields from, and archive uploaded documents",
    long_about = "Run the ingestion workflow (validate → extract → archive) over documents in a \
local object store. Fields are extracted by a document-analysis service reached over HTTP; \
records are written under the results prefix and processed documents move to the archive prefix.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Object keys to ingest (require --bucket).
    keys: Vec<String>,

    /// Root directory of the local object store; buckets are subdirectories.
    #[arg(long, env = "INGEST_ROOT", default_value = ".")]
    root: PathBuf,

    /// Bucket holding the given keys, or scanned by --scan.
    #[arg(short, long, env = "INGEST_BUCKET")]
    bucket: Option<String>,

    /// Object-created notification files (JSON).
    #[arg(long = "event", env = "INGEST_EVENT", value_delimiter = ',')]
    events: Vec<PathBuf>,

    /// Ingest every document under the landing prefix of --bucket.
    #[arg(long, env = "INGEST_SCAN")]
    scan: bool,

    /// Base URL of the analysis service.
    #[arg(long, env = "INGEST_ANALYSIS_URL")]
    analysis_url: Option<String>,

    /// HTTP timeout per analysis request, in seconds.
    #[arg(long, env = "INGEST_API_TIMEOUT", default_value_t = 30)]
    api_timeout: u64,

    /// Send document bytes inline instead of a bucket/key reference.
    #[arg(long, env = "INGEST_INLINE_DOCUMENTS")]
    inline_documents: bool,

    /// JSON file with the field queries to ask.
    #[arg(long, env = "INGEST_QUERIES")]
    queries: Option<PathBuf>,

    /// Query alias whose answer names the output file.
    #[arg(long, env = "INGEST_IDENTIFIER_ALIAS", conflicts_with = "no_identifier")]
    identifier_alias: Option<String>,

    /// Always name outputs after the source file.
    #[arg(long, env = "INGEST_NO_IDENTIFIER")]
    no_identifier: bool,

    /// Record format: json or csv.
    #[arg(long, env = "INGEST_FORMAT", value_enum, default_value = "json")]
    format: FormatArg,

    /// Prefix new uploads appear under.
    #[arg(long, env = "INGEST_LANDING_PREFIX", default_value = "landing/")]
    landing_prefix: String,

    /// Prefix processed documents move to.
    #[arg(long, env = "INGEST_ARCHIVE_PREFIX", default_value = "archive/")]
    archive_prefix: String,

    /// Prefix extraction records are written under.
    #[arg(long, env = "INGEST_RESULTS_PREFIX", default_value = "data/")]
    results_prefix: String,

    /// Write records to this bucket instead of the document's bucket.
    #[arg(long, env = "INGEST_RESULTS_BUCKET")]
    results_bucket: Option<String>,

    /// Accepted file extensions.
    #[arg(long, env = "INGEST_EXTENSIONS", value_delimiter = ',', default_value = "pdf")]
    extensions: Vec<String>,

    /// Backoff increment between polls, in milliseconds.
    #[arg(long, env = "INGEST_POLL_INCREMENT_MS", default_value_t = 1000)]
    poll_increment_ms: u64,

    /// Longest single wait between polls, in milliseconds.
    #[arg(long, env = "INGEST_MAX_POLL_DELAY_MS", default_value_t = 10_000)]
    max_poll_delay_ms: u64,

    /// Total time to wait for an analysis job, in seconds.
    #[arg(long, env = "INGEST_MAX_POLL_WAIT", default_value_t = 300)]
    max_poll_wait: u64,

    /// Treat PARTIAL_SUCCESS analysis jobs as successful.
    #[arg(long, env = "INGEST_ACCEPT_PARTIAL")]
    accept_partial: bool,

    /// Number of documents processed concurrently.
    #[arg(short, long, env = "INGEST_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Check admissibility only; nothing is extracted or moved.
    #[arg(long)]
    validate_only: bool,

    /// Print run reports as JSON.
    #[arg(long, env = "INGEST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INGEST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INGEST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INGEST_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Json,
    Csv,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Csv => OutputFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.validate_only;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn WorkflowProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    // ── Validate-only mode ───────────────────────────────────────────────
    if cli.validate_only {
        let validator = Validator::for_extensions(&config.accepted_extensions);
        let mut documents = explicit_documents(&cli)?;
        documents.extend(event_documents(&cli, &config).await?);
        if documents.is_empty() {
            bail!("No documents given: pass object keys or --event files");
        }
        let mut rejected = 0usize;
        for doc in &documents {
            let result = validator
                .validate(doc)
                .with_context(|| format!("Invalid document reference {doc}"))?;
            if !result.valid {
                rejected += 1;
            }
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string(&result).context("Failed to serialise result")?
                );
            } else if !cli.quiet {
                let verdict = if result.valid {
                    green("valid")
                } else {
                    red(&format!(
                        "rejected ({})",
                        result.rejected_by.as_deref().unwrap_or("unknown")
                    ))
                };
                println!("{doc}  {verdict}");
            }
        }
        if rejected > 0 {
            bail!("{rejected} of {} documents rejected", documents.len());
        }
        return Ok(());
    }

    // ── Collaborators ────────────────────────────────────────────────────
    let store: Arc<dyn ObjectStore> = Arc::new(
        LocalObjectStore::new(&cli.root)
            .await
            .with_context(|| format!("Failed to open object store at {:?}", cli.root))?,
    );
    let Some(ref url) = cli.analysis_url else {
        bail!("--analysis-url (or INGEST_ANALYSIS_URL) is required unless --validate-only is set");
    };
    let mut analysis =
        HttpAnalysisService::new(url, cli.api_timeout).context("Invalid analysis service URL")?;
    if cli.inline_documents {
        analysis = analysis.with_inline_documents(Arc::clone(&store));
    }
    let workflow = Workflow::new(config, Arc::clone(&store), Arc::new(analysis))?;

    // ── Collect documents ────────────────────────────────────────────────
    let mut documents = explicit_documents(&cli)?;
    for path in &cli.events {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read notification {:?}", path))?;
        let docs = workflow
            .triggered_documents(&json)
            .with_context(|| format!("Malformed notification {:?}", path))?;
        documents.extend(docs);
    }
    if cli.scan {
        let Some(ref bucket) = cli.bucket else {
            bail!("--scan requires --bucket");
        };
        documents.extend(
            workflow
                .scan_landing(bucket)
                .await
                .context("Failed to list landing prefix")?,
        );
    }
    let mut seen = HashSet::new();
    documents.retain(|d| seen.insert(d.clone()));
    if documents.is_empty() {
        if !cli.quiet {
            eprintln!("{}", dim("Nothing to ingest."));
        }
        return Ok(());
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let reports = workflow.run_batch(documents).await;
    let stats = BatchStats::from_reports(&reports);

    if cli.json {
        let json = serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?;
        println!("{json}");
    } else if !cli.quiet && !show_progress {
        for r in &reports {
            match &r.failure {
                None => println!(
                    "{}  {}  →  {}",
                    r.document,
                    green(&r.state.to_string()),
                    r.document_location()
                ),
                Some(reason) => println!("{}  {}  {}", r.document, red(&r.state.to_string()), reason),
            }
        }
        eprintln!(
            "Ingested {}/{} documents in {}ms",
            stats.succeeded, stats.total, stats.total_duration_ms
        );
    }

    if stats.failed() > 0 {
        bail!(
            "{} of {} runs did not succeed ({} invalid, {} extraction failed, {} archival failed)",
            stats.failed(),
            stats.total,
            stats.invalid,
            stats.extraction_failed,
            stats.archival_failed
        );
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .landing_prefix(&cli.landing_prefix)
        .archive_prefix(&cli.archive_prefix)
        .results_prefix(&cli.results_prefix)
        .accepted_extensions(cli.extensions.iter().cloned())
        .output_format(cli.format.into())
        .poll_increment_ms(cli.poll_increment_ms)
        .max_poll_delay_ms(cli.max_poll_delay_ms)
        .max_poll_wait_secs(cli.max_poll_wait)
        .accept_partial(cli.accept_partial)
        .concurrency(cli.concurrency);

    if let Some(ref path) = cli.queries {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read queries from {:?}", path))?;
        let queries: Vec<FieldQuery> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse queries in {:?}", path))?;
        // A custom query set rarely contains the default identifier.
        let has_default_identifier = queries
            .iter()
            .any(|q| Some(q.alias.as_str()) == PipelineConfig::default().identifier_alias.as_deref());
        builder = builder.queries(queries);
        if !has_default_identifier {
            builder = builder.no_identifier_alias();
        }
    }
    if let Some(ref alias) = cli.identifier_alias {
        builder = builder.identifier_alias(alias);
    }
    if cli.no_identifier {
        builder = builder.no_identifier_alias();
    }
    if let Some(ref bucket) = cli.results_bucket {
        builder = builder.results_bucket(bucket);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

/// Documents named on the command line.
fn explicit_documents(cli: &Cli) -> Result<Vec<DocumentReference>> {
    if cli.keys.is_empty() {
        return Ok(Vec::new());
    }
    let Some(ref bucket) = cli.bucket else {
        bail!("Object keys require --bucket (or INGEST_BUCKET)");
    };
    Ok(cli
        .keys
        .iter()
        .map(|key| DocumentReference::new(bucket, key.trim_start_matches('/')))
        .collect())
}

/// Documents from notification files, for modes that run without a workflow.
async fn event_documents(cli: &Cli, config: &PipelineConfig) -> Result<Vec<DocumentReference>> {
    let filter = edgequake_ingest::TriggerFilter::from_config(config);
    let mut documents = Vec::new();
    for path in &cli.events {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read notification {:?}", path))?;
        let docs = edgequake_ingest::parse_notification(&json)
            .with_context(|| format!("Malformed notification {:?}", path))?;
        documents.extend(docs.into_iter().filter(|d| filter.matches(d)));
    }
    Ok(documents)
}
