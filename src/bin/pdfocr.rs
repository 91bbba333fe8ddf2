//! CLI binary for pdfocr.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, drives a background run and renders its events.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfocr::{
    PageImageFormat, PageSeparator, PipelineConfig, PipelineEvent, PipelineWorker, RunReport,
    VisionModel, DEFAULT_ENDPOINT,
};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognise a scan; writes scan.md next to it
  pdfocr scan.pdf

  # Choose the output file and the larger model
  pdfocr scan.pdf -o notes/scan.md --model qwen-vl-max-0809

  # Any other model served by the endpoint
  pdfocr scan.pdf --model qwen2.5-vl-72b-instruct

  # Lossless page images, lower resolution, machine-readable report
  pdfocr --format png --dpi 200 --json scan.pdf > report.json

MODELS:
  qwen-vl-plus-0809  (default)
  qwen-vl-max-0809

ENVIRONMENT VARIABLES:
  DASHSCOPE_API_KEY      API credential (bearer token)
  PDFOCR_ENDPOINT        OpenAI-compatible base URL
  PDFOCR_MODEL           Model identifier
  PDFOCR_TOOLCHAIN_DIR   Directory containing the pdfium library
  RUST_LOG               Log filter, overrides -v / -q

PDFIUM:
  On Windows the pdfium library is looked up in pdfium\bin next to the
  executable, then in the source tree, then on PATH. Elsewhere the system
  library is used. --toolchain-dir skips the lookup.
"#;

/// OCR PDF documents page by page with a remote vision model.
#[derive(Parser, Debug)]
#[command(
    name = "pdfocr",
    version,
    about = "OCR PDF documents page by page with a remote vision model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file to recognise.
    input: PathBuf,

    /// Output Markdown file. Default: the input path with a .md extension.
    #[arg(short, long, env = "PDFOCR_OUTPUT")]
    output: Option<PathBuf>,

    /// API credential.
    #[arg(long, env = "DASHSCOPE_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Vision model identifier.
    #[arg(long, env = "PDFOCR_MODEL", default_value = "qwen-vl-plus-0809")]
    model: VisionModel,

    /// OpenAI-compatible API base URL.
    #[arg(long, env = "PDFOCR_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDFOCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Format of the temporary page images.
    #[arg(long, env = "PDFOCR_FORMAT", value_enum, default_value = "jpeg")]
    format: FormatArg,

    /// Number of concurrent recognition calls.
    #[arg(short, long, env = "PDFOCR_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per page on transient service errors.
    #[arg(long, env = "PDFOCR_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Page separator: comment, hr, or a custom string.
    #[arg(long, env = "PDFOCR_SEPARATOR", default_value = "comment")]
    separator: String,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFOCR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDFOCR_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max output tokens per page.
    #[arg(long, env = "PDFOCR_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDFOCR_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Per-page request timeout in seconds.
    #[arg(long, env = "PDFOCR_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Prepend YAML front matter (source, pages, model).
    #[arg(long, env = "PDFOCR_FRONT_MATTER")]
    front_matter: bool,

    /// Keep the model's answers exactly as returned.
    #[arg(long)]
    no_clean: bool,

    /// Fail instead of replacing an existing output file.
    #[arg(long)]
    no_overwrite: bool,

    /// Directory containing the pdfium library.
    #[arg(long, env = "PDFOCR_TOOLCHAIN_DIR")]
    toolchain_dir: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFOCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Jpeg,
    Png,
}

impl From<FormatArg> for PageImageFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Jpeg => PageImageFormat::Jpeg,
            FormatArg::Png => PageImageFormat::Png,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v brings them back.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    let config = build_config(&cli).await?;
    let worker = PipelineWorker::new(config).context("Failed to set up the pipeline")?;
    let mut handle = worker
        .submit(&cli.input, cli.output.clone())
        .context("Failed to start the run")?;

    // ── Ctrl-C requests cancellation; cleanup still runs ─────────────────
    let cancel = handle.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} cancelling after in-flight pages…", yellow("⚠"));
            cancel.cancel();
        }
    });

    let bar = show_progress.then(new_bar);

    // ── Render events until the run reports back ─────────────────────────
    let mut report: Option<RunReport> = None;
    while let Some(event) = handle.events.recv().await {
        match event {
            PipelineEvent::Progress {
                stage,
                percent,
                status,
            } => {
                if let Some(bar) = &bar {
                    bar.set_prefix(capitalise(stage.label()));
                    bar.set_position(u64::from(percent));
                    bar.set_message(status);
                }
            }
            PipelineEvent::Finished(r) => {
                report = Some(r);
                break;
            }
        }
    }
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    let report = match report {
        Some(r) => r,
        None => handle.wait().await.context("Run ended without a report")?,
    };

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet || !report.success {
        print_summary(&report);
    }

    if !report.success {
        std::process::exit(1);
    }
    Ok(())
}

fn new_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold} [{bar:42.green/238}] {pos:>3}%  {wide_msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
    bar.set_style(style);
    bar.set_prefix("Starting");
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn print_summary(report: &RunReport) {
    let mark = if !report.success {
        red("✘")
    } else if report.unrecognized_pages.is_empty() {
        green("✔")
    } else {
        yellow("⚠")
    };
    eprintln!("{}  {}", mark, bold(&report.message));

    if let Some(path) = &report.output_path {
        eprintln!(
            "   {}/{} pages  {}ms  →  {}",
            report.stats.recognized_pages,
            report.stats.total_pages,
            report.stats.total_duration_ms,
            bold(&path.display().to_string()),
        );
    }
    for warning in &report.warnings {
        eprintln!("   {} {}", yellow("warning:"), dim(warning));
    }
}

fn capitalise(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .credential(&cli.api_key)
        .model(cli.model.clone())
        .endpoint(&cli.endpoint)
        .dpi(cli.dpi)
        .image_format(cli.format.into())
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .page_separator(parse_separator(&cli.separator))
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .include_front_matter(cli.front_matter)
        .clean_output(!cli.no_clean)
        .overwrite(!cli.no_overwrite);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(ref dir) = cli.toolchain_dir {
        builder = builder.toolchain_dir(dir);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--separator` string into `PageSeparator`.
fn parse_separator(s: &str) -> PageSeparator {
    match s.to_lowercase().as_str() {
        "comment" => PageSeparator::Comment,
        "hr" | "---" => PageSeparator::HorizontalRule,
        _ => PageSeparator::Custom(s.to_string()),
    }
}
