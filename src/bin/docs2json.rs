//! CLI binary for docs2json.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use docs2json::pipeline::postprocess::{extract_json, pretty_json};
use docs2json::run::{load_inputs, write_atomic};
use docs2json::settings::read_stored_prompt;
use docs2json::{
    AdminCredentials, ApiCredentials, CallStage, Pipeline, PipelineConfig, PipelineObserver,
    ProviderKind, RunStats, SettingsController, VerificationMode,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::borrow::Cow;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

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

fn truncate(s: &str, max: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    if first_line.chars().count() > max {
        let cut: String = first_line.chars().take(max - 1).collect();
        format!("{cut}\u{2026}")
    } else {
        first_line.to_string()
    }
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner anchored at the bottom of the terminal and
/// one log line per file and per provider call.
struct CliObserver {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl PipelineObserver for CliObserver {
    fn on_run_start(&self, total_batches: usize) {
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Processing {total_batches} batch(es)…"))
        ));
    }

    fn on_file_start(&self, name: &str, _mime_type: &str) {
        self.bar.set_prefix("Encoding");
        self.bar.set_message(name.to_string());
    }

    fn on_page_rendered(&self, file: &str, page: usize, total: usize) {
        self.bar.set_message(format!("{file}  page {page}/{total}"));
    }

    fn on_file_complete(&self, name: &str, images: usize) {
        self.bar.println(format!(
            "  {} {:<40} {}",
            green("✓"),
            name,
            dim(&format!("{images} image(s)"))
        ));
    }

    fn on_file_skipped(&self, name: &str, mime_type: &str) {
        self.bar.println(format!(
            "  {} {:<40} {}",
            dim("–"),
            name,
            dim(&format!("skipped ({mime_type})"))
        ));
    }

    fn on_file_error(&self, name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<40} {}",
            red("✗"),
            name,
            red(&truncate(error, 80))
        ));
    }

    fn on_provider_call_start(&self, stage: CallStage, provider: &str, image_count: usize) {
        self.bar.set_prefix(match stage {
            CallStage::Extraction => "Extracting",
            CallStage::Reconciliation => "Reconciling",
            CallStage::Verification => "Verifying",
        });
        if image_count > 0 {
            self.bar
                .set_message(format!("{provider}  {image_count} image(s)"));
        } else {
            self.bar.set_message(provider.to_string());
        }
    }

    fn on_provider_call_complete(
        &self,
        stage: CallStage,
        provider: &str,
        text_len: usize,
        duration_ms: u64,
    ) {
        self.bar.println(format!(
            "  {} {:<40} {}  {}",
            green("✓"),
            format!("{stage} ({provider})"),
            dim(&format!("{text_len:>6} chars")),
            dim(&format!("{:.1}s", duration_ms as f64 / 1000.0)),
        ));
    }

    fn on_provider_call_error(&self, stage: CallStage, provider: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<40} {}",
            red("✗"),
            format!("{stage} ({provider})"),
            red(&truncate(error, 80))
        ));
    }

    fn on_run_complete(&self, stats: &RunStats) {
        self.bar.finish_and_clear();
        let errors = self.errors.load(Ordering::SeqCst);
        eprintln!(
            "{} {}/{} files encoded, {} image(s), {} skipped  {}",
            if errors == 0 { green("✔") } else { cyan("⚠") },
            bold(&stats.encoded_files.to_string()),
            stats.total_files,
            stats.total_images,
            stats.skipped_files,
            dim(&format!("{}ms", stats.total_ms)),
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract JSON from a statement and a receipt in one request
  docs2json extract statement.pdf receipt.jpg

  # Full pipeline: one extraction per document, then reconcile
  docs2json run jan.pdf feb.pdf --prompt "Sum the balances per month:" -o result.json

  # Reconcile JSON files you already have
  docs2json reconcile a.json b.json --prompt-file reconcile.txt

  # Use Gemini for extraction, keep OpenAI for reconciliation
  docs2json run --provider gemini invoice.png

  # Apply the verification pass instead of discarding it
  docs2json run --verification apply jan.pdf feb.pdf

  # Re-indent the final JSON (default output is the model's reply as-is)
  docs2json run --pretty jan.pdf feb.pdf

  # Change the stored reconciliation prompt (admin only)
  docs2json prompt set --user admin --password secret "Merge by account:"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY             OpenAI API key
  GOOGLE_API_KEY             Google Gemini API key (GEMINI_API_KEY also accepted)
  DOCS2JSON_PROVIDER         Extraction provider (openai, gemini, anthropic, …)
  DOCS2JSON_MODEL            Extraction model ID
  DOCS2JSON_PROMPT_STORE     Reconciliation prompt store file
  DOCS2JSON_ADMIN_USER       Admin username for `prompt set`
  DOCS2JSON_ADMIN_PASSWORD   Admin password for `prompt set`
  PDFIUM_LIB_PATH            Path to libpdfium (file or directory)
"#;

/// Turn financial documents into reconciled JSON using multimodal LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "docs2json",
    version,
    about = "Turn financial documents (PDFs, images) into reconciled JSON using multimodal LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encode all inputs as one batch and print the extracted JSON text.
    Extract {
        /// Local files or HTTP/HTTPS URLs (PDF or image).
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Text file with a custom extraction system prompt.
        #[arg(long, env = "DOCS2JSON_EXTRACTION_PROMPT")]
        extraction_prompt: Option<PathBuf>,
    },

    /// Reconcile existing JSON fragment files.
    Reconcile {
        /// JSON fragment files, in order.
        #[arg(required = true)]
        fragments: Vec<PathBuf>,

        #[command(flatten)]
        prompt: PromptArgs,
    },

    /// Extract every document, then reconcile the results.
    Run {
        /// Local files or HTTP/HTTPS URLs (PDF or image).
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Send all inputs in one extraction request instead of one per file.
        #[arg(long)]
        single_batch: bool,

        /// Write the final JSON to this file instead of stdout.
        #[arg(short, long, env = "DOCS2JSON_OUTPUT")]
        output: Option<PathBuf>,

        /// Text file with a custom extraction system prompt.
        #[arg(long, env = "DOCS2JSON_EXTRACTION_PROMPT")]
        extraction_prompt: Option<PathBuf>,

        #[command(flatten)]
        prompt: PromptArgs,
    },

    /// View or change the stored reconciliation prompt.
    Prompt {
        #[command(subcommand)]
        action: PromptAction,
    },
}

#[derive(Subcommand, Debug)]
enum PromptAction {
    /// Print the current reconciliation prompt.
    Show {
        #[arg(long, env = "DOCS2JSON_PROMPT_STORE", default_value = "docs2json-prompt.txt")]
        store: PathBuf,
    },
    /// Replace the reconciliation prompt (requires the admin credential).
    Set {
        /// New prompt text. Read from --file when omitted.
        text: Option<String>,

        /// Read the new prompt from this file.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        #[arg(long)]
        user: String,

        #[arg(long, env = "DOCS2JSON_LOGIN_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long, env = "DOCS2JSON_PROMPT_STORE", default_value = "docs2json-prompt.txt")]
        store: PathBuf,
    },
}

#[derive(Args, Debug)]
struct PromptArgs {
    /// Reconciliation instruction prompt.
    #[arg(long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the reconciliation prompt from this file.
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Prompt store consulted when neither --prompt nor --prompt-file is given.
    #[arg(long, env = "DOCS2JSON_PROMPT_STORE", default_value = "docs2json-prompt.txt")]
    store: PathBuf,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Extraction provider: openai, gemini, or any edgequake-llm provider.
    #[arg(long, global = true, env = "DOCS2JSON_PROVIDER", default_value = "openai")]
    provider: String,

    /// Extraction model ID (default: gpt-4o / gemini-1.5-flash).
    #[arg(long, global = true, env = "DOCS2JSON_MODEL")]
    model: Option<String>,

    /// Reconciliation provider.
    #[arg(long, global = true, env = "DOCS2JSON_RECONCILE_PROVIDER", default_value = "openai")]
    reconcile_provider: String,

    /// Reconciliation model ID.
    #[arg(long, global = true, env = "DOCS2JSON_RECONCILE_MODEL")]
    reconcile_model: Option<String>,

    /// What to do with the verification pass.
    #[arg(long, global = true, value_enum, default_value = "discard")]
    verification: VerificationArg,

    /// Max output tokens for extraction.
    #[arg(long, global = true, env = "DOCS2JSON_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: u32,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, global = true, env = "DOCS2JSON_TEMPERATURE")]
    temperature: Option<f32>,

    /// Per-request LLM timeout in seconds (default: none).
    #[arg(long, global = true, env = "DOCS2JSON_API_TIMEOUT")]
    timeout: Option<u64>,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, global = true, env = "DOCS2JSON_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Abort the batch on the first file that cannot be rasterised.
    #[arg(long, global = true)]
    fail_fast: bool,

    /// Path to libpdfium (file or directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Disable progress output.
    #[arg(long, global = true, env = "DOCS2JSON_NO_PROGRESS")]
    no_progress: bool,

    /// Print a structured JSON report instead of the bare result.
    #[arg(long, global = true)]
    json: bool,

    /// Re-indent the model's JSON before printing. Default: print it verbatim.
    #[arg(long, global = true)]
    pretty: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCS2JSON_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCS2JSON_QUIET")]
    quiet: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum VerificationArg {
    Discard,
    Apply,
    Skip,
}

impl From<VerificationArg> for VerificationMode {
    fn from(v: VerificationArg) -> Self {
        match v {
            VerificationArg::Discard => VerificationMode::Discard,
            VerificationArg::Apply => VerificationMode::Apply,
            VerificationArg::Skip => VerificationMode::Skip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let common = &cli.common;

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress output is active;
    // it provides all the feedback that matters to the user.
    let uses_pipeline = !matches!(cli.command, Command::Prompt { .. });
    let show_progress = uses_pipeline && !common.quiet && !common.no_progress && !common.json;
    let filter = if common.verbose {
        "debug"
    } else if common.quiet || show_progress {
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

    match &cli.command {
        Command::Extract {
            inputs,
            extraction_prompt,
        } => {
            let config = build_config(common, extraction_prompt.as_deref(), show_progress).await?;
            let pipeline = Pipeline::from_config(config).context("Invalid configuration")?;
            let files = load_inputs(inputs, common.download_timeout)
                .await
                .context("Failed to read inputs")?;

            let batch = pipeline
                .extract_batch(&files)
                .await
                .context("Extraction failed")?;

            if common.json {
                print_json(&batch)?;
            } else {
                match batch.raw_text() {
                    Some(text) => print_stdout(text, common.pretty)?,
                    None => anyhow::bail!(
                        "Extraction produced no text{}",
                        failure_reason(batch.extraction.as_ref().and_then(|e| e.outcome.error()))
                    ),
                }
            }
        }

        Command::Reconcile { fragments, prompt } => {
            let config = build_config(common, None, false).await?;
            let pipeline = Pipeline::from_config(config).context("Invalid configuration")?;
            let instruction = resolve_prompt(prompt, &pipeline).await?;

            let mut texts = Vec::with_capacity(fragments.len());
            for path in fragments {
                texts.push(
                    tokio::fs::read_to_string(path)
                        .await
                        .with_context(|| format!("Failed to read fragment {:?}", path))?,
                );
            }

            let result = pipeline.reconcile(&instruction, &texts).await;
            if common.json {
                print_json(&result)?;
            } else {
                match result.final_json_text() {
                    Some(text) => print_stdout(text, common.pretty)?,
                    None => anyhow::bail!(
                        "Reconciliation produced no text{}",
                        failure_reason(result.first_pass.error())
                    ),
                }
            }
        }

        Command::Run {
            inputs,
            single_batch,
            output,
            extraction_prompt,
            prompt,
        } => {
            let config = build_config(common, extraction_prompt.as_deref(), show_progress).await?;
            let pipeline = Pipeline::from_config(config).context("Invalid configuration")?;
            let instruction = resolve_prompt(prompt, &pipeline).await?;
            let files = load_inputs(inputs, common.download_timeout)
                .await
                .context("Failed to read inputs")?;

            let result = if *single_batch {
                pipeline.run_single_batch(&files, &instruction).await
            } else {
                pipeline.run_per_file(&files, &instruction).await
            }
            .context("Pipeline failed")?;

            if common.json {
                let report = serde_json::json!({
                    "final_json": result.final_json_text().and_then(extract_json),
                    "output": result,
                });
                print_json(&report)?;
            }

            match (result.final_json_text(), output) {
                (Some(text), Some(path)) => {
                    write_atomic(path, text)
                        .await
                        .context("Failed to write output")?;
                    if !common.quiet {
                        eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
                    }
                }
                (Some(text), None) if !common.json => print_stdout(text, common.pretty)?,
                (Some(_), None) => {}
                (None, _) => anyhow::bail!(
                    "No final JSON was produced{}",
                    failure_reason(
                        result
                            .reconciliation
                            .as_ref()
                            .and_then(|r| r.first_pass.error())
                    )
                ),
            }
        }

        Command::Prompt { action } => match action {
            PromptAction::Show { store } => {
                let prompt = read_stored_prompt(store)
                    .await
                    .context("Failed to read prompt store")?
                    .unwrap_or_else(|| docs2json::prompts::DEFAULT_RECONCILIATION_PROMPT.to_string());
                println!("{prompt}");
            }
            PromptAction::Set {
                text,
                file,
                user,
                password,
                store,
            } => {
                let new_prompt = match (text, file) {
                    (Some(t), _) => t.clone(),
                    (None, Some(f)) => tokio::fs::read_to_string(f)
                        .await
                        .with_context(|| format!("Failed to read prompt from {:?}", f))?,
                    (None, None) => anyhow::bail!("Give the new prompt as TEXT or --file"),
                };

                let mut controller = SettingsController::load(AdminCredentials::from_env(), store)
                    .await
                    .context("Failed to load prompt store")?;
                let session = controller.login(user, password)?;
                controller
                    .update_prompt(&session, new_prompt)
                    .await
                    .context("Failed to update prompt")?;

                if !common.quiet {
                    eprintln!(
                        "{} Reconciliation prompt saved to {}",
                        green("✔"),
                        bold(&store.display().to_string())
                    );
                }
            }
        },
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(
    common: &CommonArgs,
    extraction_prompt: Option<&Path>,
    show_progress: bool,
) -> Result<PipelineConfig> {
    let credentials =
        ApiCredentials::from_lookup(|k| std::env::var(k).ok().filter(|v| !v.trim().is_empty()));

    let mut builder = PipelineConfig::builder()
        .provider(common.provider.parse::<ProviderKind>()?)
        .reconciliation_provider(common.reconcile_provider.parse::<ProviderKind>()?)
        .credentials(credentials)
        .verification_mode(common.verification.into())
        .max_tokens(common.max_tokens)
        .download_timeout_secs(common.download_timeout)
        .fail_fast(common.fail_fast);

    if let Some(ref m) = common.model {
        builder = builder.model(m);
    }
    if let Some(ref m) = common.reconcile_model {
        builder = builder.reconciliation_model(m);
    }
    if let Some(t) = common.temperature {
        builder = builder.temperature(t);
    }
    if let Some(secs) = common.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(ref p) = common.pdfium_lib {
        builder = builder.pdfium_library_path(p);
    }
    if let Some(path) = extraction_prompt {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read extraction prompt from {:?}", path))?;
        builder = builder.extraction_prompt(text);
    }
    if show_progress {
        builder = builder.observer(CliObserver::new());
    }

    builder.build().context("Invalid configuration")
}

/// `--prompt` > `--prompt-file` > prompt store > built-in default.
async fn resolve_prompt(args: &PromptArgs, pipeline: &Pipeline) -> Result<String> {
    if let Some(ref p) = args.prompt {
        return Ok(p.clone());
    }
    if let Some(ref path) = args.prompt_file {
        return tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path));
    }
    let stored = read_stored_prompt(&args.store)
        .await
        .context("Failed to read prompt store")?;
    Ok(stored.unwrap_or_else(|| pipeline.default_reconciliation_prompt().to_string()))
}

fn failure_reason(err: Option<&docs2json::ProviderCallError>) -> String {
    match err {
        Some(e) => format!(": {e}"),
        None => String::new(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
    println!("{json}");
    Ok(())
}

/// Text as printed on stdout: the model's reply byte for byte, or
/// re-indented JSON with a trailing newline when `pretty` is set.
fn render_text(text: &str, pretty: bool) -> Cow<'_, str> {
    if !pretty {
        return Cow::Borrowed(text);
    }
    let mut out = pretty_json(text);
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Cow::Owned(out)
}

fn print_stdout(text: &str, pretty: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(render_text(text, pretty).as_bytes())
        .and_then(|()| handle.flush())
        .context("Failed to write to stdout")
}
