//! CLI binary for img2story.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `StoryConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use img2story::config::{DEFAULT_BASE_URL, ENV_BASE_URL, ENV_MODEL};
use img2story::{
    check_backend, generate, render_report, ModelChoice, PipelineShape, RunObserver,
    SharedObserver, StoryConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
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

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner while a stage is in flight and one tick line
/// per finished stage.
struct CliObserver {
    bar: ProgressBar,
    stage_started: Mutex<Option<Instant>>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:24.green/238}] {pos}/{len}  {msg}  ⏱ {elapsed}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(SPINNER_TICKS);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            stage_started: Mutex::new(None),
        })
    }

    fn stage_elapsed(&self) -> f64 {
        self.stage_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl RunObserver for CliObserver {
    fn on_run_start(&self, _run_id: u64, total_stages: usize) {
        self.bar.set_length(total_stages as u64);
        self.bar.set_position(0);
        self.bar.set_prefix("Storytelling");
    }

    fn on_stage_start(&self, _index: usize, _total: usize, stage: &str) {
        if let Ok(mut t) = self.stage_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(stage.to_string());
    }

    fn on_stage_complete(&self, index: usize, total: usize, stage: &str) {
        let secs = self.stage_elapsed();
        self.bar.println(format!(
            "  {} Stage {}/{}  {:<9} {}",
            green("✓"),
            index,
            total,
            stage,
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, _run_id: u64) {
        self.bar.finish_and_clear();
        eprintln!("{} {}", green("✔"), bold("Story ready"));
    }

    fn on_run_failed(&self, _run_id: u64, reason: &str) {
        let secs = self.stage_elapsed();
        // Truncate very long backend error bodies to keep output tidy.
        let msg = if reason.chars().count() > 80 {
            format!("{}\u{2026}", reason.chars().take(79).collect::<String>())
        } else {
            reason.to_string()
        };
        self.bar.println(format!(
            "  {} {}  {}",
            red("✗"),
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Caption, story and narration from the default local backend
  img2story boy_dog.jpg --audio-out story.flac

  # Use the alternative model and write the report to a file
  img2story --model hf boy_dog.jpg -o story.md

  # Single-endpoint backend with a PDF for context
  img2story --shape combined --pdf fairy_tales.pdf castle.png

  # JSON output
  img2story --json boy_dog.jpg > story.json

  # Check the backend is reachable
  img2story --check

MODEL CHOICES:
  "OpenAI (GPT-3.5)"            default (aliases: openai, gpt)
  "Hugging Face (Alternative)"  aliases: hf, huggingface
  Any other value is forwarded to the backend unchanged.

PIPELINE SHAPES:
  chained   POST /api/image-to-text → /api/story-generator → /api/text-to-speech
  combined  POST /api/generate-story-from-image
  modular   POST /api/upload-image → /api/generate-story

ENVIRONMENT VARIABLES (also read from a .env file):
  IMG2STORY_BASE_URL   Backend base URL (default http://127.0.0.1:8000)
  IMG2STORY_SHAPE      chained | combined | modular
  IMG2STORY_MODEL      Model choice
  RUST_LOG             Log filter override
"#;

/// Turn a picture into a narrated children's story.
#[derive(Parser, Debug)]
#[command(
    name = "img2story",
    version,
    about = "Turn a picture into a narrated children's story",
    long_about = "Send an image to a story backend that captions it, writes a children's story \
from the caption, and narrates the story. Supports the three-endpoint chained backend, the \
single-endpoint combined backend and the two-endpoint modular backend.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image to tell a story about.
    #[arg(required_unless_present = "check")]
    image: Option<PathBuf>,

    /// Optional PDF used as story context (combined shape only).
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Model choice forwarded to the backend.
    #[arg(short, long, env = ENV_MODEL, default_value = ModelChoice::OPENAI)]
    model: String,

    /// Backend base URL.
    #[arg(long, env = ENV_BASE_URL, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Backend endpoint contract.
    #[arg(long, env = "IMG2STORY_SHAPE", value_enum, default_value = "chained")]
    shape: ShapeArg,

    /// Write the report (or JSON) to this file instead of stdout.
    #[arg(short, long, env = "IMG2STORY_OUTPUT")]
    output: Option<PathBuf>,

    /// Save the narration audio (or server image) to this path.
    #[arg(long)]
    audio_out: Option<PathBuf>,

    /// Working directory for fetched media (cleared on exit; use --audio-out to keep it).
    #[arg(long, env = "IMG2STORY_MEDIA_DIR")]
    media_dir: Option<PathBuf>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "IMG2STORY_TIMEOUT", default_value_t = 120)]
    timeout: u64,

    /// Also request coherence/flow metrics for the finished story.
    #[arg(long)]
    evaluate: bool,

    /// Output structured JSON (StoryOutput) instead of a Markdown report.
    #[arg(long)]
    json: bool,

    /// Only check that the backend is reachable.
    #[arg(long)]
    check: bool,

    /// Disable progress output.
    #[arg(long, env = "IMG2STORY_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2STORY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2STORY_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ShapeArg {
    Chained,
    Combined,
    Modular,
}

impl From<ShapeArg> for PipelineShape {
    fn from(v: ShapeArg) -> Self {
        match v {
            ShapeArg::Chained => PipelineShape::Chained,
            ShapeArg::Combined => PipelineShape::Combined,
            ShapeArg::Modular => PipelineShape::Modular,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before parsing so env-backed flags see it.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.check;
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

    let observer: Option<SharedObserver> = if show_progress {
        Some(CliObserver::new() as SharedObserver)
    } else {
        None
    };
    let config = build_config(&cli, observer)?;

    // ── Check-only mode ──────────────────────────────────────────────────
    if cli.check {
        let greeting = check_backend(&config)
            .await
            .with_context(|| format!("Backend at {} is not reachable", config.base_url))?;
        if !cli.quiet {
            println!("{} {}  {}", green("✔"), bold(&config.base_url), dim(&greeting));
        }
        return Ok(());
    }

    let image = cli
        .image
        .as_deref()
        .context("An image path is required")?;

    if cli.pdf.is_some() && config.shape != PipelineShape::Combined && !cli.quiet {
        eprintln!(
            "{} --pdf is only sent with --shape combined; ignoring it",
            cyan("⚠")
        );
    }

    // ── Run ──────────────────────────────────────────────────────────────
    let mut story = generate(image, cli.pdf.as_deref(), &config)
        .await
        .context("Story generation failed")?;

    if cli.evaluate {
        let metrics = story
            .session()
            .client()
            .evaluate_story(&story.output.story)
            .await
            .context("Story evaluation failed")?;
        let mut eval = story.output.evaluation.take().unwrap_or_default();
        eval.coherence = Some(metrics);
        story.output.evaluation = Some(eval);
    }

    if let Some(ref dest) = cli.audio_out {
        let saved = story
            .save_media(dest)
            .await
            .with_context(|| format!("Failed to save media to {}", dest.display()))?;
        if !cli.quiet {
            if saved {
                eprintln!("{} media  →  {}", green("✔"), bold(&dest.display().to_string()));
            } else {
                eprintln!("{} backend returned no media to save", cyan("⚠"));
            }
        }
    }

    // ── Output ───────────────────────────────────────────────────────────
    let rendered = if cli.json {
        let mut json =
            serde_json::to_string_pretty(&story.output).context("Failed to serialise output")?;
        json.push('\n');
        json
    } else {
        render_report(&story.output)
    };

    if let Some(ref path) = cli.output {
        tokio::fs::write(path, &rendered)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!("{} report  →  {}", green("✔"), bold(&path.display().to_string()));
        }
    } else {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(rendered.as_bytes())
            .context("Failed to write to stdout")?;
    }

    if !cli.quiet && !cli.json {
        let stats = &story.output.stats;
        let per_stage = stats
            .stages
            .iter()
            .map(|s| format!("{} {}ms", s.stage, s.duration_ms))
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!(
            "   {}",
            dim(&format!("{}ms total  ({per_stage})", stats.total_duration_ms))
        );
    }

    Ok(())
}

/// Map CLI args to `StoryConfig`.
fn build_config(cli: &Cli, observer: Option<SharedObserver>) -> Result<StoryConfig> {
    let model: ModelChoice = cli.model.parse().unwrap_or_default();

    let mut builder = StoryConfig::builder()
        .base_url(&cli.base_url)
        .shape(cli.shape.clone().into())
        .model_choice(model)
        .request_timeout_secs(cli.timeout);

    if let Some(ref dir) = cli.media_dir {
        builder = builder.media_dir(dir);
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_model_parses_to_openai() {
        let default = Cli::command()
            .get_arguments()
            .find(|a| a.get_id() == "model")
            .and_then(|a| a.get_default_values().first().cloned())
            .expect("model default");
        let default = default.to_str().expect("utf-8");
        assert_eq!(default, ModelChoice::OPENAI);
        assert_eq!(default.parse::<ModelChoice>().unwrap(), ModelChoice::OpenAi);
    }
}
