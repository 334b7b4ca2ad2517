use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use moodreel::config::{self, Config};
use moodreel::panel::log_line;
use moodreel::tracker::EmotionTracker;
use moodreel::{
    storage, BatchOutcome, BatchSummary, Emotion, EmotionSeries, FaceClient, FaceDetector,
    FrameSampler, PanelView, VideoPanel,
};

#[derive(Parser)]
#[command(name = "moodreel")]
#[command(
    version,
    about = "Sample a video, detect faces through the Face API and chart their emotions"
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample a video and detect emotions on every sampled frame
    Run {
        /// Video file
        video: PathBuf,
    },
    /// Only extract frames from a video
    Sample {
        /// Video file
        video: PathBuf,
    },
    /// Detect emotions on existing images, in the given order
    Detect {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Re-render the chart from a persisted emotion series
    Chart {
        /// Series file (defaults to `data_path` from the config)
        #[arg(short, long)]
        data: Option<PathBuf>,
        /// Output image (defaults to `chart_path` from the config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Open config file in editor
    Config,
}

/// Terminal rendition of the video panel.
struct ConsoleView;

impl PanelView for ConsoleView {
    fn log(&mut self, message: &str) {
        info!("{}", log_line(Local::now().time(), message));
    }

    fn set_status(&mut self, text: &str) {
        info!("{}", text);
    }

    fn set_enabled(&mut self, enabled: bool) {
        debug!("input {}", if enabled { "enabled" } else { "disabled" });
    }

    fn chart_updated(&mut self, series: &EmotionSeries, chart_path: &Path) {
        debug!(
            "chart {} updated with {} frame(s)",
            chart_path.display(),
            series.len()
        );
    }
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;

    match cli.command {
        Commands::Run { video } => run(&cfg, &video),
        Commands::Sample { video } => sample(&cfg, &video),
        Commands::Detect { images } => detect(&cfg, images),
        Commands::Chart { data, output } => chart(&cfg, data, output),
        Commands::Config => open_config(&cfg, config_path),
    }
}

fn panel(cfg: &Config) -> Result<VideoPanel<ConsoleView>> {
    if cfg.subscription_key.is_empty() {
        warn!(
            "No subscription key configured; set {} or run `moodreel config`",
            config::SUBSCRIPTION_KEY_ENV
        );
    }
    let client = FaceClient::new(cfg).context("Failed to create Face API client")?;
    let detector: Arc<dyn FaceDetector> = Arc::new(client);
    Ok(VideoPanel::new(cfg, detector, ConsoleView))
}

fn run(cfg: &Config, video: &Path) -> Result<()> {
    info!("Processing video: {}", video.display());
    let mut panel = panel(cfg)?;
    let summary = panel.run_video(video)?;
    report(cfg, &summary, panel.series())
}

fn detect(cfg: &Config, images: Vec<PathBuf>) -> Result<()> {
    let mut panel = panel(cfg)?;
    let handle = panel.detect_paths(images)?;
    let summary = handle.drive(&mut panel);
    report(cfg, &summary, panel.series())
}

fn report(cfg: &Config, summary: &BatchSummary, series: &EmotionSeries) -> Result<()> {
    if !series.is_empty() {
        for emotion in Emotion::ALL {
            let values = series.get(emotion);
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            info!("{:>10}: {:.3}", emotion, mean);
        }
        info!("Series saved to {}", cfg.data_path.display());
        info!("Chart saved to {}", cfg.chart_path.display());
    }

    match &summary.outcome {
        BatchOutcome::Aborted(error) => {
            anyhow::bail!("Detection stopped after {} frame(s): {}", summary.attempted, error)
        }
        BatchOutcome::Completed | BatchOutcome::Cancelled => Ok(()),
    }
}

fn sample(cfg: &Config, video: &Path) -> Result<()> {
    let frames = FrameSampler::new(cfg.sample_interval_secs)
        .sample(video)
        .with_context(|| format!("Failed to sample {}", video.display()))?;

    for frame in &frames {
        println!("{}", frame.output_path.display());
    }
    info!("✓ {} frame(s) extracted", frames.len());
    Ok(())
}

fn chart(cfg: &Config, data: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    let mut cfg = cfg.clone();
    if let Some(output) = output {
        cfg.chart_path = output;
    }
    let data = data.unwrap_or_else(|| cfg.data_path.clone());

    let series = storage::load_series(&data).context("Failed to load emotion series")?;
    if series.is_empty() {
        anyhow::bail!("No emotion series found in {}", data.display());
    }

    EmotionTracker::new(&cfg).with_series(series).render()?;
    info!("✓ Chart written to {}", cfg.chart_path.display());
    Ok(())
}

fn open_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let config_path = path.unwrap_or(config::CONFIG_PATH.as_path());
    if !config_path.exists() {
        config::save_config(cfg, Some(config_path)).context("Failed to write default config")?;
    }
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
