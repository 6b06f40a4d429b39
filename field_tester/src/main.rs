use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use image::RgbImage;
use sprout_vision::handoff::{AiRequest, HandoffStore};
use sprout_vision::pipeline::{PlantAnalysisResult, PlantPipeline};
use sprout_vision::telemetry::publish_result;
use sprout_vision::transport::MqttClient;
use sprout_vision::VisionConfig;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const FALLBACK_WIDTH: u32 = 640;
const FALLBACK_HEIGHT: u32 = 480;

/// Runs the plant vision pipeline on still images at a fixed cadence.
#[derive(Debug, Parser)]
#[command(name = "field_tester", version, about)]
struct Args {
    /// TOML configuration file. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Image files to cycle through; overrides `input.paths`.
    #[arg(short, long, num_args = 1..)]
    input: Vec<PathBuf>,

    /// Stop after this many frames.
    #[arg(short = 'n', long)]
    frames: Option<u64>,

    /// Skip the broker entirely.
    #[arg(long)]
    no_publish: bool,

    /// Save every annotated frame into this directory.
    #[arg(long)]
    annotated_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Configuration ---
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => VisionConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = VisionConfig::default();
            config.apply_env_overrides(|key| std::env::var(key).ok())?;
            config.validate()?;
            config
        }
    };
    if !args.input.is_empty() {
        config.input.paths = args.input.clone();
    }
    let topic = config.telemetry_topic();
    info!(topic = %topic, inputs = config.input.paths.len(), "field tester starting");

    // --- 2. Engine, Transport and Handoff ---
    let mut pipeline = PlantPipeline::new(&config);
    let handoff = HandoffStore::new(&config.handoff);
    let mut client = MqttClient::from_config(&config.mqtt);
    if !args.no_publish {
        if let Err(e) = client.connect() {
            warn!(error = %e, "broker unavailable, continuing without telemetry");
        }
    }
    if let Some(dir) = &args.annotated_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    // --- 3. Main Processing Loop ---
    let mut ticker = tokio::time::interval(Duration::from_millis(config.input.interval_ms));
    let mut frame_index = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }

        let frame = acquire_frame(&config.input.paths, frame_index);
        frame_index += 1;

        // --- 4. Analysis ---
        let result = pipeline.analyze(&frame);
        info!(
            frame = result.frame_number,
            plants = result.total_instance_count,
            sprouts = result.sprout_count,
            health = result.average_health,
            changed = result.significant_change(),
            "frame analyzed"
        );

        // --- 5. Outputs ---
        if let Some(change) = &result.change {
            if let Err(e) = pipeline.change_detector().write_change_signal(change, &config.processing.change_signal_path) {
                warn!(error = %e, "could not write change signal");
            }
        }
        if !args.no_publish && client.is_connected() {
            match publish_result(&mut client, &topic, &result) {
                Ok(sent) => debug!(sent, "telemetry published"),
                Err(e) => warn!(error = %e, "telemetry publish failed"),
            }
        }
        let periodic = config.handoff.periodic_every > 0 && result.frame_number % config.handoff.periodic_every == 0;
        if result.significant_change() || periodic {
            if let Err(e) = request_ai_analysis(&handoff, &result, &frame) {
                warn!(error = %e, "AI handoff failed");
            }
        }
        if let Some(dir) = &args.annotated_dir {
            let path = dir.join(format!("frame_{:06}.png", result.frame_number));
            if let Err(e) = result.annotated_frame.save(&path) {
                warn!(error = %e, path = %path.display(), "could not save annotated frame");
            }
        }

        // --- 6. Buffer Reuse ---
        pipeline.recycle(result);

        if args.frames.is_some_and(|limit| frame_index >= limit) {
            break;
        }
    }

    client.disconnect();
    info!(frames = pipeline.frame_count(), "field tester stopped");
    Ok(())
}

/// The next still image, or a black frame when nothing can be loaded.
fn acquire_frame(paths: &[PathBuf], index: u64) -> RgbImage {
    if paths.is_empty() {
        return RgbImage::new(FALLBACK_WIDTH, FALLBACK_HEIGHT);
    }
    let path = &paths[(index % paths.len() as u64) as usize];
    match load_frame(path) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "could not load frame, using a black frame");
            RgbImage::new(FALLBACK_WIDTH, FALLBACK_HEIGHT)
        }
    }
}

fn load_frame(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path).with_context(|| format!("decoding {}", path.display()))?.to_rgb8())
}

fn request_ai_analysis(handoff: &HandoffStore, result: &PlantAnalysisResult, frame: &RgbImage) -> Result<()> {
    let request = AiRequest::for_result(result, PathBuf::new());
    let image_path = handoff.image_path(&request.request_id);
    if let Some(parent) = image_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    frame.save(&image_path).with_context(|| format!("saving {}", image_path.display()))?;
    handoff.submit(&AiRequest { image_path, ..request })?;
    Ok(())
}
