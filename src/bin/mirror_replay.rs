use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use std::{fs, path::PathBuf, thread};

use anyhow::{Context, Result};
use clap::Parser;
use mirror_decode::{
    FrameFormat, FrameUnit, HardwarePreference, MirrorPipeline, PipelineConfig, detect_format,
    epoch_millis, split_nal_units,
};

#[derive(Parser, Debug)]
#[command(about = "Replay a recorded mirror stream through the decode pipeline")]
struct Args {
    /// Annex-B H.264 elementary stream or a single JPEG.
    input: PathBuf,
    /// Feed rate in units per second; 0 feeds as fast as possible.
    #[arg(long, default_value_t = 60)]
    fps: u32,
    #[arg(long, default_value_t = false)]
    disable_hardware: bool,
    /// Log the periodic performance summary at info level.
    #[arg(long, default_value_t = false)]
    metrics: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PipelineConfig::from_env();
    if args.disable_hardware {
        config.hardware = HardwarePreference::Disabled;
    }
    config.report_metrics |= args.metrics;

    let data = fs::read(&args.input)
        .with_context(|| format!("failed to read input: {}", args.input.display()))?;
    let units = split_into_units(&data);
    anyhow::ensure!(!units.is_empty(), "no decodable units in {}", args.input.display());

    let delivered = Arc::new(AtomicU64::new(0));
    let delivered_in_callback = Arc::clone(&delivered);
    let pipeline = MirrorPipeline::new(config, move |frame| {
        log::trace!("frame {} {}x{}", frame.pts_90k, frame.width(), frame.height());
        delivered_in_callback.fetch_add(1, Ordering::Relaxed);
    });

    let interval = (args.fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(args.fps)));
    let started = Instant::now();
    for (index, bytes) in units.iter().enumerate() {
        if let Some(interval) = interval {
            let due = started + interval.mul_f64(index as f64);
            if let Some(wait) = due.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
        pipeline
            .decode(FrameUnit::new(bytes.clone()).captured_at(epoch_millis()))
            .context("pipeline rejected input")?;
    }

    pipeline.flush().context("flush failed")?;
    anyhow::ensure!(
        pipeline.sync(Duration::from_secs(10)),
        "pipeline did not drain within 10s"
    );
    let stats = pipeline.stats();

    println!(
        "delivered_frames={}, units={}, elapsed_ms={}, input={}",
        delivered.load(Ordering::Relaxed),
        units.len(),
        started.elapsed().as_millis(),
        args.input.display()
    );
    println!("{stats}");
    if let Some(report) = stats.last_report {
        println!("last_window: {report}");
    }
    Ok(())
}

/// JPEG files replay as one unit; H.264 streams are regrouped so that each
/// slice travels with the parameter sets and other units preceding it.
fn split_into_units(data: &[u8]) -> Vec<Vec<u8>> {
    if detect_format(data, None) == FrameFormat::Jpeg {
        return vec![data.to_vec()];
    }
    let mut units = Vec::new();
    let mut current = Vec::new();
    for nal in split_nal_units(data) {
        current.extend_from_slice(&[0, 0, 0, 1]);
        current.extend_from_slice(&nal.payload);
        if nal.nal_type.is_slice() {
            units.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        units.push(current);
    }
    units
}
