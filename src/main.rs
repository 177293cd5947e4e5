//! emucam-sim: drive the request processor against simulated hardware
//!
//! Builds a mock sensor, request state and buffer importer, submits a run of
//! capture requests over the configured streams and prints what came back.
//!
//! # Usage
//!
//! ```bash
//! emucam-sim --frames 60
//! emucam-sim --config config/emucam.toml --lock-failure-rate 0.1 --seed 7
//! emucam-sim --frames 20 --flush-after 10
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use emucam::config::{EmucamConfig, DEFAULT_CONFIG_PATH};
use emucam::{buffer_size_and_stride, tracing_setup, RequestProcessor};
use emucam_core::{
    BufferHandle, BufferStatus, ErrorCode, NotifyMessage, Pipeline, PipelineCallback,
    PipelineRequest, PixelFormat, RequestTemplate, StreamBuffer, StreamDescriptor,
};
use emucam_driver_mock::{
    default_characteristics, ErrorConfig, MockImporter, MockRequestState, MockSensor,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Slack added to the drain wait for result delivery.
const DRAIN_SLACK: Duration = Duration::from_secs(2);
/// Upper bound on the drain wait.
const MAX_DRAIN: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "emucam-sim")]
#[command(about = "Run the emulated camera request pipeline against a simulated sensor", long_about = None)]
struct Cli {
    /// Configuration file (missing file falls back to defaults)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Number of frames to submit
    #[arg(long, default_value_t = 30)]
    frames: u32,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,

    /// Probability that locking a buffer fails
    #[arg(long)]
    lock_failure_rate: Option<f64>,

    /// Seed for injected failures
    #[arg(long)]
    seed: Option<u64>,

    /// Flush the processor right after submitting this frame
    #[arg(long)]
    flush_after: Option<u32>,
}

/// Counters updated from the pipeline callback.
#[derive(Default)]
struct RunStats {
    shutters: AtomicU64,
    results: AtomicU64,
    buffers_ok: AtomicU64,
    buffers_failed: AtomicU64,
    request_errors: AtomicU64,
    result_errors: AtomicU64,
    /// Frames that reached a terminal event (result or error).
    finished: Mutex<HashSet<u32>>,
}

impl RunStats {
    fn finish(&self, frame_number: u32) {
        self.finished.lock().insert(frame_number);
    }

    fn finished_count(&self) -> usize {
        self.finished.lock().len()
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = EmucamConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        config.application.log_level = level;
    }
    config.validate()?;
    tracing_setup::init_from_config(&config)?;

    let stats = Arc::new(RunStats::default());
    let (returned_tx, returned_rx) = mpsc::channel::<StreamBuffer>();
    let callback = stats_callback(stats.clone(), returned_tx);

    let camera_id = config.processor.camera_id;
    let sensor = Arc::new(
        MockSensor::builder()
            .camera_id(camera_id)
            .frame_interval(config.sensor.frame_interval)
            .build()?,
    );
    let importer = Arc::new(match cli.lock_failure_rate {
        Some(rate) => MockImporter::with_errors(ErrorConfig::with_rates(
            HashMap::from([("lock", rate), ("lock_ycbcr", rate)]),
            cli.seed,
        )),
        None => MockImporter::new(),
    });
    let depth = u8::try_from(config.processor.pipeline_depth)
        .context("pipeline_depth does not fit the reported result metadata")?;

    let processor = RequestProcessor::new(
        config.processor.clone(),
        sensor.clone(),
        Box::new(MockRequestState::new(camera_id, depth)),
        importer.clone(),
    )?;
    processor.initialize(default_characteristics(
        i32::try_from(config.sensor.width).context("sensor width")?,
        i32::try_from(config.sensor.height).context("sensor height")?,
    ))?;

    let streams: Vec<StreamDescriptor> = config
        .output_streams()
        .map(|stream| stream.to_descriptor())
        .collect();
    let pipelines = [Pipeline::new(0, callback, streams.clone())];
    let mut pool: HashMap<u32, Vec<BufferHandle>> = HashMap::new();

    info!(
        frames = cli.frames,
        streams = streams.len(),
        "Starting simulated capture"
    );
    let started = Instant::now();

    for frame_number in 1..=cli.frames {
        for returned in returned_rx.try_iter() {
            pool.entry(returned.stream_id).or_default().push(returned.buffer);
        }

        let mut outputs = Vec::with_capacity(streams.len());
        for stream in &streams {
            let handle = match pool.get_mut(&stream.id).and_then(Vec::pop) {
                Some(handle) => handle,
                None => allocate_for(&importer, stream),
            };
            outputs.push(StreamBuffer::new(stream.id, u64::from(frame_number), handle));
        }

        let mut request = PipelineRequest::new(0, outputs);
        if frame_number == 1 {
            request = request.with_settings(processor.get_default_request(RequestTemplate::Preview)?);
        }

        if let Err(e) = processor.process_pipeline_requests(frame_number, &[request], &pipelines) {
            warn!(frame_number, error = %e, "Submission failed");
            stats.finish(frame_number);
        }

        if cli.flush_after == Some(frame_number) {
            info!(frame_number, "Flushing");
            if let Err(e) = processor.flush() {
                warn!(error = %e, "Flush reported an error");
            }
        }
    }

    let frames = usize::try_from(cli.frames).unwrap_or(usize::MAX);
    let deadline = Instant::now()
        + drain_timeout(config.sensor.frame_interval, config.processor.pipeline_depth);
    while stats.finished_count() < frames && Instant::now() < deadline {
        std::thread::sleep(config.sensor.frame_interval);
    }
    let elapsed = started.elapsed();

    processor.shutdown()?;

    println!("emucam-sim summary");
    println!("  frames submitted:  {}", cli.frames);
    println!("  frames finished:   {}", stats.finished_count());
    println!("  results:           {}", stats.results.load(Ordering::Relaxed));
    println!("  shutters:          {}", stats.shutters.load(Ordering::Relaxed));
    println!("  buffers ok:        {}", stats.buffers_ok.load(Ordering::Relaxed));
    println!("  buffers failed:    {}", stats.buffers_failed.load(Ordering::Relaxed));
    println!("  request errors:    {}", stats.request_errors.load(Ordering::Relaxed));
    println!("  result errors:     {}", stats.result_errors.load(Ordering::Relaxed));
    println!("  sensor captured:   {}", sensor.captured_count());
    println!("  lock calls:        {}", importer.lock_calls());
    println!("  elapsed:           {:.2?}", elapsed);

    Ok(())
}

/// How long to wait for in-flight frames once submission ends: every queued
/// request plus the one at the sensor, with slack. Saturates on absurd inputs.
fn drain_timeout(frame_interval: Duration, pipeline_depth: u32) -> Duration {
    frame_interval
        .checked_mul(pipeline_depth.saturating_add(2))
        .and_then(|d| d.checked_add(DRAIN_SLACK))
        .unwrap_or(MAX_DRAIN)
        .min(MAX_DRAIN)
}

fn stats_callback(stats: Arc<RunStats>, returned: mpsc::Sender<StreamBuffer>) -> PipelineCallback {
    let notify_stats = stats.clone();
    // The sender is shared by the sensor thread and the processor's worker
    let returned = Mutex::new(returned);
    PipelineCallback::new(
        move |_, message| match message {
            NotifyMessage::Shutter(_) => {
                notify_stats.shutters.fetch_add(1, Ordering::Relaxed);
            }
            NotifyMessage::Error(error) => {
                let counter = match error.error_code {
                    ErrorCode::Result => &notify_stats.result_errors,
                    _ => &notify_stats.request_errors,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                notify_stats.finish(error.frame_number);
            }
        },
        move |result| {
            stats.results.fetch_add(1, Ordering::Relaxed);
            for buffer in result.output_buffers {
                let counter = match buffer.status {
                    BufferStatus::Ok => &stats.buffers_ok,
                    BufferStatus::Error => &stats.buffers_failed,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                let _ = returned.lock().send(buffer);
            }
            stats.finish(result.frame_number);
        },
    )
}

fn allocate_for(importer: &MockImporter, stream: &StreamDescriptor) -> BufferHandle {
    if stream.format == PixelFormat::YCbCr420_888 {
        return importer.allocate_ycbcr(stream.width, stream.height);
    }
    match buffer_size_and_stride(stream) {
        Ok(geometry) => importer.allocate(geometry.size as usize),
        Err(e) => {
            // The resolver will drop these; allocate what was declared anyway
            warn!(stream_id = stream.id, error = %e, "Stream has no flat layout");
            importer.allocate(stream.buffer_size as usize)
        }
    }
}
