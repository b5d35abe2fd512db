//! Cartoonifier pipeline demo: capture -> handoff -> render, with a log sink
//! standing in for the screen.

use std::future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cartoonifier::capture::{CaptureDriver, CaptureSource, DriverSettings, TestPattern};
use cartoonifier::pipeline::{FrameHandoff, RenderLoop, RenderSettings};
use cartoonifier::sink::LogSink;
use cartoonifier::transform::Passthrough;
use cartoonifier::{CaptureConfig, Config, SourceKind};
use color_eyre::Result;
use tokio::time::{Instant, Interval};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cartoonifier=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Cartoonifier launching...");

    // Load configuration
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(path.as_deref())?;
    cartoonifier::CONFIG.store(Arc::new(config));
    let config = cartoonifier::config();

    let source = open_source(&config.capture)?;
    info!("Using capture source {}: {}", source.name(), source.format());

    let handoff = FrameHandoff::with_format(source.format())?;
    let capture = CaptureDriver::spawn_with(
        source,
        handoff.clone(),
        DriverSettings {
            max_consecutive_errors: config.capture.max_consecutive_errors,
            ..DriverSettings::default()
        },
    )?;
    let render = RenderLoop::spawn(
        handoff.clone(),
        Passthrough,
        LogSink::default(),
        RenderSettings::from_config(&config),
    )?;

    let mut stats = tokio::time::interval(Duration::from_millis(config.run.stats_interval_ms.max(1)));
    let mut snapshots = config
        .run
        .snapshot_every_ms
        .map(|ms| tokio::time::interval(Duration::from_millis(ms.max(1))));
    if let Some(snapshots) = snapshots.as_mut() {
        // first tick is immediate; wait a full period before the first save
        snapshots.reset();
    }
    let deadline = config
        .run
        .duration_secs
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("Ctrl-C received");
                break;
            }
            _ = sleep_until(deadline) => {
                info!("Run duration elapsed");
                break;
            }
            _ = stats.tick() => {
                info!("Handoff stats: {:?}", handoff.stats());
                if capture.is_finished() {
                    warn!("Capture thread exited on its own");
                    break;
                }
            }
            _ = tick(&mut snapshots) => render.request_snapshot(),
        }
    }

    // Closing the session ends both threads
    handoff.stop();
    let capture_report = capture.stop();
    let render_report = render.stop()?;

    info!("Capture: {:?}", capture_report);
    info!("Render: {:?}", render_report);
    info!("Cartoonifier shutting down");
    Ok(())
}

fn open_source(capture: &CaptureConfig) -> Result<Box<dyn CaptureSource>> {
    match capture.source {
        SourceKind::TestPattern => Ok(Box::new(TestPattern::new(capture.stream(), capture.fps)?)),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            use cartoonifier::capture::{v4l2, V4l2Capture};

            let mut capture = capture.clone();
            if capture.device.is_empty() {
                capture.device = v4l2::auto_detect_device(capture.format)?;
            }
            Ok(Box::new(V4l2Capture::open(&capture)?))
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(color_eyre::eyre::eyre!(
            "V4L2 capture requested but built without the `v4l2` feature"
        )),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
