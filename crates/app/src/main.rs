mod config;
mod device;

use anyhow::Context;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;

use porter_audio::{AlsaCapture, FrameMailbox, WatchdogMonitor};
use porter_foundation::clock::real_clock;
use porter_foundation::ShutdownGuard;
use porter_relay::{
    DoorbellNotifier, EventPump, RelayEngine, RelayStats, TamperFlag, VoiceChannelConsumer,
};

use config::{Cli, Settings};
use device::IntercomClient;

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "porterd.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();
    std::mem::forget(guard);
    Ok(())
}

/// Every fatal condition funnels through here: full diagnostic context plus
/// a captured trace, then a non-zero exit for the external supervisor to
/// restart us.
fn fatal_exit(context: &str, err: impl std::fmt::Display) -> ! {
    let trace = std::backtrace::Backtrace::force_capture();
    tracing::error!("fatal: {}: {}\n{}", context, err, trace);
    std::process::exit(1);
}

fn log_stats(stats: &RelayStats) {
    tracing::info!(
        "relay stats: {} frames ({} voiced / {} silent), {} dropped, {} overruns, \
         sends {} ok / {} failed, {} calls started / {} ended, {} restarts",
        stats.frames_captured.load(Ordering::Relaxed),
        stats.voiced_frames.load(Ordering::Relaxed),
        stats.silent_frames.load(Ordering::Relaxed),
        stats.frames_dropped.load(Ordering::Relaxed),
        stats.overruns.load(Ordering::Relaxed),
        stats.sends_ok.load(Ordering::Relaxed),
        stats.sends_failed.load(Ordering::Relaxed),
        stats.calls_started.load(Ordering::Relaxed),
        stats.calls_ended.load(Ordering::Relaxed),
        stats.channel_restarts.load(Ordering::Relaxed),
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging().map_err(|err| anyhow::anyhow!("logging init failed: {}", err))?;
    tracing::info!("porterd starting up");

    let settings = Settings::load(Cli::parse())?;

    // Session establishment and audio format are fatal at startup. The
    // device client is blocking HTTP, so it must not run on the async
    // runtime itself.
    let device_settings = settings.device.clone();
    let intercom = tokio::task::spawn_blocking(move || {
        let client = IntercomClient::connect(&device_settings)?;
        client.configure_audio()?;
        anyhow::Ok(client)
    })
    .await
    .context("device startup task failed")??;

    let running = Arc::new(AtomicBool::new(true));
    let clock = real_clock();

    let (event_tx, event_rx) = crossbeam_channel::bounded(64);
    let _event_feed = intercom
        .subscribe_events(event_tx, Arc::clone(&running))
        .context("spawning device event feed")?;

    let tamper = TamperFlag::new();
    let notifier = DoorbellNotifier::new(&settings.doorbell)
        .map_err(|err| anyhow::anyhow!("doorbell client init failed: {}", err))?;
    let pump = EventPump::new(event_rx, tamper.clone(), notifier);
    let _pump_handle = pump
        .spawn(Arc::clone(&running))
        .context("spawning event pump")?;

    let capture = AlsaCapture::open(&settings.soundcard)
        .with_context(|| format!("opening soundcard {}", settings.soundcard))?;

    let (producer, frames) = FrameMailbox::new();
    let engine = RelayEngine::new(
        capture,
        Arc::clone(&intercom),
        producer,
        tamper,
        Arc::clone(&clock),
        settings.relay,
    );
    let heartbeat = engine.heartbeat();
    let shared_channel = engine.shared_channel();
    let stats = engine.stats();

    let consumer = VoiceChannelConsumer::new(
        frames,
        Arc::clone(&intercom),
        shared_channel,
        Arc::clone(&stats),
    );
    let consumer_handle = consumer
        .spawn(Arc::clone(&running))
        .context("spawning voice consumer")?;

    let (alarm_tx, mut alarm_rx) = tokio::sync::mpsc::unbounded_channel();
    let watchdog = WatchdogMonitor::new(
        heartbeat,
        settings.watchdog,
        Arc::clone(&clock),
        alarm_tx,
    );
    let watchdog_handle = watchdog
        .spawn(Arc::clone(&running))
        .context("spawning watchdog")?;

    let engine_handle = engine
        .spawn(Arc::clone(&running))
        .context("spawning capture loop")?;
    let mut engine_task = tokio::task::spawn_blocking(move || engine_handle.join());

    let shutdown = ShutdownGuard::install();
    let mut stats_interval = tokio::time::interval(Duration::from_secs(30));
    stats_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::info!("shutting down gracefully");
                break;
            }
            Some(alarm) = alarm_rx.recv() => {
                fatal_exit(
                    "watchdog declared the capture loop dead",
                    format!("no heartbeat for {:?}", alarm.stalled_for),
                );
            }
            joined = &mut engine_task => {
                match joined {
                    Ok(Ok(Ok(()))) => {
                        tracing::info!("capture loop ended");
                        break;
                    }
                    Ok(Ok(Err(err))) => fatal_exit("audio relay failed", err),
                    Ok(Err(_)) => fatal_exit("capture thread panicked", "see panic log above"),
                    Err(err) => fatal_exit("supervisor lost the capture thread", err),
                }
            }
            _ = stats_interval.tick() => {
                log_stats(&stats);
            }
        }
    }

    running.store(false, Ordering::SeqCst);
    let _ = consumer_handle.join();
    let _ = watchdog_handle.join();
    tracing::info!("porterd shut down cleanly");
    Ok(())
}
