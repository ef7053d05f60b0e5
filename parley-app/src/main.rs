//! Parley host entry point.
//!
//! Wires a `SessionController` to the default microphone and speakers and
//! talks to the in-process loopback transport, so whatever you say is played
//! back through the gapless scheduler. Analyser levels are logged at
//! `debug` on a display-rate tick; run with `RUST_LOG=parley=debug` to see
//! them.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parley_core::{
    audio::{CpalInput, CpalOutput},
    list_input_devices, list_output_devices, DeviceInfo, LoopbackTransport, SessionController,
};
use settings::{default_settings_path, load_settings, save_settings};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Real-time voice loop on your own audio devices", long_about = None)]
struct Cli {
    /// Print input and output devices, then exit.
    #[arg(long)]
    list_devices: bool,
    /// Settings file to use instead of the platform default.
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Microphone name, overriding the settings file.
    #[arg(long)]
    input_device: Option<String>,
    /// Speaker name, overriding the settings file.
    #[arg(long)]
    output_device: Option<String>,
    /// Write the effective settings back to the settings file.
    #[arg(long)]
    save: bool,
}

fn print_devices(title: &str, devices: &[DeviceInfo]) {
    println!("{title}:");
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let marker = if device.is_default { "*" } else { " " };
        println!("  {marker} {}", device.name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("parley=info,parley_core=info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        print_devices("Input devices", &list_input_devices());
        print_devices("Output devices", &list_output_devices());
        return Ok(());
    }

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = cli.settings.unwrap_or_else(default_settings_path);
    let mut settings = load_settings(&settings_path);
    if cli.input_device.is_some() {
        settings.preferred_input_device = cli.input_device;
    }
    if cli.output_device.is_some() {
        settings.preferred_output_device = cli.output_device;
    }
    settings.normalize();
    if cli.save {
        save_settings(&settings_path, &settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "settings saved");
    }
    info!(
        model = settings.model.as_str(),
        voice = settings.voice.as_str(),
        block_size = settings.block_size,
        "Parley starting"
    );

    // ── Session ───────────────────────────────────────────────────────────
    let session = Arc::new(SessionController::new(
        settings.session_config(),
        Arc::new(CpalInput),
        Arc::new(CpalOutput),
        Arc::new(LoopbackTransport::default()),
    ));

    let mut status_rx = session.subscribe_status();
    let status_task = tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(event) => info!(
                    state = ?event.state,
                    "{}",
                    event.detail.unwrap_or_default()
                ),
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "status log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let event_loop = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.run().await })
    };

    session.open().context("opening session")?;
    if let Err(e) = session.start_capture() {
        session.close();
        return Err(e).context("starting microphone");
    }

    // ── Analyser tick ─────────────────────────────────────────────────────
    let visualizer = {
        let mut input = session.input_analyser();
        let mut output = session.output_analyser();
        let period = Duration::from_secs_f64(1.0 / f64::from(settings.visualizer_fps));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                input.update();
                output.update();
                let (i, o) = (input.levels(), output.levels());
                debug!(
                    input = i.total(),
                    output = o.total(),
                    in_low = i.low,
                    out_low = o.low,
                    "levels"
                );
            }
        })
    };

    info!("listening, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    info!("shutting down");
    visualizer.abort();
    session.stop_capture();
    session.close();
    if let Err(e) = event_loop.await {
        warn!("session event loop ended abnormally: {e}");
    }
    status_task.abort();

    let d = session.diagnostics_snapshot();
    let playback = session.scheduler().stats();
    info!(
        blocks = d.blocks_captured,
        sent = d.frames_sent,
        dropped = d.frames_dropped,
        chunks = d.chunks_scheduled,
        interruptions = d.interruptions,
        contended_renders = playback.contended_renders,
        "session summary"
    );
    Ok(())
}
