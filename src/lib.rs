pub mod audio;
pub mod engine;
pub mod error;
pub mod light;
pub mod models;
pub mod program;
pub mod settings;
pub mod utils;

use anyhow::Context;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

pub use audio::{AudioBackend, CompletionHook, PcmBuffer, RodioBackend, StereoGenerator};
pub use engine::{EngineController, EngineEvent, EngineSnapshot, EngineStatus};
pub use error::AudioEngineError;
pub use light::PulseEvent;
pub use models::{CarrierConfig, CarrierPair, SessionPlan, SessionSummary, StimulationMode};
pub use program::{BeatProgram, BeatStage, BrainwaveBand, ProgramPreset};
pub use settings::EngineSettings;

/// Demo runner: play the configured session on the default output and log
/// light pulses until the window ends or Ctrl-C.
pub fn run() -> anyhow::Result<()> {
    let settings = settings::EngineSettings::from_env()?;

    let level = if settings.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // RUST_LOG still overrides the default level.
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    log::info!("Entrainer starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build the tokio runtime")?;

    runtime.block_on(async move {
        let duration = Duration::from_secs(settings.session.duration_secs);
        let muted = settings.session.muted;
        let plan = settings
            .session_plan()
            .context("Invalid session in settings")?;

        let engine = EngineController::with_rodio(settings);
        engine.configure_plan(plan).await?;

        let mut events = engine.subscribe();
        engine
            .start_stimulation(duration, muted)
            .await
            .context("Failed to start stimulation")?;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::info!("interrupted");
                    break;
                }
                event = events.recv() => match event {
                    Ok(EngineEvent::Pulse(pulse)) => {
                        log::debug!("light {:?} at {:.2} Hz", pulse, engine.current_beat_hz().unwrap_or_default());
                    }
                    Ok(EngineEvent::StateChanged(EngineStatus::Idle)) => break,
                    Ok(EngineEvent::StateChanged(status)) => log::info!("engine {:?}", status),
                    Ok(EngineEvent::Fault(err)) => log::warn!("engine fault: {err}"),
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("event log lagged; skipped {skipped} events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        if let Some(summary) = engine.cleanup().await {
            log::info!(
                "session {} finished: {} ms active",
                summary.id,
                summary.active_ms
            );
        }
        Ok::<(), anyhow::Error>(())
    })
}
