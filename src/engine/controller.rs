use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{EngineEvent, EngineState, EngineStatus, EventBus, SessionClock};
use crate::audio::{
    isochronic, AudioBackend, IsochronicWorker, PulseClip, RodioBackend, StereoGenerator,
    VolumeEnvelope,
};
use crate::error::AudioEngineError;
use crate::light::{LightDriver, LightDriverContext, LightPulseClock};
use crate::models::{CarrierConfig, SessionPlan, SessionSummary, StimulationMode};
use crate::program::BeatProgram;
use crate::settings::EngineSettings;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub beat_hz: Option<f64>,
    pub envelope_level: f32,
    pub elapsed_ms: u64,
}

struct FadeTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background tasks of the active session. Guarded by one lock so that
/// lifecycle transitions never interleave.
#[derive(Default)]
struct Workers {
    light: Option<LightDriver>,
    /// Light clock frozen by `pause`, handed back to a new driver on `resume`.
    parked_light: Option<LightPulseClock>,
    isochronic: Option<IsochronicWorker>,
    fade: Option<FadeTask>,
    auto_stop: Option<JoinHandle<()>>,
}

/// Public facade of the engine: owns the audio backend and the light driver
/// and keeps them started and stopped together.
///
/// Cheap to clone; clones share one engine. Lock order is always `state`
/// then `workers`.
#[derive(Clone)]
pub struct EngineController {
    state: Arc<Mutex<EngineState>>,
    workers: Arc<Mutex<Workers>>,
    plan: Arc<ArcSwapOption<SessionPlan>>,
    clock: Arc<SessionClock>,
    envelope: Arc<VolumeEnvelope>,
    backend: Arc<dyn AudioBackend>,
    bus: EventBus,
    settings: Arc<EngineSettings>,
}

impl EngineController {
    pub fn new(backend: Arc<dyn AudioBackend>, settings: EngineSettings) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::new(settings.default_volume))),
            workers: Arc::new(Mutex::new(Workers::default())),
            plan: Arc::new(ArcSwapOption::empty()),
            clock: Arc::new(SessionClock::new()),
            envelope: Arc::new(VolumeEnvelope::new(1.0)),
            backend,
            bus: EventBus::new(settings.event_capacity),
            settings: Arc::new(settings),
        }
    }

    /// Controller on the default system output.
    pub fn with_rodio(settings: EngineSettings) -> Self {
        Self::new(Arc::new(RodioBackend::new()), settings)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.bus.subscribe()
    }

    /// Validate and install a new plan. The swap is atomic, so it may
    /// happen while the audio thread is reading the previous plan.
    pub async fn configure(
        &self,
        carrier: CarrierConfig,
        program: BeatProgram,
    ) -> Result<(), AudioEngineError> {
        if carrier.sample_rate != self.settings.sample_rate {
            return Err(AudioEngineError::invalid(format!(
                "engine runs at {} Hz, carrier config asks for {} Hz",
                self.settings.sample_rate, carrier.sample_rate
            )));
        }
        let plan = SessionPlan::new(carrier, program)?;

        let state = self.state.lock().await;
        if state.status != EngineStatus::Idle {
            if plan.carrier.mode != state.mode {
                return Err(AudioEngineError::invalid(
                    "stimulation mode cannot change during a session",
                ));
            }
            if state.mode == StimulationMode::Isochronic {
                return Err(AudioEngineError::invalid(
                    "the isochronic clip is fixed for the session; stop before reconfiguring",
                ));
            }
        }

        log_info!(
            "configured {:?} session: carrier {} Hz, {} stage(s), beat starts at {:.2} Hz",
            plan.carrier.mode,
            plan.carrier.primary.left_hz,
            plan.program.stages().len(),
            plan.program.instantaneous_hz(0.0)
        );
        self.plan.store(Some(Arc::new(plan)));
        Ok(())
    }

    pub async fn configure_plan(&self, plan: SessionPlan) -> Result<(), AudioEngineError> {
        self.configure(plan.carrier, plan.program).await
    }

    /// Start a session. Volume always begins at 0; unless `muted`, a fade-in
    /// raises it. When muted the fade is never started.
    ///
    /// On any failure everything engaged so far is released and the engine
    /// is back in `Idle`.
    pub async fn start(&self, muted: bool) -> Result<(), AudioEngineError> {
        let plan = self
            .plan
            .load_full()
            .ok_or_else(|| AudioEngineError::invalid("engine is not configured"))?;

        let attempt = Uuid::new_v4().to_string();
        {
            let mut state = self.state.lock().await;
            if state.status != EngineStatus::Idle {
                return Err(AudioEngineError::EngineBusy(state.status));
            }
            state.begin_starting(plan.carrier.mode, muted);
            state.session_id = Some(attempt.clone());
        }
        self.bus.emit(EngineEvent::StateChanged(EngineStatus::Starting));
        self.envelope.reset(muted);

        let backend = Arc::clone(&self.backend);
        let opened = match tokio::task::spawn_blocking(move || backend.open()).await {
            Ok(result) => result,
            Err(err) => Err(AudioEngineError::backend(format!(
                "audio open task failed: {err}"
            ))),
        };

        let mut state = self.state.lock().await;
        let mut workers = self.workers.lock().await;

        let superseded = state.session_id.as_deref() != Some(attempt.as_str());
        if state.status != EngineStatus::Starting || superseded {
            // The stop already tore this attempt down. A newer session may
            // own the device by now, so only release it when nothing started.
            if state.status == EngineStatus::Idle && state.session_id.is_none() {
                self.backend.stop();
            }
            log_warn!("start cancelled while the audio output was opening");
            return Err(AudioEngineError::StartCancelled);
        }

        let launched = opened.and_then(|()| {
            self.clock.restart();
            self.launch_producers(&plan, &mut workers)
        });
        if let Err(err) = launched {
            self.teardown(&mut workers).await;
            state.cancel();
            self.bus.emit(EngineEvent::StateChanged(EngineStatus::Idle));
            log_warn!("start failed, rolled back to idle: {err}");
            return Err(err);
        }

        self.backend.set_gain(state.volume);
        self.backend.resume();
        if !muted {
            self.spawn_fade(&mut workers);
        }

        state.begin_session(attempt, Utc::now(), Instant::now());
        log_info!(
            "session {} running ({:?}, muted={})",
            state.session_id.as_deref().unwrap_or_default(),
            state.mode,
            muted
        );
        drop(workers);
        drop(state);

        self.bus.emit(EngineEvent::StateChanged(EngineStatus::Running));
        Ok(())
    }

    /// Start, then stop automatically after `duration`. This is the entry
    /// point for an external trigger such as a sleep-stage detector.
    pub async fn start_stimulation(
        &self,
        duration: Duration,
        muted: bool,
    ) -> Result<(), AudioEngineError> {
        self.start(muted).await?;

        let state = self.state.lock().await;
        let mut workers = self.workers.lock().await;
        let Some(session_id) = state.session_id.clone() else {
            return Ok(());
        };
        if let Some(previous) = workers.auto_stop.take() {
            previous.abort();
        }

        let controller = self.clone();
        workers.auto_stop = Some(tokio::spawn(async move {
            time::sleep(duration).await;
            let current = controller.state.lock().await.session_id.clone();
            if current.as_deref() == Some(session_id.as_str()) {
                log_info!("stimulation window of {:?} elapsed; stopping", duration);
                controller.stop_with(false).await;
            }
        }));
        Ok(())
    }

    /// Freeze audio, light, clock and fade without resetting any phase.
    /// Returns false when there was nothing running to pause.
    pub async fn pause(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != EngineStatus::Running {
            log_debug!("pause ignored in {:?}", state.status);
            return false;
        }
        let mut workers = self.workers.lock().await;

        self.backend.pause();
        self.clock.freeze();
        Self::cancel_fade(&mut workers);
        if let Some(driver) = workers.light.take() {
            workers.parked_light = Some(driver.halt().await);
        }
        state.pause();
        drop(workers);
        drop(state);

        self.bus.emit(EngineEvent::StateChanged(EngineStatus::Paused));
        true
    }

    /// Continue a paused session. The beat program's time origin is moved
    /// to now, so a ramp continues from the frequency it had at pause.
    pub async fn resume(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != EngineStatus::Paused {
            log_debug!("resume ignored in {:?}", state.status);
            return false;
        }
        let mut workers = self.workers.lock().await;

        self.clock.resume();
        self.backend.resume();
        if let Some(light) = workers.parked_light.take() {
            workers.light = Some(LightDriver::spawn(light, self.light_context()));
        }
        if !self.envelope.is_muted() {
            self.spawn_fade(&mut workers);
        }
        state.resume(Instant::now());
        drop(workers);
        drop(state);

        self.bus.emit(EngineEvent::StateChanged(EngineStatus::Running));
        true
    }

    /// Silence immediately and end the session. Idempotent and safe from any
    /// state, including `Starting`.
    pub async fn stop(&self) -> Option<SessionSummary> {
        self.stop_with(true).await
    }

    /// Stop, forget the plan and release the backend thread.
    pub async fn cleanup(&self) -> Option<SessionSummary> {
        let summary = self.stop().await;
        self.plan.store(None);
        self.backend.shutdown();
        log_debug!("engine cleaned up");
        summary
    }

    /// The auto-stop timer stops the session itself, so it must not abort
    /// its own task on the way.
    async fn stop_with(&self, abort_timer: bool) -> Option<SessionSummary> {
        let mut state = self.state.lock().await;
        let mut workers = self.workers.lock().await;

        if let Some(timer) = workers.auto_stop.take() {
            if abort_timer {
                timer.abort();
            }
        }
        if state.status == EngineStatus::Idle {
            return None;
        }

        self.teardown(&mut workers).await;
        let summary = state.summary(Utc::now());
        state.cancel();
        drop(workers);
        drop(state);

        if let Some(summary) = &summary {
            log_info!(
                "session {} stopped after {} ms active",
                summary.id,
                summary.active_ms
            );
        }
        self.bus.emit(EngineEvent::StateChanged(EngineStatus::Idle));
        summary
    }

    /// Release everything a session engaged. The last light edge is always
    /// `Off`.
    async fn teardown(&self, workers: &mut Workers) {
        self.backend.stop();
        Self::cancel_fade(workers);

        let light = match workers.light.take() {
            Some(driver) => Some(driver.halt().await),
            None => workers.parked_light.take(),
        };
        if let Some(mut light) = light {
            if let Some(event) = light.force_off() {
                self.bus.pulse(event);
            }
        }
        if let Some(worker) = workers.isochronic.take() {
            let mut pulse_loop = worker.halt().await;
            if let Some(event) = pulse_loop.force_off() {
                self.bus.pulse(event);
            }
        }

        self.clock.clear();
        self.envelope.reset(false);
    }

    fn launch_producers(
        &self,
        plan: &SessionPlan,
        workers: &mut Workers,
    ) -> Result<(), AudioEngineError> {
        match plan.carrier.mode {
            StimulationMode::Binaural => {
                let generator = StereoGenerator::new(
                    Arc::clone(&self.plan),
                    Arc::clone(&self.clock),
                    Arc::clone(&self.envelope),
                    plan.carrier.sample_rate,
                    self.settings.mix(),
                );
                self.backend.play_stream(generator)?;
                workers.light = Some(LightDriver::spawn(
                    LightPulseClock::new(),
                    self.light_context(),
                ));
            }
            StimulationMode::Isochronic => {
                let clip = PulseClip::render(
                    plan.program.final_hz(),
                    plan.carrier.primary.left_hz,
                    plan.carrier.sample_rate,
                )?;
                workers.isochronic = Some(IsochronicWorker::spawn(
                    Arc::new(clip),
                    Arc::clone(&self.backend),
                    Arc::clone(&self.envelope),
                    self.bus.clone(),
                    self.settings.min_queued_buffers,
                )?);
            }
        }
        Ok(())
    }

    fn light_context(&self) -> LightDriverContext {
        LightDriverContext {
            plan: Arc::clone(&self.plan),
            clock: Arc::clone(&self.clock),
            bus: self.bus.clone(),
            tick: self.settings.light_tick(),
        }
    }

    fn spawn_fade(&self, workers: &mut Workers) {
        Self::cancel_fade(workers);
        let Some(ramp) = self.envelope.begin_fade(self.settings.fade_plan()) else {
            return;
        };
        log_debug!(
            "fading in over {} steps of {:?}",
            ramp.steps(),
            ramp.interval()
        );

        let envelope = Arc::clone(&self.envelope);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(ramp.interval().max(Duration::from_millis(1)));
            ticker.tick().await;
            for level in ramp {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => envelope.set_level(level),
                }
            }
        });
        workers.fade = Some(FadeTask { cancel, handle });
    }

    fn cancel_fade(workers: &mut Workers) {
        if let Some(fade) = workers.fade.take() {
            fade.cancel.cancel();
            fade.handle.abort();
        }
    }

    /// User output gain, clamped to [0, 1]. Independent of the fade-in.
    pub async fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.state.lock().await.volume = volume;
        self.backend.set_gain(volume);
    }

    /// Muting zeroes the envelope and cancels any fade. Unmuting a running
    /// session fades back in.
    pub async fn set_muted(&self, muted: bool) {
        let mut state = self.state.lock().await;
        let mut workers = self.workers.lock().await;
        state.muted = muted;
        if muted {
            Self::cancel_fade(&mut workers);
            self.envelope.mute();
        } else {
            self.envelope.unmute();
            if state.status == EngineStatus::Running {
                self.spawn_fade(&mut workers);
            }
        }
    }

    /// Explicitly (re)start the fade-in from the current level, unmuting
    /// first. Returns whether a fade is now running.
    pub async fn fade_in(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.status != EngineStatus::Running {
            return false;
        }
        let mut workers = self.workers.lock().await;
        state.muted = false;
        self.envelope.unmute();
        self.spawn_fade(&mut workers);
        workers.fade.is_some()
    }

    /// Beat frequency right now; `None` when unconfigured.
    pub fn current_beat_hz(&self) -> Option<f64> {
        let plan = self.plan.load();
        let plan = plan.as_ref()?;
        Some(match plan.carrier.mode {
            StimulationMode::Binaural => {
                plan.program.instantaneous_hz(self.clock.elapsed_secs())
            }
            StimulationMode::Isochronic => {
                isochronic::rounded_pulse_hz(plan.program.final_hz(), plan.carrier.sample_rate)
            }
        })
    }

    pub fn current_beat_period(&self) -> Option<Duration> {
        self.current_beat_hz()
            .map(|hz| Duration::from_secs_f64(1.0 / hz))
    }

    /// Current fade-in level in [0, 1]; 0 whenever muted.
    pub fn envelope_level(&self) -> f32 {
        self.envelope.level()
    }

    pub fn fades_started(&self) -> u64 {
        self.envelope.fades_started()
    }

    pub async fn status(&self) -> EngineStatus {
        self.state.lock().await.status
    }

    pub async fn is_running(&self) -> bool {
        self.status().await == EngineStatus::Running
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let mut guard = self.state.lock().await;
        guard.sync_active_from_anchor();
        EngineSnapshot {
            state: guard.clone(),
            beat_hz: self.current_beat_hz(),
            envelope_level: self.envelope.level(),
            elapsed_ms: self.clock.elapsed().as_millis() as u64,
        }
    }
}
