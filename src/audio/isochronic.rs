use std::collections::VecDeque;
use std::f64::consts::{PI, TAU};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{AudioBackend, PcmBuffer, VolumeEnvelope};
use crate::engine::{EngineEvent, EventBus};
use crate::error::AudioEngineError;
use crate::light::PulseEvent;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_warn};

/// Longest click-suppressing edge on the tone half, in seconds.
const MAX_EDGE_SECS: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseHalf {
    On,
    Off,
}

impl PulseHalf {
    fn flipped(self) -> Self {
        match self {
            PulseHalf::On => PulseHalf::Off,
            PulseHalf::Off => PulseHalf::On,
        }
    }
}

/// One pre-rendered pulse period, split into a tone half and a silent half.
///
/// The pulse rate is implied by the clip length, so playing the halves back
/// to back reproduces the frequency without any phase accumulator.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseClip {
    sample_rate: u32,
    pulse_hz: f64,
    on_half: Vec<f32>,
    off_half: Vec<f32>,
}

impl PulseClip {
    /// Render one period of an isochronic pulse at `pulse_hz` on a
    /// `carrier_hz` tone. The tone half has raised-cosine edges.
    pub fn render(pulse_hz: f64, carrier_hz: f64, sample_rate: u32) -> Result<Self, AudioEngineError> {
        if sample_rate == 0 {
            return Err(AudioEngineError::invalid("sample rate must be non-zero"));
        }
        let sr = f64::from(sample_rate);
        if !pulse_hz.is_finite() || pulse_hz <= 0.0 || pulse_hz > sr / 2.0 {
            return Err(AudioEngineError::invalid(format!(
                "pulse frequency must be within (0, {}] Hz, got {pulse_hz}",
                sr / 2.0
            )));
        }
        if !carrier_hz.is_finite() || carrier_hz <= 0.0 || carrier_hz >= sr / 2.0 {
            return Err(AudioEngineError::invalid(format!(
                "carrier frequency must be within (0, {}) Hz, got {carrier_hz}",
                sr / 2.0
            )));
        }

        let period_frames = period_frames(pulse_hz, sample_rate);
        let on_frames = period_frames / 2;
        let off_frames = period_frames - on_frames;
        let edge_frames = ((sr * MAX_EDGE_SECS) as usize).min(on_frames / 4);

        let mut on_half = Vec::with_capacity(on_frames * 2);
        for i in 0..on_frames {
            let envelope = edge_gain(i, on_frames, edge_frames);
            let sample = ((TAU * carrier_hz * i as f64 / sr).sin() * envelope) as f32;
            on_half.push(sample);
            on_half.push(sample);
        }

        Ok(Self {
            sample_rate,
            pulse_hz: sr / period_frames as f64,
            on_half,
            off_half: vec![0.0; off_frames * 2],
        })
    }

    /// Pulse rate actually produced, after rounding the period to whole frames.
    pub fn pulse_hz(&self) -> f64 {
        self.pulse_hz
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn half(&self, half: PulseHalf) -> &[f32] {
        match half {
            PulseHalf::On => &self.on_half,
            PulseHalf::Off => &self.off_half,
        }
    }

    /// Copy of one half scaled by `gain`, ready to enqueue.
    pub fn buffer(&self, half: PulseHalf, gain: f32) -> PcmBuffer {
        let gain = gain.clamp(0.0, 1.0);
        PcmBuffer {
            channels: 2,
            sample_rate: self.sample_rate,
            samples: self.half(half).iter().map(|s| s * gain).collect(),
        }
    }
}

fn period_frames(pulse_hz: f64, sample_rate: u32) -> usize {
    ((f64::from(sample_rate) / pulse_hz).round() as usize).max(2)
}

/// Pulse rate a clip rendered for `pulse_hz` really plays at.
pub fn rounded_pulse_hz(pulse_hz: f64, sample_rate: u32) -> f64 {
    if sample_rate == 0 || !pulse_hz.is_finite() || pulse_hz <= 0.0 {
        return pulse_hz;
    }
    f64::from(sample_rate) / period_frames(pulse_hz, sample_rate) as f64
}

fn edge_gain(i: usize, len: usize, edge: usize) -> f64 {
    if edge == 0 {
        return 1.0;
    }
    let from_edge = i.min(len - 1 - i);
    if from_edge >= edge {
        1.0
    } else {
        0.5 - 0.5 * (PI * from_edge as f64 / edge as f64).cos()
    }
}

/// What a single buffer completion produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub event: Option<PulseEvent>,
    pub underrun: bool,
}

/// Queue bookkeeping for the back-to-back pulse loop.
///
/// Mirrors what the backend has queued. The half at the front is the one
/// playing, and the light follows it. `min_queued` halves are kept pending
/// behind the playing one. A completion that empties the queue means
/// playback starved; the loop then restarts on a tone half.
#[derive(Debug, Clone)]
pub struct PulseLoop {
    queued: VecDeque<PulseHalf>,
    next: PulseHalf,
    min_queued: usize,
    completed: u64,
    light_on: bool,
}

impl PulseLoop {
    pub fn new(min_queued: usize) -> Self {
        Self {
            queued: VecDeque::new(),
            next: PulseHalf::On,
            min_queued: min_queued.max(2),
            completed: 0,
            light_on: false,
        }
    }

    /// Halves handed to the backend and not yet completed, playing one included.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    /// Halves waiting behind the one that is playing.
    pub fn pending(&self) -> usize {
        self.queued.len().saturating_sub(1)
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn is_on(&self) -> bool {
        self.light_on
    }

    /// Restart from a tone half. Returns the opening edge.
    pub fn prime(&mut self) -> Option<PulseEvent> {
        self.queued.clear();
        self.next = PulseHalf::On;
        self.set_light(true)
    }

    /// Next half to hand to the backend, while fewer than `min_queued` wait
    /// behind the playing half.
    pub fn next_to_enqueue(&mut self) -> Option<PulseHalf> {
        if self.queued.len() > self.min_queued {
            return None;
        }
        let half = self.next;
        self.queued.push_back(half);
        self.next = half.flipped();
        Some(half)
    }

    pub fn on_buffer_complete(&mut self) -> Completion {
        if self.queued.pop_front().is_none() {
            // Late callback from a queue that was already torn down.
            return Completion {
                event: None,
                underrun: false,
            };
        }
        self.completed += 1;

        let underrun = self.queued.is_empty();
        if underrun {
            self.next = PulseHalf::On;
        }
        let playing = self.queued.front().copied().unwrap_or(PulseHalf::On);
        Completion {
            event: self.set_light(playing == PulseHalf::On),
            underrun,
        }
    }

    pub fn force_off(&mut self) -> Option<PulseEvent> {
        self.queued.clear();
        self.set_light(false)
    }

    fn set_light(&mut self, on: bool) -> Option<PulseEvent> {
        if on == self.light_on {
            return None;
        }
        self.light_on = on;
        Some(if on { PulseEvent::On } else { PulseEvent::Off })
    }
}

/// Task that keeps the pulse loop fed from backend completion callbacks.
pub struct IsochronicWorker {
    handle: JoinHandle<PulseLoop>,
    cancel: CancellationToken,
}

impl IsochronicWorker {
    /// Queue the first buffers and start refilling. Enqueue failures here
    /// are returned so `start` can roll back.
    ///
    /// Each buffer is scaled by the envelope level at the moment it is
    /// queued, so fades and mute apply with half-period granularity.
    pub fn spawn(
        clip: Arc<PulseClip>,
        backend: Arc<dyn AudioBackend>,
        envelope: Arc<VolumeEnvelope>,
        bus: EventBus,
        min_queued: usize,
    ) -> Result<Self, AudioEngineError> {
        let (done_tx, done_rx) = mpsc::unbounded_channel::<()>();
        let mut pulse_loop = PulseLoop::new(min_queued);
        let opening = pulse_loop.prime();
        let feed = Feed {
            clip,
            backend,
            envelope,
            done_tx,
        };
        feed.refill(&mut pulse_loop)?;
        if let Some(event) = opening {
            bus.pulse(event);
        }

        log_debug!("isochronic loop started at {:.3} Hz", feed.clip.pulse_hz());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(refill_loop(pulse_loop, feed, bus, done_rx, cancel.clone()));
        Ok(Self { handle, cancel })
    }

    pub async fn halt(self) -> PulseLoop {
        self.cancel.cancel();
        match self.handle.await {
            Ok(pulse_loop) => pulse_loop,
            Err(err) => {
                log_error!("isochronic worker failed to join: {err}");
                PulseLoop::new(2)
            }
        }
    }
}

struct Feed {
    clip: Arc<PulseClip>,
    backend: Arc<dyn AudioBackend>,
    envelope: Arc<VolumeEnvelope>,
    done_tx: UnboundedSender<()>,
}

impl Feed {
    fn refill(&self, pulse_loop: &mut PulseLoop) -> Result<(), AudioEngineError> {
        while let Some(half) = pulse_loop.next_to_enqueue() {
            let done_tx = self.done_tx.clone();
            self.backend.enqueue(
                self.clip.buffer(half, self.envelope.level()),
                Box::new(move || {
                    let _ = done_tx.send(());
                }),
            )?;
        }
        Ok(())
    }
}

fn report(pulse_loop: &PulseLoop, completion: Completion, bus: &EventBus) {
    if completion.underrun {
        log_warn!(
            "isochronic loop starved after {} buffers; restarting",
            pulse_loop.completed()
        );
        bus.emit(EngineEvent::Fault(AudioEngineError::BufferUnderrun {
            completed: pulse_loop.completed(),
        }));
    }
    if let Some(event) = completion.event {
        bus.pulse(event);
    }
}

async fn refill_loop(
    mut pulse_loop: PulseLoop,
    feed: Feed,
    bus: EventBus,
    mut done_rx: UnboundedReceiver<()>,
    cancel: CancellationToken,
) -> PulseLoop {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = done_rx.recv() => {
                if msg.is_none() {
                    break;
                }
                let completion = pulse_loop.on_buffer_complete();
                report(&pulse_loop, completion, &bus);
                // Drain completions that piled up; an empty queue among them
                // is a starvation the single-step view would miss.
                while done_rx.try_recv().is_ok() {
                    let completion = pulse_loop.on_buffer_complete();
                    report(&pulse_loop, completion, &bus);
                }

                if let Err(err) = feed.refill(&mut pulse_loop) {
                    log_error!("isochronic refill failed: {err}");
                    bus.emit(EngineEvent::Fault(err));
                    break;
                }
            }
        }
    }
    pulse_loop
}
