#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use entrainer_lib::settings::EngineSettings;
use entrainer_lib::{
    AudioBackend, AudioEngineError, CompletionHook, EngineController, EngineEvent, PcmBuffer,
    StereoGenerator,
};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    PlayStream,
    Enqueue,
    Pause,
    Resume,
    Stop,
    SetGain(f32),
    Shutdown,
}

/// In-memory backend: records every call, keeps the generator and the
/// completion hooks so tests can drive playback by hand.
#[derive(Default)]
pub struct FakeBackend {
    fail_open: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    slow_opens: AtomicUsize,
    calls: Mutex<Vec<Call>>,
    generator: Mutex<Option<StereoGenerator>>,
    queue: Mutex<VecDeque<(PcmBuffer, CompletionHook)>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let backend = Self::default();
        backend.fail_open.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    /// Backend whose `open` blocks for `delay`, like a slow device.
    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::slow_opens(delay, usize::MAX)
    }

    /// Only the first `open` is slow; later ones answer at once.
    pub fn slow_first(delay: Duration) -> Arc<Self> {
        Self::slow_opens(delay, 1)
    }

    fn slow_opens(delay: Duration, count: usize) -> Arc<Self> {
        let backend = Self::default();
        *backend.open_delay.lock().unwrap() = Some(delay);
        backend.slow_opens.store(count, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn last_gain(&self) -> Option<f32> {
        self.calls().iter().rev().find_map(|c| match c {
            Call::SetGain(g) => Some(*g),
            _ => None,
        })
    }

    pub fn take_generator(&self) -> Option<StereoGenerator> {
        self.generator.lock().unwrap().take()
    }

    pub fn queued(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Finish the buffer at the head of the queue, as the device would.
    pub fn complete_next(&self) -> Option<PcmBuffer> {
        let (buffer, hook) = self.queue.lock().unwrap().pop_front()?;
        hook();
        Some(buffer)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

impl AudioBackend for FakeBackend {
    fn open(&self) -> Result<(), AudioEngineError> {
        self.record(Call::Open);
        let slow = self
            .slow_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if slow {
            if let Some(delay) = *self.open_delay.lock().unwrap() {
                std::thread::sleep(delay);
            }
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AudioEngineError::AudioBackendUnavailable(
                "no output device".into(),
            ));
        }
        Ok(())
    }

    fn play_stream(&self, source: StereoGenerator) -> Result<(), AudioEngineError> {
        self.record(Call::PlayStream);
        *self.generator.lock().unwrap() = Some(source);
        Ok(())
    }

    fn enqueue(&self, buffer: PcmBuffer, on_complete: CompletionHook) -> Result<(), AudioEngineError> {
        self.record(Call::Enqueue);
        self.queue.lock().unwrap().push_back((buffer, on_complete));
        Ok(())
    }

    fn pause(&self) {
        self.record(Call::Pause);
    }

    fn resume(&self) {
        self.record(Call::Resume);
    }

    fn stop(&self) {
        self.record(Call::Stop);
        self.queue.lock().unwrap().clear();
    }

    fn set_gain(&self, gain: f32) {
        self.record(Call::SetGain(gain));
    }

    fn shutdown(&self) {
        self.record(Call::Shutdown);
    }
}

/// Short fades and a fast light tick so tests finish quickly.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        fade_steps: 4,
        fade_duration_ms: 40,
        light_tick_ms: 2,
        ..EngineSettings::default()
    }
}

pub fn controller(backend: &Arc<FakeBackend>) -> EngineController {
    let backend: Arc<dyn AudioBackend> = backend.clone();
    EngineController::new(backend, fast_settings())
}

pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Everything published so far, without waiting.
pub fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
