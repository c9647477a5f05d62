pub mod binaural;
pub mod envelope;
pub mod isochronic;
pub mod oscillator;

pub use binaural::{MixSettings, StereoGenerator};
pub use envelope::{FadePlan, FadeRamp, VolumeEnvelope};
pub use isochronic::{IsochronicWorker, PulseClip, PulseHalf, PulseLoop};
pub use oscillator::{Frequencies, OscillatorBank};

use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, Sink};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    mpsc::{self, Sender},
    Arc, Mutex,
};
use std::thread;
use std::time::Duration;

use crate::error::AudioEngineError;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Called once when an enqueued buffer has finished playing. Runs on the
/// audio thread; implementations must only signal, never block.
pub type CompletionHook = Box<dyn Fn() + Send + 'static>;

/// Interleaved PCM handed to the backend as one queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    pub channels: u16,
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

/// Output device seam. The controller only talks to audio through this, so
/// tests can inject a fake.
///
/// Every method is safe to call from any thread; implementations marshal
/// onto their own audio context.
pub trait AudioBackend: Send + Sync {
    /// Acquire the output device. Blocks until the device answers.
    fn open(&self) -> Result<(), AudioEngineError>;
    /// Play an endless generated stream.
    fn play_stream(&self, source: StereoGenerator) -> Result<(), AudioEngineError>;
    /// Queue a finite buffer to play after everything already queued.
    fn enqueue(&self, buffer: PcmBuffer, on_complete: CompletionHook) -> Result<(), AudioEngineError>;
    fn pause(&self);
    fn resume(&self);
    /// Silence immediately and release the device. No-op when closed.
    fn stop(&self);
    /// Output gain in [0, 1], independent of the fade-in envelope.
    fn set_gain(&self, gain: f32);
    /// Release the backend thread. `open` may start it again.
    fn shutdown(&self);
}

enum AudioCommand {
    Open(mpsc::Sender<Result<(), AudioEngineError>>),
    Stop,
    Pause,
    Play,
    SetGain(f32),
    AppendStream(StereoGenerator),
    AppendBuffer(PcmBuffer, CompletionHook),
}

/// rodio output on a dedicated thread. `OutputStream` is not `Send`, so the
/// stream and sink live on that thread and are driven by commands.
pub struct RodioBackend {
    tx: Arc<Mutex<Option<Sender<AudioCommand>>>>,
    is_paused: Arc<AtomicBool>,
    gain: Arc<AtomicU32>,
}

impl RodioBackend {
    pub fn new() -> Self {
        Self {
            tx: Arc::new(Mutex::new(None)),
            is_paused: Arc::new(AtomicBool::new(false)),
            gain: Arc::new(AtomicU32::new(1.0f32.to_bits())),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>, AudioEngineError> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|e| AudioEngineError::backend(e.to_string()))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();
        let is_paused = Arc::clone(&self.is_paused);
        let gain = Arc::clone(&self.gain);

        thread::Builder::new()
            .name("audio-engine".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                fn open_sink(
                    stream: &mut Option<OutputStream>,
                    sink: &mut Option<Sink>,
                    gain: f32,
                ) -> Result<(), AudioEngineError> {
                    if sink.is_none() {
                        let (s, handle) = OutputStream::try_default().map_err(|e| {
                            AudioEngineError::backend(format!(
                                "failed to create audio output stream: {e}"
                            ))
                        })?;
                        let new_sink = Sink::try_new(&handle).map_err(|e| {
                            AudioEngineError::backend(format!("failed to create audio sink: {e}"))
                        })?;
                        new_sink.set_volume(gain);
                        *stream = Some(s);
                        *sink = Some(new_sink);
                    }
                    Ok(())
                }

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::Open(reply) => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            _stream = None;
                            let result = open_sink(
                                &mut _stream,
                                &mut sink,
                                f32::from_bits(gain.load(Ordering::SeqCst)),
                            );
                            is_paused.store(false, Ordering::SeqCst);
                            let _ = reply.send(result);
                        }
                        AudioCommand::Stop => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            _stream = None;
                            is_paused.store(false, Ordering::SeqCst);
                        }
                        AudioCommand::Pause => {
                            if let Some(ref s) = sink {
                                s.pause();
                                is_paused.store(true, Ordering::SeqCst);
                            }
                        }
                        AudioCommand::Play => {
                            if let Some(ref s) = sink {
                                s.play();
                                is_paused.store(false, Ordering::SeqCst);
                            }
                        }
                        AudioCommand::SetGain(v) => {
                            if let Some(ref s) = sink {
                                s.set_volume(v);
                            }
                        }
                        AudioCommand::AppendStream(source) => match sink {
                            Some(ref s) => s.append(source),
                            None => log_warn!("dropping stream: audio output is not open"),
                        },
                        AudioCommand::AppendBuffer(buffer, on_complete) => match sink {
                            Some(ref s) => {
                                s.append(SamplesBuffer::new(
                                    buffer.channels,
                                    buffer.sample_rate,
                                    buffer.samples,
                                ));
                                s.append(EmptyCallback::<f32>::new(on_complete));
                            }
                            None => log_warn!("dropping buffer: audio output is not open"),
                        },
                    }
                }
                log_info!("audio thread exiting");
            })
            .map_err(|e| AudioEngineError::backend(format!("failed to spawn audio thread: {e}")))?;

        *guard = Some(tx.clone());
        Ok(tx)
    }

    fn send(&self, cmd: AudioCommand) -> Result<(), AudioEngineError> {
        let tx = self.ensure_thread()?;
        tx.send(cmd)
            .map_err(|_| AudioEngineError::backend("audio thread has exited"))
    }

    /// Commands that only make sense with a live thread are dropped otherwise.
    fn send_if_running(&self, cmd: AudioCommand) {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(cmd);
        }
    }
}

impl Default for RodioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for RodioBackend {
    fn open(&self) -> Result<(), AudioEngineError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.send(AudioCommand::Open(reply_tx))?;
        reply_rx
            .recv_timeout(OPEN_TIMEOUT)
            .map_err(|_| AudioEngineError::backend("audio device did not answer"))?
    }

    fn play_stream(&self, source: StereoGenerator) -> Result<(), AudioEngineError> {
        self.send(AudioCommand::AppendStream(source))
    }

    fn enqueue(&self, buffer: PcmBuffer, on_complete: CompletionHook) -> Result<(), AudioEngineError> {
        self.send(AudioCommand::AppendBuffer(buffer, on_complete))
    }

    fn pause(&self) {
        self.send_if_running(AudioCommand::Pause);
    }

    fn resume(&self) {
        self.send_if_running(AudioCommand::Play);
    }

    fn stop(&self) {
        self.send_if_running(AudioCommand::Stop);
    }

    fn set_gain(&self, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        self.gain.store(gain.to_bits(), Ordering::SeqCst);
        self.send_if_running(AudioCommand::SetGain(gain));
    }

    fn shutdown(&self) {
        self.stop();
        // Dropping the last sender ends the thread's receive loop.
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }
}
