use tokio::sync::broadcast;

use super::EngineStatus;
use crate::error::AudioEngineError;
use crate::light::PulseEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Light edge for the renderer. Delivered from the light driver task
    /// (binaural) or the isochronic refill task; renderers hop to their own
    /// UI context before drawing.
    Pulse(PulseEvent),
    StateChanged(EngineStatus),
    /// Asynchronous runtime fault, e.g. an isochronic underrun.
    Fault(AudioEngineError),
}

/// Fan-out of engine events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is not an error.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn pulse(&self, event: PulseEvent) {
        self.emit(EngineEvent::Pulse(event));
    }
}
