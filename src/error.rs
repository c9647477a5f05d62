use thiserror::Error;

use crate::engine::EngineStatus;

/// Errors surfaced by the engine API.
///
/// Setup and configuration errors are returned synchronously from
/// `configure`/`start`. Runtime faults from the audio side (underruns) are
/// never returned; they are published as `EngineEvent::Fault`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AudioEngineError {
    #[error("audio backend unavailable: {0}")]
    AudioBackendUnavailable(String),
    #[error("isochronic loop starved after {completed} completed buffers")]
    BufferUnderrun { completed: u64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("engine is busy ({0:?})")]
    EngineBusy(EngineStatus),
    #[error("start was cancelled by a concurrent stop")]
    StartCancelled,
}

impl AudioEngineError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    pub(crate) fn backend(message: impl Into<String>) -> Self {
        Self::AudioBackendUnavailable(message.into())
    }
}
