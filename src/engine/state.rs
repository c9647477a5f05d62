use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::models::{SessionSummary, StimulationMode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum EngineStatus {
    #[default]
    Idle,
    Starting,
    Running,
    Paused,
}

/// Controller-side session bookkeeping. Never touched by the audio thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineState {
    pub status: EngineStatus,
    pub mode: StimulationMode,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub muted: bool,
    /// User output gain; survives across sessions.
    pub volume: f32,
    pub active_ms: u64,
    /// Active time from earlier running windows; combines with
    /// `running_anchor` to give the true active duration.
    #[serde(skip)]
    pub active_ms_baseline: u64,
    #[serde(skip)]
    pub running_anchor: Option<Instant>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            status: EngineStatus::Idle,
            mode: StimulationMode::Binaural,
            session_id: None,
            started_at: None,
            muted: false,
            volume: 1.0,
            active_ms: 0,
            active_ms_baseline: 0,
            running_anchor: None,
        }
    }
}

impl EngineState {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: volume.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    pub fn current_active_ms(&self) -> u64 {
        if let (EngineStatus::Running, Some(anchor)) = (self.status, self.running_anchor) {
            self.active_ms_baseline
                .saturating_add(anchor.elapsed().as_millis() as u64)
        } else {
            self.active_ms
        }
    }

    pub fn sync_active_from_anchor(&mut self) {
        self.active_ms = self.current_active_ms();
    }

    pub fn begin_starting(&mut self, mode: StimulationMode, muted: bool) {
        let volume = self.volume;
        *self = Self {
            status: EngineStatus::Starting,
            mode,
            muted,
            volume,
            ..Self::default()
        };
    }

    pub fn begin_session(&mut self, session_id: String, start_at: DateTime<Utc>, now: Instant) {
        self.status = EngineStatus::Running;
        self.session_id = Some(session_id);
        self.started_at = Some(start_at);
        self.active_ms = 0;
        self.active_ms_baseline = 0;
        self.running_anchor = Some(now);
    }

    pub fn pause(&mut self) {
        self.sync_active_from_anchor();
        self.status = EngineStatus::Paused;
        self.running_anchor = None;
        self.active_ms_baseline = self.active_ms;
    }

    pub fn resume(&mut self, now: Instant) {
        self.status = EngineStatus::Running;
        self.running_anchor = Some(now);
    }

    /// Summary of the session being ended, if one got past `Starting`.
    pub fn summary(&self, stopped_at: DateTime<Utc>) -> Option<SessionSummary> {
        let started_at = self.started_at?;
        Some(SessionSummary {
            id: self.session_id.clone().unwrap_or_default(),
            mode: self.mode,
            started_at,
            stopped_at,
            active_ms: self.current_active_ms(),
            muted: self.muted,
        })
    }

    /// Back to `Idle`, keeping only the user volume.
    pub fn cancel(&mut self) {
        *self = Self::new(self.volume);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn paused_time_is_not_counted() {
        let mut state = EngineState::new(0.5);
        state.begin_starting(StimulationMode::Binaural, false);
        let t0 = Instant::now() - Duration::from_millis(300);
        state.begin_session("s".into(), Utc::now(), t0);
        state.pause();
        let paused_at = state.active_ms;
        assert!(paused_at >= 300);
        assert_eq!(state.current_active_ms(), paused_at);
        state.resume(Instant::now());
        assert!(state.current_active_ms() >= paused_at);
        assert!(state.current_active_ms() < paused_at + 250);
    }

    #[test]
    fn cancel_keeps_volume_only() {
        let mut state = EngineState::new(0.4);
        state.begin_starting(StimulationMode::Isochronic, true);
        state.begin_session("s".into(), Utc::now(), Instant::now());
        state.cancel();
        assert_eq!(state.status, EngineStatus::Idle);
        assert_eq!(state.volume, 0.4);
        assert!(state.session_id.is_none());
        assert!(!state.muted);
    }

    #[test]
    fn summary_requires_a_started_session() {
        let mut state = EngineState::default();
        state.begin_starting(StimulationMode::Binaural, false);
        state.session_id = Some("pending".into());
        assert!(state.summary(Utc::now()).is_none());
        state.begin_session("abc".into(), Utc::now(), Instant::now());
        assert_eq!(state.summary(Utc::now()).unwrap().id, "abc");
    }
}
