use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::LightPulseClock;
use crate::engine::{EventBus, SessionClock};
use crate::models::SessionPlan;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error};

/// What the light task reads: the same plan and session clock the audio
/// thread reads, plus the bus it publishes to.
#[derive(Clone)]
pub struct LightDriverContext {
    pub plan: Arc<ArcSwapOption<SessionPlan>>,
    pub clock: Arc<SessionClock>,
    pub bus: EventBus,
    pub tick: Duration,
}

/// Periodic task that owns a `LightPulseClock` while it runs.
///
/// The clock is moved into the task and handed back by `halt`, so pausing
/// freezes it and resuming continues from the same phase with no shared
/// mutable state.
pub struct LightDriver {
    handle: JoinHandle<LightPulseClock>,
    cancel: CancellationToken,
}

impl LightDriver {
    pub fn spawn(light: LightPulseClock, ctx: LightDriverContext) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(light_loop(light, ctx, cancel.clone()));
        Self { handle, cancel }
    }

    /// Stop ticking and take the clock back in whatever state it reached.
    pub async fn halt(self) -> LightPulseClock {
        self.cancel.cancel();
        match self.handle.await {
            Ok(light) => light,
            Err(err) => {
                log_error!("light driver task failed to join: {err}");
                LightPulseClock::default()
            }
        }
    }
}

async fn light_loop(
    mut light: LightPulseClock,
    ctx: LightDriverContext,
    cancel: CancellationToken,
) -> LightPulseClock {
    let mut ticker = time::interval(ctx.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = Instant::now();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_debug!("light driver stopping at cycle {:.3}", light.cycle_fraction());
                break;
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f64();
                last = now;

                let beat_hz = {
                    let plan = ctx.plan.load();
                    match plan.as_ref() {
                        Some(plan) => plan.program.instantaneous_hz(ctx.clock.elapsed_secs()),
                        None => continue,
                    }
                };

                if let Some(event) = light.tick(dt, beat_hz) {
                    ctx.bus.pulse(event);
                }
            }
        }
    }

    light
}
