//! Per-question countdown.
//!
//! The engine owns exactly one [`Countdown`]. Arming always replaces the
//! previous countdown, and every tick carries the [`TimerToken`] it was armed
//! with so the engine can drop ticks from a countdown it has moved past.

use log::{debug, trace};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Identifies one arming of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(pub u64);

/// A tick delivered by a running countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub token: TimerToken,
}

pub trait Countdown: Send {
    /// Starts ticking once per period for `ticks` periods, stopping any
    /// countdown that is still running.
    fn arm(&mut self, token: TimerToken, ticks: u32);
    fn disarm(&mut self);
}

/// Countdown backed by a spawned tokio task. Must be armed from inside a
/// tokio runtime.
pub struct TokioCountdown {
    tx: mpsc::UnboundedSender<Tick>,
    period: Duration,
    running: Option<(TimerToken, JoinHandle<()>)>,
}

impl TokioCountdown {
    pub fn new(tx: mpsc::UnboundedSender<Tick>) -> Self {
        Self::with_period(tx, Duration::from_secs(1))
    }

    pub fn with_period(tx: mpsc::UnboundedSender<Tick>, period: Duration) -> Self {
        Self {
            tx,
            period,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|(_, handle)| !handle.is_finished())
            .unwrap_or(false)
    }
}

impl Countdown for TokioCountdown {
    fn arm(&mut self, token: TimerToken, ticks: u32) {
        self.disarm();
        debug!("[Timer] Arming {:?} for {} ticks", token, ticks);
        let tx = self.tx.clone();
        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            for _ in 0..ticks {
                interval.tick().await;
                trace!("[Timer] Tick for {:?}", token);
                if tx.send(Tick { token }).is_err() {
                    break;
                }
            }
        });
        self.running = Some((token, handle));
    }

    fn disarm(&mut self) {
        if let Some((token, handle)) = self.running.take() {
            debug!("[Timer] Disarming {:?}", token);
            handle.abort();
        }
    }
}

impl Drop for TokioCountdown {
    fn drop(&mut self) {
        self.disarm();
    }
}
