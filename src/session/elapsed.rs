use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::session::Internal;
use super::stats::ElapsedKind;

struct Running {
    generation: u64,
    base: u64,
    started: Instant,
    task: JoinHandle<()>,
}

/// Tick counter for one activity (recording or playback)
///
/// While running, a background task posts `Internal::Tick` on every interval.
/// The counter itself is derived from the activity's clock, so a late or
/// skipped tick never drifts it; ticks from an earlier run carry a stale
/// generation and are ignored.
pub(super) struct ElapsedCounter {
    kind: ElapsedKind,
    interval: Duration,
    value: u64,
    generation: u64,
    running: Option<Running>,
}

impl ElapsedCounter {
    pub fn new(kind: ElapsedKind, interval: Duration) -> Self {
        Self {
            kind,
            interval,
            value: 0,
            generation: 0,
            running: None,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    /// Stop and zero the counter; true if the value changed
    pub fn reset(&mut self) -> bool {
        self.stop();
        let changed = self.value != 0;
        self.value = 0;
        changed
    }

    /// Continue counting from the current value
    pub fn start(&mut self, tx: &mpsc::UnboundedSender<Internal>) {
        self.stop();
        self.generation += 1;

        let kind = self.kind;
        let generation = self.generation;
        let period = self.interval;
        let tx = tx.clone();
        let started = Instant::now();

        let task = tokio::spawn(async move {
            let mut ticks = time::interval_at(started + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticks.tick().await;
                if tx.send(Internal::Tick { kind, generation }).is_err() {
                    break;
                }
            }
        });

        self.running = Some(Running {
            generation,
            base: self.value,
            started,
            task,
        });
    }

    /// Apply a tick; returns the new value when it changed
    pub fn on_tick(&mut self, generation: u64) -> Option<u64> {
        match &self.running {
            Some(running) if running.generation == generation => self.sync(),
            _ => None,
        }
    }

    /// Stop counting; returns the final value when the last sync changed it
    pub fn stop(&mut self) -> Option<u64> {
        let changed = self.sync();
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
        changed
    }

    fn sync(&mut self) -> Option<u64> {
        let running = self.running.as_ref()?;
        let ticks = running.started.elapsed().as_nanos() / self.interval.as_nanos().max(1);
        let value = running.base + ticks as u64;
        if value == self.value {
            return None;
        }
        self.value = value;
        Some(value)
    }
}

impl Drop for ElapsedCounter {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}
