//! Timer that walks the queue head and emits playback checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{task::JoinHandle, time::{self, Instant, MissedTickBehavior}};
use uuid::Uuid;

use crate::{
    config::PlaybackConfig,
    error::AppResult,
    fanout::Broadcaster,
    model::MediaReference,
    queue::QueueEngine,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlaybackCheckpoint {
    pub entry_id: Uuid,
    pub media:    MediaReference,
    pub elapsed:  Duration,
    pub at:       DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlaybackUpdate {
    Playing(PlaybackCheckpoint),
    Idle { at: DateTime<Utc> },
}

impl PlaybackUpdate {
    pub fn entry_id(&self) -> Option<Uuid> {
        match self {
            PlaybackUpdate::Playing(c) => Some(c.entry_id),
            PlaybackUpdate::Idle { .. } => None,
        }
    }
}

pub type PlaybackTopic = Broadcaster<PlaybackUpdate>;

pub struct PlaybackClock {
    engine:   QueueEngine,
    topic:    PlaybackTopic,
    interval: Duration,
    current:  Option<Uuid>,
}

impl PlaybackClock {
    pub fn new(engine: QueueEngine, cfg: &PlaybackConfig) -> Self {
        let topic = Broadcaster::with_initial("playback", cfg.fanout_buffer, PlaybackUpdate::Idle { at: Utc::now() });
        Self { engine, topic, interval: cfg.checkpoint_interval, current: None }
    }

    pub fn topic(&self) -> PlaybackTopic { self.topic.clone() }

    /// One step of `elapsed` wall time. Publishes a checkpoint while
    /// something plays and a single `Idle` when playback stops.
    pub fn tick(&mut self, elapsed: Duration) -> AppResult<PlaybackUpdate> {
        let tick = self.engine.advance(self.current, elapsed)?;
        let now_id = tick.playing.as_ref().map(|(e, _)| e.id);
        if tick.finished.is_none() && now_id != self.current {
            tracing::debug!(from = ?self.current, to = ?now_id, "head changed between ticks");
        }
        let was_idle = self.current.is_none();
        self.current = now_id;

        let update = match tick.playing {
            Some((entry, elapsed)) => PlaybackUpdate::Playing(PlaybackCheckpoint {
                entry_id: entry.id,
                media: entry.media,
                elapsed,
                at: Utc::now(),
            }),
            None => PlaybackUpdate::Idle { at: Utc::now() },
        };
        let idle_again = was_idle && now_id.is_none() && matches!(self.topic.latest(), Some(PlaybackUpdate::Idle { .. }));
        if !idle_again {
            if now_id.is_none() {
                tracing::info!("playback idle");
            }
            self.topic.publish(update.clone());
        }
        Ok(update)
    }

    pub async fn run(mut self) {
        let mut every = time::interval(self.interval);
        every.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = Instant::now();
        loop {
            every.tick().await;
            let now = Instant::now();
            if let Err(e) = self.tick(now - last) {
                tracing::error!(error = %e, "playback tick failed");
            }
            last = now;
        }
    }

    pub fn spawn(self) -> JoinHandle<()> { tokio::spawn(self.run()) }
}
