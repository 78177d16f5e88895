//! Chat room with a bounded history. Removed messages stay in the
//! history as tombstones so clients can reconcile what they already show.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Instant,
};
use uuid::Uuid;

use crate::{
    bans::{BanList, BanScope},
    config::ChatConfig,
    error::{bad, forbidden, not_found, AppErr, AppResult},
    fanout::{Broadcaster, Subscription},
    gate::{Action, AdmissionGate},
    model::Identity,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id:      Uuid,
    pub author:  Identity,
    pub text:    String,
    pub at:      DateTime<Utc>,
    pub removed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub enabled:  bool,
    pub slowmode: bool,
}

impl Default for ChatSettings {
    fn default() -> Self { Self { enabled: true, slowmode: false } }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub version:  u64,
    pub messages: Vec<ChatMessage>,
    pub settings: ChatSettings,
}

struct ChatState {
    version:   u64,
    history:   VecDeque<ChatMessage>, // 最新 N 則
    settings:  ChatSettings,
    last_sent: HashMap<Identity, Instant>,
}

impl ChatState {
    fn snapshot(&self) -> Arc<ChatSnapshot> {
        Arc::new(ChatSnapshot {
            version: self.version,
            messages: self.history.iter().cloned().collect(),
            settings: self.settings,
        })
    }
}

pub struct ChatRoom {
    cfg:   ChatConfig,
    gate:  Arc<AdmissionGate>,
    bans:  Arc<BanList>,
    state: Mutex<ChatState>,
    topic: Broadcaster<Arc<ChatSnapshot>>,
}

impl ChatRoom {
    pub fn new(cfg: ChatConfig, gate: Arc<AdmissionGate>, bans: Arc<BanList>) -> Self {
        let state = ChatState {
            version: 0,
            history: VecDeque::with_capacity(cfg.history),
            settings: ChatSettings::default(),
            last_sent: HashMap::new(),
        };
        let topic = Broadcaster::with_initial("chat", cfg.fanout_buffer, state.snapshot());
        Self { cfg, gate, bans, state: Mutex::new(state), topic }
    }

    pub fn subscribe(&self) -> Subscription<Arc<ChatSnapshot>> { self.topic.subscribe() }

    pub fn snapshot(&self) -> Arc<ChatSnapshot> { self.state.lock().snapshot() }

    pub fn send(&self, who: &Identity, text: &str) -> AppResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(bad("empty message"));
        }
        if text.chars().count() > self.cfg.max_len {
            return Err(bad(format!("message longer than {} characters", self.cfg.max_len)));
        }
        if self.bans.is_banned(who, BanScope::Chat) {
            return Err(forbidden("banned from chat"));
        }

        let (msg, snap) = {
            let mut st = self.state.lock();
            if !st.settings.enabled {
                return Err(forbidden("chat is disabled"));
            }
            let now = Instant::now();
            if st.settings.slowmode {
                if let Some(last) = st.last_sent.get(who) {
                    if now.duration_since(*last) < self.cfg.slowmode {
                        return Err(AppErr::RateLimited);
                    }
                }
            }
            // last check before the message is accepted, it counts the send
            self.gate.record_activity(who, Action::Chat).map_err(AppErr::ChallengeRequired)?;
            let msg = ChatMessage {
                id: Uuid::new_v4(),
                author: who.clone(),
                text: text.to_string(),
                at: Utc::now(),
                removed: false,
            };
            st.history.push_back(msg.clone());
            while st.history.len() > self.cfg.history {
                st.history.pop_front();
            }
            st.last_sent.insert(who.clone(), now);
            st.version += 1;
            (msg, st.snapshot())
        };
        self.topic.publish_versioned(snap.version, snap);
        tracing::debug!(message = %msg.id, author = %who, "chat message");
        Ok(msg)
    }

    /// Tombstones a message: it stays in the history, flagged and blanked.
    pub fn remove_message(&self, id: Uuid) -> AppResult<ChatMessage> {
        let (msg, snap) = {
            let mut st = self.state.lock();
            let msg = st
                .history
                .iter_mut()
                .find(|m| m.id == id && !m.removed)
                .ok_or_else(|| not_found(format!("chat message {id}")))?;
            msg.removed = true;
            msg.text.clear();
            let msg = msg.clone();
            st.version += 1;
            (msg, st.snapshot())
        };
        self.topic.publish_versioned(snap.version, snap);
        tracing::info!(message = %id, "chat message removed");
        Ok(msg)
    }

    pub fn set_settings(&self, settings: ChatSettings) -> ChatSettings {
        let snap = {
            let mut st = self.state.lock();
            st.settings = settings;
            st.version += 1;
            st.snapshot()
        };
        self.topic.publish_versioned(snap.version, snap);
        tracing::info!(enabled = settings.enabled, slowmode = settings.slowmode, "chat settings changed");
        settings
    }

    pub fn sweep(&self) -> usize {
        let mut st = self.state.lock();
        let before = st.last_sent.len();
        let window = self.cfg.slowmode;
        st.last_sent.retain(|_, t| t.elapsed() < window);
        before - st.last_sent.len()
    }
}
