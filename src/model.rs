//! Shared value types: identities, media references and queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

use crate::error::{bad, AppResult};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub String);

impl Identity {
    pub fn new(raw: impl Into<String>) -> Self { Self(raw.into()) }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// Syntactically valid, not yet resolved media reference (`provider:id`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MediaRef(String);

impl MediaRef {
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        // bare youtube video id
        if raw.len() == 11 && raw.chars().all(is_id_char) {
            return Ok(Self(format!("yt:{raw}")));
        }
        let Some((provider, id)) = raw.split_once(':') else {
            return Err(bad(format!("malformed media reference {raw:?}")));
        };
        let provider_ok = (1..=16).contains(&provider.len())
            && provider.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        let id_ok = (1..=64).contains(&id.len()) && id.chars().all(is_id_char);
        if !provider_ok || !id_ok {
            return Err(bad(format!("malformed media reference {raw:?}")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }

    pub fn provider(&self) -> &str {
        self.0.split_once(':').map(|(p, _)| p).unwrap_or_default()
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

fn is_id_char(c: char) -> bool { c.is_ascii_alphanumeric() || c == '-' || c == '_' }

/// A media reference with its resolved metadata. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaReference {
    pub reference: MediaRef,
    pub title:     String,
    pub duration:  Duration,
    pub thumbnail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id:           Uuid,
    pub media:        MediaReference,
    pub submitted_by: Identity,
    pub inserted_at:  DateTime<Utc>,
    pub ticket:       Option<Uuid>,   // None when placed by moderation
    pub position:     usize,          // 0 = playing head
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub entry_id: Uuid,
    pub position: Duration,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub version:           u64,
    pub entries:           Vec<QueueEntry>,
    pub now_playing:       Option<NowPlaying>,
    pub enqueuing_enabled: bool,
}

impl QueueSnapshot {
    pub fn head(&self) -> Option<&QueueEntry> { self.entries.first() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
