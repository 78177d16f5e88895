use dotenvy::dotenv;
use std::{collections::HashSet, env, str::FromStr, time::Duration};

use crate::{
    error::{AppErr, AppResult},
    model::Identity,
    queue::PolicyKind,
};

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub pow_difficulty:       u8,          // leading zero bits
    pub pow_ttl:              Duration,
    pub challenge_ttl:        Duration,
    pub max_outstanding:      usize,       // non-terminal tickets per identity
    pub chat_challenge_every: u32,         // 0 = off
    pub activity_ttl:         Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pow_difficulty: 18,
            pow_ttl: Duration::from_secs(300),
            challenge_ttl: Duration::from_secs(120),
            max_outstanding: 2,
            chat_challenge_every: 0,
            activity_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub capacity:        usize,
    pub ticket_ttl:      Duration,
    pub resolve_attempts: u32,
    pub resolve_backoff: Duration,
    pub policy:          PolicyKind,
    pub fanout_buffer:   usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            ticket_ttl: Duration::from_secs(600),
            resolve_attempts: 3,
            resolve_backoff: Duration::from_millis(250),
            policy: PolicyKind::Fifo,
            fanout_buffer: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub history:       usize,
    pub max_len:       usize,
    pub slowmode:      Duration,
    pub fanout_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history: 60, max_len: 512, slowmode: Duration::from_secs(20), fanout_buffer: 64 }
    }
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub checkpoint_interval: Duration,
    pub fanout_buffer:       usize,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { checkpoint_interval: Duration::from_secs(1), fanout_buffer: 64 }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr:      String,
    pub jwt_secret:     String,
    pub database_url:   Option<String>,
    pub resolver_url:   Option<String>,
    pub moderators:     HashSet<Identity>,
    pub sweep_interval: Duration,
    pub gate:           GateConfig,
    pub queue:          QueueConfig,
    pub chat:           ChatConfig,
    pub playback:       PlaybackConfig,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        dotenv().ok();
        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| AppErr::Config("JWT_SECRET missing".into()))?;
        let fanout_buffer = parse_or("FANOUT_BUFFER", 64usize)?;

        let gate = GateConfig {
            pow_difficulty: parse_or("POW_DIFFICULTY", 18u8)?,
            pow_ttl: secs("POW_TTL_SECS", 300)?,
            challenge_ttl: secs("CHALLENGE_TTL_SECS", 120)?,
            max_outstanding: parse_or("MAX_OUTSTANDING_TICKETS", 2usize)?,
            chat_challenge_every: parse_or("CHAT_CHALLENGE_EVERY", 0u32)?,
            activity_ttl: secs("ACTIVITY_TTL_SECS", 3600)?,
        };
        if gate.pow_difficulty > 64 {
            return Err(AppErr::Config("POW_DIFFICULTY must be at most 64".into()));
        }

        let queue = QueueConfig {
            capacity: parse_or("QUEUE_CAPACITY", 100usize)?,
            ticket_ttl: secs("TICKET_TTL_SECS", 600)?,
            resolve_attempts: parse_or("RESOLVE_ATTEMPTS", 3u32)?.max(1),
            resolve_backoff: Duration::from_millis(parse_or("RESOLVE_BACKOFF_MS", 250u64)?),
            policy: parse_or("PLACEMENT_POLICY", PolicyKind::Fifo)?,
            fanout_buffer,
        };

        let chat = ChatConfig {
            history: parse_or("CHAT_HISTORY", 60usize)?,
            max_len: parse_or("CHAT_MAX_LEN", 512usize)?,
            slowmode: secs("CHAT_SLOWMODE_SECS", 20)?,
            fanout_buffer,
        };

        let playback = PlaybackConfig {
            checkpoint_interval: Duration::from_millis(parse_or("CHECKPOINT_INTERVAL_MS", 1000u64)?.max(10)),
            fanout_buffer,
        };

        let moderators = env::var("MODERATORS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Identity::new)
            .collect();

        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into()),
            jwt_secret,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            resolver_url: env::var("RESOLVER_URL").ok().filter(|s| !s.is_empty()),
            moderators,
            sweep_interval: secs("SWEEP_INTERVAL_SECS", 30)?,
            gate,
            queue,
            chat,
            playback,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> AppResult<T> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppErr::Config(format!("{key}: cannot parse {raw:?}"))),
        _ => Ok(default),
    }
}

fn secs(key: &str, default: u64) -> AppResult<Duration> {
    parse_or(key, default).map(Duration::from_secs)
}
