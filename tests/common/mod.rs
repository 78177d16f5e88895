#![allow(dead_code)]

use axum::Extension;
use std::{collections::HashSet, sync::Arc, time::Duration};
use uuid::Uuid;

use lockstep::{
    bans::BanList,
    config::{ChatConfig, Config, GateConfig, PlaybackConfig, QueueConfig},
    gate::Proof,
    model::Identity,
    playback::PlaybackClock,
    queue::EnqueueTicket,
    resolver::StaticResolver,
    routes,
    state::AppState,
    utils::jwt,
};

pub const SECRET: &str = "test-secret";

pub fn config() -> Config {
    Config {
        bind_addr: "127.0.0.1:0".into(),
        jwt_secret: SECRET.into(),
        database_url: None,
        resolver_url: None,
        moderators: HashSet::from([Identity::new("mod")]),
        sweep_interval: Duration::from_secs(30),
        gate: GateConfig { pow_difficulty: 4, ..GateConfig::default() },
        queue: QueueConfig::default(),
        chat: ChatConfig::default(),
        playback: PlaybackConfig::default(),
    }
}

pub fn catalogue() -> StaticResolver {
    StaticResolver::new()
        .with("yt:aaaaaaaaaaa", "A", Duration::from_secs(3))
        .with("yt:bbbbbbbbbbb", "B", Duration::from_secs(3))
        .with("yt:ccccccccccc", "C", Duration::from_secs(3))
}

pub fn app(cfg: Config) -> (AppState, PlaybackClock) {
    AppState::new(cfg, Arc::new(catalogue()), BanList::new(), None)
}

pub fn work(state: &AppState, who: &Identity) -> Proof {
    let puzzle = state.gate.issue_puzzle(who);
    Proof::Work(puzzle.solve(who, 1 << 20).expect("difficulty 4 is solvable"))
}

/// Every status the ticket goes through from now until it is terminal.
pub async fn statuses(state: &AppState, id: Uuid) -> Vec<EnqueueTicket> {
    let mut sub = state.engine.monitor_ticket(id).unwrap();
    let mut seen = Vec::new();
    while let Some(item) = sub.recv().await {
        seen.push(item.unwrap());
    }
    seen
}

pub async fn settle(state: &AppState, id: Uuid) -> EnqueueTicket {
    statuses(state, id).await.pop().unwrap()
}

/// Serves the full router on an ephemeral port, returns `http://addr`.
pub async fn serve(state: AppState) -> String {
    let router = routes::router().layer(Extension(state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router.into_make_service()).await.unwrap() });
    format!("http://{addr}")
}

pub fn token(who: &str) -> String { jwt::sign(&Identity::new(who), SECRET, 3600).unwrap() }
