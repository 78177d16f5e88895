use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::{
    bans::BanList,
    chat::ChatRoom,
    config::Config,
    error::AppResult,
    gate::AdmissionGate,
    moderation::Moderation,
    playback::{PlaybackClock, PlaybackTopic},
    queue::QueueEngine,
    resolver::{HttpResolver, MediaResolver, StaticResolver},
    store::{self, Store},
    utils::sweep,
};

/* ------------ 共享狀態 ------------ */
#[derive(Clone)]
pub struct AppState {
    pub cfg:        Arc<Config>,
    pub gate:       Arc<AdmissionGate>,
    pub bans:       Arc<BanList>,
    pub engine:     QueueEngine,
    pub chat:       Arc<ChatRoom>,
    pub playback:   PlaybackTopic,
    pub moderation: Arc<Moderation>,
}

impl AppState {
    // the returned clock is not running yet
    pub fn new(
        cfg: Config,
        resolver: Arc<dyn MediaResolver>,
        bans: BanList,
        store: Option<Store>,
    ) -> (Self, PlaybackClock) {
        let gate = Arc::new(AdmissionGate::new(cfg.gate.clone()));
        let bans = Arc::new(bans);
        let engine = QueueEngine::new(cfg.queue.clone(), gate.clone(), bans.clone(), resolver);
        let chat = Arc::new(ChatRoom::new(cfg.chat.clone(), gate.clone(), bans.clone()));
        let clock = PlaybackClock::new(engine.clone(), &cfg.playback);
        let moderation = Arc::new(Moderation::new(
            cfg.moderators.clone(),
            engine.clone(),
            chat.clone(),
            bans.clone(),
            store,
        ));
        let state = Self {
            cfg: Arc::new(cfg),
            gate,
            bans,
            engine,
            chat,
            playback: clock.topic(),
            moderation,
        };
        (state, clock)
    }

    /// Restores persisted state if a database is configured and starts
    /// the background tasks (clock, sweeper, persister).
    pub async fn bootstrap(cfg: Config) -> AppResult<(Self, Vec<JoinHandle<()>>)> {
        let store = match &cfg.database_url {
            Some(url) => Some(Store::connect(url).await?),
            None => {
                tracing::info!("no DATABASE_URL, queue and bans are not persisted");
                None
            }
        };
        let resolver: Arc<dyn MediaResolver> = match &cfg.resolver_url {
            Some(url) => Arc::new(HttpResolver::new(url.clone())),
            None => {
                tracing::warn!("no RESOLVER_URL, using an empty static catalogue");
                Arc::new(StaticResolver::new())
            }
        };
        let (bans, entries) = match &store {
            Some(s) => (BanList::restore(s.load_bans().await?), s.load_queue().await?),
            None => (BanList::new(), Vec::new()),
        };

        let sweep_every = cfg.sweep_interval;
        let (state, clock) = Self::new(cfg, resolver, bans, store.clone());
        if !entries.is_empty() {
            state.engine.restore(entries)?;
        }

        let mut tasks = vec![clock.spawn(), tokio::spawn(sweep::task(state.clone(), sweep_every))];
        if let Some(s) = store {
            tasks.push(tokio::spawn(store::persist_queue(s, state.engine.queue_topic())));
        }
        Ok((state, tasks))
    }
}
