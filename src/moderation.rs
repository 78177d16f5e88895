//! Privileged mutations. They skip the admission gate and the ticket
//! lifecycle but go through the same queue lock as everything else.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, sync::Arc};
use uuid::Uuid;

use crate::{
    bans::{Ban, BanList, BanScope},
    chat::{ChatMessage, ChatRoom, ChatSettings},
    error::{forbidden, not_found, AppResult},
    model::{Identity, QueueEntry, QueueSnapshot},
    queue::{EnqueueTicket, QueueEngine},
    store::Store,
};

/// A century, longer is treated as this.
const MAX_BAN_SECS: u64 = 100 * 365 * 24 * 3600;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BanRequest {
    pub identity:      Identity,
    pub scope:         BanScope,
    #[serde(default)]
    pub reason:        String,
    /// Omitted for a permanent ban.
    pub duration_secs: Option<u64>,
}

pub struct Moderation {
    moderators: HashSet<Identity>,
    engine:     QueueEngine,
    chat:       Arc<ChatRoom>,
    bans:       Arc<BanList>,
    store:      Option<Store>,
}

impl Moderation {
    pub fn new(
        moderators: HashSet<Identity>,
        engine: QueueEngine,
        chat: Arc<ChatRoom>,
        bans: Arc<BanList>,
        store: Option<Store>,
    ) -> Self {
        Self { moderators, engine, chat, bans, store }
    }

    pub fn is_moderator(&self, who: &Identity) -> bool { self.moderators.contains(who) }

    fn authorize(&self, actor: &Identity, what: &str) -> AppResult<()> {
        if !self.is_moderator(actor) {
            tracing::warn!(identity = %actor, action = what, "moderation refused");
            return Err(forbidden("moderator only"));
        }
        tracing::info!(moderator = %actor, action = what, "moderation");
        Ok(())
    }

    /* ---------------- queue ---------------- */

    pub async fn force_enqueue(&self, actor: &Identity, media: &str, position: Option<usize>) -> AppResult<QueueEntry> {
        self.authorize(actor, "force_enqueue")?;
        self.engine.force_enqueue(actor, media, position).await
    }

    pub fn force_enqueue_ticket(&self, actor: &Identity, ticket: Uuid) -> AppResult<EnqueueTicket> {
        self.authorize(actor, "force_enqueue_ticket")?;
        self.engine.force_ticket(ticket)
    }

    pub fn remove_entry(&self, actor: &Identity, entry: Uuid) -> AppResult<QueueEntry> {
        self.authorize(actor, "remove_entry")?;
        self.engine.remove_entry(entry)
    }

    pub fn reorder(&self, actor: &Identity, entry: Uuid, to: usize) -> AppResult<QueueSnapshot> {
        self.authorize(actor, "reorder")?;
        self.engine.reorder(entry, to)
    }

    pub fn set_enqueuing_enabled(&self, actor: &Identity, enabled: bool) -> AppResult<()> {
        self.authorize(actor, "set_enqueuing_enabled")?;
        self.engine.set_enqueuing_enabled(enabled)
    }

    /* ---------------- chat ---------------- */

    pub fn remove_chat_message(&self, actor: &Identity, id: Uuid) -> AppResult<ChatMessage> {
        self.authorize(actor, "remove_chat_message")?;
        self.chat.remove_message(id)
    }

    pub fn set_chat_settings(&self, actor: &Identity, settings: ChatSettings) -> AppResult<ChatSettings> {
        self.authorize(actor, "set_chat_settings")?;
        Ok(self.chat.set_settings(settings))
    }

    /* ---------------- bans ---------------- */

    pub async fn ban(&self, actor: &Identity, req: BanRequest) -> AppResult<Ban> {
        self.authorize(actor, "ban")?;
        let at = Utc::now();
        let until = req
            .duration_secs
            .map(|s| at + chrono::Duration::seconds(i64::try_from(s.min(MAX_BAN_SECS)).unwrap_or(0)));
        let ban = Ban {
            identity: req.identity,
            scope: req.scope,
            reason: req.reason,
            banned_by: actor.clone(),
            at,
            until,
        };
        self.bans.ban(ban.clone());
        self.persist_bans().await;
        Ok(ban)
    }

    pub async fn unban(&self, actor: &Identity, who: &Identity) -> AppResult<Ban> {
        self.authorize(actor, "unban")?;
        let lifted = self.bans.unban(who).ok_or_else(|| not_found(format!("no active ban for {who}")))?;
        self.persist_bans().await;
        Ok(lifted)
    }

    pub fn bans(&self, actor: &Identity) -> AppResult<Vec<Ban>> {
        self.authorize(actor, "list_bans")?;
        Ok(self.bans.active())
    }

    async fn persist_bans(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_bans(&self.bans.active()).await {
                tracing::error!(error = %e, "ban list not saved");
            }
        }
    }
}
