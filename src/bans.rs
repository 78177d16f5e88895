use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::Identity;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanScope {
    Enqueue,
    Chat,
    All,
}

impl BanScope {
    fn covers(self, other: BanScope) -> bool { self == BanScope::All || self == other }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ban {
    pub identity:  Identity,
    pub scope:     BanScope,
    pub reason:    String,
    pub banned_by: Identity,
    pub at:        DateTime<Utc>,
    pub until:     Option<DateTime<Utc>>,   // None = forever
}

impl Ban {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.until.map_or(true, |u| now < u) }
}

/* ------------ 封禁名單 ------------ */
#[derive(Default)]
pub struct BanList {
    bans: RwLock<HashMap<Identity, Ban>>,
}

impl BanList {
    pub fn new() -> Self { Self::default() }

    pub fn restore(bans: Vec<Ban>) -> Self {
        let now = Utc::now();
        Self {
            bans: RwLock::new(
                bans.into_iter().filter(|b| b.is_active(now)).map(|b| (b.identity.clone(), b)).collect(),
            ),
        }
    }

    pub fn is_banned(&self, who: &Identity, scope: BanScope) -> bool {
        self.bans
            .read()
            .get(who)
            .is_some_and(|b| b.is_active(Utc::now()) && b.scope.covers(scope))
    }

    pub fn ban(&self, ban: Ban) {
        tracing::info!(identity = %ban.identity, scope = ?ban.scope, until = ?ban.until, by = %ban.banned_by, "ban");
        self.bans.write().insert(ban.identity.clone(), ban);
    }

    /// Returns the lifted ban, `None` if there was no active one.
    pub fn unban(&self, who: &Identity) -> Option<Ban> {
        let lifted = self.bans.write().remove(who).filter(|b| b.is_active(Utc::now()));
        if lifted.is_some() {
            tracing::info!(identity = %who, "ban lifted");
        }
        lifted
    }

    pub fn active(&self) -> Vec<Ban> {
        let now = Utc::now();
        let mut out: Vec<_> = self.bans.read().values().filter(|b| b.is_active(now)).cloned().collect();
        out.sort_by(|a, b| a.identity.cmp(&b.identity));
        out
    }

    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut bans = self.bans.write();
        let before = bans.len();
        bans.retain(|_, b| b.is_active(now));
        before - bans.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn ban(who: &str, scope: BanScope, until: Option<DateTime<Utc>>) -> Ban {
        Ban {
            identity: Identity::new(who),
            scope,
            reason: "spam".into(),
            banned_by: Identity::new("mod"),
            at: Utc::now(),
            until,
        }
    }

    #[test]
    fn scope_is_respected() {
        let list = BanList::new();
        list.ban(ban("alice", BanScope::Chat, None));
        assert!(list.is_banned(&Identity::new("alice"), BanScope::Chat));
        assert!(!list.is_banned(&Identity::new("alice"), BanScope::Enqueue));
        list.ban(ban("bob", BanScope::All, None));
        assert!(list.is_banned(&Identity::new("bob"), BanScope::Enqueue));
    }

    #[test]
    fn expired_bans_do_not_apply() {
        let list = BanList::new();
        list.ban(ban("alice", BanScope::All, Some(Utc::now() - Duration::seconds(1))));
        assert!(!list.is_banned(&Identity::new("alice"), BanScope::Chat));
        assert!(list.unban(&Identity::new("alice")).is_none());
    }

    #[test]
    fn unban_and_sweep() {
        let list = BanList::new();
        list.ban(ban("alice", BanScope::All, None));
        list.ban(ban("carol", BanScope::All, Some(Utc::now() - Duration::seconds(5))));
        assert_eq!(list.sweep(Utc::now()), 1);
        assert!(list.unban(&Identity::new("alice")).is_some());
        assert!(list.unban(&Identity::new("alice")).is_none());
        assert!(list.active().is_empty());
    }
}
