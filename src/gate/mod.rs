//! Admission control: proof-of-work puzzles, activity challenges and the
//! per-identity cap on outstanding tickets.
//!
//! Every proof is single-use. Checking a proof and marking it consumed
//! happen under the same table lock, so two concurrent submissions of one
//! solution cannot both pass.

mod challenge;
mod pow;
mod tokens;

pub use challenge::{Challenge, ChallengeResponse};
pub use pow::{leading_zero_bits, work_hash, Puzzle, WorkSolution};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::{config::GateConfig, model::Identity};
use challenge::IssuedChallenge;
use pow::IssuedPuzzle;
use tokens::OneTimeTable;

/// What a proof is being spent on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Enqueue,
    Chat,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Proof {
    Work(WorkSolution),
    Challenge(ChallengeResponse),
}

#[derive(thiserror::Error, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rejection {
    #[error("proof does not satisfy the issued puzzle or challenge")]
    InvalidProof,
    #[error("proof expired")]
    Expired,
    #[error("proof already used")]
    AlreadyUsed,
    #[error("too many outstanding tickets")]
    RateLimited,
}

struct Counter {
    count:   u32,
    touched: DateTime<Utc>,
}

#[derive(Default)]
struct Activity {
    pending:  HashMap<(Identity, Action), String>,
    counters: HashMap<(Identity, Action), Counter>,
}

pub struct AdmissionGate {
    cfg:         GateConfig,
    puzzles:     Mutex<OneTimeTable<Uuid, IssuedPuzzle>>,
    challenges:  Mutex<OneTimeTable<String, IssuedChallenge>>,
    activity:    Mutex<Activity>,
    outstanding: Mutex<HashMap<Identity, usize>>,
}

impl AdmissionGate {
    pub fn new(cfg: GateConfig) -> Self {
        Self {
            cfg,
            puzzles: Mutex::default(),
            challenges: Mutex::default(),
            activity: Mutex::default(),
            outstanding: Mutex::default(),
        }
    }

    /* ---------------- issuing ---------------- */

    pub fn issue_puzzle(&self, identity: &Identity) -> Puzzle {
        let mut seed = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut seed);
        let puzzle = Puzzle {
            id: Uuid::new_v4(),
            seed: hex::encode(seed),
            difficulty: self.cfg.pow_difficulty,
            expires_at: Utc::now() + ttl(self.cfg.pow_ttl),
        };
        self.puzzles.lock().issue(
            puzzle.id,
            IssuedPuzzle { identity: identity.clone(), seed, difficulty: puzzle.difficulty },
            puzzle.expires_at,
        );
        tracing::debug!(identity = %identity, puzzle = %puzzle.id, "puzzle issued");
        puzzle
    }

    pub fn issue_challenge(&self, identity: &Identity, action: Action) -> Challenge {
        let challenge = Challenge {
            id: nanoid::nanoid!(),
            action,
            prompt: nanoid::nanoid!(32),
            expires_at: Utc::now() + ttl(self.cfg.challenge_ttl),
        };
        self.challenges.lock().issue(
            challenge.id.clone(),
            IssuedChallenge { identity: identity.clone(), challenge: challenge.clone() },
            challenge.expires_at,
        );
        tracing::debug!(identity = %identity, challenge = %challenge.id, ?action, "challenge issued");
        challenge
    }

    /* ---------------- verification ---------------- */

    /// Verifies `proof` for `action` and consumes it on success.
    pub fn verify(&self, identity: &Identity, action: Action, proof: &Proof) -> Result<(), Rejection> {
        self.verify_at(identity, action, proof, Utc::now())
    }

    pub fn verify_at(
        &self,
        identity: &Identity,
        action: Action,
        proof: &Proof,
        now: DateTime<Utc>,
    ) -> Result<(), Rejection> {
        let outcome = match proof {
            Proof::Work(sol) => self
                .puzzles
                .lock()
                .consume(&sol.puzzle_id, now, |p| {
                    if &p.identity != identity
                        || !pow::meets_target(&p.seed, identity, sol.nonce, p.difficulty)
                    {
                        return Err(Rejection::InvalidProof);
                    }
                    Ok(())
                })
                .map(|_| ()),
            Proof::Challenge(resp) => self.consume_challenge(identity, Some(action), resp, now).map(|_| ()),
        };
        match &outcome {
            Ok(()) => tracing::info!(identity = %identity, ?action, "proof accepted"),
            Err(r) => tracing::info!(identity = %identity, ?action, reason = %r, "proof rejected"),
        }
        outcome
    }

    fn consume_challenge(
        &self,
        identity: &Identity,
        action: Option<Action>,
        resp: &ChallengeResponse,
        now: DateTime<Utc>,
    ) -> Result<Action, Rejection> {
        let action = self
            .challenges
            .lock()
            .consume(&resp.challenge_id, now, |c| {
                let bound = &c.identity == identity
                    && action.map_or(true, |a| a == c.challenge.action);
                if !bound || challenge::answer(&c.challenge.prompt, identity) != resp.answer {
                    return Err(Rejection::InvalidProof);
                }
                Ok(())
            })?
            .challenge
            .action;
        let mut activity = self.activity.lock();
        let key = (identity.clone(), action);
        if activity.pending.get(&key) == Some(&resp.challenge_id) {
            activity.pending.remove(&key);
        }
        activity.counters.remove(&key);
        Ok(action)
    }

    pub fn submit_activity_challenge(
        &self,
        identity: &Identity,
        resp: &ChallengeResponse,
    ) -> Result<Action, Rejection> {
        let out = self.consume_challenge(identity, None, resp, Utc::now());
        tracing::info!(identity = %identity, ok = out.is_ok(), "activity challenge submitted");
        out
    }

    /* ---------------- activity cadence ---------------- */

    /// Counts one `action` by `identity`, or hands back the challenge it
    /// must answer first. Checking and counting share one lock.
    pub fn record_activity(&self, identity: &Identity, action: Action) -> Result<(), Challenge> {
        if self.cfg.chat_challenge_every == 0 || action != Action::Chat {
            return Ok(());
        }
        let now = Utc::now();
        let mut activity = self.activity.lock();
        let key = (identity.clone(), action);
        if let Some(id) = activity.pending.get(&key) {
            if let Some(live) = self.challenges.lock().live(id, now) {
                return Err(live.challenge.clone());
            }
        }
        let count = activity.counters.get(&key).map_or(0, |c| c.count);
        if count >= self.cfg.chat_challenge_every {
            let challenge = self.issue_challenge(identity, action);
            activity.pending.insert(key, challenge.id.clone());
            return Err(challenge);
        }
        activity.counters.insert(key, Counter { count: count + 1, touched: now });
        Ok(())
    }

    /* ---------------- outstanding tickets ---------------- */

    pub fn reserve(&self, identity: &Identity) -> Result<(), Rejection> {
        let mut out = self.outstanding.lock();
        let n = out.entry(identity.clone()).or_default();
        if *n >= self.cfg.max_outstanding {
            return Err(Rejection::RateLimited);
        }
        *n += 1;
        Ok(())
    }

    pub fn release(&self, identity: &Identity) {
        let mut out = self.outstanding.lock();
        if let Some(n) = out.get_mut(identity) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                out.remove(identity);
            }
        }
    }

    pub fn outstanding(&self, identity: &Identity) -> usize {
        self.outstanding.lock().get(identity).copied().unwrap_or(0)
    }

    /// Purges expired puzzles, challenges and idle activity counters.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let n = self.puzzles.lock().sweep(now) + self.challenges.lock().sweep(now);
        let idle = ttl(self.cfg.activity_ttl);
        // activity before challenges, same order as record_activity
        let mut activity = self.activity.lock();
        let before = activity.counters.len();
        activity.counters.retain(|_, c| c.touched + idle > now);
        let counters = before - activity.counters.len();
        let challenges = self.challenges.lock();
        activity.pending.retain(|_, id| challenges.live(id, now).is_some());
        n + counters
    }

    #[cfg(test)]
    fn tracked_counters(&self) -> usize { self.activity.lock().counters.len() }
}

fn ttl(d: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::hours(1))
}
