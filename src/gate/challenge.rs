use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::Action;
use crate::model::Identity;

/// Activity challenge bound to one identity and one action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id:         String,
    pub action:     Action,
    pub prompt:     String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge_id: String,
    pub answer:       String,
}

pub(crate) struct IssuedChallenge {
    pub identity:  Identity,
    pub challenge: Challenge,
}

impl Challenge {
    /// hex SHA-256 of `prompt:identity`
    pub fn answer_for(&self, identity: &Identity) -> String {
        answer(&self.prompt, identity)
    }

    pub fn respond(&self, identity: &Identity) -> ChallengeResponse {
        ChallengeResponse { challenge_id: self.id.clone(), answer: self.answer_for(identity) }
    }
}

pub(crate) fn answer(prompt: &str, identity: &Identity) -> String {
    let mut h = Sha256::new();
    h.update(prompt.as_bytes());
    h.update(b":");
    h.update(identity.as_str().as_bytes());
    hex::encode(h.finalize())
}
