use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AppErr, AppResult},
    gate::Rejection,
    model::{Identity, MediaRef},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    InvalidProof,
    Expired,
    AlreadyUsed,
    RateLimited,
    QueueFull,
    MetadataResolutionFailed,
}

impl From<Rejection> for RejectReason {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::InvalidProof => RejectReason::InvalidProof,
            Rejection::Expired => RejectReason::Expired,
            Rejection::AlreadyUsed => RejectReason::AlreadyUsed,
            Rejection::RateLimited => RejectReason::RateLimited,
        }
    }
}

/// Lifecycle of one enqueue attempt:
/// `Submitted -> Verifying -> Accepted -> Enqueued`, or `Rejected` from
/// any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TicketStatus {
    Submitted,
    Verifying,
    Accepted,                       // resolving metadata
    Enqueued { entry_id: Uuid },
    Rejected { reason: RejectReason },
}

impl TicketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TicketStatus::Enqueued { .. } | TicketStatus::Rejected { .. })
    }

    pub fn can_become(&self, next: &TicketStatus) -> bool {
        use TicketStatus::*;
        if self.is_terminal() {
            return false;
        }
        match next {
            Submitted => false,
            Verifying => *self == Submitted,
            Accepted => matches!(self, Submitted | Verifying),
            Enqueued { .. } => *self == Accepted,
            Rejected { .. } => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnqueueTicket {
    pub id:           Uuid,
    pub submitted_by: Identity,
    pub media:        MediaRef,
    pub status:       TicketStatus,
    pub revision:     u64,
    pub created_at:   DateTime<Utc>,
    pub updated_at:   DateTime<Utc>,
}

impl EnqueueTicket {
    pub fn new(submitted_by: Identity, media: MediaRef) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            submitted_by,
            media,
            status: TicketStatus::Submitted,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn entry_id(&self) -> Option<Uuid> {
        match self.status {
            TicketStatus::Enqueued { entry_id } => Some(entry_id),
            _ => None,
        }
    }

    pub fn rejection(&self) -> Option<RejectReason> {
        match self.status {
            TicketStatus::Rejected { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn transition(&mut self, next: TicketStatus) -> AppResult<()> {
        if !self.status.can_become(&next) {
            return Err(AppErr::Internal(format!(
                "ticket {} cannot move from {:?} to {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        self.revision += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}
