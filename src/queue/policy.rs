//! Where a newly admitted entry lands in the queue.

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, str::FromStr};

use crate::model::{Identity, QueueEntry};

pub trait PlacementPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insertion index for an entry from `submitter`. Index 0 is the
    /// playing head; a non-empty queue must get an index of at least 1.
    fn place(&self, entries: &[QueueEntry], submitter: &Identity) -> usize;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    Fifo,
    RoundRobin,
}

impl PolicyKind {
    pub fn build(self) -> Box<dyn PlacementPolicy> {
        match self {
            PolicyKind::Fifo => Box::new(Fifo),
            PolicyKind::RoundRobin => Box::new(RoundRobin),
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(PolicyKind::Fifo),
            "round-robin" | "round_robin" | "roundrobin" => Ok(PolicyKind::RoundRobin),
            other => Err(format!("unknown placement policy {other:?}")),
        }
    }
}

/// Append at the tail.
pub struct Fifo;

impl PlacementPolicy for Fifo {
    fn name(&self) -> &'static str { "fifo" }

    fn place(&self, entries: &[QueueEntry], _submitter: &Identity) -> usize { entries.len() }
}

/// Interleaves submitters: a submitter's n-th waiting entry goes after
/// every other submitter's n-th waiting entry.
pub struct RoundRobin;

impl PlacementPolicy for RoundRobin {
    fn name(&self) -> &'static str { "round-robin" }

    fn place(&self, entries: &[QueueEntry], submitter: &Identity) -> usize {
        if entries.is_empty() {
            return 0;
        }
        let waiting = &entries[1..];
        let round = waiting.iter().filter(|e| &e.submitted_by == submitter).count();
        let mut seen: HashMap<&Identity, usize> = HashMap::new();
        for (i, e) in waiting.iter().enumerate() {
            let r = seen.entry(&e.submitted_by).or_default();
            if *r > round {
                return i + 1;
            }
            *r += 1;
        }
        entries.len()
    }
}
