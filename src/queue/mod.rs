//! The shared queue and the enqueue-ticket lifecycle.

mod engine;
mod policy;
mod ticket;

pub use engine::{QueueEngine, QueueTopic, Tick};
pub use policy::{Fifo, PlacementPolicy, PolicyKind, RoundRobin};
pub use ticket::{EnqueueTicket, RejectReason, TicketStatus};
