use chrono::Utc;
use std::time::Duration;
use tokio::time;

use crate::state::AppState;

/// Periodic purge of expired proofs, bans, parked tickets and stale
/// slowmode timestamps. Verification also purges lazily; this only keeps
/// the tables from growing.
pub async fn task(state: AppState, every: Duration) {
    let mut tick = time::interval(every.max(Duration::from_secs(1)));
    loop {
        tick.tick().await;
        run_once(&state);
    }
}

pub fn run_once(state: &AppState) -> usize {
    let now = Utc::now();
    let proofs = state.gate.sweep(now);
    let bans = state.bans.sweep(now);
    let tickets = state.engine.sweep(now);
    let slowmode = state.chat.sweep();
    let total = proofs + bans + tickets + slowmode;
    if total > 0 {
        tracing::debug!(proofs, bans, tickets, slowmode, "swept");
    }
    total
}
