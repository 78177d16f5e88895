use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::{collections::HashMap, collections::HashSet, sync::Arc, time::Duration};
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    policy::PlacementPolicy,
    ticket::{EnqueueTicket, RejectReason, TicketStatus},
};
use crate::{
    bans::{BanList, BanScope},
    config::QueueConfig,
    error::{bad, forbidden, not_found, AppErr, AppResult},
    fanout::{Broadcaster, Subscription},
    gate::{Action, AdmissionGate, Proof},
    model::{Identity, MediaRef, MediaReference, NowPlaying, QueueEntry, QueueSnapshot},
    resolver::{MediaResolver, ResolveError},
};

pub type QueueTopic = Broadcaster<Arc<QueueSnapshot>>;

struct TicketSlot {
    ticket:   EnqueueTicket,
    topic:    Broadcaster<EnqueueTicket>,
    reserved: bool,                         // holds a gate slot
}

struct QueueState {
    version:           u64,
    entries:           Vec<QueueEntry>,
    position:          Duration,
    head_since:        Instant,             // head took over
    enqueuing_enabled: bool,
    tickets:           HashMap<Uuid, TicketSlot>,
}

/* ------------ 草稿 / 外送 ------------ */
struct Draft {
    entries:  Vec<QueueEntry>,
    position: Duration,
}

// filled under the lock, flushed after it
#[derive(Default)]
#[must_use]
struct Outbox {
    queue:   Option<Arc<QueueSnapshot>>,
    tickets: Vec<(Broadcaster<EnqueueTicket>, EnqueueTicket)>,
}

impl Outbox {
    fn flush(self, queue_topic: &QueueTopic) {
        if let Some(snap) = self.queue {
            queue_topic.publish_versioned(snap.version, snap);
        }
        for (topic, ticket) in self.tickets {
            let terminal = ticket.status.is_terminal();
            topic.publish_versioned(ticket.revision, ticket);
            if terminal {
                topic.close();
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Tick {
    pub playing:  Option<(QueueEntry, Duration)>,  // head after the tick
    pub finished: Option<QueueEntry>,
}

struct Inner {
    cfg:         QueueConfig,
    gate:        Arc<AdmissionGate>,
    bans:        Arc<BanList>,
    resolver:    Arc<dyn MediaResolver>,
    policy:      Box<dyn PlacementPolicy>,
    state:       Mutex<QueueState>,
    queue_topic: QueueTopic,
}

/// Owner of the queue and the ticket table. Every mutation goes through
/// one lock and leaves a new, higher-versioned snapshot behind.
#[derive(Clone)]
pub struct QueueEngine {
    inner: Arc<Inner>,
}

impl QueueEngine {
    pub fn new(
        cfg: QueueConfig,
        gate: Arc<AdmissionGate>,
        bans: Arc<BanList>,
        resolver: Arc<dyn MediaResolver>,
    ) -> Self {
        let state = QueueState {
            version: 0,
            entries: Vec::new(),
            position: Duration::ZERO,
            head_since: Instant::now(),
            enqueuing_enabled: true,
            tickets: HashMap::new(),
        };
        let queue_topic = Broadcaster::with_initial("queue", cfg.fanout_buffer, Arc::new(snapshot_of(&state)));
        let policy = cfg.policy.build();
        tracing::info!(policy = policy.name(), capacity = cfg.capacity, "queue engine ready");
        Self {
            inner: Arc::new(Inner {
                cfg,
                gate,
                bans,
                resolver,
                policy,
                state: Mutex::new(state),
                queue_topic,
            }),
        }
    }

    /* ---------------- reads ---------------- */

    pub fn snapshot(&self) -> QueueSnapshot { snapshot_of(&self.inner.state.lock()) }

    pub fn ticket(&self, id: Uuid) -> AppResult<EnqueueTicket> {
        self.inner
            .state
            .lock()
            .tickets
            .get(&id)
            .map(|s| s.ticket.clone())
            .ok_or_else(|| not_found(format!("ticket {id}")))
    }

    pub fn subscribe_queue(&self) -> Subscription<Arc<QueueSnapshot>> { self.inner.queue_topic.subscribe() }

    pub fn queue_topic(&self) -> QueueTopic { self.inner.queue_topic.clone() }

    pub fn monitor_ticket(&self, id: Uuid) -> AppResult<Subscription<EnqueueTicket>> {
        let st = self.inner.state.lock();
        let slot = st.tickets.get(&id).ok_or_else(|| not_found(format!("ticket {id}")))?;
        Ok(slot.topic.subscribe())
    }

    /* ---------------- submission ---------------- */

    /// Creates a ticket for `raw`. With a proof the ticket is verified
    /// right away; without one it waits for [`submit_ticket_proof`].
    /// Admission failures end up in the ticket status, not in the result.
    ///
    /// [`submit_ticket_proof`]: Self::submit_ticket_proof
    pub async fn enqueue(&self, who: &Identity, raw: &str, proof: Option<Proof>) -> AppResult<EnqueueTicket> {
        let media = MediaRef::parse(raw)?;
        if self.inner.bans.is_banned(who, BanScope::Enqueue) {
            return Err(forbidden("banned from enqueuing"));
        }

        let (ticket, outbox) = {
            let mut st = self.inner.state.lock();
            if !st.enqueuing_enabled {
                return Err(forbidden("enqueuing is disabled"));
            }
            let mut ticket = EnqueueTicket::new(who.clone(), media);
            let topic = Broadcaster::new("ticket", self.inner.cfg.fanout_buffer);
            topic.publish_versioned(ticket.revision, ticket.clone());

            let mut reserved = false;
            let rejected = if self.inner.gate.reserve(who).is_err() {
                Some(RejectReason::RateLimited)
            } else {
                reserved = true;
                (st.entries.len() >= self.inner.cfg.capacity).then_some(RejectReason::QueueFull)
            };
            if let Some(reason) = rejected {
                ticket.transition(TicketStatus::Rejected { reason })?;
                if reserved {
                    self.inner.gate.release(who);
                    reserved = false;
                }
            }
            tracing::info!(ticket = %ticket.id, identity = %who, media = %ticket.media, status = ?ticket.status, "ticket created");

            let mut outbox = Outbox::default();
            outbox.tickets.push((topic.clone(), ticket.clone()));
            st.tickets.insert(ticket.id, TicketSlot { ticket: ticket.clone(), topic, reserved });
            (ticket, outbox)
        };
        outbox.flush(&self.inner.queue_topic);

        match proof {
            Some(proof) if !ticket.status.is_terminal() => self.admit(ticket.id, who, &proof),
            _ => Ok(ticket),
        }
    }

    pub async fn submit_ticket_proof(&self, who: &Identity, id: Uuid, proof: Proof) -> AppResult<EnqueueTicket> {
        {
            let st = self.inner.state.lock();
            let slot = st.tickets.get(&id).ok_or_else(|| not_found(format!("ticket {id}")))?;
            if &slot.ticket.submitted_by != who {
                return Err(forbidden("not your ticket"));
            }
            if slot.ticket.status != TicketStatus::Submitted {
                return Err(not_found(format!("ticket {id} is not awaiting proof")));
            }
        }
        if self.inner.bans.is_banned(who, BanScope::Enqueue) {
            return Err(forbidden("banned from enqueuing"));
        }
        self.admit(id, who, &proof)
    }

    /// Admits a ticket still waiting for its proof. Needs a tokio runtime,
    /// placement continues on a task.
    pub fn force_ticket(&self, id: Uuid) -> AppResult<EnqueueTicket> {
        let (ticket, outbox) = {
            let mut st = self.inner.state.lock();
            let slot = st
                .tickets
                .get_mut(&id)
                .filter(|s| s.ticket.status == TicketStatus::Submitted)
                .ok_or_else(|| not_found(format!("no ticket {id} awaiting proof")))?;
            slot.ticket.transition(TicketStatus::Accepted)?;
            let outbox = Outbox { queue: None, tickets: vec![(slot.topic.clone(), slot.ticket.clone())] };
            (slot.ticket.clone(), outbox)
        };
        outbox.flush(&self.inner.queue_topic);
        tracing::info!(ticket = %id, "ticket forcibly accepted");
        self.spawn_placement(id);
        Ok(ticket)
    }

    fn admit(&self, id: Uuid, who: &Identity, proof: &Proof) -> AppResult<EnqueueTicket> {
        self.transition(id, |t| {
            if t.status != TicketStatus::Submitted {
                return Err(not_found(format!("ticket {id} is not awaiting proof")));
            }
            t.transition(TicketStatus::Verifying)
        })?;

        let verdict = self.inner.gate.verify(who, Action::Enqueue, proof);
        let ticket = match verdict {
            Ok(()) => {
                let t = self.transition(id, |t| t.transition(TicketStatus::Accepted))?;
                self.spawn_placement(id);
                t
            }
            Err(reason) => self.reject(id, reason.into())?,
        };
        Ok(ticket)
    }

    fn spawn_placement(&self, id: Uuid) {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.place(id).await {
                engine.placement_failed(id, &e);
            }
        });
    }

    // false when the ticket could not be moved to Rejected either
    fn placement_failed(&self, id: Uuid, err: &AppErr) -> bool {
        tracing::error!(ticket = %id, error = %err, "placement failed");
        match self.reject(id, RejectReason::MetadataResolutionFailed) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(ticket = %id, error = %e, "could not reject ticket after failed placement");
                false
            }
        }
    }

    async fn place(&self, id: Uuid) -> AppResult<()> {
        let (who, media_ref) = {
            let st = self.inner.state.lock();
            let slot = st.tickets.get(&id).ok_or_else(|| not_found(format!("ticket {id}")))?;
            (slot.ticket.submitted_by.clone(), slot.ticket.media.clone())
        };
        let media = match self.resolve(&media_ref).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(ticket = %id, media = %media_ref, error = %e, "metadata resolution failed");
                self.reject(id, RejectReason::MetadataResolutionFailed)?;
                return Ok(());
            }
        };

        let outbox = {
            let mut st = self.inner.state.lock();
            let Some(slot) = st.tickets.get(&id) else {
                return Err(not_found(format!("ticket {id}")));
            };
            if slot.ticket.status != TicketStatus::Accepted {
                return Ok(());
            }
            if st.entries.len() >= self.inner.cfg.capacity {
                drop(st);
                self.reject(id, RejectReason::QueueFull)?;
                return Ok(());
            }
            let entry = QueueEntry {
                id: Uuid::new_v4(),
                media,
                submitted_by: who.clone(),
                inserted_at: Utc::now(),
                ticket: Some(id),
                position: 0,
            };
            let policy = &self.inner.policy;
            let (entry_id, snap) = commit(&mut st, |d| {
                let at = policy.place(&d.entries, &who).min(d.entries.len());
                let at = if d.entries.is_empty() { 0 } else { at.max(1) };
                let entry_id = entry.id;
                d.entries.insert(at, entry);
                Ok(entry_id)
            })?;
            let slot = st.tickets.get_mut(&id).ok_or_else(|| AppErr::Internal(format!("ticket {id} vanished")))?;
            slot.ticket.transition(TicketStatus::Enqueued { entry_id })?;
            if std::mem::take(&mut slot.reserved) {
                self.inner.gate.release(&who);
            }
            tracing::info!(ticket = %id, entry = %entry_id, version = snap.version, "entry enqueued");
            Outbox { queue: Some(snap), tickets: vec![(slot.topic.clone(), slot.ticket.clone())] }
        };
        outbox.flush(&self.inner.queue_topic);
        Ok(())
    }

    async fn resolve(&self, media: &MediaRef) -> Result<MediaReference, ResolveError> {
        let attempts = self.inner.cfg.resolve_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.resolver.resolve(media).await {
                Ok(m) => return Ok(m),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    tracing::warn!(media = %media, attempt, error = %e, "resolver failed, retrying");
                    tokio::time::sleep(self.inner.cfg.resolve_backoff * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn transition<F>(&self, id: Uuid, f: F) -> AppResult<EnqueueTicket>
    where
        F: FnOnce(&mut EnqueueTicket) -> AppResult<()>,
    {
        let outbox = {
            let mut st = self.inner.state.lock();
            let slot = st.tickets.get_mut(&id).ok_or_else(|| not_found(format!("ticket {id}")))?;
            let mut draft = slot.ticket.clone();
            f(&mut draft)?;
            slot.ticket = draft;
            if slot.ticket.status.is_terminal() && std::mem::take(&mut slot.reserved) {
                self.inner.gate.release(&slot.ticket.submitted_by);
            }
            Outbox { queue: None, tickets: vec![(slot.topic.clone(), slot.ticket.clone())] }
        };
        let ticket = outbox.tickets[0].1.clone();
        outbox.flush(&self.inner.queue_topic);
        Ok(ticket)
    }

    fn reject(&self, id: Uuid, reason: RejectReason) -> AppResult<EnqueueTicket> {
        let t = self.transition(id, |t| t.transition(TicketStatus::Rejected { reason }))?;
        tracing::info!(ticket = %id, ?reason, "ticket rejected");
        Ok(t)
    }

    /* ---------------- queue mutations ---------------- */

    pub fn dequeue(&self) -> AppResult<Option<QueueEntry>> {
        let (head, snap) = self.mutate(|d| {
            if !d.entries.is_empty() {
                d.entries.remove(0);
            }
            Ok(d.entries.first().cloned())
        })?;
        tracing::info!(version = snap.version, next = ?head.as_ref().map(|e| e.id), "dequeued");
        Ok(head)
    }

    /// Places already-resolved media directly, bypassing tickets and the
    /// gate. Position 0 preempts the playing entry.
    pub fn insert_entry(&self, media: MediaReference, by: &Identity, position: Option<usize>) -> AppResult<QueueEntry> {
        let entry = QueueEntry {
            id: Uuid::new_v4(),
            media,
            submitted_by: by.clone(),
            inserted_at: Utc::now(),
            ticket: None,
            position: 0,
        };
        let id = entry.id;
        let (entry, _) = self.mutate(|d| {
            let at = position.unwrap_or(d.entries.len()).min(d.entries.len());
            d.entries.insert(at, entry);
            d.entries.get(at).cloned().ok_or_else(|| AppErr::Internal(format!("entry {id} lost on insert")))
        })?;
        Ok(entry)
    }

    pub async fn force_enqueue(&self, by: &Identity, raw: &str, position: Option<usize>) -> AppResult<QueueEntry> {
        let media_ref = MediaRef::parse(raw)?;
        let media = self.resolve(&media_ref).await.map_err(|e| match e {
            ResolveError::NotFound => not_found(format!("media {media_ref}")),
            ResolveError::Unavailable(msg) => AppErr::Internal(msg),
        })?;
        self.insert_entry(media, by, position)
    }

    pub fn remove_entry(&self, entry_id: Uuid) -> AppResult<QueueEntry> {
        let (removed, _) = self.mutate(|d| {
            let at = index_of(&d.entries, entry_id)?;
            Ok(d.entries.remove(at))
        })?;
        Ok(removed)
    }

    pub fn reorder(&self, entry_id: Uuid, to: usize) -> AppResult<QueueSnapshot> {
        let (_, snap) = self.mutate(|d| {
            let from = index_of(&d.entries, entry_id)?;
            if from == 0 {
                return Err(bad("cannot move the playing entry"));
            }
            if to == 0 {
                return Err(bad("position 0 is the playing entry"));
            }
            let e = d.entries.remove(from);
            let to = to.min(d.entries.len());
            d.entries.insert(to, e);
            Ok(())
        })?;
        Ok((*snap).clone())
    }

    pub fn set_enqueuing_enabled(&self, enabled: bool) -> AppResult<()> {
        let outbox = {
            let mut st = self.inner.state.lock();
            st.enqueuing_enabled = enabled;
            let (_, snap) = commit(&mut st, |_| Ok(()))?;
            Outbox { queue: Some(snap), tickets: Vec::new() }
        };
        outbox.flush(&self.inner.queue_topic);
        tracing::info!(enabled, "enqueuing toggled");
        Ok(())
    }

    // cold start
    pub fn restore(&self, entries: Vec<QueueEntry>) -> AppResult<()> {
        let n = entries.len();
        self.mutate(move |d| {
            d.entries = entries;
            Ok(())
        })?;
        tracing::info!(entries = n, "queue restored");
        Ok(())
    }

    fn mutate<R, F>(&self, f: F) -> AppResult<(R, Arc<QueueSnapshot>)>
    where
        F: FnOnce(&mut Draft) -> AppResult<R>,
    {
        let (out, snap) = {
            let mut st = self.inner.state.lock();
            commit(&mut st, f)?
        };
        Outbox { queue: Some(snap.clone()), tickets: Vec::new() }.flush(&self.inner.queue_topic);
        Ok((out, snap))
    }

    /* ---------------- playback ---------------- */

    /// Advances the head by `elapsed`. A head other than `expected` took
    /// over during the interval and is only credited the time since then.
    /// A head that reaches its duration is dequeued.
    pub fn advance(&self, expected: Option<Uuid>, elapsed: Duration) -> AppResult<Tick> {
        let (tick, outbox) = {
            let mut st = self.inner.state.lock();
            let Some(head) = st.entries.first().cloned() else {
                return Ok(Tick { playing: None, finished: None });
            };
            let credit = if Some(head.id) == expected { elapsed } else { elapsed.min(st.head_since.elapsed()) };
            st.position += credit;
            if st.position < head.media.duration {
                let position = st.position;
                return Ok(Tick { playing: Some((head, position)), finished: None });
            }
            let (next, snap) = commit(&mut st, |d| {
                d.entries.remove(0);
                Ok(d.entries.first().cloned())
            })?;
            tracing::info!(finished = %head.id, next = ?next.as_ref().map(|e| e.id), version = snap.version, "entry finished");
            let tick = Tick { playing: next.map(|e| (e, Duration::ZERO)), finished: Some(head) };
            (tick, Outbox { queue: Some(snap), tickets: Vec::new() })
        };
        outbox.flush(&self.inner.queue_topic);
        Ok(tick)
    }

    /* ---------------- housekeeping ---------------- */

    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let ttl = chrono::Duration::from_std(self.inner.cfg.ticket_ttl).unwrap_or_else(|_| chrono::Duration::hours(1));
        let (expired, forgotten) = {
            let mut st = self.inner.state.lock();
            let expired: Vec<Uuid> = st
                .tickets
                .values()
                .filter(|s| s.ticket.status == TicketStatus::Submitted && s.ticket.created_at + ttl <= now)
                .map(|s| s.ticket.id)
                .collect();
            let before = st.tickets.len();
            st.tickets.retain(|_, s| !(s.ticket.status.is_terminal() && s.ticket.updated_at + ttl <= now));
            (expired, before - st.tickets.len())
        };
        for id in &expired {
            if let Err(e) = self.reject(*id, RejectReason::Expired) {
                tracing::debug!(ticket = %id, error = %e, "ticket moved on before expiry");
            }
        }
        expired.len() + forgotten
    }
}

fn index_of(entries: &[QueueEntry], id: Uuid) -> AppResult<usize> {
    entries.iter().position(|e| e.id == id).ok_or_else(|| not_found(format!("queue entry {id}")))
}

fn snapshot_of(st: &QueueState) -> QueueSnapshot {
    QueueSnapshot {
        version: st.version,
        entries: st.entries.clone(),
        now_playing: st.entries.first().map(|h| NowPlaying { entry_id: h.id, position: st.position }),
        enqueuing_enabled: st.enqueuing_enabled,
    }
}

/// Applies `f` to a draft of the queue and commits it only if the result
/// holds together. On any error the committed state is untouched.
fn commit<R, F>(st: &mut QueueState, f: F) -> AppResult<(R, Arc<QueueSnapshot>)>
where
    F: FnOnce(&mut Draft) -> AppResult<R>,
{
    let old_head = st.entries.first().map(|e| e.id);
    let mut draft = Draft { entries: st.entries.clone(), position: st.position };
    let out = f(&mut draft)?;

    let head_changed = draft.entries.first().map(|e| e.id) != old_head;
    if head_changed {
        draft.position = Duration::ZERO;
    }
    for (i, e) in draft.entries.iter_mut().enumerate() {
        e.position = i;
    }
    check_invariants(&draft)?;

    st.entries = draft.entries;
    st.position = draft.position;
    if head_changed {
        st.head_since = Instant::now();
    }
    st.version += 1;
    Ok((out, Arc::new(snapshot_of(st))))
}

fn check_invariants(d: &Draft) -> AppResult<()> {
    let mut seen = HashSet::with_capacity(d.entries.len());
    for (i, e) in d.entries.iter().enumerate() {
        if e.position != i {
            return Err(invariant(format!("entry {} at {} claims position {}", e.id, i, e.position)));
        }
        if !seen.insert(e.id) {
            return Err(invariant(format!("duplicate entry {}", e.id)));
        }
    }
    if d.entries.is_empty() && d.position != Duration::ZERO {
        return Err(invariant("idle queue with a playback position".into()));
    }
    Ok(())
}

fn invariant(msg: String) -> AppErr {
    tracing::error!(%msg, "queue invariant violated, mutation aborted");
    AppErr::Internal(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::GateConfig, queue::PolicyKind, resolver::StaticResolver};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine_with(cfg: QueueConfig, resolver: impl MediaResolver + 'static) -> (QueueEngine, Arc<AdmissionGate>) {
        let gate = Arc::new(AdmissionGate::new(GateConfig { pow_difficulty: 4, ..GateConfig::default() }));
        let engine = QueueEngine::new(cfg, gate.clone(), Arc::new(BanList::new()), Arc::new(resolver));
        (engine, gate)
    }

    struct Flaky {
        failures: usize,    // Unavailable until then
        calls:    Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MediaResolver for Flaky {
        async fn resolve(&self, media: &MediaRef) -> Result<MediaReference, ResolveError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ResolveError::Unavailable("connection reset".into()));
            }
            Ok(MediaReference {
                reference: media.clone(),
                title: "flaky".into(),
                duration: Duration::from_secs(30),
                thumbnail: None,
            })
        }
    }

    fn media(id: &str, secs: u64) -> MediaReference {
        MediaReference {
            reference: MediaRef::parse(&format!("yt:{id}")).unwrap(),
            title: id.to_string(),
            duration: Duration::from_secs(secs),
            thumbnail: None,
        }
    }

    fn catalogue_a() -> StaticResolver { StaticResolver::new().with("yt:aaaaaaaaaaa", "A", Duration::from_secs(30)) }

    fn work(gate: &AdmissionGate, who: &Identity) -> Proof {
        let puzzle = gate.issue_puzzle(who);
        Proof::Work(puzzle.solve(who, 1 << 20).unwrap())
    }

    async fn settle(engine: &QueueEngine, id: Uuid) -> EnqueueTicket {
        let mut sub = engine.monitor_ticket(id).unwrap();
        let mut last = None;
        while let Some(Ok(t)) = sub.recv().await {
            last = Some(t);
        }
        last.unwrap()
    }

    #[test]
    fn positions_are_renumbered_and_versions_grow() {
        let (engine, _) = engine_with(QueueConfig::default(), StaticResolver::new());
        let who = Identity::new("mod");
        let a = engine.insert_entry(media("a", 10), &who, None).unwrap();
        let b = engine.insert_entry(media("b", 10), &who, None).unwrap();
        let c = engine.insert_entry(media("c", 10), &who, Some(1)).unwrap();

        let snap = engine.snapshot();
        assert_eq!(snap.version, 3);
        let ids: Vec<_> = snap.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, c.id, b.id]);
        assert!(snap.entries.iter().enumerate().all(|(i, e)| e.position == i));
        assert_eq!(snap.now_playing.map(|n| n.entry_id), Some(a.id));
    }

    #[test]
    fn failed_mutation_leaves_state_untouched() {
        let (engine, _) = engine_with(QueueConfig::default(), StaticResolver::new());
        let who = Identity::new("mod");
        let a = engine.insert_entry(media("a", 10), &who, None).unwrap();
        let before = engine.snapshot();

        assert!(matches!(engine.reorder(a.id, 1), Err(AppErr::Validation(_))));
        assert!(matches!(engine.remove_entry(Uuid::new_v4()), Err(AppErr::NotFound(_))));

        let dup = vec![a.clone(), a.clone()];
        assert!(matches!(engine.restore(dup), Err(AppErr::Internal(_))));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn reorder_keeps_the_head() {
        let (engine, _) = engine_with(QueueConfig::default(), StaticResolver::new());
        let who = Identity::new("mod");
        let a = engine.insert_entry(media("a", 10), &who, None).unwrap();
        let b = engine.insert_entry(media("b", 10), &who, None).unwrap();
        let c = engine.insert_entry(media("c", 10), &who, None).unwrap();

        assert!(matches!(engine.reorder(c.id, 0), Err(AppErr::Validation(_))));
        let snap = engine.reorder(c.id, 1).unwrap();
        let ids: Vec<_> = snap.entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![a.id, c.id, b.id]);
    }

    #[test]
    fn preempting_the_head_restarts_position() {
        let (engine, _) = engine_with(QueueConfig::default(), StaticResolver::new());
        let who = Identity::new("mod");
        let a = engine.insert_entry(media("a", 10), &who, None).unwrap();
        engine.advance(Some(a.id), Duration::from_secs(4)).unwrap();
        assert_eq!(engine.snapshot().now_playing.unwrap().position, Duration::from_secs(4));

        let b = engine.insert_entry(media("b", 10), &who, Some(0)).unwrap();
        let snap = engine.snapshot();
        assert_eq!(snap.head().map(|e| e.id), Some(b.id));
        assert_eq!(snap.entries[1].id, a.id);
        assert_eq!(snap.now_playing.unwrap().position, Duration::ZERO);
    }

    #[test]
    fn dequeue_promotes_and_empties() {
        let (engine, _) = engine_with(QueueConfig::default(), StaticResolver::new());
        let who = Identity::new("mod");
        engine.insert_entry(media("a", 10), &who, None).unwrap();
        let b = engine.insert_entry(media("b", 10), &who, None).unwrap();

        assert_eq!(engine.dequeue().unwrap().map(|e| e.id), Some(b.id));
        assert_eq!(engine.dequeue().unwrap(), None);
        assert!(engine.snapshot().now_playing.is_none());
        assert_eq!(engine.dequeue().unwrap(), None);
    }

    #[tokio::test]
    async fn enqueue_with_proof_lands_in_queue() {
        let resolver = StaticResolver::new().with("yt:aaaaaaaaaaa", "A", Duration::from_secs(30));
        let (engine, gate) = engine_with(QueueConfig::default(), resolver);
        let who = Identity::new("alice");

        let t = engine.enqueue(&who, "yt:aaaaaaaaaaa", Some(work(&gate, &who))).await.unwrap();
        let done = settle(&engine, t.id).await;
        let entry_id = done.entry_id().unwrap();

        let snap = engine.snapshot();
        assert_eq!(snap.head().map(|e| e.id), Some(entry_id));
        assert_eq!(snap.head().unwrap().ticket, Some(t.id));
        assert_eq!(gate.outstanding(&who), 0);
    }

    #[tokio::test]
    async fn unknown_media_is_rejected_after_admission() {
        let (engine, gate) = engine_with(QueueConfig::default(), StaticResolver::new());
        let who = Identity::new("alice");
        let t = engine.enqueue(&who, "yt:bbbbbbbbbbb", Some(work(&gate, &who))).await.unwrap();
        let done = settle(&engine, t.id).await;
        assert_eq!(done.rejection(), Some(RejectReason::MetadataResolutionFailed));
        assert!(engine.snapshot().is_empty());
        assert_eq!(gate.outstanding(&who), 0);
    }

    #[tokio::test]
    async fn full_queue_rejects_without_spending_the_proof() {
        let cfg = QueueConfig { capacity: 1, ..QueueConfig::default() };
        let (engine, gate) = engine_with(cfg, StaticResolver::new());
        engine.insert_entry(media("a", 10), &Identity::new("mod"), None).unwrap();

        let who = Identity::new("alice");
        let proof = work(&gate, &who);
        let t = engine.enqueue(&who, "yt:ccccccccccc", Some(proof.clone())).await.unwrap();
        assert_eq!(t.rejection(), Some(RejectReason::QueueFull));
        assert_eq!(gate.verify(&who, Action::Enqueue, &proof), Ok(()));
    }

    #[tokio::test]
    async fn parked_ticket_can_be_forced_or_expire() {
        let resolver = StaticResolver::new().with("yt:ddddddddddd", "D", Duration::from_secs(30));
        let (engine, _) = engine_with(QueueConfig::default(), resolver);
        let who = Identity::new("alice");

        let forced = engine.enqueue(&who, "yt:ddddddddddd", None).await.unwrap();
        assert_eq!(forced.status, TicketStatus::Submitted);
        engine.force_ticket(forced.id).unwrap();
        assert!(settle(&engine, forced.id).await.entry_id().is_some());
        assert!(matches!(engine.force_ticket(forced.id), Err(AppErr::NotFound(_))));

        let parked = engine.enqueue(&who, "yt:ddddddddddd", None).await.unwrap();
        let later = Utc::now() + chrono::Duration::hours(1);
        assert!(engine.sweep(later) >= 1);
        assert_eq!(engine.ticket(parked.id).unwrap().rejection(), Some(RejectReason::Expired));
    }

    #[tokio::test]
    async fn round_robin_interleaves_submitters() {
        let resolver = StaticResolver::new()
            .with("yt:a1a1a1a1a1a", "a1", Duration::from_secs(30))
            .with("yt:a2a2a2a2a2a", "a2", Duration::from_secs(30))
            .with("yt:b1b1b1b1b1b", "b1", Duration::from_secs(30));
        let cfg = QueueConfig { policy: PolicyKind::RoundRobin, ..QueueConfig::default() };
        let (engine, _) = engine_with(cfg, resolver);
        let head = engine.insert_entry(media("zzzzzzzzzzz", 60), &Identity::new("mod"), None).unwrap();

        let alice = Identity::new("alice");
        let bob = Identity::new("bob");
        for (who, raw) in [(&alice, "yt:a1a1a1a1a1a"), (&alice, "yt:a2a2a2a2a2a"), (&bob, "yt:b1b1b1b1b1b")] {
            let t = engine.enqueue(who, raw, None).await.unwrap();
            engine.force_ticket(t.id).unwrap();
            settle(&engine, t.id).await;
        }

        let titles: Vec<_> = engine.snapshot().entries.iter().map(|e| e.media.title.clone()).collect();
        assert_eq!(titles, vec!["zzzzzzzzzzz", "a1", "b1", "a2"]);
        assert_eq!(engine.snapshot().head().map(|e| e.id), Some(head.id));
    }

    async fn enqueue_through(failures: usize) -> (EnqueueTicket, usize) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cfg = QueueConfig { resolve_attempts: 3, resolve_backoff: Duration::from_millis(100), ..QueueConfig::default() };
        let (engine, _) = engine_with(cfg, Flaky { failures, calls: calls.clone() });
        let t = engine.enqueue(&Identity::new("alice"), "yt:eeeeeeeeeee", None).await.unwrap();
        engine.force_ticket(t.id).unwrap();
        let done = settle(&engine, t.id).await;
        (done, calls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn resolver_is_retried_while_unavailable() {
        let (done, calls) = enqueue_through(2).await;
        assert!(done.entry_id().is_some());
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn resolver_gives_up_after_the_last_attempt() {
        let (done, calls) = enqueue_through(usize::MAX).await;
        assert_eq!(done.rejection(), Some(RejectReason::MetadataResolutionFailed));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn failed_placement_rejects_what_it_still_can() {
        let (engine, _) = engine_with(QueueConfig::default(), catalogue_a());
        let who = Identity::new("alice");
        let err = AppErr::Internal("boom".into());

        let parked = engine.enqueue(&who, "yt:bbbbbbbbbbb", None).await.unwrap();
        engine.transition(parked.id, |t| t.transition(TicketStatus::Accepted)).unwrap();
        assert!(engine.placement_failed(parked.id, &err));
        assert_eq!(engine.ticket(parked.id).unwrap().rejection(), Some(RejectReason::MetadataResolutionFailed));

        let placed = engine.enqueue(&who, "yt:aaaaaaaaaaa", None).await.unwrap();
        engine.force_ticket(placed.id).unwrap();
        let done = settle(&engine, placed.id).await;
        assert!(!engine.placement_failed(placed.id, &err));
        assert_eq!(engine.ticket(placed.id).unwrap(), done);
        assert!(!engine.placement_failed(Uuid::new_v4(), &err));
    }
}
