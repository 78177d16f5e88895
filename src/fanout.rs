//! One-to-many live distribution of snapshots.
//!
//! A [`Broadcaster`] keeps the latest published value and a bounded
//! delivery queue per subscriber. Publishing never waits on a subscriber:
//! a subscriber whose queue is full is cut off and observes
//! [`FanoutError::Overflow`] after draining what was already buffered.
//! New subscribers receive the latest value as their first item.

use parking_lot::Mutex;
use std::{
    collections::HashMap,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    task::{Context, Poll},
};
use tokio::sync::mpsc::{self, error::TrySendError};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutError {
    #[error("subscriber fell behind and was disconnected")]
    Overflow,
}

struct Slot<T> {
    tx:         mpsc::Sender<T>,
    overflowed: Arc<AtomicBool>,
}

struct Topic<T> {
    name:        &'static str,
    latest:      Option<T>,
    version:     u64,
    next_id:     u64,
    subscribers: HashMap<u64, Slot<T>>,
    closed:      bool,
}

pub struct Broadcaster<T> {
    topic:    Arc<Mutex<Topic<T>>>,
    capacity: usize,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self { topic: self.topic.clone(), capacity: self.capacity }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            topic: Arc::new(Mutex::new(Topic {
                name,
                latest: None,
                version: 0,
                next_id: 0,
                subscribers: HashMap::new(),
                closed: false,
            })),
            capacity: capacity.max(1),
        }
    }

    pub fn with_initial(name: &'static str, capacity: usize, value: T) -> Self {
        let b = Self::new(name, capacity);
        b.publish_versioned(0, value);
        b
    }

    /// Registers a subscriber. The latest value, if any, is already queued
    /// when this returns. On a closed topic the subscriber gets the final
    /// value and then the end of the stream.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let mut topic = self.topic.lock();
        if let Some(v) = &topic.latest {
            // fresh channel with spare room, cannot fail
            let _ = tx.try_send(v.clone());
        }
        let id = topic.next_id;
        topic.next_id += 1;
        if !topic.closed {
            topic.subscribers.insert(id, Slot { tx, overflowed: overflowed.clone() });
            tracing::debug!(topic = topic.name, subscriber = id, "subscribed");
        }
        Subscription {
            id,
            rx,
            overflowed,
            reported: false,
            topic: Arc::downgrade(&self.topic),
        }
    }

    pub fn publish(&self, value: T) {
        let mut topic = self.topic.lock();
        let v = topic.version + 1;
        Self::deliver(&mut topic, v, value);
    }

    /// Publishes `value` unless a value with the same or a newer version
    /// went out already. Returns whether it was delivered.
    pub fn publish_versioned(&self, version: u64, value: T) -> bool {
        let mut topic = self.topic.lock();
        if version <= topic.version && topic.latest.is_some() {
            tracing::debug!(topic = topic.name, version, current = topic.version, "stale publish dropped");
            return false;
        }
        Self::deliver(&mut topic, version, value);
        true
    }

    fn deliver(topic: &mut Topic<T>, version: u64, value: T) {
        if topic.closed {
            return;
        }
        let name = topic.name;
        topic.subscribers.retain(|id, slot| match slot.tx.try_send(value.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                slot.overflowed.store(true, Ordering::Release);
                tracing::warn!(topic = name, subscriber = *id, "subscriber overflowed, disconnecting");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
        topic.version = version;
        topic.latest = Some(value);
    }

    pub fn latest(&self) -> Option<T> { self.topic.lock().latest.clone() }

    pub fn version(&self) -> u64 { self.topic.lock().version }

    pub fn subscriber_count(&self) -> usize { self.topic.lock().subscribers.len() }

    pub fn is_closed(&self) -> bool { self.topic.lock().closed }

    // subscribers drain their backlog, then see the end
    pub fn close(&self) {
        let mut topic = self.topic.lock();
        topic.closed = true;
        topic.subscribers.clear();
        tracing::debug!(topic = topic.name, "topic closed");
    }
}

/// One observer's handle. Dropping it unsubscribes.
pub struct Subscription<T> {
    id:         u64,
    rx:         mpsc::Receiver<T>,
    overflowed: Arc<AtomicBool>,
    reported:   bool,
    topic:      Weak<Mutex<Topic<T>>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> u64 { self.id }

    /// Next value, `Some(Err(Overflow))` once if this subscriber was cut
    /// off, `None` when the stream is over.
    pub async fn recv(&mut self) -> Option<Result<T, FanoutError>> {
        std::future::poll_fn(|cx| self.poll_next_item(cx)).await
    }

    pub fn try_recv(&mut self) -> Option<Result<T, FanoutError>> {
        match self.rx.try_recv() {
            Ok(v) => Some(Ok(v)),
            Err(mpsc::error::TryRecvError::Empty) => None,
            Err(mpsc::error::TryRecvError::Disconnected) => self.overflow_once(),
        }
    }

    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(topic) = self.topic.upgrade() {
            topic.lock().subscribers.remove(&self.id);
        }
        self.topic = Weak::new();
    }

    fn poll_next_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<T, FanoutError>>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(v)) => Poll::Ready(Some(Ok(v))),
            Poll::Ready(None) => Poll::Ready(self.overflow_once()),
            Poll::Pending => Poll::Pending,
        }
    }

    fn overflow_once(&mut self) -> Option<Result<T, FanoutError>> {
        if !self.reported && self.overflowed.load(Ordering::Acquire) {
            self.reported = true;
            return Some(Err(FanoutError::Overflow));
        }
        None
    }
}

impl<T> futures_util::Stream for Subscription<T> {
    type Item = Result<T, FanoutError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_item(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) { self.unsubscribe(); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn late_subscriber_sees_latest_first() {
        let b = Broadcaster::new("t", 4);
        b.publish(1);
        b.publish(2);
        let mut sub = b.subscribe();
        assert_eq!(sub.recv().await, Some(Ok(2)));
        b.publish(3);
        assert_eq!(sub.recv().await, Some(Ok(3)));
    }

    #[tokio::test]
    async fn empty_topic_delivers_nothing_until_publish() {
        let b = Broadcaster::<u32>::new("t", 4);
        let mut sub = b.subscribe();
        assert!(sub.try_recv().is_none());
        b.publish(7);
        assert_eq!(sub.next().await, Some(Ok(7)));
    }

    #[tokio::test]
    async fn stalled_subscriber_overflows_alone() {
        let b = Broadcaster::new("t", 2);
        let mut slow = b.subscribe();
        let mut fast = b.subscribe();
        for i in 0..2 {
            b.publish(i);
            assert_eq!(fast.recv().await, Some(Ok(i)));
        }
        // a backlog of exactly the bound is still fine
        assert_eq!(b.subscriber_count(), 2);
        for i in 2..5 {
            b.publish(i);
            assert_eq!(fast.recv().await, Some(Ok(i)));
        }
        assert_eq!(b.subscriber_count(), 1);
        // buffered items first, then the overflow, then the end
        assert_eq!(slow.recv().await, Some(Ok(0)));
        assert_eq!(slow.recv().await, Some(Ok(1)));
        assert_eq!(slow.recv().await, Some(Err(FanoutError::Overflow)));
        assert_eq!(slow.recv().await, None);
    }

    #[tokio::test]
    async fn stale_versions_are_dropped() {
        let b = Broadcaster::new("t", 4);
        let mut sub = b.subscribe();
        assert!(b.publish_versioned(2, "two"));
        assert!(!b.publish_versioned(1, "one"));
        assert!(b.publish_versioned(3, "three"));
        assert_eq!(sub.recv().await, Some(Ok("two")));
        assert_eq!(sub.recv().await, Some(Ok("three")));
        assert_eq!(b.latest(), Some("three"));
    }

    #[tokio::test]
    async fn close_ends_streams_and_late_joiners_get_final_value() {
        let b = Broadcaster::new("t", 4);
        let mut sub = b.subscribe();
        b.publish("done");
        b.close();
        assert_eq!(sub.recv().await, Some(Ok("done")));
        assert_eq!(sub.recv().await, None);

        let mut late = b.subscribe();
        assert_eq!(late.recv().await, Some(Ok("done")));
        assert_eq!(late.recv().await, None);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_drop_releases() {
        let b = Broadcaster::<u8>::new("t", 4);
        let mut a = b.subscribe();
        let c = b.subscribe();
        assert_eq!(b.subscriber_count(), 2);
        a.unsubscribe();
        a.unsubscribe();
        assert_eq!(b.subscriber_count(), 1);
        drop(c);
        assert_eq!(b.subscriber_count(), 0);
    }
}
