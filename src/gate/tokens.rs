//! Single-use token table with expiry.

use chrono::{DateTime, Utc};
use std::{collections::HashMap, hash::Hash};

use super::Rejection;

struct Token<V> {
    value:      V,
    expires_at: DateTime<Utc>,
    consumed:   bool,
}

/// Issued tokens keyed by id. A consumed token is kept until it expires so
/// a replay is reported as `AlreadyUsed` rather than as unknown.
pub(crate) struct OneTimeTable<K, V> {
    tokens: HashMap<K, Token<V>>,
}

impl<K: Eq + Hash, V> Default for OneTimeTable<K, V> {
    fn default() -> Self { Self { tokens: HashMap::new() } }
}

impl<K: Eq + Hash, V> OneTimeTable<K, V> {
    pub fn issue(&mut self, key: K, value: V, expires_at: DateTime<Utc>) {
        self.tokens.insert(key, Token { value, expires_at, consumed: false });
    }

    /// Live (unconsumed, unexpired) token value.
    pub fn live(&self, key: &K, now: DateTime<Utc>) -> Option<&V> {
        self.tokens
            .get(key)
            .filter(|t| !t.consumed && now < t.expires_at)
            .map(|t| &t.value)
    }

    /// Checks and consumes in one step. `check` runs only on a live token
    /// and a failing check leaves the token unconsumed.
    pub fn consume<F>(&mut self, key: &K, now: DateTime<Utc>, check: F) -> Result<&V, Rejection>
    where
        F: FnOnce(&V) -> Result<(), Rejection>,
    {
        let expired = match self.tokens.get(key) {
            None => return Err(Rejection::InvalidProof),
            Some(t) if t.consumed => return Err(Rejection::AlreadyUsed),
            Some(t) => now >= t.expires_at,
        };
        if expired {
            self.tokens.remove(key);
            return Err(Rejection::Expired);
        }
        let token = self.tokens.get_mut(key).ok_or(Rejection::InvalidProof)?;
        check(&token.value)?;
        token.consumed = true;
        Ok(&token.value)
    }

    /// Drops expired tokens, consumed or not. Returns how many went.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, t| now < t.expires_at);
        before - self.tokens.len()
    }

    pub fn len(&self) -> usize { self.tokens.len() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn second_consume_is_already_used() {
        let now = Utc::now();
        let mut t = OneTimeTable::default();
        t.issue(1, "a", now + Duration::seconds(10));
        assert!(t.consume(&1, now, |_| Ok(())).is_ok());
        assert_eq!(t.consume(&1, now, |_| Ok(())).err(), Some(Rejection::AlreadyUsed));
    }

    #[test]
    fn failed_check_does_not_consume() {
        let now = Utc::now();
        let mut t = OneTimeTable::default();
        t.issue("k", 5, now + Duration::seconds(10));
        assert_eq!(
            t.consume(&"k", now, |_| Err(Rejection::InvalidProof)).err(),
            Some(Rejection::InvalidProof)
        );
        assert_eq!(t.consume(&"k", now, |v| if *v == 5 { Ok(()) } else { Err(Rejection::InvalidProof) }).ok(), Some(&5));
    }

    #[test]
    fn expired_and_unknown() {
        let now = Utc::now();
        let mut t = OneTimeTable::default();
        t.issue(1, (), now);
        assert_eq!(t.consume(&1, now, |_| Ok(())).err(), Some(Rejection::Expired));
        assert_eq!(t.consume(&2, now, |_| Ok(())).err(), Some(Rejection::InvalidProof));
    }

    #[test]
    fn sweep_purges_expired() {
        let now = Utc::now();
        let mut t = OneTimeTable::default();
        t.issue(1, (), now - Duration::seconds(1));
        t.issue(2, (), now + Duration::seconds(60));
        assert_eq!(t.sweep(now), 1);
        assert_eq!(t.len(), 1);
        assert!(t.live(&2, now).is_some());
    }
}
