use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Result, SessionError};
use crate::message::CorrelationKey;

/// Receives the `response` field of the matching inbound message.
pub type Waiter = oneshot::Sender<Value>;

#[derive(Debug)]
struct PendingRequest {
    waiter: Waiter,
    created_at: Instant,
}

/// Maps correlation keys to the waiters of outstanding commands.
///
/// Each key resolves at most once. Unknown keys are reported, not fatal:
/// the peripheral may send events nobody asked for.
#[derive(Debug, Default)]
pub struct Correlator {
    pending: HashMap<CorrelationKey, PendingRequest>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `waiter` under `key`.
    pub fn register(&mut self, key: CorrelationKey, waiter: Waiter) -> Result<()> {
        if self.pending.contains_key(&key) {
            return Err(SessionError::DuplicateKey(key.to_string()));
        }
        debug!(event = %key, pending = self.pending.len() + 1, "registered pending waiter");
        self.pending.insert(
            key,
            PendingRequest {
                waiter,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Hand `payload` to the waiter for `key`. Returns false if nothing was pending.
    pub fn resolve(&mut self, key: &CorrelationKey, payload: Value) -> bool {
        let Some(request) = self.pending.remove(key) else {
            return false;
        };
        debug!(
            event = %key,
            waited_ms = request.created_at.elapsed().as_millis() as u64,
            "resolved pending waiter"
        );
        // The caller may have given up already; the entry is consumed either way.
        let _ = request.waiter.send(payload);
        true
    }

    /// Drop the waiter for `key` without resolving it.
    pub fn cancel(&mut self, key: &CorrelationKey) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Drop every waiter. Their receivers observe a closed channel.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.pending.contains_key(key)
    }

    /// How long `key` has been waiting.
    pub fn age(&self, key: &CorrelationKey) -> Option<Duration> {
        self.pending.get(key).map(|request| request.created_at.elapsed())
    }

    /// Keys of outstanding commands in issue order (for diagnostics).
    ///
    /// Generated keys sort by counter, so `event10` follows `event9`; any
    /// other key sorts after them by name.
    pub fn pending_keys(&self) -> Vec<CorrelationKey> {
        let mut keys: Vec<CorrelationKey> = self.pending.keys().cloned().collect();
        keys.sort_unstable_by(|a, b| match (a.sequence(), b.sequence()) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        });
        keys
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn resolve_delivers_once() {
        let mut correlator = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        let key = CorrelationKey::new("event1");
        correlator.register(key.clone(), tx).unwrap();

        assert!(correlator.resolve(&key, json!({"ok": 1})));
        assert_eq!(rx.try_recv().unwrap(), json!({"ok": 1}));
        assert!(!correlator.resolve(&key, json!({"ok": 2})));
        assert!(correlator.is_empty());
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut correlator = Correlator::new();
        let key = CorrelationKey::new("event1");
        correlator.register(key.clone(), oneshot::channel().0).unwrap();
        let err = correlator
            .register(key.clone(), oneshot::channel().0)
            .unwrap_err();
        assert!(matches!(err, SessionError::DuplicateKey(k) if k == "event1"));
        assert_eq!(correlator.len(), 1);
    }

    #[test]
    fn unmatched_key_is_not_an_error() {
        let mut correlator = Correlator::new();
        let (tx, _rx) = oneshot::channel();
        correlator.register("event2".into(), tx).unwrap();

        assert!(!correlator.resolve(&"event0".into(), json!(null)));
        assert!(correlator.is_pending(&"event2".into()));
    }

    #[test]
    fn resolve_tolerates_dropped_receiver() {
        let mut correlator = Correlator::new();
        let (tx, rx) = oneshot::channel();
        correlator.register("event1".into(), tx).unwrap();
        drop(rx);
        assert!(correlator.resolve(&"event1".into(), json!({})));
    }

    #[test]
    fn cancel_closes_waiter() {
        let mut correlator = Correlator::new();
        let (tx, mut rx) = oneshot::channel();
        correlator.register("event1".into(), tx).unwrap();

        assert!(correlator.cancel(&"event1".into()));
        assert!(!correlator.cancel(&"event1".into()));
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn pending_keys_in_issue_order() {
        let mut correlator = Correlator::new();
        for key in ["event10", "custom", "event2", "event9"] {
            correlator.register(key.into(), oneshot::channel().0).unwrap();
        }
        assert_eq!(
            correlator.pending_keys(),
            vec![
                CorrelationKey::new("event2"),
                CorrelationKey::new("event9"),
                CorrelationKey::new("event10"),
                CorrelationKey::new("custom"),
            ]
        );
        assert!(correlator.age(&"event2".into()).is_some());
        assert_eq!(correlator.clear(), 4);
    }
}
