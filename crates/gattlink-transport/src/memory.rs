use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use base64::Engine as _;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{Characteristic, LinkTransport, Notifications};

/// One characteristic write observed by a [`MemoryLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub characteristic: Characteristic,
    /// Base64 value as handed to the transport.
    pub data: String,
    pub with_response: bool,
}

impl Written {
    /// Decode the written value back into raw bytes.
    pub fn decoded(&self) -> Result<Vec<u8>> {
        Ok(base64::engine::general_purpose::STANDARD.decode(&self.data)?)
    }
}

/// In-process link with the peripheral side driven by the caller.
///
/// Records every write, optionally forwards writes to an observer, and lets
/// the caller push notifications as if they came from the peripheral. Write
/// failures and stalls can be injected by ordinal.
#[derive(Clone, Default)]
pub struct MemoryLink {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    disconnected: bool,
    writes: Vec<Written>,
    write_count: usize,
    fail_on_write: Option<usize>,
    stall_on_write: Option<usize>,
    observer: Option<mpsc::UnboundedSender<Written>>,
    subscribers: HashMap<Characteristic, mpsc::UnboundedSender<String>>,
}

impl MemoryLink {
    /// Create a connected link with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `nth` write (1-based, counted over the link lifetime).
    pub fn fail_write(&self, nth: usize) {
        self.state().fail_on_write = Some(nth);
    }

    /// Never complete the `nth` write (1-based). Nothing is recorded for it.
    pub fn stall_write(&self, nth: usize) {
        self.state().stall_on_write = Some(nth);
    }

    /// Drop the link: writes fail and notification streams end.
    pub fn disconnect(&self) {
        let mut state = self.state();
        state.disconnected = true;
        state.subscribers.clear();
        state.observer = None;
    }

    /// Snapshot of every successful write so far.
    pub fn writes(&self) -> Vec<Written> {
        self.state().writes.clone()
    }

    /// Number of write attempts so far, including failed ones.
    pub fn write_attempts(&self) -> usize {
        self.state().write_count
    }

    /// Forward subsequent successful writes to the returned receiver.
    pub fn observe_writes(&self) -> mpsc::UnboundedReceiver<Written> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().observer = Some(tx);
        rx
    }

    /// Push a base64 notification value. Returns false if nobody is subscribed.
    pub fn notify(&self, characteristic: &Characteristic, data: impl Into<String>) -> bool {
        let state = self.state();
        match state.subscribers.get(characteristic) {
            Some(tx) => tx.send(data.into()).is_ok(),
            None => false,
        }
    }

    /// Push raw bytes as a notification, base64-encoding them first.
    pub fn notify_bytes(&self, characteristic: &Characteristic, bytes: &[u8]) -> bool {
        self.notify(
            characteristic,
            base64::engine::general_purpose::STANDARD.encode(bytes),
        )
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not cascade into every other user.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LinkTransport for MemoryLink {
    fn is_connected(&self) -> bool {
        !self.state().disconnected
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        data: &str,
        with_response: bool,
    ) -> Result<()> {
        let stalled = {
            let mut state = self.state();
            if state.disconnected {
                return Err(TransportError::NotConnected);
            }

            state.write_count += 1;
            if state.fail_on_write == Some(state.write_count) {
                debug!(attempt = state.write_count, %characteristic, "injected write failure");
                return Err(TransportError::WriteRejected(format!(
                    "injected failure on write {}",
                    state.write_count
                )));
            }

            if state.stall_on_write == Some(state.write_count) {
                debug!(attempt = state.write_count, %characteristic, "injected write stall");
                true
            } else {
                let written = Written {
                    characteristic: characteristic.clone(),
                    data: data.to_string(),
                    with_response,
                };
                if let Some(observer) = &state.observer {
                    let _ = observer.send(written.clone());
                }
                state.writes.push(written);
                false
            }
        };

        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn subscribe(&self, characteristic: &Characteristic) -> Result<Notifications> {
        let mut state = self.state();
        if state.disconnected {
            return Err(TransportError::NotConnected);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscribers.insert(characteristic.clone(), tx);
        debug!(%characteristic, "memory link subscribed");
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch() -> Characteristic {
        Characteristic::new("svc", "rx")
    }

    #[tokio::test]
    async fn records_writes_in_order() {
        let link = MemoryLink::new();
        link.write(&ch(), "AA==", false).await.unwrap();
        link.write(&ch(), "AQ==", true).await.unwrap();

        let writes = link.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].decoded().unwrap(), vec![0u8]);
        assert_eq!(writes[1].decoded().unwrap(), vec![1u8]);
        assert!(writes[1].with_response);
    }

    #[tokio::test]
    async fn injected_failure_hits_only_that_write() {
        let link = MemoryLink::new();
        link.fail_write(2);

        assert!(link.write(&ch(), "AA==", false).await.is_ok());
        let err = link.write(&ch(), "AA==", false).await.unwrap_err();
        assert!(matches!(err, TransportError::WriteRejected(_)));
        assert!(link.write(&ch(), "AA==", false).await.is_ok());

        assert_eq!(link.write_attempts(), 3);
        assert_eq!(link.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_never_completes() {
        let link = MemoryLink::new();
        link.stall_write(1);

        let stalled =
            tokio::time::timeout(std::time::Duration::from_secs(60), link.write(&ch(), "AA==", false))
                .await;
        assert!(stalled.is_err());
        assert!(link.write(&ch(), "AQ==", false).await.is_ok());

        assert_eq!(link.write_attempts(), 2);
        assert_eq!(link.writes().len(), 1);
        assert_eq!(link.writes()[0].data, "AQ==");
    }

    #[tokio::test]
    async fn notifications_reach_subscriber() {
        let link = MemoryLink::new();
        let mut rx = link.subscribe(&ch()).unwrap();

        assert!(link.notify_bytes(&ch(), b"hi"));
        assert_eq!(rx.recv().await.unwrap(), "aGk=");
        assert!(!link.notify(&Characteristic::new("svc", "other"), "aGk="));
    }

    #[tokio::test]
    async fn disconnect_ends_streams_and_fails_writes() {
        let link = MemoryLink::new();
        let mut rx = link.subscribe(&ch()).unwrap();
        link.disconnect();

        assert!(!link.is_connected());
        assert!(rx.recv().await.is_none());
        let err = link.write(&ch(), "AA==", false).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[tokio::test]
    async fn observer_sees_writes() {
        let link = MemoryLink::new();
        let mut observed = link.observe_writes();
        link.write(&ch(), "AA==", false).await.unwrap();
        assert_eq!(observed.recv().await.unwrap().data, "AA==");
    }
}
