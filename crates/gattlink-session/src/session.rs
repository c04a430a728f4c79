use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use gattlink_frame::{decode_fragment, FragmentWriter, Reassembler};
use gattlink_transport::{LinkTransport, Notifications};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::correlator::Correlator;
use crate::error::{Result, SessionError};
use crate::gate::{Gate, GateState, GateTicket};
use crate::message::{CommandMessage, CorrelationKey, InboundMessage, KeyGenerator};
use crate::state::{StateCategory, GET_CONFIG};

/// Unsolicited messages buffered before new ones are dropped.
const EVENT_BUFFER: usize = 64;

/// One command/response session over one link.
///
/// At most one command is in flight. Inbound notifications are consumed by a
/// background task; messages that match no pending command are published on
/// the [`events`](Self::take_events) channel.
pub struct Session<T: LinkTransport> {
    inner: Arc<SessionInner<T>>,
}

struct SessionInner<T> {
    transport: Arc<T>,
    writer: FragmentWriter<Arc<T>>,
    /// Held for the whole fragment sequence of one message.
    write_lock: tokio::sync::Mutex<()>,
    config: LinkConfig,
    link: Mutex<LinkState>,
    events_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    shutdown: CancellationToken,
}

/// Everything the send and receive paths share, behind one lock.
struct LinkState {
    gate: Gate,
    correlator: Correlator,
    reassembler: Reassembler,
    keys: KeyGenerator,
    in_flight: Option<(CorrelationKey, GateTicket)>,
    /// Dropped on close so the events receiver sees the end of the stream.
    events: Option<mpsc::Sender<InboundMessage>>,
    closed: bool,
}

impl<T: LinkTransport> Session<T> {
    /// Start a session: subscribe to the response characteristic and spawn
    /// the receive task. Must be called inside a Tokio runtime.
    pub fn open(transport: T, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        if !transport.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let transport = Arc::new(transport);
        let frame_config = config.frame_config();
        let notifications = transport.subscribe(&config.rx())?;
        let writer = FragmentWriter::with_config(Arc::clone(&transport), config.tx(), frame_config.clone())?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let inner = Arc::new(SessionInner {
            transport,
            writer,
            write_lock: tokio::sync::Mutex::new(()),
            link: Mutex::new(LinkState {
                gate: Gate::new(),
                correlator: Correlator::new(),
                reassembler: Reassembler::with_config(&frame_config),
                keys: KeyGenerator::new(),
                in_flight: None,
                events: Some(events_tx),
                closed: false,
            }),
            config,
            events_rx: Mutex::new(Some(events_rx)),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(receive_loop(Arc::clone(&inner), notifications));
        info!(
            tx = %inner.config.tx(),
            rx = %inner.config.rx(),
            policy = inner.writer.config().policy.as_str(),
            "session opened"
        );
        Ok(Self { inner })
    }

    /// Send a command and wait for the response with the same correlation key.
    ///
    /// Fails fast with [`SessionError::Busy`] if another command is in
    /// flight. The write and the wait share one busy window: a write that
    /// stalls past it fails with [`SessionError::Timeout`] like a missing
    /// response does. Dropping the returned future releases the gate and
    /// forgets the pending response.
    pub async fn send_command(&self, name: &str, args: Value) -> Result<Value> {
        self.ensure_open()?;

        let (key, flight, response_rx) = self.inner.begin_command()?;
        let payload = CommandMessage {
            event: &key,
            cmd: name,
            args: &args,
        }
        .to_bytes()?;

        let exchange = self.inner.exchange(&key, name, &payload, response_rx);
        match tokio::time::timeout_at(flight.deadline, exchange).await {
            Ok(result) => result,
            Err(_) => {
                warn!(event = %key, cmd = name, "busy window elapsed during the exchange");
                Err(SessionError::Timeout(self.inner.config.busy_timeout()))
            }
        }
    }

    /// Read one device-state category.
    pub async fn read_state(&self, category: StateCategory) -> Result<Value> {
        let response = self
            .send_command(GET_CONFIG, Value::Object(Default::default()))
            .await?;
        response.get(category.section()).cloned().ok_or_else(|| {
            SessionError::UnexpectedResponse(format!(
                "{GET_CONFIG} response has no '{}' section for {category}",
                category.section()
            ))
        })
    }

    /// Write an empty message. Holds the gate only while writing, bounded
    /// by the busy window.
    pub async fn heartbeat(&self) -> Result<()> {
        self.ensure_open()?;
        let flight = self.inner.begin_heartbeat()?;
        match tokio::time::timeout_at(flight.deadline, self.inner.write(&[])).await {
            Ok(written) => {
                written?;
                Ok(())
            }
            Err(_) => {
                warn!("busy window elapsed during heartbeat");
                Err(SessionError::Timeout(self.inner.config.busy_timeout()))
            }
        }
    }

    /// Feed one raw inbound fragment, as if notified by the link.
    pub fn notify_received(&self, fragment: &[u8]) {
        self.inner.on_fragment(fragment);
    }

    /// Take the receiver of unsolicited messages. Only the first call gets it.
    pub fn take_events(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inner
            .events_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    pub fn gate_state(&self) -> GateState {
        self.inner.lock().gate.state()
    }

    pub fn pending_keys(&self) -> Vec<CorrelationKey> {
        self.inner.lock().correlator.pending_keys()
    }

    pub fn is_connected(&self) -> bool {
        !self.inner.lock().closed && self.inner.transport.is_connected()
    }

    pub fn config(&self) -> &LinkConfig {
        &self.inner.config
    }

    /// Stop the receive task and fail any waiting command with [`SessionError::Closed`].
    pub fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.mark_closed("session closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }
}

impl<T: LinkTransport> Drop for Session<T> {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl<T: LinkTransport> SessionInner<T> {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.link
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Callers bound this by the busy window; dropping it releases the lock.
    async fn write(&self, payload: &[u8]) -> Result<usize> {
        let _writing = self.write_lock.lock().await;
        Ok(self.writer.send(payload).await?)
    }

    /// Write one command and wait for its response.
    async fn exchange(
        &self,
        key: &CorrelationKey,
        name: &str,
        payload: &[u8],
        response_rx: oneshot::Receiver<Value>,
    ) -> Result<Value> {
        let fragments = self.write(payload).await?;
        debug!(event = %key, cmd = name, fragments, "command sent");
        match response_rx.await {
            Ok(response) => Ok(response),
            Err(_) if self.lock().closed => Err(SessionError::Closed),
            Err(_) => Err(SessionError::Timeout(self.config.busy_timeout())),
        }
    }

    /// Acquire the gate, register a waiter and arm the busy-window timer.
    fn begin_command<'a>(
        self: &'a Arc<Self>,
    ) -> Result<(CorrelationKey, InFlight<'a, T>, oneshot::Receiver<Value>)> {
        let mut link = self.lock();
        let ticket = link.gate.try_acquire().ok_or(SessionError::Busy)?;
        let key = link.keys.next_key();

        let (tx, rx) = oneshot::channel();
        if let Err(err) = link.correlator.register(key.clone(), tx) {
            link.gate.release(ticket);
            return Err(err);
        }
        link.in_flight = Some((key.clone(), ticket));

        let deadline = self.arm(&mut link, ticket, Some(key.clone()));
        let flight = InFlight {
            inner: self,
            key: Some(key.clone()),
            ticket,
            deadline,
        };
        Ok((key, flight, rx))
    }

    /// Acquire the gate for a write that expects no response.
    fn begin_heartbeat<'a>(self: &'a Arc<Self>) -> Result<InFlight<'a, T>> {
        let mut link = self.lock();
        let ticket = link.gate.try_acquire().ok_or(SessionError::Busy)?;
        let deadline = self.arm(&mut link, ticket, None);
        Ok(InFlight {
            inner: self,
            key: None,
            ticket,
            deadline,
        })
    }

    /// Arm the busy-window timer for `ticket` and return its deadline.
    fn arm(
        self: &Arc<Self>,
        link: &mut LinkState,
        ticket: GateTicket,
        key: Option<CorrelationKey>,
    ) -> Instant {
        let busy_timeout = self.config.busy_timeout();
        let weak: Weak<Self> = Arc::downgrade(self);
        link.gate.arm_timeout(ticket, busy_timeout, move |ticket| {
            if let Some(inner) = weak.upgrade() {
                inner.expire(key.as_ref(), ticket, busy_timeout);
            }
        });
        Instant::now() + busy_timeout
    }

    fn expire(&self, key: Option<&CorrelationKey>, ticket: GateTicket, busy_timeout: Duration) {
        let mut link = self.lock();
        if !link.gate.expire(ticket) {
            return;
        }
        if let Some(key) = key {
            link.correlator.cancel(key);
        }
        if matches!(&link.in_flight, Some((_, current)) if *current == ticket) {
            link.in_flight = None;
        }
        warn!(
            event = key.map(CorrelationKey::as_str),
            timeout_ms = busy_timeout.as_millis() as u64,
            "busy window expired"
        );
    }

    /// Undo `begin_*`. Safe to call after the response or the timeout already did.
    fn finish(&self, key: Option<&CorrelationKey>, ticket: GateTicket) {
        let mut link = self.lock();
        if let Some(key) = key {
            link.correlator.cancel(key);
        }
        if matches!(&link.in_flight, Some((_, current)) if *current == ticket) {
            link.in_flight = None;
        }
        link.gate.release(ticket);
    }

    fn on_notification(&self, value: &str) {
        match decode_fragment(value) {
            Ok(fragment) => self.on_fragment(&fragment),
            Err(err) => {
                warn!(error = %err, "notification is not base64; resetting reassembly");
                self.lock().reassembler.reset();
            }
        }
    }

    fn on_fragment(&self, fragment: &[u8]) {
        let mut link = self.lock();
        if link.closed {
            return;
        }
        for message in link.reassembler.push(fragment) {
            match InboundMessage::parse(&message) {
                Ok(inbound) => Self::dispatch(&mut link, inbound),
                Err(err) => warn!(error = %err, len = message.len(), "discarding message"),
            }
        }
    }

    fn dispatch(link: &mut LinkState, inbound: InboundMessage) {
        if link.correlator.resolve(&inbound.event, inbound.response.clone()) {
            if let Some((key, ticket)) = link.in_flight.take() {
                if key == inbound.event {
                    link.gate.release(ticket);
                } else {
                    link.in_flight = Some((key, ticket));
                }
            }
            return;
        }

        debug!(event = %inbound.event, "unsolicited message");
        if let Some(events) = &link.events {
            if let Err(err) = events.try_send(inbound) {
                debug!(error = %err, "dropping unsolicited message");
            }
        }
    }

    fn mark_closed(&self, reason: &str) {
        let mut link = self.lock();
        if link.closed {
            return;
        }
        link.closed = true;
        let dropped = link.correlator.clear();
        if let Some((_, ticket)) = link.in_flight.take() {
            link.gate.release(ticket);
        }
        link.reassembler.reset();
        link.events = None;
        info!(reason, dropped_waiters = dropped, "session closed");
    }
}

/// Releases the gate and forgets the waiter when the exchange ends, however it ends.
struct InFlight<'a, T: LinkTransport> {
    inner: &'a Arc<SessionInner<T>>,
    /// `None` for heartbeats.
    key: Option<CorrelationKey>,
    ticket: GateTicket,
    /// End of the busy window.
    deadline: Instant,
}

impl<T: LinkTransport> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        self.inner.finish(self.key.as_ref(), self.ticket);
    }
}

async fn receive_loop<T: LinkTransport>(inner: Arc<SessionInner<T>>, mut notifications: Notifications) {
    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => {
                debug!("receive task cancelled");
                break;
            }
            value = notifications.recv() => match value {
                Some(value) => inner.on_notification(&value),
                None => {
                    inner.mark_closed("link notifications ended");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use gattlink_frame::encode_fragment;
    use gattlink_transport::{Characteristic, MemoryLink, Written};
    use serde_json::json;

    use super::*;

    fn config() -> LinkConfig {
        LinkConfig {
            inter_fragment_delay_ms: 0,
            ..LinkConfig::default()
        }
    }

    async fn next_command(writes: &mut mpsc::UnboundedReceiver<Written>) -> Value {
        let mut buf = Vec::new();
        loop {
            let written = writes.recv().await.unwrap();
            buf.extend(written.decoded().unwrap());
            if buf.last() == Some(&0) {
                buf.pop();
                return serde_json::from_slice(&buf).unwrap();
            }
        }
    }

    fn respond(link: &MemoryLink, rx: &Characteristic, body: &str) {
        let mut framed = body.as_bytes().to_vec();
        framed.push(0);
        assert!(link.notify(rx, encode_fragment(&framed)));
    }

    #[tokio::test(start_paused = true)]
    async fn command_resolves_with_response_field() {
        let link = MemoryLink::new();
        let mut writes = link.observe_writes();
        let session = Session::open(link.clone(), config()).unwrap();
        let rx = session.config().rx();

        let peripheral = tokio::spawn(async move {
            let command = next_command(&mut writes).await;
            assert_eq!(command["cmd"], "ping");
            respond(&link, &rx, r#"{"event":"event1","response":{"pong":true}}"#);
        });

        let response = session.send_command("ping", json!({})).await.unwrap();
        assert_eq!(response, json!({"pong": true}));
        assert_eq!(session.gate_state(), GateState::Idle);
        assert!(session.pending_keys().is_empty());
        peripheral.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_command_releases_gate() {
        let link = MemoryLink::new();
        let session = Session::open(link, config()).unwrap();

        {
            let pending = session.send_command("slow", json!({}));
            let result = tokio::time::timeout(Duration::from_millis(100), pending).await;
            assert!(result.is_err());
        }

        assert_eq!(session.gate_state(), GateState::Idle);
        assert!(session.pending_keys().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_writes_lone_sentinel() {
        let link = MemoryLink::new();
        let session = Session::open(link.clone(), config()).unwrap();

        session.heartbeat().await.unwrap();
        let writes = link.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].decoded().unwrap(), vec![0u8]);
        assert_eq!(session.gate_state(), GateState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn notify_received_feeds_reassembler() {
        let link = MemoryLink::new();
        let session = Session::open(link, config()).unwrap();
        let mut events = session.take_events().unwrap();
        assert!(session.take_events().is_none());

        session.notify_received(br#"{"event":"but"#);
        session.notify_received(b"ton\",\"response\":{\"pressed\":1}}\0");

        let event = events.recv().await.unwrap();
        assert_eq!(event.event.as_str(), "button");
        assert_eq!(event.response, json!({"pressed": 1}));
    }

    #[tokio::test(start_paused = true)]
    async fn read_state_extracts_section() {
        let link = MemoryLink::new();
        let mut writes = link.observe_writes();
        let session = Session::open(link.clone(), config()).unwrap();
        let rx = session.config().rx();

        tokio::spawn(async move {
            let command = next_command(&mut writes).await;
            assert_eq!(command["cmd"], GET_CONFIG);
            respond(
                &link,
                &rx,
                r#"{"event":"event1","response":{"wifi":{"ssid":"lab"},"tts":{}}}"#,
            );
        });

        let network = session.read_state(StateCategory::Network).await.unwrap();
        assert_eq!(network, json!({"ssid": "lab"}));
    }

    #[tokio::test(start_paused = true)]
    async fn close_fails_waiter_and_blocks_sends() {
        let link = MemoryLink::new();
        let session = Arc::new(Session::open(link, config()).unwrap());

        let waiting = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.send_command("get_config", json!({})).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close();

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(SessionError::Closed)));
        assert!(!session.is_connected());
        assert!(matches!(
            session.send_command("ping", json!({})).await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_closes_session() {
        let link = MemoryLink::new();
        let session = Session::open(link.clone(), config()).unwrap();
        let mut events = session.take_events().unwrap();
        link.disconnect();

        assert!(events.recv().await.is_none());
        assert!(!session.is_connected());
        assert!(matches!(
            session.send_command("ping", json!({})).await,
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn open_rejects_disconnected_link() {
        let link = MemoryLink::new();
        link.disconnect();
        assert!(matches!(
            Session::open(link, config()),
            Err(SessionError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn nul_in_arguments_never_reaches_the_wire() {
        let link = MemoryLink::new();
        let session = Session::open(link.clone(), config()).unwrap();

        let result = session.send_command("say", json!({"text": "a\u{0}b"})).await;
        assert!(matches!(result, Err(SessionError::Timeout(_))));

        let wire: Vec<u8> = link
            .writes()
            .iter()
            .flat_map(|written| written.decoded().unwrap())
            .collect();
        assert_eq!(wire.iter().filter(|&&b| b == 0).count(), 1);
        assert_eq!(wire.last(), Some(&0));
        assert_eq!(session.gate_state(), GateState::Idle);
    }
}
