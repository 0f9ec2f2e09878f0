//! Auto-reconnecting event channel to the hub
//!
//! A single background task owns the transport. Senders enqueue encoded
//! frames for it and the receiver drains the frames it reads, so there is one
//! logical connection and at most one reconnect in flight.
//!
//! On a connection reset the task closes the broken transport, waits the
//! fixed backoff, reconnects and replays the auth handshake. The receiver
//! then yields `ChannelEvent::Reconnected`; it never sees the reset itself.
//! Only transport failures are retried: a rejected token or a broken
//! handshake ends the task with an error.

use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::messages::{decode, Inbound, Outbound};
use super::transport::{Connector, Transport};
use crate::error::{Error, Result};

/// Connection settings
#[derive(Clone)]
pub struct ChannelOptions {
    pub access_token: String,
    pub reconnect_delay: Duration,
}

impl std::fmt::Debug for ChannelOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelOptions")
            .field("access_token", &"<redacted>")
            .field("reconnect_delay", &self.reconnect_delay)
            .finish()
    }
}

/// What `HubReceiver::receive` yields
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A raw text frame from the hub
    Frame(String),
    /// The connection was re-established and re-authenticated; subscriptions
    /// and in-flight requests from before the drop are gone
    Reconnected,
}

/// Entry point: `EventChannel::connect`
pub struct EventChannel;

impl EventChannel {
    /// Connect and authenticate, then start the connection task
    ///
    /// Transport failures are retried with the reconnect delay until the hub
    /// answers. A rejected token (`AuthRejected`) or a handshake the hub gets
    /// wrong (`Protocol`) is returned without retrying.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        options: ChannelOptions,
    ) -> Result<(HubSender, HubReceiver)> {
        info!("🏠 Connecting to Home Assistant at {}", connector.endpoint());

        let transport = loop {
            match connect_and_authenticate(connector.as_ref(), &options.access_token).await {
                Ok(transport) => break transport,
                Err(Error::ConnectionDropped(reason)) => {
                    warn!(
                        "Connection to hub failed ({}), retrying in {:?}",
                        reason, options.reconnect_delay
                    );
                    tokio::time::sleep(options.reconnect_delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_connection(
            connector,
            options,
            transport,
            outbound_rx,
            inbound_tx,
            shutdown_rx,
        ));

        let sender = HubSender {
            outbound: outbound_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let receiver = HubReceiver {
            inbound: inbound_rx,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        };

        Ok((sender, receiver))
    }
}

/// Sending half; clones share the correlation counter
#[derive(Clone)]
pub struct HubSender {
    outbound: mpsc::UnboundedSender<String>,
    next_id: Arc<AtomicU64>,
}

impl HubSender {
    /// Next correlation id (1, 2, 3, ... per channel)
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Queue a frame for the connection task
    pub fn send(&self, message: &Outbound) -> Result<()> {
        let text = message.to_json()?;
        trace!(id = ?message.id(), "Queueing frame");
        self.outbound.send(text).map_err(|_| Error::ChannelClosed)
    }

    /// Request every entity state; returns the correlation id
    pub fn get_states(&self) -> Result<u64> {
        let id = self.next_id();
        self.send(&Outbound::GetStates { id })?;
        Ok(id)
    }

    /// Subscribe to one event type; returns the subscription id
    pub fn subscribe_events(&self, event_type: &str) -> Result<u64> {
        let id = self.next_id();
        self.send(&Outbound::SubscribeEvents {
            id,
            event_type: event_type.to_string(),
        })?;
        Ok(id)
    }

    /// Close a subscription (or the one-shot `get_states` request)
    pub fn unsubscribe_events(&self, subscription: u64) -> Result<u64> {
        let id = self.next_id();
        self.send(&Outbound::UnsubscribeEvents { id, subscription })?;
        Ok(id)
    }

    pub fn call_service(&self, domain: &str, service: &str, service_data: Map<String, Value>) -> Result<u64> {
        let id = self.next_id();
        self.send(&Outbound::CallService {
            id,
            domain: domain.to_string(),
            service: service.to_string(),
            service_data,
        })?;
        Ok(id)
    }
}

/// Receiving half; owns the connection task
pub struct HubReceiver {
    inbound: mpsc::UnboundedReceiver<Result<ChannelEvent>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HubReceiver {
    /// Wait for the next frame or reconnect notice
    ///
    /// Errors are fatal: `AuthRejected` or `Protocol` from a reconnect
    /// handshake, or `ChannelClosed`.
    pub async fn receive(&mut self) -> Result<ChannelEvent> {
        match self.inbound.recv().await {
            Some(event) => event,
            None => Err(Error::ChannelClosed),
        }
    }

    /// Stop the connection task and close the transport
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Hub connection task ended abnormally: {}", e);
            }
        }
        info!("🔌 Hub connection closed");
    }
}

/// Open a transport and run the auth handshake
async fn connect_and_authenticate(connector: &dyn Connector, token: &str) -> Result<Box<dyn Transport>> {
    let mut transport = connector.connect().await?;

    let auth = Outbound::Auth {
        access_token: token.to_string(),
    };
    transport.send_text(auth.to_json()?).await?;

    loop {
        let text = transport.recv_text().await?;
        let frame = match decode(&text) {
            Ok(frame) => frame,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };
        match frame {
            Inbound::AuthRequired { ha_version } => {
                debug!("Hub requests authentication (version {:?})", ha_version);
            }
            Inbound::AuthOk { ha_version } => {
                info!(
                    "✅ Authenticated with Home Assistant{}",
                    ha_version.map(|v| format!(" {}", v)).unwrap_or_default()
                );
                return Ok(transport);
            }
            Inbound::AuthInvalid { message } => {
                transport.close().await;
                return Err(Error::AuthRejected(message));
            }
            other => {
                transport.close().await;
                return Err(Error::Protocol(format!("unexpected frame during auth: {:?}", other)));
            }
        }
    }
}

enum PumpExit {
    Shutdown,
    CallerGone,
    Dropped(String),
}

/// Connection task: pump frames, reconnect on reset
async fn run_connection(
    connector: Arc<dyn Connector>,
    options: ChannelOptions,
    mut transport: Box<dyn Transport>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<Result<ChannelEvent>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut unsent: Option<String> = None;
    let mut reconnects: u64 = 0;

    loop {
        let exit = pump(
            transport.as_mut(),
            &mut unsent,
            &mut outbound_rx,
            &inbound_tx,
            &mut shutdown_rx,
        )
        .await;

        match exit {
            PumpExit::Shutdown | PumpExit::CallerGone => {
                transport.close().await;
                debug!("Hub connection task stopping");
                return;
            }
            PumpExit::Dropped(reason) => {
                warn!(
                    "🔌 Connection to hub dropped ({}), reconnecting in {:?}",
                    reason, options.reconnect_delay
                );
                transport.close().await;

                match reconnect(connector.as_ref(), &options, &mut shutdown_rx).await {
                    Ok(Some(fresh)) => {
                        transport = fresh;
                        reconnects += 1;
                        info!(reconnects, "✅ Reconnected to hub");
                        if inbound_tx.send(Ok(ChannelEvent::Reconnected)).is_err() {
                            transport.close().await;
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        error!("Giving up on hub connection: {}", e);
                        let _ = inbound_tx.send(Err(e));
                        return;
                    }
                }
            }
        }
    }
}

/// Move frames both ways until the transport fails or we are told to stop
async fn pump(
    transport: &mut dyn Transport,
    unsent: &mut Option<String>,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    inbound_tx: &mpsc::UnboundedSender<Result<ChannelEvent>>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> PumpExit {
    // A frame whose write failed before the last reset goes out first
    if let Some(text) = unsent.take() {
        if let Err(e) = transport.send_text(text.clone()).await {
            *unsent = Some(text);
            return PumpExit::Dropped(e.to_string());
        }
    }

    let mut senders_alive = true;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return PumpExit::Shutdown,

            frame = transport.recv_text() => match frame {
                Ok(text) => {
                    trace!("⬇️  {}", text);
                    if inbound_tx.send(Ok(ChannelEvent::Frame(text))).is_err() {
                        return PumpExit::CallerGone;
                    }
                }
                Err(e) => return PumpExit::Dropped(e.to_string()),
            },

            outbound = outbound_rx.recv(), if senders_alive => match outbound {
                Some(text) => {
                    trace!("⬆️  {}", text);
                    if let Err(e) = transport.send_text(text.clone()).await {
                        *unsent = Some(text);
                        return PumpExit::Dropped(e.to_string());
                    }
                }
                None => senders_alive = false,
            },
        }
    }
}

/// Backoff, reconnect and re-authenticate until it works
///
/// Returns `Ok(None)` on shutdown. Only transport failures are retried; a
/// rejected token or a broken handshake is returned as the error.
async fn reconnect(
    connector: &dyn Connector,
    options: &ChannelOptions,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> Result<Option<Box<dyn Transport>>> {
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => return Ok(None),
            _ = tokio::time::sleep(options.reconnect_delay) => {}
        }

        attempt += 1;
        debug!(attempt, "Reconnecting to hub");

        match connect_and_authenticate(connector, &options.access_token).await {
            Ok(transport) => return Ok(Some(transport)),
            Err(Error::ConnectionDropped(reason)) => warn!(
                attempt,
                "Reconnect failed ({}), retrying in {:?}", reason, options.reconnect_delay
            ),
            Err(e) => return Err(e),
        }
    }
}
