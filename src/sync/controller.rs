//! SyncController - hub events → key images, key presses → service calls
//!
//! Two activities share the store and the deck once the snapshot is loaded:
//! the receive loop (state changes, acknowledgements, reconnects) and the
//! press handler task. Every key render holds that key's lock from resolve to
//! push, so the last resolution of a key is always the last frame it shows.

use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::pending::{PendingRequests, RequestKind};
use crate::binding::BindingResolver;
use crate::config::ButtonSpec;
use crate::deck::{Deck, PressEvent};
use crate::error::{Error, Result};
use crate::hub::{
    decode, ChannelEvent, ChannelOptions, Connector, EventChannel, HubEvent, HubReceiver, HubSender, Inbound,
    Outbound, STATE_CHANGED,
};
use crate::render::KeyRenderer;
use crate::state::{EntityState, StateStore};

/// Controller lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    SnapshotLoading,
    Ready,
}

#[derive(Debug, Default)]
struct KeyState {
    pressed: bool,
}

struct Inner {
    /// One per key, padded with blank buttons
    buttons: Vec<ButtonSpec>,
    keys: Vec<Mutex<KeyState>>,
    store: StateStore,
    resolver: BindingResolver,
    renderer: Arc<dyn KeyRenderer>,
    deck: Arc<dyn Deck>,
    pending: PendingRequests,
    phase: Mutex<Phase>,
    brightness: u8,
}

/// Top-level sync loop; cheap to clone
#[derive(Clone)]
pub struct SyncController {
    inner: Arc<Inner>,
}

impl SyncController {
    /// Bind buttons to deck keys in order
    ///
    /// More buttons than keys is an error; missing buttons are blank.
    pub fn new(
        mut buttons: Vec<ButtonSpec>,
        deck: Arc<dyn Deck>,
        renderer: Arc<dyn KeyRenderer>,
        resolver: BindingResolver,
        brightness: u8,
    ) -> Result<Self> {
        let key_count = deck.key_count();
        if buttons.len() > key_count {
            return Err(Error::Device(format!(
                "{} buttons configured but the deck has only {} keys",
                buttons.len(),
                key_count
            )));
        }
        buttons.resize_with(key_count, ButtonSpec::default);

        let keys = (0..key_count).map(|_| Mutex::new(KeyState::default())).collect();

        Ok(Self {
            inner: Arc::new(Inner {
                buttons,
                keys,
                store: StateStore::new(),
                resolver,
                renderer,
                deck,
                pending: PendingRequests::new(),
                phase: Mutex::new(Phase::Connecting),
                brightness,
            }),
        })
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.lock()
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    /// Button per key, including padding
    pub fn buttons(&self) -> &[ButtonSpec] {
        &self.inner.buttons
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> &PendingRequests {
        &self.inner.pending
    }

    /// Keys whose button is bound to `entity_id`
    pub fn keys_bound_to(&self, entity_id: &str) -> Vec<usize> {
        self.inner.keys_bound_to(entity_id)
    }

    /// Re-render every key with its current pressed state
    pub fn render_all(&self) -> Result<()> {
        self.inner.render_all()
    }

    /// Connect, load the snapshot, then keep keys in sync until `shutdown`
    /// completes or a fatal error occurs. The deck is released either way.
    pub async fn run<F>(&self, connector: Arc<dyn Connector>, options: ChannelOptions, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        self.inner.set_phase(Phase::Connecting);
        let connected = tokio::select! {
            _ = &mut shutdown => None,
            result = EventChannel::connect(connector, options) => Some(result),
        };

        let (sender, mut receiver) = match connected {
            Some(Ok(channel)) => channel,
            Some(Err(e)) => {
                let _ = self.inner.deck.close();
                return Err(e);
            }
            None => {
                info!("🛑 Shutdown before the hub connection was established");
                return self.inner.deck.close();
            }
        };

        let result = tokio::select! {
            _ = &mut shutdown => {
                info!("🛑 Shutdown requested");
                Ok(())
            }
            result = self.sync(&sender, &mut receiver) => result,
        };

        receiver.close().await;
        let released = self.inner.deck.close();
        result.and(released)
    }

    async fn sync(&self, sender: &HubSender, receiver: &mut HubReceiver) -> Result<()> {
        self.inner.set_phase(Phase::SnapshotLoading);
        let count = self.load_snapshot(sender, receiver).await?;
        info!("📥 Loaded {} entities from the hub", count);

        self.inner.set_phase(Phase::Ready);
        self.inner.render_all()?;

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let _presses = self.spawn_press_handler(sender.clone(), fatal_tx);

        self.inner.deck.set_brightness(self.inner.brightness)?;
        self.inner.track(sender, RequestKind::Subscribe, |id| Outbound::SubscribeEvents {
            id,
            event_type: STATE_CHANGED.to_string(),
        })?;
        info!("✅ Ready: {} keys in sync", self.inner.keys.len());

        loop {
            tokio::select! {
                Some(e) = fatal_rx.recv() => return Err(e),
                event = receiver.receive() => match event? {
                    ChannelEvent::Frame(text) => self.inner.handle_frame(sender, &text)?,
                    ChannelEvent::Reconnected => self.inner.resync(sender)?,
                },
            }
        }
    }

    /// Issue `get_states` and wait for its reply; malformed frames are fatal here
    async fn load_snapshot(&self, sender: &HubSender, receiver: &mut HubReceiver) -> Result<usize> {
        let mut request = self.inner.track(sender, RequestKind::Snapshot, |id| Outbound::GetStates { id })?;

        loop {
            let text = match receiver.receive().await? {
                ChannelEvent::Frame(text) => text,
                ChannelEvent::Reconnected => {
                    self.inner.pending.discard_stream_requests();
                    request = self.inner.track(sender, RequestKind::Snapshot, |id| Outbound::GetStates { id })?;
                    continue;
                }
            };

            let Inbound::Result { id, success, result, error } = decode(&text)? else {
                trace!("Ignoring frame while loading snapshot");
                continue;
            };
            if id != request {
                debug!(id, "Ignoring result while loading snapshot");
                continue;
            }

            self.inner.pending.take(id);
            if !success {
                return Err(Error::Protocol(format!(
                    "get_states failed: {}",
                    error.unwrap_or_else(|| "no reason given".to_string())
                )));
            }

            let states = StateStore::states_from_result(&result)?;
            let count = states.len();
            self.inner.store.replace_all(states);
            self.inner.track(sender, RequestKind::Unsubscribe, |id| Outbound::UnsubscribeEvents {
                id,
                subscription: request,
            })?;
            return Ok(count);
        }
    }

    fn spawn_press_handler(&self, sender: HubSender, fatal_tx: mpsc::UnboundedSender<Error>) -> Option<PressHandler> {
        let Some(mut presses) = self.inner.deck.take_press_events() else {
            warn!("Deck press events already taken, presses are ignored");
            return None;
        };

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = presses.recv().await {
                if let Err(e) = inner.handle_press(&sender, event) {
                    let _ = fatal_tx.send(e);
                    break;
                }
            }
            debug!("Press handler stopped");
        });

        Some(PressHandler(task))
    }

    /// Render the press or release of one key and fire its action
    pub fn handle_press(&self, sender: &HubSender, event: PressEvent) -> Result<()> {
        self.inner.handle_press(sender, event)
    }
}

/// Aborts the press task when the loop exits
struct PressHandler(JoinHandle<()>);

impl Drop for PressHandler {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Inner {
    fn set_phase(&self, phase: Phase) {
        let mut current = self.phase.lock();
        if *current != phase {
            debug!("Phase {:?} → {:?}", *current, phase);
            *current = phase;
        }
    }

    /// Allocate an id, remember it, then send
    fn track(&self, sender: &HubSender, kind: RequestKind, message: impl FnOnce(u64) -> Outbound) -> Result<u64> {
        let id = sender.next_id();
        self.pending.insert(id, kind);
        if let Err(e) = sender.send(&message(id)) {
            self.pending.take(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Resolve → render → push under the key's lock
    fn render_key(&self, key: usize, pressed: Option<bool>) -> Result<()> {
        let (Some(slot), Some(button)) = (self.keys.get(key), self.buttons.get(key)) else {
            return Err(Error::Device(format!("key {} out of range", key)));
        };

        let mut state = slot.lock();
        if let Some(pressed) = pressed {
            state.pressed = pressed;
        }

        let params = self.resolver.resolve_in(button, &self.store, state.pressed);
        let image = self.renderer.render(&params, self.deck.key_size())?;
        self.deck.set_key_image(key, &image)?;

        trace!(key, text = %params.text, color = %params.text_color, "Key rendered");
        Ok(())
    }

    fn render_all(&self) -> Result<()> {
        (0..self.keys.len()).try_for_each(|key| self.render_key(key, None))
    }

    fn keys_bound_to(&self, entity_id: &str) -> Vec<usize> {
        self.buttons
            .iter()
            .enumerate()
            .filter(|(_, button)| button.entity_id.as_deref() == Some(entity_id))
            .map(|(key, _)| key)
            .collect()
    }

    /// Dispatch one frame received while Ready
    fn handle_frame(&self, sender: &HubSender, text: &str) -> Result<()> {
        let frame = match decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Skipping malformed frame: {}", e);
                return Ok(());
            }
        };

        match frame {
            Inbound::Event {
                event: HubEvent::StateChanged { entity_id, new_state },
                ..
            } => self.apply_state_change(&entity_id, new_state),
            Inbound::Event {
                event: HubEvent::Other { event_type },
                ..
            } => {
                trace!(event_type = %event_type, "Ignoring event");
                Ok(())
            }
            Inbound::Result {
                id,
                success,
                result,
                error,
            } => self.handle_result(sender, id, success, result, error),
            Inbound::AuthRequired { .. } | Inbound::AuthOk { .. } | Inbound::AuthInvalid { .. } => {
                debug!("Ignoring auth frame outside the handshake");
                Ok(())
            }
            Inbound::Other { kind } => {
                trace!(kind = %kind, "Ignoring frame");
                Ok(())
            }
        }
    }

    fn apply_state_change(&self, entity_id: &str, new_state: Option<EntityState>) -> Result<()> {
        match new_state {
            Some(state) => {
                debug!(entity_id, state = %state.state, "State changed");
                self.store.upsert(state);
            }
            None => {
                debug!(entity_id, "Entity removed");
                self.store.remove(entity_id);
            }
        }

        for key in self.keys_bound_to(entity_id) {
            self.render_key(key, None)?;
        }
        Ok(())
    }

    fn handle_result(
        &self,
        sender: &HubSender,
        id: u64,
        success: bool,
        result: Value,
        error: Option<String>,
    ) -> Result<()> {
        let error = error.unwrap_or_else(|| "no reason given".to_string());

        match self.pending.take(id) {
            None => debug!(id, "Unsolicited or duplicate result"),
            Some(RequestKind::CallService { domain, service }) if !success => {
                warn!(id, "Service {}.{} failed: {}", domain, service, error);
            }
            Some(RequestKind::CallService { domain, service }) => {
                debug!(id, "Service {}.{} acknowledged", domain, service);
            }
            Some(RequestKind::Subscribe) if !success => {
                warn!(id, "Subscription to {} rejected: {}", STATE_CHANGED, error);
            }
            Some(RequestKind::Subscribe) => info!(id, "📡 Subscribed to {}", STATE_CHANGED),
            Some(RequestKind::Resync) if !success => {
                warn!(id, "Resync get_states failed: {}", error);
            }
            Some(RequestKind::Resync) => match StateStore::states_from_result(&result) {
                Ok(states) => {
                    info!(id, "🔄 Resynced {} entities after reconnect", states.len());
                    self.store.replace_all(states);
                    self.track(sender, RequestKind::Unsubscribe, |next| Outbound::UnsubscribeEvents {
                        id: next,
                        subscription: id,
                    })?;
                    self.render_all()?;
                }
                Err(e) => warn!(id, "Skipping malformed resync snapshot: {}", e),
            },
            Some(kind @ (RequestKind::Snapshot | RequestKind::Unsubscribe)) => {
                debug!(id, success, "{:?} acknowledged", kind);
            }
        }
        Ok(())
    }

    /// Re-issue snapshot and subscription after the hub connection came back
    fn resync(&self, sender: &HubSender) -> Result<()> {
        let dropped = self.pending.discard_stream_requests();
        if dropped > 0 {
            debug!(dropped, "Discarded stream requests from before the reconnect");
        }
        self.track(sender, RequestKind::Resync, |id| Outbound::GetStates { id })?;
        self.track(sender, RequestKind::Subscribe, |id| Outbound::SubscribeEvents {
            id,
            event_type: STATE_CHANGED.to_string(),
        })?;
        Ok(())
    }

    fn handle_press(&self, sender: &HubSender, event: PressEvent) -> Result<()> {
        let Some(button) = self.buttons.get(event.key) else {
            warn!(key = event.key, "Press on unknown key");
            return Ok(());
        };

        self.render_key(event.key, Some(event.pressed))?;

        if !event.pressed {
            return Ok(());
        }

        if let Some((domain, service)) = button.action() {
            let service_data = button.action_data();
            let id = self.track(
                sender,
                RequestKind::CallService {
                    domain: domain.to_string(),
                    service: service.to_string(),
                },
                |id| Outbound::CallService {
                    id,
                    domain: domain.to_string(),
                    service: service.to_string(),
                    service_data,
                },
            )?;
            info!(key = event.key, id, "▶️  {}.{}", domain, service);
        }
        Ok(())
    }
}
