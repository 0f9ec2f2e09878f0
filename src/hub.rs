//! Home Assistant hub connection

mod channel;
mod messages;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{ChannelEvent, ChannelOptions, EventChannel, HubReceiver, HubSender};
pub use messages::{decode, HubEvent, Inbound, Outbound, STATE_CHANGED};
pub use transport::{Connector, Transport, WsConnector};
