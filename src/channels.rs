use crate::prelude::*;

use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelData {
    Connected(SocketAddr),  // connection state, for whoever cares
    Disconnect(SocketAddr),
    Reading(Reading),
    Shutdown,
}
pub type Sender = broadcast::Sender<ChannelData>;
pub type Receiver = broadcast::Receiver<ChannelData>;

#[derive(Debug, Clone)]
pub struct Channels {
    pub from_inverter: Sender,
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}

impl Channels {
    pub fn new() -> Self {
        Self {
            from_inverter: Self::channel(),
        }
    }

    fn channel<T: Clone>() -> broadcast::Sender<T> {
        broadcast::channel(2048).0
    }
}
