use std::net::SocketAddr;

use crate::message::PlayerInputMessage;
use crate::net::{DisconnectReason, NetworkId};

/// What happened on a [`ServerSession`](super::ServerSession) since the last drain.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    PlayerConnected {
        player: NetworkId,
        addr: SocketAddr,
        name: String,
    },
    PlayerDisconnected {
        player: NetworkId,
        name: String,
        reason: DisconnectReason,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: String,
    },
    /// A fresh input frame. Stale and duplicate frames never show up here.
    PlayerInput {
        player: NetworkId,
        input: PlayerInputMessage,
    },
    PlayerRenamed {
        player: NetworkId,
        old_name: String,
        new_name: String,
    },
    Chat {
        player: NetworkId,
        text: String,
    },
}

/// What happened on a [`ClientSession`](super::ClientSession) since the last drain.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected {
        player: NetworkId,
    },
    ConnectionDenied {
        reason: String,
    },
    /// No answer from the server within the connect timeout.
    ConnectFailed,
    /// The join snapshot has been fully applied.
    Synced,
    Disconnected {
        reason: DisconnectReason,
    },
    PlayerJoined {
        player: NetworkId,
        name: String,
    },
    PlayerLeft {
        player: NetworkId,
        name: String,
        reason: DisconnectReason,
    },
    PlayerRenamed {
        player: NetworkId,
        name: String,
    },
    EntityAdded {
        entity: NetworkId,
        parent: NetworkId,
    },
    EntityRemoved {
        entity: NetworkId,
    },
    Chat {
        player: NetworkId,
        text: String,
    },
    Kill {
        killer: NetworkId,
        victim: NetworkId,
    },
}
