use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use glam::{Quat, Vec3};

use crate::message::{
    ClientSyncedMessage, EntityAddMessage, EntityRemoveMessage, Message, MessageHandler,
    PlayerChatMessage, PlayerInputMessage, PlayerJoinMessage, PlayerKillMessage,
    PlayerLeaveMessage, PlayerNameMessage, PlayerStatsMessage, UpdateAvatarMessage,
    UpdateRayMessage, UpdateTransformMessage,
};
use crate::net::protocol::{CHAT_MESSAGE_LENGTH, PLAYER_NAME_LENGTH, truncate_utf8};
use crate::net::{
    Connection, ConnectionConfig, ConnectionError, DisconnectReason, INPUT_UPDATE_FREQUENCY,
    NetworkId, NetworkStats, PROTOCOL_VERSION, Packet,
};

use super::events::ClientEvent;

#[derive(Debug, Clone)]
pub struct ClientSessionConfig {
    pub player_name: String,
    pub connect_retry_interval: Duration,
    pub connect_timeout: Duration,
    /// Input messages per second.
    pub input_frequency: u32,
    pub connection: ConnectionConfig,
}

impl Default for ClientSessionConfig {
    fn default() -> Self {
        Self {
            player_name: "player".to_string(),
            connect_retry_interval: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(10),
            input_frequency: INPUT_UPDATE_FREQUENCY,
            connection: ConnectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplicatedEntity {
    pub id: NetworkId,
    pub entity_type: u8,
    pub owner: NetworkId,
    pub parent: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
    pub velocity: Vec3,
    pub aim: Vec3,
    pub weapon: u8,
    pub firing: bool,
    pub ray: Option<(Vec3, Vec3)>,
}

impl From<EntityAddMessage> for ReplicatedEntity {
    fn from(message: EntityAddMessage) -> Self {
        Self {
            id: message.entity,
            entity_type: message.entity_type,
            owner: message.owner,
            parent: message.parent,
            position: message.position,
            rotation: message.rotation,
            velocity: Vec3::ZERO,
            aim: Vec3::ZERO,
            weapon: 0,
            firing: false,
            ray: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatedPlayer {
    pub id: NetworkId,
    pub name: String,
    pub health: u8,
    pub power_up: u8,
    pub kills: u16,
    pub deaths: u16,
    pub ping: u16,
}

impl ReplicatedPlayer {
    fn new(id: NetworkId, name: String) -> Self {
        Self {
            id,
            name,
            health: 0,
            power_up: 0,
            kills: 0,
            deaths: 0,
            ping: 0,
        }
    }
}

/// Client-side replica of the server's players and entities.
///
/// Updates for entities the replica has not been told about yet are dropped and
/// counted; the unreliable channel may overtake the reliable one.
#[derive(Debug, Default)]
pub struct ClientWorld {
    local_player: Option<NetworkId>,
    players: BTreeMap<NetworkId, ReplicatedPlayer>,
    entities: BTreeMap<NetworkId, ReplicatedEntity>,
    synced: bool,
    ignored_updates: u64,
    events: VecDeque<ClientEvent>,
}

impl ClientWorld {
    pub fn local_player(&self) -> Option<NetworkId> {
        self.local_player
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn players(&self) -> impl Iterator<Item = &ReplicatedPlayer> {
        self.players.values()
    }

    pub fn player(&self, id: NetworkId) -> Option<&ReplicatedPlayer> {
        self.players.get(&id)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ReplicatedEntity> {
        self.entities.values()
    }

    pub fn entity(&self, id: NetworkId) -> Option<&ReplicatedEntity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Updates dropped because their entity was unknown.
    pub fn ignored_updates(&self) -> u64 {
        self.ignored_updates
    }

    /// Forgets everything from a previous connection.
    fn reset(&mut self) {
        self.local_player = None;
        self.players.clear();
        self.entities.clear();
        self.synced = false;
        self.ignored_updates = 0;
        self.events.clear();
    }

    fn join_as(&mut self, player: NetworkId, name: &str) {
        self.local_player = Some(player);
        self.players
            .insert(player, ReplicatedPlayer::new(player, name.to_string()));
    }

    fn entity_for_update(&mut self, id: NetworkId, kind: &str) -> Option<&mut ReplicatedEntity> {
        let entity = self.entities.get_mut(&id);
        if entity.is_none() {
            log::trace!("ignoring {} update for unknown entity {}", kind, id);
            self.ignored_updates += 1;
        }
        entity
    }
}

impl MessageHandler for ClientWorld {
    fn on_entity_add(&mut self, message: EntityAddMessage, _sequence: u16) {
        if message.parent.is_some() && !self.entities.contains_key(&message.parent) {
            log::warn!(
                "entity {} arrived before its parent {}",
                message.entity,
                message.parent
            );
        }
        let (entity, parent) = (message.entity, message.parent);
        self.entities.insert(entity, message.into());
        self.events
            .push_back(ClientEvent::EntityAdded { entity, parent });
    }

    fn on_entity_remove(&mut self, message: EntityRemoveMessage, _sequence: u16) {
        if self.entities.remove(&message.entity).is_some() {
            self.events.push_back(ClientEvent::EntityRemoved {
                entity: message.entity,
            });
        }
    }

    fn on_player_join(&mut self, message: PlayerJoinMessage, _sequence: u16) {
        self.players.insert(
            message.player,
            ReplicatedPlayer::new(message.player, message.name.clone()),
        );
        self.events.push_back(ClientEvent::PlayerJoined {
            player: message.player,
            name: message.name,
        });
    }

    fn on_player_leave(&mut self, message: PlayerLeaveMessage, _sequence: u16) {
        let name = self
            .players
            .remove(&message.player)
            .map(|player| player.name)
            .unwrap_or_default();
        self.events.push_back(ClientEvent::PlayerLeft {
            player: message.player,
            name,
            reason: message.reason,
        });
    }

    fn on_player_name(&mut self, message: PlayerNameMessage, _sequence: u16) {
        if let Some(player) = self.players.get_mut(&message.player) {
            player.name.clone_from(&message.name);
            self.events.push_back(ClientEvent::PlayerRenamed {
                player: message.player,
                name: message.name,
            });
        }
    }

    fn on_player_stats(&mut self, message: PlayerStatsMessage, _sequence: u16) {
        match self.players.get_mut(&message.player) {
            Some(player) => {
                player.health = message.health;
                player.power_up = message.power_up;
                player.kills = message.kills;
                player.deaths = message.deaths;
                player.ping = message.ping;
            }
            None => self.ignored_updates += 1,
        }
    }

    fn on_player_kill(&mut self, message: PlayerKillMessage, _sequence: u16) {
        self.events.push_back(ClientEvent::Kill {
            killer: message.killer,
            victim: message.victim,
        });
    }

    fn on_player_chat(&mut self, message: PlayerChatMessage, _sequence: u16) {
        self.events.push_back(ClientEvent::Chat {
            player: message.player,
            text: message.text,
        });
    }

    fn on_update_transform(&mut self, message: UpdateTransformMessage, _sequence: u16) {
        if let Some(entity) = self.entity_for_update(message.entity, "transform") {
            entity.position = message.position;
            entity.rotation = message.rotation;
        }
    }

    fn on_update_avatar(&mut self, message: UpdateAvatarMessage, _sequence: u16) {
        if let Some(entity) = self.entity_for_update(message.entity, "avatar") {
            entity.velocity = message.velocity;
            entity.aim = message.aim;
            entity.weapon = message.weapon;
            entity.firing = message.firing;
        }
    }

    fn on_update_ray(&mut self, message: UpdateRayMessage, _sequence: u16) {
        if let Some(entity) = self.entity_for_update(message.entity, "ray") {
            entity.ray = Some((message.start, message.end));
        }
    }

    fn on_client_synced(&mut self, _message: ClientSyncedMessage, _sequence: u16) {
        if !self.synced {
            self.synced = true;
            log::info!(
                "synced: {} players, {} entities",
                self.players.len(),
                self.entities.len()
            );
            self.events.push_back(ClientEvent::Synced);
        }
    }
}

/// Client side of the protocol: handshake, one server connection and the replica.
pub struct ClientSession {
    config: ClientSessionConfig,
    state: ClientState,
    server: Option<SocketAddr>,
    connection: Option<Connection>,
    connect_started: Option<Instant>,
    last_request: Option<Instant>,
    control: Vec<Vec<u8>>,
    world: ClientWorld,
    events: VecDeque<ClientEvent>,
}

impl ClientSession {
    pub fn new(config: ClientSessionConfig) -> Self {
        Self {
            config,
            state: ClientState::Idle,
            server: None,
            connection: None,
            connect_started: None,
            last_request: None,
            control: Vec::new(),
            world: ClientWorld::default(),
            events: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &ClientSessionConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn server(&self) -> Option<SocketAddr> {
        self.server
    }

    pub fn player_id(&self) -> Option<NetworkId> {
        self.world.local_player()
    }

    pub fn world(&self) -> &ClientWorld {
        &self.world
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn stats(&self) -> NetworkStats {
        self.connection
            .as_ref()
            .map(Connection::stats)
            .unwrap_or_default()
    }

    pub fn take_events(&mut self) -> Vec<ClientEvent> {
        self.events.extend(self.world.events.drain(..));
        self.events.drain(..).collect()
    }

    /// Starts the handshake with `server`. Any previous session state is dropped.
    pub fn connect(&mut self, server: SocketAddr, now: Instant) {
        log::info!("connecting to {} as '{}'", server, self.config.player_name);
        self.server = Some(server);
        self.state = ClientState::Connecting;
        self.connection = None;
        self.connect_started = Some(now);
        self.last_request = None;
        self.control.clear();
        self.world.reset();
    }

    pub fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) {
        if self.server != Some(from) {
            log::trace!("ignoring datagram from {}", from);
            return;
        }

        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("dropping datagram from server: {}", e);
                return;
            }
        };

        match packet {
            Packet::ConnectAccept { player_id } => self.on_accept(player_id, from, now),
            Packet::ConnectDeny { reason } => {
                if self.state == ClientState::Connecting {
                    log::warn!("connection denied: {}", reason);
                    self.state = ClientState::Disconnected;
                    self.events
                        .push_back(ClientEvent::ConnectionDenied { reason });
                }
            }
            Packet::Disconnect { reason } => {
                if let Some(connection) = &mut self.connection {
                    connection.touch(now);
                    connection.close(reason);
                }
            }
            Packet::Data(body) => {
                let Some(connection) = &mut self.connection else {
                    return;
                };
                for (message, sequence) in connection.receive(body, now) {
                    message.dispatch(&mut self.world, sequence);
                }
            }
            other => log::trace!("ignoring {:?} from server", other.kind()),
        }
    }

    fn on_accept(&mut self, player: NetworkId, server: SocketAddr, now: Instant) {
        if self.state != ClientState::Connecting {
            if let Some(connection) = &mut self.connection {
                connection.touch(now);
            }
            return;
        }

        let mut connection = Connection::new(server, self.config.connection.clone(), now);
        connection.mark_connected(now);
        self.connection = Some(connection);
        self.state = ClientState::Connected;
        self.world.join_as(player, &self.config.player_name);

        log::info!("connected to {} as player {}", server, player);
        self.events.push_back(ClientEvent::Connected { player });
    }

    /// Retries the handshake, enforces the connect timeout and runs connection
    /// bookkeeping.
    pub fn update(&mut self, now: Instant) {
        match self.state {
            ClientState::Connecting => self.update_handshake(now),
            ClientState::Connected => {
                let reason = self
                    .connection
                    .as_mut()
                    .and_then(|connection| connection.update(now));
                if let Some(reason) = reason {
                    log::info!("disconnected: {}", reason);
                    self.state = ClientState::Disconnected;
                    self.events.push_back(ClientEvent::Disconnected { reason });
                }
            }
            ClientState::Idle | ClientState::Disconnected => {}
        }
    }

    fn update_handshake(&mut self, now: Instant) {
        let started = *self.connect_started.get_or_insert(now);
        if now.saturating_duration_since(started) >= self.config.connect_timeout {
            log::warn!("no answer from server within {:?}", self.config.connect_timeout);
            self.state = ClientState::Disconnected;
            self.events.push_back(ClientEvent::ConnectFailed);
            return;
        }

        let retry_due = self.last_request.is_none_or(|last| {
            now.saturating_duration_since(last) >= self.config.connect_retry_interval
        });
        if !retry_due {
            return;
        }
        self.last_request = Some(now);

        let request = Packet::ConnectRequest {
            version: PROTOCOL_VERSION,
            name: truncate_utf8(&self.config.player_name, PLAYER_NAME_LENGTH).to_string(),
        };
        match request.encode() {
            Ok(datagram) => self.control.push(datagram),
            Err(e) => log::error!("cannot encode connect request: {}", e),
        }
    }

    /// Datagrams for the server: handshake requests, then connection traffic.
    pub fn flush(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut datagrams = std::mem::take(&mut self.control);
        if let Some(connection) = &mut self.connection {
            datagrams.extend(connection.flush(now));
        }
        datagrams
    }

    pub fn recycle(&mut self, datagram: Vec<u8>) {
        if let Some(connection) = &mut self.connection {
            connection.recycle(datagram);
        }
    }

    pub fn send(&mut self, message: impl Into<Message>) -> Result<(), ConnectionError> {
        match &mut self.connection {
            Some(connection) if self.state == ClientState::Connected => {
                connection.enqueue(&message.into())
            }
            _ => Err(ConnectionError::Closed),
        }
    }

    pub fn send_input(&mut self, input: PlayerInputMessage) -> Result<(), ConnectionError> {
        self.send(input)
    }

    /// Sends chat, cut to the protocol limit.
    pub fn chat(&mut self, text: &str) -> Result<(), ConnectionError> {
        let player = self.player_id().unwrap_or(NetworkId::NONE);
        self.send(PlayerChatMessage::new(
            player,
            truncate_utf8(text, CHAT_MESSAGE_LENGTH),
        ))
    }

    /// Asks the server for a new name; the replica changes once the server confirms.
    pub fn rename(&mut self, name: &str) -> Result<(), ConnectionError> {
        let name = truncate_utf8(name, PLAYER_NAME_LENGTH);
        let player = self.player_id().unwrap_or(NetworkId::NONE);
        self.send(PlayerNameMessage::new(player, name))?;
        self.config.player_name = name.to_string();
        Ok(())
    }

    /// Leaves gracefully: the next flush carries the `Disconnect` datagram.
    pub fn disconnect(&mut self) {
        match &mut self.connection {
            Some(connection) => connection.disconnect(DisconnectReason::Graceful),
            None => {
                if self.state == ClientState::Connecting {
                    self.state = ClientState::Idle;
                }
            }
        }
    }
}
