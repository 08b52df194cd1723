use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::input::frame_greater_than;
use crate::message::{
    ClientSyncedMessage, EntityRemoveMessage, Message, MessageHandler, PlayerChatMessage,
    PlayerInputMessage, PlayerJoinMessage, PlayerKillMessage, PlayerLeaveMessage,
    PlayerNameMessage, PlayerStatsMessage, ServerInfoMessage,
};
use crate::net::discovery::{BeaconTimer, DEFAULT_BEACON_INTERVAL, encode_beacon};
use crate::net::protocol::{DENY_REASON_LENGTH, SERVER_NAME_LENGTH, truncate_utf8};
use crate::net::{
    Connection, ConnectionConfig, ConnectionError, ConnectionManager, DEFAULT_PORT,
    DisconnectReason, IdentityAllocator, MAX_PLAYERS, NetworkId, NetworkStats, PROTOCOL_VERSION,
    Packet,
};

use super::entity::{EntityRegistry, EntitySpawn, GameWorld, Outbox};
use super::events::ServerEvent;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_name: String,
    /// Game port advertised in discovery beacons.
    pub port: u16,
    pub max_players: usize,
    pub stats_interval: Duration,
    pub beacon_interval: Duration,
    pub connection: ConnectionConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_name: "arena".to_string(),
            port: DEFAULT_PORT,
            max_players: MAX_PLAYERS,
            stats_interval: Duration::from_secs(1),
            beacon_interval: DEFAULT_BEACON_INTERVAL,
            connection: ConnectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    pub id: NetworkId,
    pub name: String,
    pub addr: SocketAddr,
    pub kills: u16,
    pub deaths: u16,
    /// Highest input frame accepted so far; 0 before the first one.
    pub last_input_frame: u32,
    pub health: f32,
    /// Seconds left on the active power-up.
    pub power_up: f32,
}

impl PlayerRecord {
    fn new(id: NetworkId, name: String, addr: SocketAddr) -> Self {
        Self {
            id,
            name,
            addr,
            kills: 0,
            deaths: 0,
            last_input_frame: 0,
            health: 0.0,
            power_up: 0.0,
        }
    }
}

/// Authoritative side of the synchronization protocol.
///
/// Owns every client connection, the identity allocator shared by players and entities,
/// and the entity hierarchy. Datagrams go in through [`ServerSession::handle_datagram`]
/// and come out of [`ServerSession::flush`]; the caller owns the socket.
pub struct ServerSession {
    config: SessionConfig,
    connections: ConnectionManager,
    identities: IdentityAllocator,
    players: BTreeMap<NetworkId, PlayerRecord>,
    entities: EntityRegistry,
    events: VecDeque<ServerEvent>,
    control: Vec<(SocketAddr, Vec<u8>)>,
    beacon_timer: BeaconTimer,
    last_stats: Option<Instant>,
    accepting: bool,
    stale_inputs: u64,
}

impl ServerSession {
    pub fn new(config: SessionConfig) -> Self {
        assert!(
            config.max_players <= MAX_PLAYERS,
            "at most {MAX_PLAYERS} players are supported, got {}",
            config.max_players
        );

        Self {
            connections: ConnectionManager::new(config.max_players),
            identities: IdentityAllocator::new(),
            players: BTreeMap::new(),
            entities: EntityRegistry::new(),
            events: VecDeque::new(),
            control: Vec::new(),
            beacon_timer: BeaconTimer::new(config.beacon_interval),
            last_stats: None,
            accepting: true,
            stale_inputs: 0,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerRecord> {
        self.players.values()
    }

    pub fn player(&self, id: NetworkId) -> Option<&PlayerRecord> {
        self.players.get(&id)
    }

    pub fn connection(&self, player: NetworkId) -> Option<&Connection> {
        self.connections.get(player)
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn live_identities(&self) -> usize {
        self.identities.live_count()
    }

    /// Input messages dropped because a newer frame had already been applied.
    pub fn stale_inputs(&self) -> u64 {
        self.stale_inputs
    }

    /// Totals over every live connection.
    pub fn network_stats(&self) -> NetworkStats {
        let mut total = NetworkStats::default();
        for (_, connection) in self.connections.iter() {
            total.accumulate(&connection.stats());
        }
        total
    }

    pub fn take_events(&mut self) -> Vec<ServerEvent> {
        self.events.drain(..).collect()
    }

    pub fn server_info(&self) -> ServerInfoMessage {
        let max_players = self.config.max_players.min(u8::MAX as usize) as u8;
        ServerInfoMessage::new(
            truncate_utf8(&self.config.server_name, SERVER_NAME_LENGTH),
            self.config.port,
            (self.players.len() as u8).min(max_players),
            max_players,
        )
    }

    /// A discovery beacon when one is due.
    pub fn beacon(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.accepting || !self.beacon_timer.due(now) {
            return None;
        }
        match encode_beacon(&self.server_info()) {
            Ok(datagram) => Some(datagram),
            Err(e) => {
                log::error!("cannot encode discovery beacon: {}", e);
                None
            }
        }
    }

    pub fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) {
        let packet = match Packet::decode(datagram) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("dropping datagram from {}: {}", from, e);
                return;
            }
        };

        match packet {
            Packet::ConnectRequest { version, name } => {
                self.handle_connect_request(version, name, from, now)
            }
            Packet::Data(body) => self.handle_data(body, from, now),
            Packet::Disconnect { .. } => {
                if let Some((player, connection)) = self.connections.get_by_addr_mut(&from) {
                    log::debug!("player {} at {} said goodbye", player, from);
                    connection.touch(now);
                    connection.close(DisconnectReason::Graceful);
                }
            }
            other => log::trace!("ignoring {:?} from {}", other.kind(), from),
        }
    }

    fn handle_connect_request(&mut self, version: u16, name: String, from: SocketAddr, now: Instant) {
        if let Some((player, connection)) = self.connections.get_by_addr_mut(&from) {
            if !connection.is_connected() {
                // The old player leaves on the next update; the client's retry is
                // admitted after that.
                log::debug!("connect request from {} while player {} is leaving", from, player);
                return;
            }
            log::debug!("repeated connect request from {}, re-sending accept", from);
            connection.touch(now);
            self.send_control(from, Packet::ConnectAccept { player_id: player });
            return;
        }

        let name = name.trim().to_string();
        let denial = if !self.accepting {
            Some("server is shutting down")
        } else if version != PROTOCOL_VERSION {
            Some("protocol version mismatch")
        } else if name.is_empty() {
            Some("player name is empty")
        } else if self.players.len() >= self.config.max_players || self.connections.is_full() {
            Some("server is full")
        } else {
            None
        };

        if let Some(reason) = denial {
            log::warn!("denying connection from {}: {}", from, reason);
            self.send_control(
                from,
                Packet::ConnectDeny {
                    reason: truncate_utf8(reason, DENY_REASON_LENGTH).to_string(),
                },
            );
            self.events.push_back(ServerEvent::ConnectionDenied {
                addr: from,
                reason: reason.to_string(),
            });
            return;
        }

        let player = self.identities.allocate();
        let mut connection = Connection::new(from, self.config.connection.clone(), now);
        connection.mark_connected(now);
        self.connections.insert(player, connection);
        self.send_control(from, Packet::ConnectAccept { player_id: player });

        self.send_join_snapshot(player);
        self.broadcast_except(player, PlayerJoinMessage::new(player, &name));

        log::info!("player {} '{}' connected from {}", player, name, from);
        self.players
            .insert(player, PlayerRecord::new(player, name.clone(), from));
        self.events.push_back(ServerEvent::PlayerConnected {
            player,
            addr: from,
            name,
        });
    }

    /// Existing players, then every added entity parent first, then the end marker.
    fn send_join_snapshot(&mut self, player: NetworkId) {
        let mut snapshot: Vec<Message> = self
            .players
            .values()
            .filter(|record| record.id != player)
            .map(|record| PlayerJoinMessage::new(record.id, &record.name).into())
            .collect();

        snapshot.extend(
            self.entities
                .pre_order()
                .into_iter()
                .filter_map(|id| self.entities.get(id))
                .filter(|record| record.is_added())
                .map(|record| record.add_message().into()),
        );
        snapshot.push(ClientSyncedMessage.into());

        log::debug!("sending {} snapshot messages to {}", snapshot.len(), player);
        for message in &snapshot {
            if let Err(e) = self.send_to(player, message.clone()) {
                log::warn!("join snapshot for {} interrupted: {}", player, e);
                return;
            }
        }
    }

    fn handle_data(&mut self, body: &[u8], from: SocketAddr, now: Instant) {
        let Some((player, connection)) = self.connections.get_by_addr_mut(&from) else {
            log::trace!("data from unknown peer {}", from);
            return;
        };
        let delivered = connection.receive(body, now);
        if delivered.is_empty() {
            return;
        }
        let Some(record) = self.players.get_mut(&player) else {
            return;
        };

        let mut inbound = Inbound {
            record,
            events: &mut self.events,
            rebroadcast: Vec::new(),
            stale_inputs: 0,
        };
        for (message, sequence) in delivered {
            message.dispatch(&mut inbound, sequence);
        }

        let Inbound {
            rebroadcast,
            stale_inputs,
            ..
        } = inbound;
        self.stale_inputs += stale_inputs;
        for message in rebroadcast {
            self.broadcast(message);
        }
    }

    /// Runs connection bookkeeping and the periodic stats broadcast.
    ///
    /// Players whose connection closed are removed here, once: their entities are
    /// despawned, the leave is broadcast, then their identity is freed.
    pub fn update<W: GameWorld + ?Sized>(&mut self, world: &mut W, now: Instant) {
        let closed: Vec<(NetworkId, DisconnectReason)> = self
            .connections
            .iter_mut()
            .filter_map(|(player, connection)| connection.update(now).map(|reason| (player, reason)))
            .collect();

        for (player, reason) in closed {
            self.remove_player(world, player, reason);
        }

        let stats_due = self
            .last_stats
            .is_none_or(|last| now.saturating_duration_since(last) >= self.config.stats_interval);
        if stats_due && !self.players.is_empty() {
            self.last_stats = Some(now);
            self.broadcast_stats();
        }
    }

    fn remove_player<W: GameWorld + ?Sized>(
        &mut self,
        world: &mut W,
        player: NetworkId,
        reason: DisconnectReason,
    ) {
        if let Some(mut connection) = self.connections.remove(player) {
            connection.release_pool();
        }
        let Some(record) = self.players.remove(&player) else {
            return;
        };

        for root in self.entities.owned_roots(player) {
            self.despawn_entity(world, root);
        }

        log::info!("player {} '{}' {}", player, record.name, reason);
        self.broadcast(PlayerLeaveMessage::new(player, reason));
        self.identities.free(player);
        self.events.push_back(ServerEvent::PlayerDisconnected {
            player,
            name: record.name,
            reason,
        });
    }

    fn broadcast_stats(&mut self) {
        let stats: Vec<PlayerStatsMessage> = self
            .players
            .values()
            .map(|record| {
                let ping = self
                    .connections
                    .get(record.id)
                    .map_or(0.0, |connection| connection.rtt_ms());
                PlayerStatsMessage::new(
                    record.id,
                    record.health.max(0.0),
                    record.power_up.max(0.0),
                    record.kills,
                    record.deaths,
                    ping,
                )
            })
            .collect();

        for message in stats {
            self.broadcast(message);
        }
    }

    /// Allocates an identity, tells every client, then hands the entity to gameplay.
    pub fn spawn_entity<W: GameWorld + ?Sized>(
        &mut self,
        world: &mut W,
        spawn: EntitySpawn,
    ) -> NetworkId {
        assert!(
            spawn.parent.is_none() || self.entities.contains(spawn.parent),
            "parent {} is not a live entity",
            spawn.parent
        );

        let id = self.identities.allocate();
        let add = self.entities.insert(id, spawn).add_message();
        self.broadcast(add);
        self.entities.mark_added(id);

        if let Some(record) = self.entities.get(id) {
            world.on_entity_added(record);
        }
        log::debug!("spawned entity {}", id);
        id
    }

    /// Removes `id` and everything below it, children first. Each entity goes through
    /// gameplay removal, then the remove broadcast, then its identity is freed.
    pub fn despawn_entity<W: GameWorld + ?Sized>(&mut self, world: &mut W, id: NetworkId) -> usize {
        let order = self.entities.subtree_post_order(id);
        for &entity in &order {
            if let Some(record) = self.entities.get(entity) {
                world.on_entity_removed(record);
            }
            self.broadcast(EntityRemoveMessage::new(entity));
            self.entities.remove(entity);
            self.identities.free(entity);
        }
        if !order.is_empty() {
            log::debug!("despawned {} ({} entities)", id, order.len());
        }
        order.len()
    }

    /// Lets every entity queue its per-tick updates, parents first.
    pub fn broadcast_updates<W: GameWorld + ?Sized>(&mut self, world: &mut W) {
        let mut outbox = Outbox::new();
        for id in self.entities.pre_order() {
            if let Some(record) = self.entities.get_mut(id) {
                world.broadcast_updates(record, &mut outbox);
            }
        }

        let messages: Vec<Message> = outbox.drain().collect();
        for message in messages {
            self.broadcast(message);
        }
    }

    /// Queues `message` on every connected client.
    pub fn broadcast(&mut self, message: impl Into<Message>) {
        let message = message.into();
        for (player, connection) in self.connections.iter_mut() {
            if !connection.is_connected() {
                continue;
            }
            if let Err(e) = connection.enqueue(&message) {
                log::warn!("cannot queue {:?} for {}: {}", message.message_type(), player, e);
            }
        }
    }

    fn broadcast_except(&mut self, excluded: NetworkId, message: impl Into<Message>) {
        let message = message.into();
        for (player, connection) in self.connections.iter_mut() {
            if player == excluded || !connection.is_connected() {
                continue;
            }
            if let Err(e) = connection.enqueue(&message) {
                log::warn!("cannot queue {:?} for {}: {}", message.message_type(), player, e);
            }
        }
    }

    pub fn send_to(
        &mut self,
        player: NetworkId,
        message: impl Into<Message>,
    ) -> Result<(), ConnectionError> {
        let connection = self
            .connections
            .get_mut(player)
            .ok_or(ConnectionError::Closed)?;
        connection.enqueue(&message.into())
    }

    /// Counts the kill and tells everyone. Suicides and world kills only count a death.
    pub fn report_kill(&mut self, killer: NetworkId, victim: NetworkId) {
        if killer != victim {
            if let Some(record) = self.players.get_mut(&killer) {
                record.kills = record.kills.saturating_add(1);
            }
        }
        if let Some(record) = self.players.get_mut(&victim) {
            record.deaths = record.deaths.saturating_add(1);
        }
        self.broadcast(PlayerKillMessage::new(killer, victim));
    }

    pub fn set_player_vitals(&mut self, player: NetworkId, health: f32, power_up: f32) {
        if let Some(record) = self.players.get_mut(&player) {
            record.health = health;
            record.power_up = power_up;
        }
    }

    /// Drops `player`. The next flush sends the `Disconnect` datagram, the update after
    /// it removes the player.
    pub fn kick(&mut self, player: NetworkId) -> bool {
        match self.connections.get_mut(player) {
            Some(connection) => {
                log::info!("kicking player {}", player);
                connection.disconnect(DisconnectReason::Kicked);
                true
            }
            None => false,
        }
    }

    /// Datagrams to send now: handshake replies first, then each connection's traffic.
    pub fn flush(&mut self, now: Instant) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut datagrams = std::mem::take(&mut self.control);
        for (_, connection) in self.connections.iter_mut() {
            let addr = connection.addr();
            datagrams.extend(connection.flush(now).into_iter().map(|datagram| (addr, datagram)));
        }
        datagrams
    }

    /// Hands a sent datagram back to the pool of the connection it came from.
    pub fn recycle(&mut self, addr: SocketAddr, datagram: Vec<u8>) {
        if let Some((_, connection)) = self.connections.get_by_addr_mut(&addr) {
            connection.recycle(datagram);
        }
    }

    /// Stops accepting, says goodbye to every client, then releases players, entities
    /// and identities. Returns the final datagrams to send.
    pub fn shutdown(&mut self, now: Instant) -> Vec<(SocketAddr, Vec<u8>)> {
        self.accepting = false;
        for (_, connection) in self.connections.iter_mut() {
            connection.disconnect(DisconnectReason::ServerShutdown);
        }
        let datagrams = self.flush(now);

        for (id, record) in std::mem::take(&mut self.players) {
            self.events.push_back(ServerEvent::PlayerDisconnected {
                player: id,
                name: record.name,
                reason: DisconnectReason::ServerShutdown,
            });
        }
        for (_, connection) in self.connections.iter_mut() {
            connection.release_pool();
        }
        self.connections.clear();
        self.entities.clear();
        self.identities.clear();

        log::info!("session shut down");
        datagrams
    }

    fn send_control(&mut self, to: SocketAddr, packet: Packet<'_>) {
        match packet.encode() {
            Ok(datagram) => self.control.push((to, datagram)),
            Err(e) => log::error!("cannot encode {:?} for {}: {}", packet.kind(), to, e),
        }
    }
}

/// Applies one client's messages to its player record.
struct Inbound<'a> {
    record: &'a mut PlayerRecord,
    events: &'a mut VecDeque<ServerEvent>,
    rebroadcast: Vec<Message>,
    stale_inputs: u64,
}

impl MessageHandler for Inbound<'_> {
    fn on_player_input(&mut self, message: PlayerInputMessage, _sequence: u16) {
        if !frame_greater_than(message.frame, self.record.last_input_frame) {
            log::trace!(
                "stale input frame {} from {} (have {})",
                message.frame,
                self.record.id,
                self.record.last_input_frame
            );
            self.stale_inputs += 1;
            return;
        }
        self.record.last_input_frame = message.frame;
        self.events.push_back(ServerEvent::PlayerInput {
            player: self.record.id,
            input: message,
        });
    }

    fn on_player_name(&mut self, message: PlayerNameMessage, _sequence: u16) {
        let name = message.name.trim();
        if name.is_empty() || name == self.record.name {
            return;
        }
        let old_name = std::mem::replace(&mut self.record.name, name.to_string());
        log::info!("player {} renamed '{}' -> '{}'", self.record.id, old_name, name);
        self.rebroadcast
            .push(PlayerNameMessage::new(self.record.id, name).into());
        self.events.push_back(ServerEvent::PlayerRenamed {
            player: self.record.id,
            old_name,
            new_name: name.to_string(),
        });
    }

    fn on_player_chat(&mut self, message: PlayerChatMessage, _sequence: u16) {
        let text = message.text.trim();
        if text.is_empty() {
            return;
        }
        self.rebroadcast
            .push(PlayerChatMessage::new(self.record.id, text).into());
        self.events.push_back(ServerEvent::Chat {
            player: self.record.id,
            text: text.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;
    use crate::message::{INPUT_SLOTS, UpdateTransformMessage};
    use crate::net::PacketKind;
    use crate::sync::EntityRecord;

    #[derive(Default)]
    struct Recorder {
        added: Vec<NetworkId>,
        removed: Vec<NetworkId>,
    }

    impl GameWorld for Recorder {
        fn on_entity_added(&mut self, entity: &EntityRecord) {
            self.added.push(entity.id);
        }

        fn on_entity_removed(&mut self, entity: &EntityRecord) {
            self.removed.push(entity.id);
        }

        fn broadcast_updates(&mut self, entity: &mut EntityRecord, out: &mut Outbox) {
            entity.position += Vec3::X;
            out.push(UpdateTransformMessage::new(entity.id, entity.position, Quat::IDENTITY));
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn request(name: &str) -> Vec<u8> {
        Packet::ConnectRequest {
            version: PROTOCOL_VERSION,
            name: name.to_string(),
        }
        .encode()
        .unwrap()
    }

    fn kinds(datagrams: &[(SocketAddr, Vec<u8>)]) -> Vec<PacketKind> {
        datagrams
            .iter()
            .map(|(_, datagram)| Packet::decode(datagram).unwrap().kind())
            .collect()
    }

    #[test]
    fn accepts_and_is_idempotent() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig::default());

        session.handle_datagram(&request("ann"), addr(1000), now);
        session.handle_datagram(&request("ann"), addr(1000), now);

        assert_eq!(session.player_count(), 1);
        let datagrams = session.flush(now);
        let accepts: Vec<_> = datagrams
            .iter()
            .filter_map(|(_, d)| match Packet::decode(d).unwrap() {
                Packet::ConnectAccept { player_id } => Some(player_id),
                _ => None,
            })
            .collect();
        assert_eq!(accepts.len(), 2);
        assert_eq!(accepts[0], accepts[1]);

        let events = session.take_events();
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::PlayerConnected { name, .. }] if name == "ann"
        ));
    }

    #[test]
    fn reconnect_waits_for_leaving_player() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig::default());
        let mut world = Recorder::default();
        session.handle_datagram(&request("ann"), addr(1000), now);
        session.update(&mut world, now);
        session.flush(now);
        session.take_events();

        let goodbye = Packet::Disconnect {
            reason: DisconnectReason::Graceful,
        }
        .encode()
        .unwrap();
        session.handle_datagram(&goodbye, addr(1000), now);
        session.handle_datagram(&request("ann"), addr(1000), now);
        assert!(!kinds(&session.flush(now)).contains(&PacketKind::ConnectAccept));

        session.update(&mut world, now);
        assert_eq!(session.player_count(), 0);

        session.handle_datagram(&request("ann"), addr(1000), now);
        assert!(kinds(&session.flush(now)).contains(&PacketKind::ConnectAccept));
        assert_eq!(session.player_count(), 1);
        assert!(session.connection(session.players().next().unwrap().id).unwrap().is_connected());
    }

    #[test]
    fn denies_bad_requests() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig {
            max_players: 1,
            ..SessionConfig::default()
        });

        let old_version = Packet::ConnectRequest {
            version: PROTOCOL_VERSION + 1,
            name: "old".into(),
        }
        .encode()
        .unwrap();
        session.handle_datagram(&old_version, addr(1), now);
        session.handle_datagram(&request("   "), addr(2), now);
        session.handle_datagram(&request("first"), addr(3), now);
        session.handle_datagram(&request("second"), addr(4), now);

        let denied: Vec<String> = session
            .take_events()
            .into_iter()
            .filter_map(|event| match event {
                ServerEvent::ConnectionDenied { reason, .. } => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(
            denied,
            vec!["protocol version mismatch", "player name is empty", "server is full"]
        );
        assert_eq!(session.player_count(), 1);
        assert_eq!(
            kinds(&session.flush(now))
                .iter()
                .filter(|kind| **kind == PacketKind::ConnectDeny)
                .count(),
            3
        );
    }

    #[test]
    fn spawn_and_despawn_run_hooks_in_order() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut world = Recorder::default();

        let parent = session.spawn_entity(&mut world, EntitySpawn::new(1));
        let child = session.spawn_entity(&mut world, EntitySpawn::new(2).child_of(parent));
        assert_eq!(world.added, vec![parent, child]);
        assert!(session.entities().get(child).unwrap().is_added());

        assert_eq!(session.despawn_entity(&mut world, parent), 2);
        assert_eq!(world.removed, vec![child, parent]);
        assert!(session.entities().is_empty());
        assert_eq!(session.live_identities(), 0);
    }

    #[test]
    fn broadcast_updates_refreshes_records() {
        let mut session = ServerSession::new(SessionConfig::default());
        let mut world = Recorder::default();
        let entity = session.spawn_entity(&mut world, EntitySpawn::new(1));

        session.broadcast_updates(&mut world);
        session.broadcast_updates(&mut world);
        assert_eq!(session.entities().get(entity).unwrap().position, Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn input_frames_are_ordered_across_wrap() {
        let mut record = PlayerRecord::new(NetworkId::from_raw(0), "ann".into(), addr(1));
        record.last_input_frame = u32::MAX;
        let mut events = VecDeque::new();
        let mut inbound = Inbound {
            record: &mut record,
            events: &mut events,
            rebroadcast: Vec::new(),
            stale_inputs: 0,
        };

        inbound.on_player_input(PlayerInputMessage::new(1, [0; INPUT_SLOTS], Vec3::ZERO), 0);
        inbound.on_player_input(PlayerInputMessage::new(u32::MAX, [0; INPUT_SLOTS], Vec3::ZERO), 1);
        inbound.on_player_input(PlayerInputMessage::new(2, [0; INPUT_SLOTS], Vec3::ZERO), 2);
        assert_eq!(inbound.stale_inputs, 1);
        assert_eq!(record.last_input_frame, 2);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn kills_update_counters() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig::default());
        session.handle_datagram(&request("a"), addr(1), now);
        session.handle_datagram(&request("b"), addr(2), now);
        let ids: Vec<NetworkId> = session.players().map(|p| p.id).collect();

        session.report_kill(ids[0], ids[1]);
        session.report_kill(ids[1], ids[1]);

        let a = session.player(ids[0]).unwrap();
        let b = session.player(ids[1]).unwrap();
        assert_eq!((a.kills, a.deaths), (1, 0));
        assert_eq!((b.kills, b.deaths), (0, 2));
    }

    #[test]
    fn kick_removes_player_after_goodbye() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig::default());
        let mut world = Recorder::default();
        session.handle_datagram(&request("a"), addr(1), now);
        let player = session.players().next().unwrap().id;
        let avatar = session.spawn_entity(&mut world, EntitySpawn::new(1).owned_by(player));
        session.flush(now);
        session.take_events();

        assert!(session.kick(player));
        let datagrams = session.flush(now);
        assert!(datagrams.iter().any(|(_, d)| matches!(
            Packet::decode(d),
            Ok(Packet::Disconnect {
                reason: DisconnectReason::Kicked
            })
        )));

        session.update(&mut world, now);
        assert_eq!(session.player_count(), 0);
        assert_eq!(world.removed, vec![avatar]);
        assert_eq!(session.live_identities(), 0);
        assert_eq!(
            session.take_events(),
            vec![ServerEvent::PlayerDisconnected {
                player,
                name: "a".into(),
                reason: DisconnectReason::Kicked,
            }]
        );
    }

    #[test]
    fn shutdown_says_goodbye_and_releases_everything() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig::default());
        let mut world = Recorder::default();
        session.handle_datagram(&request("a"), addr(1), now);
        session.handle_datagram(&request("b"), addr(2), now);
        session.spawn_entity(&mut world, EntitySpawn::new(1));
        session.flush(now);
        session.take_events();

        let datagrams = session.shutdown(now);
        assert_eq!(kinds(&datagrams), vec![PacketKind::Disconnect; 2]);
        assert_eq!(session.take_events().len(), 2);
        assert_eq!(session.live_identities(), 0);
        assert!(session.entities().is_empty());
        assert!(session.beacon(now).is_none());

        session.handle_datagram(&request("late"), addr(3), now);
        assert!(matches!(
            session.take_events().as_slice(),
            [ServerEvent::ConnectionDenied { reason, .. }] if reason == "server is shutting down"
        ));
    }

    #[test]
    fn beacon_reports_occupancy() {
        let now = Instant::now();
        let mut session = ServerSession::new(SessionConfig {
            server_name: "lan".into(),
            max_players: 4,
            ..SessionConfig::default()
        });
        session.handle_datagram(&request("a"), addr(1), now);

        let beacon = session.beacon(now).unwrap();
        assert_eq!(
            Packet::decode(&beacon).unwrap(),
            Packet::Beacon(ServerInfoMessage::new("lan", DEFAULT_PORT, 1, 4))
        );
        assert!(session.beacon(now).is_none());
    }
}
