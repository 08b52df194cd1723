use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arena::net::discovery::broadcast_addr;
use arena::{
    EntitySpawn, FixedTimestep, NetworkEndpoint, NetworkId, NetworkStats, ServerEvent,
    ServerSession,
};

use crate::config::ServerConfig;
use crate::simulation::{AVATAR, Arena, WEAPON};

const LOG_CAPACITY: usize = 200;

/// Requests from the dashboard to the server thread.
#[derive(Debug, Clone)]
pub enum ServerCommand {
    Kick(NetworkId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub id: NetworkId,
    pub name: String,
    pub addr: SocketAddr,
    pub avatar: Option<NetworkId>,
    pub kills: u16,
    pub deaths: u16,
    pub health: f32,
    pub rtt_ms: f32,
    pub reliable_resent: u64,
}

/// What the dashboard shows, refreshed by the server thread every loop.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime_secs: u64,
    pub player_count: usize,
    pub max_players: usize,
    pub entity_count: usize,
    pub stale_inputs: u64,
    pub socket: NetworkStats,
    pub connections: NetworkStats,
    pub players: Vec<PlayerInfo>,
    pub log: VecDeque<(LogLevel, String)>,
}

impl ServerStats {
    fn push_log(&mut self, level: LogLevel, line: String) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back((level, line));
    }
}

pub struct GameServer {
    endpoint: NetworkEndpoint,
    session: ServerSession,
    arena: Arena,
    timestep: FixedTimestep,
    tick: u64,
    discovery: bool,
    start_time: Instant,
    last_update: Instant,
    running: Arc<AtomicBool>,
    status: Arc<Mutex<ServerStats>>,
    commands: Option<Receiver<ServerCommand>>,
}

impl GameServer {
    pub fn new(config: &ServerConfig) -> io::Result<Self> {
        let mut endpoint = NetworkEndpoint::bind(config.bind_addr())?;
        if config.discovery {
            endpoint.set_broadcast(true)?;
        }
        if let Some(simulation) = config.simulation() {
            endpoint.set_simulation(simulation);
        }

        let now = Instant::now();
        let status = ServerStats {
            max_players: config.max_players,
            ..ServerStats::default()
        };

        Ok(Self {
            running: endpoint.running(),
            endpoint,
            session: ServerSession::new(config.session()),
            arena: Arena::new(rand::random()),
            timestep: FixedTimestep::new(config.tick_rate),
            tick: 0,
            discovery: config.discovery,
            start_time: now,
            last_update: now,
            status: Arc::new(Mutex::new(status)),
            commands: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn status(&self) -> Arc<Mutex<ServerStats>> {
        Arc::clone(&self.status)
    }

    /// Returns the sender half of the command channel.
    pub fn commands(&mut self) -> Sender<ServerCommand> {
        let (sender, receiver) = channel();
        self.commands = Some(receiver);
        sender
    }

    /// Moves the server onto its own thread; it runs until `running` is cleared.
    pub fn spawn(mut self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("arena-server".into())
            .spawn(move || self.run())
    }

    pub fn run(&mut self) {
        while self.running.load(Ordering::SeqCst) {
            let now = Instant::now();
            self.tick_once(now);
            thread::sleep(self.timestep.until_next_tick().min(Duration::from_millis(1)));
        }
        self.shutdown();
    }

    pub fn tick_once(&mut self, now: Instant) {
        if let Err(e) = self.receive(now) {
            self.log(LogLevel::Error, format!("network error: {}", e));
        }
        self.apply_commands();

        self.session.update(&mut self.arena, now);
        self.process_events();

        let delta = now.saturating_duration_since(self.last_update);
        self.last_update = now;
        self.timestep.accumulate(delta);
        while self.timestep.consume_tick() {
            self.simulate();
        }

        if self.discovery {
            if let Some(beacon) = self.session.beacon(now) {
                if let Err(e) = self.endpoint.send_to(&beacon, broadcast_addr()) {
                    log::debug!("discovery beacon not sent: {}", e);
                }
            }
        }

        let datagrams = self.session.flush(now);
        self.send(datagrams);
        if let Err(e) = self.endpoint.poll_simulation(now) {
            self.log(LogLevel::Error, format!("simulated send failed: {}", e));
        }
        self.publish_status();
    }

    pub fn shutdown(&mut self) {
        let datagrams = self.session.shutdown(Instant::now());
        self.send(datagrams);
        self.process_events();
        self.log(LogLevel::Info, "server stopped".to_string());
        self.publish_status();
    }

    fn receive(&mut self, now: Instant) -> io::Result<()> {
        for (datagram, from) in self.endpoint.receive()? {
            self.session.handle_datagram(&datagram, from, now);
        }
        Ok(())
    }

    fn send(&mut self, datagrams: Vec<(SocketAddr, Vec<u8>)>) {
        for (addr, datagram) in datagrams {
            if let Err(e) = self.endpoint.send_to(&datagram, addr) {
                log::error!("send to {} failed: {}", addr, e);
            }
            self.session.recycle(addr, datagram);
        }
    }

    fn apply_commands(&mut self) {
        let Some(commands) = &self.commands else {
            return;
        };
        let pending: Vec<ServerCommand> = commands.try_iter().collect();
        for command in pending {
            match command {
                ServerCommand::Kick(player) => {
                    if !self.session.kick(player) {
                        self.log(LogLevel::Warn, format!("no player {} to kick", player));
                    }
                }
            }
        }
    }

    fn process_events(&mut self) {
        for event in self.session.take_events() {
            match event {
                ServerEvent::PlayerConnected { player, addr, name } => {
                    self.log(
                        LogLevel::Info,
                        format!("{} joined as player {} from {}", name, player, addr),
                    );
                    self.spawn_avatar(player);
                }
                ServerEvent::PlayerDisconnected {
                    player,
                    name,
                    reason,
                } => {
                    self.log(LogLevel::Info, format!("{} ({}) left: {}", name, player, reason));
                }
                ServerEvent::ConnectionDenied { addr, reason } => {
                    self.log(LogLevel::Warn, format!("denied {}: {}", addr, reason));
                }
                ServerEvent::PlayerInput { player, input } => {
                    self.arena.apply_input(player, &input);
                }
                ServerEvent::PlayerRenamed {
                    old_name, new_name, ..
                } => {
                    self.log(LogLevel::Info, format!("{} is now {}", old_name, new_name));
                }
                ServerEvent::Chat { player, text } => {
                    let name = self
                        .session
                        .player(player)
                        .map_or_else(|| player.to_string(), |p| p.name.clone());
                    self.log(LogLevel::Info, format!("<{}> {}", name, text));
                }
            }
        }
    }

    fn spawn_avatar(&mut self, player: NetworkId) {
        // Connected and gone again within one update.
        if self.session.player(player).is_none() {
            return;
        }
        let position = self.arena.spawn_point();
        let avatar = self.session.spawn_entity(
            &mut self.arena,
            EntitySpawn::new(AVATAR).owned_by(player).at(position),
        );
        self.session.spawn_entity(
            &mut self.arena,
            EntitySpawn::new(WEAPON).owned_by(player).child_of(avatar),
        );
    }

    fn simulate(&mut self) {
        self.tick += 1;
        let dt = self.timestep.dt().as_secs_f32();

        for kill in self.arena.step(dt) {
            log::info!("player {} killed player {}", kill.killer, kill.victim);
            self.session.report_kill(kill.killer, kill.victim);
        }

        let vitals: Vec<_> = self
            .arena
            .avatars()
            .map(|avatar| (avatar.player, avatar.health, avatar.power_up))
            .collect();
        for (player, health, power_up) in vitals {
            self.session.set_player_vitals(player, health, power_up);
        }

        self.session.broadcast_updates(&mut self.arena);
    }

    fn log(&mut self, level: LogLevel, line: String) {
        match level {
            LogLevel::Info => log::info!("{}", line),
            LogLevel::Warn => log::warn!("{}", line),
            LogLevel::Error => log::error!("{}", line),
        }
        if let Ok(mut status) = self.status.lock() {
            status.push_log(level, line);
        }
    }

    fn publish_status(&mut self) {
        let players = self
            .session
            .players()
            .map(|record| {
                let connection = self.session.connection(record.id);
                PlayerInfo {
                    id: record.id,
                    name: record.name.clone(),
                    addr: record.addr,
                    avatar: self.arena.avatar(record.id).map(|avatar| avatar.entity),
                    kills: record.kills,
                    deaths: record.deaths,
                    health: record.health,
                    rtt_ms: connection.map_or(0.0, |c| c.rtt_ms()),
                    reliable_resent: connection.map_or(0, |c| c.stats().reliable_resent),
                }
            })
            .collect();

        let Ok(mut status) = self.status.lock() else {
            return;
        };
        status.tick = self.tick;
        status.uptime_secs = self.start_time.elapsed().as_secs();
        status.player_count = self.session.player_count();
        status.entity_count = self.session.entities().len();
        status.stale_inputs = self.session.stale_inputs();
        status.socket = self.endpoint.stats().clone();
        status.connections = self.session.network_stats();
        status.players = players;
    }
}

#[cfg(test)]
mod tests {
    use arena::{ClientEvent, ClientSession, ClientSessionConfig};

    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1".into(),
            port: 0,
            discovery: false,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn connected_player_gets_an_avatar() {
        let mut server = GameServer::new(&local_config()).unwrap();
        let server_addr = server.local_addr();

        let mut endpoint = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut client = ClientSession::new(ClientSessionConfig {
            player_name: "ann".into(),
            ..ClientSessionConfig::default()
        });
        client.connect(server_addr, Instant::now());

        let mut events = Vec::new();
        let start = Instant::now();
        while start.elapsed() < Duration::from_secs(2) {
            let now = Instant::now();
            client.update(now);
            for datagram in client.flush(now) {
                endpoint.send_to(&datagram, server_addr).unwrap();
            }
            server.tick_once(now);
            for (datagram, from) in endpoint.receive().unwrap() {
                client.handle_datagram(&datagram, from, now);
            }
            events.extend(client.take_events());
            if client.world().entity_count() == 2 {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        assert!(events.iter().any(|e| matches!(e, ClientEvent::Connected { .. })));
        assert_eq!(client.world().entity_count(), 2);

        let status = server.status();
        let status = status.lock().unwrap();
        assert_eq!(status.player_count, 1);
        assert_eq!(status.players[0].name, "ann");
        assert!(status.log.iter().any(|(_, line)| line.contains("ann joined")));
    }

    #[test]
    fn kick_command_reaches_the_session() {
        let mut server = GameServer::new(&local_config()).unwrap();
        let commands = server.commands();
        commands.send(ServerCommand::Kick(NetworkId::from_raw(3))).unwrap();
        server.tick_once(Instant::now());

        let status = server.status();
        let status = status.lock().unwrap();
        assert!(status.log.iter().any(|(level, line)| {
            *level == LogLevel::Warn && line.contains("no player #3 to kick")
        }));
    }
}
