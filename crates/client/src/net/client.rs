use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::thread;
use std::time::{Duration, Instant};

use arena::net::DISCOVERY_PORT;
use arena::{
    ClientEvent, ClientSession, ClientState, InputSampler, NetworkEndpoint, NetworkId,
    NetworkStats, ServerBrowser,
};

use super::config::ClientConfig;
use super::input::BotInput;

/// Headless client: one socket, one session, a bot at the controls.
pub struct NetworkClient {
    endpoint: NetworkEndpoint,
    session: ClientSession,
    sampler: InputSampler,
    bot: BotInput,
    config: ClientConfig,
    last_report: Option<Instant>,
}

impl NetworkClient {
    pub fn new(config: ClientConfig) -> io::Result<Self> {
        let endpoint = NetworkEndpoint::bind("0.0.0.0:0")?;
        Ok(Self {
            endpoint,
            session: ClientSession::new(config.session()),
            sampler: InputSampler::new(config.input_frequency.max(1)),
            bot: BotInput::new(config.seed),
            config,
            last_report: None,
        })
    }

    /// Listens for discovery beacons and returns the game address of the first
    /// server with room.
    pub fn discover(wait: Duration) -> io::Result<Option<SocketAddr>> {
        let mut listener =
            NetworkEndpoint::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT)))?;
        let mut browser = ServerBrowser::default();
        let start = Instant::now();

        while start.elapsed() < wait {
            let now = Instant::now();
            for (datagram, from) in listener.receive()? {
                browser.handle_datagram(&datagram, from, now);
            }
            if let Some(server) = browser.first_open() {
                log::info!(
                    "found '{}' ({}/{} players) at {}",
                    server.info.name,
                    server.info.players,
                    server.info.max_players,
                    server.addr
                );
                return Ok(Some(SocketAddr::new(server.addr.ip(), server.info.port)));
            }
            thread::sleep(Duration::from_millis(50));
        }

        for server in browser.servers() {
            log::info!("'{}' at {} is full", server.info.name, server.addr);
        }
        Ok(None)
    }

    pub fn connect(&mut self, server: SocketAddr) {
        log::info!("Connecting to {} as '{}'", server, self.config.name);
        self.session.connect(server, Instant::now());
    }

    pub fn state(&self) -> ClientState {
        self.session.state()
    }

    pub fn stats(&self) -> NetworkStats {
        self.session.stats()
    }

    /// Runs frames until disconnected or `duration` has passed.
    pub fn run(&mut self, duration: Option<Duration>) -> io::Result<()> {
        let start = Instant::now();
        let frame_interval = self.config.frame_interval();

        while duration.is_none_or(|limit| start.elapsed() < limit) {
            let frame_start = Instant::now();
            self.frame(frame_start)?;
            if self.state() == ClientState::Disconnected {
                break;
            }
            thread::sleep(frame_interval.saturating_sub(frame_start.elapsed()));
        }

        self.shutdown()
    }

    pub fn frame(&mut self, now: Instant) -> io::Result<()> {
        for (datagram, from) in self.endpoint.receive()? {
            self.session.handle_datagram(&datagram, from, now);
        }
        self.session.update(now);

        for event in self.session.take_events() {
            self.on_event(event);
        }

        if self.state() == ClientState::Connected {
            self.bot.think(self.session.world());
            self.sampler.sample(&self.bot);
            if let Some(input) = self.sampler.poll(now) {
                if let Err(e) = self.session.send_input(input) {
                    log::warn!("input not sent: {}", e);
                }
            }
            self.report(now);
        }

        self.send(now)?;
        self.endpoint.poll_simulation(now)
    }

    /// Leaves gracefully, giving the `Disconnect` datagram one flush.
    pub fn shutdown(&mut self) -> io::Result<()> {
        if self.state() == ClientState::Connected {
            self.session.disconnect();
            self.send(Instant::now())?;
        }
        Ok(())
    }

    fn send(&mut self, now: Instant) -> io::Result<()> {
        let Some(server) = self.session.server() else {
            return Ok(());
        };
        for datagram in self.session.flush(now) {
            self.endpoint.send_to(&datagram, server)?;
            self.session.recycle(datagram);
        }
        Ok(())
    }

    fn on_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Connected { player } => log::info!("joined as player {}", player),
            ClientEvent::ConnectionDenied { reason } => log::warn!("denied: {}", reason),
            ClientEvent::ConnectFailed => log::warn!("server did not answer"),
            ClientEvent::Synced => {
                let world = self.session.world();
                log::info!(
                    "synced: {} players, {} entities",
                    world.players().count(),
                    world.entity_count()
                );
                if let Err(e) = self.session.chat("hello") {
                    log::debug!("greeting not sent: {}", e);
                }
            }
            ClientEvent::Disconnected { reason } => log::info!("disconnected: {}", reason),
            ClientEvent::PlayerJoined { player, name } => {
                log::info!("{} joined as player {}", name, player)
            }
            ClientEvent::PlayerLeft {
                player,
                name,
                reason,
            } => log::info!("{} ({}) left: {}", name, player, reason),
            ClientEvent::PlayerRenamed { player, name } => {
                log::info!("player {} is now {}", player, name)
            }
            ClientEvent::EntityAdded { entity, parent } => {
                log::debug!("entity {} added under {}", entity, parent)
            }
            ClientEvent::EntityRemoved { entity } => log::debug!("entity {} removed", entity),
            ClientEvent::Chat { player, text } => {
                let world = self.session.world();
                let name = world
                    .player(player)
                    .map_or_else(|| player.to_string(), |p| p.name.clone());
                log::info!("<{}> {}", name, text);
            }
            ClientEvent::Kill { killer, victim } => {
                let world = self.session.world();
                let name = |id: NetworkId| {
                    world
                        .player(id)
                        .map_or_else(|| id.to_string(), |p| p.name.clone())
                };
                log::info!("{} fragged {}", name(killer), name(victim));
            }
        }
    }

    fn report(&mut self, now: Instant) {
        if self
            .last_report
            .is_some_and(|last| now.saturating_duration_since(last) < Duration::from_secs(5))
        {
            return;
        }
        self.last_report = Some(now);

        let world = self.session.world();
        if let Some(me) = world.local_player().and_then(|id| world.player(id)) {
            log::info!(
                "{}: health {} kills {} deaths {} ping {}ms",
                me.name,
                me.health,
                me.kills,
                me.deaths,
                me.ping
            );
        }
        let stats = self.stats();
        log::debug!(
            "rtt {:.1}ms loss {:.1}% resent {} ignored updates {}",
            stats.rtt_ms,
            stats.packet_loss_percent,
            stats.reliable_resent,
            world.ignored_updates()
        );
    }
}

#[cfg(test)]
mod tests {
    use arena::sync::EntityRecord;
    use arena::{GameWorld, Outbox, ServerEvent, ServerSession, SessionConfig};

    use super::*;

    struct Quiet;

    impl GameWorld for Quiet {
        fn broadcast_updates(&mut self, _entity: &mut EntityRecord, _out: &mut Outbox) {}
    }

    #[test]
    fn bot_joins_and_sends_input() {
        let mut server_endpoint = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut server = ServerSession::new(SessionConfig::default());
        let mut client = NetworkClient::new(ClientConfig::default()).unwrap();
        client.connect(server_endpoint.local_addr());

        let mut inputs = 0;
        let start = Instant::now();
        while inputs < 3 && start.elapsed() < Duration::from_secs(3) {
            let now = Instant::now();
            client.frame(now).unwrap();
            for (datagram, from) in server_endpoint.receive().unwrap() {
                server.handle_datagram(&datagram, from, now);
            }
            server.update(&mut Quiet, now);
            inputs += server
                .take_events()
                .iter()
                .filter(|e| matches!(e, ServerEvent::PlayerInput { .. }))
                .count();
            for (to, datagram) in server.flush(now) {
                server_endpoint.send_to(&datagram, to).unwrap();
            }
            thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(client.state(), ClientState::Connected);
        assert!(inputs >= 3);
    }
}
