use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use crate::codec::CodecError;
use crate::message::ServerInfoMessage;

use super::protocol::{DISCOVERY_PORT, Packet};

pub const DEFAULT_BEACON_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_SERVER_MAX_AGE: Duration = Duration::from_secs(5);

/// Where servers broadcast their beacons.
pub fn broadcast_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::BROADCAST, DISCOVERY_PORT))
}

/// Fires once per interval.
#[derive(Debug, Clone)]
pub struct BeaconTimer {
    interval: Duration,
    last: Option<Instant>,
}

impl BeaconTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub fn encode_beacon(info: &ServerInfoMessage) -> Result<Vec<u8>, CodecError> {
    Packet::Beacon(info.clone()).encode()
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredServer {
    /// Game address: the beacon's source IP with the advertised port.
    pub addr: SocketAddr,
    pub info: ServerInfoMessage,
    pub last_seen: Instant,
}

/// Servers heard from recently, keyed by game address.
#[derive(Debug)]
pub struct ServerBrowser {
    servers: HashMap<SocketAddr, DiscoveredServer>,
    max_age: Duration,
}

impl Default for ServerBrowser {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_MAX_AGE)
    }
}

impl ServerBrowser {
    pub fn new(max_age: Duration) -> Self {
        Self {
            servers: HashMap::new(),
            max_age,
        }
    }

    /// Records a beacon datagram from `source`. Anything else is ignored.
    pub fn handle_datagram(&mut self, datagram: &[u8], source: SocketAddr, now: Instant) -> bool {
        match Packet::decode(datagram) {
            Ok(Packet::Beacon(info)) => {
                self.on_beacon(source, info, now);
                true
            }
            Ok(_) => false,
            Err(e) => {
                log::trace!("ignoring datagram from {}: {}", source, e);
                false
            }
        }
    }

    pub fn on_beacon(&mut self, source: SocketAddr, info: ServerInfoMessage, now: Instant) {
        let addr = SocketAddr::new(source.ip(), info.port);
        if !self.servers.contains_key(&addr) {
            log::info!("discovered server '{}' at {}", info.name, addr);
        }
        self.servers.insert(
            addr,
            DiscoveredServer {
                addr,
                info,
                last_seen: now,
            },
        );
    }

    /// Forgets servers whose last beacon is older than the maximum age.
    pub fn expire(&mut self, now: Instant) {
        let max_age = self.max_age;
        self.servers.retain(|addr, server| {
            let fresh = now.saturating_duration_since(server.last_seen) <= max_age;
            if !fresh {
                log::debug!("server at {} went quiet", addr);
            }
            fresh
        });
    }

    /// Known servers, by name then address.
    pub fn servers(&self) -> Vec<&DiscoveredServer> {
        let mut servers: Vec<_> = self.servers.values().collect();
        servers.sort_by(|a, b| a.info.name.cmp(&b.info.name).then(a.addr.cmp(&b.addr)));
        servers
    }

    /// First server that still has room.
    pub fn first_open(&self) -> Option<&DiscoveredServer> {
        self.servers().into_iter().find(|s| !s.info.is_full())
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(last: u8) -> SocketAddr {
        SocketAddr::from(([192, 168, 1, last], 50000))
    }

    #[test]
    fn beacon_timer_fires_once_per_interval() {
        let mut timer = BeaconTimer::new(Duration::from_secs(1));
        let start = Instant::now();
        assert!(timer.due(start));
        assert!(!timer.due(start + Duration::from_millis(999)));
        assert!(timer.due(start + Duration::from_secs(1)));
    }

    #[test]
    fn beacons_are_keyed_by_game_address() {
        let mut browser = ServerBrowser::default();
        let now = Instant::now();
        let beacon = encode_beacon(&ServerInfoMessage::new("alpha", 27015, 1, 8)).unwrap();

        assert!(browser.handle_datagram(&beacon, source(2), now));
        assert!(browser.handle_datagram(&beacon, source(2), now));
        assert!(!browser.handle_datagram(b"junk", source(3), now));

        let servers = browser.servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].addr, SocketAddr::from(([192, 168, 1, 2], 27015)));
        assert_eq!(servers[0].info.players, 1);
    }

    #[test]
    fn stale_servers_expire_and_full_ones_are_skipped() {
        let mut browser = ServerBrowser::new(Duration::from_secs(5));
        let start = Instant::now();
        browser.on_beacon(source(2), ServerInfoMessage::new("full", 27015, 4, 4), start);
        browser.on_beacon(
            source(3),
            ServerInfoMessage::new("open", 27015, 0, 4),
            start + Duration::from_secs(4),
        );

        assert_eq!(browser.first_open().map(|s| s.info.name.as_str()), Some("open"));

        browser.expire(start + Duration::from_secs(6));
        assert_eq!(browser.len(), 1);
        browser.expire(start + Duration::from_secs(10));
        assert!(browser.is_empty());
    }
}
