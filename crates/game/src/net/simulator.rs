use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::stats::PacketLossSimulation;

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    /// Breaks release-time ties in submission order.
    order: u64,
    datagram: Vec<u8>,
    addr: SocketAddr,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time && self.order == other.order
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other
            .release_time
            .cmp(&self.release_time)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// Drops and delays datagrams according to a [`PacketLossSimulation`], optionally
/// overridden per destination.
#[derive(Debug)]
pub struct LinkSimulator {
    default: PacketLossSimulation,
    overrides: HashMap<SocketAddr, PacketLossSimulation>,
    rng: StdRng,
    queue: BinaryHeap<DelayedDatagram>,
    submitted: u64,
    dropped: u64,
}

impl LinkSimulator {
    pub fn new(default: PacketLossSimulation) -> Self {
        Self::with_rng(default, StdRng::from_os_rng())
    }

    /// Reproducible loss and latency.
    pub fn seeded(default: PacketLossSimulation, seed: u64) -> Self {
        Self::with_rng(default, StdRng::seed_from_u64(seed))
    }

    fn with_rng(default: PacketLossSimulation, rng: StdRng) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            rng,
            queue: BinaryHeap::new(),
            submitted: 0,
            dropped: 0,
        }
    }

    pub fn set_config(&mut self, addr: SocketAddr, config: PacketLossSimulation) {
        if config.enabled {
            self.overrides.insert(addr, config);
        } else {
            self.overrides.remove(&addr);
        }
    }

    pub fn config_for(&self, addr: &SocketAddr) -> &PacketLossSimulation {
        self.overrides.get(addr).unwrap_or(&self.default)
    }

    /// Queues `datagram` for release after the simulated latency, or drops it.
    /// Returns false if it was dropped.
    pub fn submit(&mut self, datagram: Vec<u8>, addr: SocketAddr, now: Instant) -> bool {
        let config = self.overrides.get(&addr).unwrap_or(&self.default);
        if config.should_drop(&mut self.rng) {
            self.dropped += 1;
            return false;
        }
        let delay = config.delay(&mut self.rng);

        self.submitted += 1;
        self.queue.push(DelayedDatagram {
            release_time: now + delay,
            order: self.submitted,
            datagram,
            addr,
        });
        true
    }

    /// Datagrams whose release time has come, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut due = Vec::new();
        while self.queue.peek().is_some_and(|d| d.release_time <= now) {
            if let Some(delayed) = self.queue.pop() {
                due.push((delayed.datagram, delayed.addr));
            }
        }
        due
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn zero_latency_releases_immediately_in_order() {
        let mut sim = LinkSimulator::seeded(PacketLossSimulation::default(), 1);
        let now = Instant::now();
        for byte in 0..4u8 {
            assert!(sim.submit(vec![byte], addr(1), now));
        }
        let due: Vec<u8> = sim.take_due(now).into_iter().map(|(d, _)| d[0]).collect();
        assert_eq!(due, vec![0, 1, 2, 3]);
    }

    #[test]
    fn latency_holds_datagrams_back() {
        let config = PacketLossSimulation {
            enabled: true,
            min_latency_ms: 50,
            max_latency_ms: 50,
            ..Default::default()
        };
        let mut sim = LinkSimulator::seeded(config, 2);
        let now = Instant::now();
        sim.submit(vec![1], addr(1), now);

        assert!(sim.take_due(now + Duration::from_millis(49)).is_empty());
        assert_eq!(sim.take_due(now + Duration::from_millis(50)).len(), 1);
        assert_eq!(sim.pending(), 0);
    }

    #[test]
    fn per_destination_override() {
        let mut sim = LinkSimulator::seeded(PacketLossSimulation::default(), 3);
        let lossy = PacketLossSimulation {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        };
        sim.set_config(addr(2), lossy);

        let now = Instant::now();
        assert!(sim.submit(vec![0], addr(1), now));
        assert!(!sim.submit(vec![0], addr(2), now));
        assert_eq!(sim.dropped(), 1);

        sim.set_config(addr(2), PacketLossSimulation::default());
        assert!(sim.submit(vec![0], addr(2), now));
    }
}
