use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Artificial loss and latency applied to outgoing datagrams.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn should_drop(&self, rng: &mut impl Rng) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.random::<f32>() * 100.0 < self.loss_percent
    }

    pub fn delay(&self, rng: &mut impl Rng) -> Duration {
        if !self.enabled || self.max_latency_ms == 0 {
            return Duration::ZERO;
        }
        let base = self.min_latency_ms.min(self.max_latency_ms);
        let latency = rng.random_range(base..=self.max_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.random_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(u64::from(latency + jitter))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
    pub packet_loss_percent: f32,
    pub reliable_resent: u64,
    pub stale_discarded: u64,
    pub unknown_discarded: u64,
    pub unreliable_dropped: u64,
    pub malformed: u64,
}

impl NetworkStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn update_loss(&mut self) {
        self.packet_loss_percent = if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_lost as f32 / self.packets_sent as f32 * 100.0
        };
    }

    /// Adds the counters of `other` into `self`; RTT figures are averaged by the caller.
    pub fn accumulate(&mut self, other: &NetworkStats) {
        self.packets_sent += other.packets_sent;
        self.packets_received += other.packets_received;
        self.packets_lost += other.packets_lost;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.reliable_resent += other.reliable_resent;
        self.stale_discarded += other.stale_discarded;
        self.unknown_discarded += other.unknown_discarded;
        self.unreliable_dropped += other.unreliable_dropped;
        self.malformed += other.malformed;
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn disabled_simulation_is_transparent() {
        let mut rng = StdRng::seed_from_u64(1);
        let sim = PacketLossSimulation {
            enabled: false,
            loss_percent: 100.0,
            max_latency_ms: 500,
            ..Default::default()
        };
        assert!(!sim.should_drop(&mut rng));
        assert_eq!(sim.delay(&mut rng), Duration::ZERO);
    }

    #[test]
    fn latency_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 0.0,
            min_latency_ms: 20,
            max_latency_ms: 40,
            jitter_ms: 5,
        };
        for _ in 0..200 {
            let delay = sim.delay(&mut rng);
            assert!(delay >= Duration::from_millis(20));
            assert!(delay <= Duration::from_millis(45));
            assert!(!sim.should_drop(&mut rng));
        }
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut rng = StdRng::seed_from_u64(3);
        let sim = PacketLossSimulation {
            enabled: true,
            loss_percent: 100.0,
            ..Default::default()
        };
        assert!((0..100).all(|_| sim.should_drop(&mut rng)));
    }

    #[test]
    fn loss_percent_from_counters() {
        let mut stats = NetworkStats::default();
        for _ in 0..4 {
            stats.record_sent(100);
        }
        stats.packets_lost = 1;
        stats.update_loss();
        assert_eq!(stats.packet_loss_percent, 25.0);
        assert_eq!(stats.bytes_sent, 400);
    }
}
