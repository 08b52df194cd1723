use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use super::protocol::MAX_PACKET_SIZE;
use super::simulator::LinkSimulator;
use super::stats::{NetworkStats, PacketLossSimulation};

/// Non-blocking UDP socket moving raw datagrams, with optional link simulation on send.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    simulator: Option<LinkSimulator>,
    running: Arc<AtomicBool>,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            simulator: None,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_broadcast(&self, broadcast: bool) -> io::Result<()> {
        self.socket.set_broadcast(broadcast)
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    /// Routes outgoing datagrams through a link simulator; a disabled config removes it.
    pub fn set_simulation(&mut self, simulation: PacketLossSimulation) {
        if simulation.enabled {
            log::info!(
                "simulating {:.1}% loss, {}-{}ms latency, {}ms jitter",
                simulation.loss_percent,
                simulation.min_latency_ms,
                simulation.max_latency_ms,
                simulation.jitter_ms
            );
            self.simulator = Some(LinkSimulator::new(simulation));
        } else {
            self.simulator = None;
        }
    }

    pub fn send_to(&mut self, datagram: &[u8], addr: SocketAddr) -> io::Result<usize> {
        if datagram.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Packet exceeds MTU",
            ));
        }

        if let Some(simulator) = &mut self.simulator {
            if !simulator.submit(datagram.to_vec(), addr, Instant::now()) {
                self.stats.packets_lost += 1;
            }
            return Ok(datagram.len());
        }

        let bytes = self.socket.send_to(datagram, addr)?;
        self.stats.record_sent(bytes);
        Ok(bytes)
    }

    /// Sends simulated datagrams whose latency has elapsed.
    pub fn poll_simulation(&mut self, now: Instant) -> io::Result<()> {
        let Some(simulator) = &mut self.simulator else {
            return Ok(());
        };
        for (datagram, addr) in simulator.take_due(now) {
            let bytes = self.socket.send_to(&datagram, addr)?;
            self.stats.record_sent(bytes);
        }
        Ok(())
    }

    /// Drains every datagram currently queued on the socket.
    pub fn receive(&mut self) -> io::Result<Vec<(Vec<u8>, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    self.stats.record_received(size);
                    datagrams.push((self.recv_buffer[..size].to_vec(), addr));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_datagram_is_refused() {
        let mut endpoint = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let target = endpoint.local_addr();
        let err = endpoint
            .send_to(&vec![0u8; MAX_PACKET_SIZE + 1], target)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn loopback_datagram_roundtrip() {
        let mut a = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut b = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        a.send_to(b"ping", b.local_addr()).unwrap();

        let mut received = Vec::new();
        for _ in 0..100 {
            received.extend(b.receive().unwrap());
            if !received.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(received, vec![(b"ping".to_vec(), a.local_addr())]);
        assert_eq!(b.stats().packets_received, 1);
    }
}
