use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::protocol::sequence_greater_than;

/// Number of earlier sequences acknowledged through `ack_bits`.
pub const ACK_WINDOW: u16 = 32;

#[derive(Debug, Clone)]
pub struct PendingPacket {
    pub sequence: u16,
    pub send_time: Instant,
    pub acked: bool,
}

/// Outgoing packets awaiting acknowledgment, and the RTT estimate their acks produce.
#[derive(Debug)]
pub struct AckTracker {
    pending: VecDeque<PendingPacket>,
    max_pending: usize,
    srtt: f32,
    rtt_var: f32,
    has_sample: bool,
    lost: u64,
}

impl AckTracker {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::with_capacity(max_pending),
            max_pending,
            srtt: 100.0,
            rtt_var: 50.0,
            has_sample: false,
            lost: 0,
        }
    }

    pub fn track_packet(&mut self, sequence: u16, now: Instant) {
        while self.pending.len() >= self.max_pending {
            if let Some(dropped) = self.pending.pop_front() {
                if !dropped.acked {
                    self.lost += 1;
                }
            }
        }

        self.pending.push_back(PendingPacket {
            sequence,
            send_time: now,
            acked: false,
        });
    }

    /// Marks every tracked packet covered by `ack`/`ack_bits` and returns their
    /// sequences. Packets that fell out of the ack window unacknowledged count as lost.
    pub fn process_ack(&mut self, ack: u16, ack_bits: u32, now: Instant) -> Vec<u16> {
        let mut acked_sequences = Vec::new();
        let mut rtt_samples = Vec::new();

        for pending in &mut self.pending {
            if pending.acked {
                continue;
            }

            let is_acked = if pending.sequence == ack {
                true
            } else if sequence_greater_than(ack, pending.sequence) {
                let diff = ack.wrapping_sub(pending.sequence);
                diff <= ACK_WINDOW && (ack_bits & (1 << (diff - 1))) != 0
            } else {
                false
            };

            if is_acked {
                pending.acked = true;
                acked_sequences.push(pending.sequence);

                let rtt = now.duration_since(pending.send_time).as_secs_f32() * 1000.0;
                rtt_samples.push(rtt);
            }
        }

        for rtt in rtt_samples {
            self.update_rtt(rtt);
        }

        while let Some(front) = self.pending.front() {
            let expired = sequence_greater_than(ack, front.sequence)
                && ack.wrapping_sub(front.sequence) > ACK_WINDOW;
            if !front.acked && !expired {
                break;
            }
            if !front.acked {
                self.lost += 1;
            }
            self.pending.pop_front();
        }

        acked_sequences
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        if !self.has_sample {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.has_sample = true;
            return;
        }

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    /// Smoothed round trip in milliseconds.
    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn srtt_duration(&self) -> Duration {
        Duration::from_secs_f32(self.srtt.max(0.0) / 1000.0)
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn has_sample(&self) -> bool {
        self.has_sample
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn unacked_count(&self) -> usize {
        self.pending.iter().filter(|p| !p.acked).count()
    }
}

/// Incoming sequences, for duplicate rejection and the ack fields of outgoing packets.
#[derive(Debug)]
pub struct ReceiveTracker {
    last_received: u16,
    received_bitfield: u32,
    recent_sequences: VecDeque<u16>,
    max_recent: usize,
    any_received: bool,
}

impl Default for ReceiveTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self {
            last_received: 0,
            received_bitfield: 0,
            recent_sequences: VecDeque::with_capacity(128),
            max_recent: 128,
            any_received: false,
        }
    }

    /// Returns false for a duplicate or a sequence too old to tell apart from one.
    pub fn record_received(&mut self, sequence: u16) -> bool {
        if self.recent_sequences.contains(&sequence) {
            return false;
        }

        if !self.any_received {
            self.any_received = true;
            self.last_received = sequence;
            self.received_bitfield = 0;
        } else if sequence_greater_than(sequence, self.last_received) {
            let diff = sequence.wrapping_sub(self.last_received);
            if diff <= ACK_WINDOW {
                self.received_bitfield = self
                    .received_bitfield
                    .checked_shl(diff as u32)
                    .unwrap_or(0)
                    | (1 << (diff - 1));
            } else {
                self.received_bitfield = 0;
            }
            self.last_received = sequence;
        } else {
            let diff = self.last_received.wrapping_sub(sequence);
            if diff > self.max_recent as u16 {
                return false;
            }
            if diff <= ACK_WINDOW {
                self.received_bitfield |= 1 << (diff - 1);
            }
        }

        if self.recent_sequences.len() >= self.max_recent {
            self.recent_sequences.pop_front();
        }
        self.recent_sequences.push_back(sequence);

        true
    }

    /// Latest sequence and the bitfield of the `ACK_WINDOW` sequences before it.
    pub fn ack_data(&self) -> (u16, u32) {
        if self.any_received {
            (self.last_received, self.received_bitfield)
        } else {
            (u16::MAX, 0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_tracker_bitfield() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(1);
        tracker.record_received(2);
        tracker.record_received(3);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        tracker.record_received(3);
        tracker.record_received(1);
        tracker.record_received(2);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 3);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(1));
        assert!(!tracker.record_received(1));
        assert!(tracker.record_received(2));
    }

    #[test]
    fn receive_tracker_wraps() {
        let mut tracker = ReceiveTracker::new();
        tracker.record_received(u16::MAX - 1);
        tracker.record_received(u16::MAX);
        tracker.record_received(0);

        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 0);
        assert_eq!(bitfield & 0b11, 0b11);
    }

    #[test]
    fn gap_leaves_holes_in_bitfield() {
        let mut tracker = ReceiveTracker::new();
        tracker.record_received(10);
        tracker.record_received(13);
        let (ack, bitfield) = tracker.ack_data();
        assert_eq!(ack, 13);
        assert_eq!(bitfield & 0b111, 0b100);
    }

    #[test]
    fn test_ack_tracker_rtt() {
        let mut tracker = AckTracker::new(32);
        let start = Instant::now();

        tracker.track_packet(1, start);
        let acked = tracker.process_ack(1, 0, start + Duration::from_millis(40));

        assert_eq!(acked, vec![1]);
        assert!((tracker.srtt() - 40.0).abs() < 0.5);
        assert!(tracker.has_sample());
    }

    #[test]
    fn ack_bits_cover_earlier_packets() {
        let mut tracker = AckTracker::new(64);
        let start = Instant::now();
        for sequence in 0..4 {
            tracker.track_packet(sequence, start);
        }

        let acked = tracker.process_ack(3, 0b101, start + Duration::from_millis(10));
        assert_eq!(acked, vec![0, 2, 3]);
        assert_eq!(tracker.unacked_count(), 1);
    }

    #[test]
    fn packets_outside_the_window_are_lost() {
        let mut tracker = AckTracker::new(128);
        let start = Instant::now();
        for sequence in 0..40 {
            tracker.track_packet(sequence, start);
        }

        tracker.process_ack(39, 0, start);
        assert_eq!(tracker.lost(), 39 - ACK_WINDOW as u64);
    }
}
