use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::message::{BufferPool, Message, MessageType};

use super::protocol::sequence_greater_than;

/// Packets whose reliable contents are remembered for acknowledgment.
const IN_FLIGHT_PACKETS: usize = 256;

/// Delay before the `attempts + 1`th send of an unacknowledged message.
pub fn resend_delay(srtt: Duration, attempts: u32, min: Duration, max: Duration) -> Duration {
    let base = (srtt * 3 / 2).clamp(min, max);
    let doublings = attempts.saturating_sub(1).min(16);
    base.saturating_mul(1 << doublings).min(max)
}

#[derive(Debug)]
struct UnackedMessage {
    id: u16,
    message_type: MessageType,
    payload: Vec<u8>,
    attempts: u32,
    /// `None` until the first send.
    next_send: Option<Instant>,
    acked: bool,
}

/// Outgoing reliable messages, kept and resent until a packet carrying them is acked.
///
/// Ids are assigned contiguously, so the queue position of a message is its id minus
/// the id at the front.
#[derive(Debug)]
pub struct ReliableSender {
    unacked: VecDeque<UnackedMessage>,
    outstanding: usize,
    next_id: u16,
    in_flight: VecDeque<(u16, Vec<u16>)>,
    resent: u64,
}

impl Default for ReliableSender {
    fn default() -> Self {
        Self::new()
    }
}

impl ReliableSender {
    pub fn new() -> Self {
        Self {
            unacked: VecDeque::new(),
            outstanding: 0,
            next_id: 0,
            in_flight: VecDeque::with_capacity(IN_FLIGHT_PACKETS),
            resent: 0,
        }
    }

    /// Messages enqueued and not yet acknowledged.
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn resent(&self) -> u64 {
        self.resent
    }

    pub fn push(&mut self, message_type: MessageType, payload: Vec<u8>) -> u16 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.unacked.push_back(UnackedMessage {
            id,
            message_type,
            payload,
            attempts: 0,
            next_send: None,
            acked: false,
        });
        self.outstanding += 1;
        id
    }

    fn index_of(&self, id: u16) -> Option<usize> {
        let front = self.unacked.front()?.id;
        let index = id.wrapping_sub(front) as usize;
        (index < self.unacked.len()).then_some(index)
    }

    /// Ids of messages never sent or whose resend time has come, oldest first.
    pub fn due(&self, now: Instant) -> Vec<u16> {
        self.unacked
            .iter()
            .filter(|m| !m.acked && m.next_send.is_none_or(|at| at <= now))
            .map(|m| m.id)
            .collect()
    }

    /// Whether a due message has already been sent `max_attempts` times.
    pub fn exhausted(&self, now: Instant, max_attempts: u32) -> bool {
        self.unacked.iter().any(|m| {
            !m.acked && m.attempts >= max_attempts && m.next_send.is_some_and(|at| at <= now)
        })
    }

    pub fn get(&self, id: u16) -> Option<(MessageType, &[u8])> {
        let message = &self.unacked[self.index_of(id)?];
        (!message.acked).then_some((message.message_type, message.payload.as_slice()))
    }

    /// Records that the messages `ids` went out in packet `sequence`.
    pub fn mark_sent(
        &mut self,
        sequence: u16,
        ids: Vec<u16>,
        now: Instant,
        delay: impl Fn(u32) -> Duration,
    ) {
        for &id in &ids {
            let Some(index) = self.index_of(id) else {
                continue;
            };
            let message = &mut self.unacked[index];
            if message.attempts > 0 {
                self.resent += 1;
            }
            message.attempts += 1;
            message.next_send = Some(now + delay(message.attempts));
        }

        if self.in_flight.len() >= IN_FLIGHT_PACKETS {
            self.in_flight.pop_front();
        }
        self.in_flight.push_back((sequence, ids));
    }

    /// Acknowledges every message carried by packet `sequence`. Returns how many were
    /// newly acknowledged; their payload buffers go back to `pool`.
    pub fn on_packet_acked(&mut self, sequence: u16, pool: &mut BufferPool) -> usize {
        let Some(position) = self.in_flight.iter().position(|(s, _)| *s == sequence) else {
            return 0;
        };
        let Some((_, ids)) = self.in_flight.remove(position) else {
            return 0;
        };

        let mut newly_acked = 0;
        for id in ids {
            let Some(index) = self.index_of(id) else {
                continue;
            };
            let message = &mut self.unacked[index];
            if !message.acked {
                message.acked = true;
                pool.release(std::mem::take(&mut message.payload));
                newly_acked += 1;
            }
        }
        self.outstanding -= newly_acked;

        while self.unacked.front().is_some_and(|m| m.acked) {
            self.unacked.pop_front();
        }
        newly_acked
    }

    /// Drops everything, returning payloads to `pool`.
    pub fn clear(&mut self, pool: &mut BufferPool) {
        for message in self.unacked.drain(..) {
            pool.release(message.payload);
        }
        self.in_flight.clear();
        self.outstanding = 0;
    }
}

/// Reorders incoming reliable messages and hands them out exactly once, in id order.
#[derive(Debug)]
pub struct ReliableReceiver {
    next_expected: u16,
    buffer: HashMap<u16, Message>,
    window: u16,
}

impl ReliableReceiver {
    pub fn new(window: u16) -> Self {
        Self {
            next_expected: 0,
            buffer: HashMap::new(),
            window,
        }
    }

    /// Buffers `message` unless it was already delivered, is already buffered, or lies
    /// beyond the receive window. Returns whether it was kept.
    pub fn receive(&mut self, id: u16, message: Message) -> bool {
        let ahead = id == self.next_expected || sequence_greater_than(id, self.next_expected);
        if !ahead || id.wrapping_sub(self.next_expected) >= self.window {
            return false;
        }
        if self.buffer.contains_key(&id) {
            return false;
        }
        self.buffer.insert(id, message);
        true
    }

    /// The next message in order, if it has arrived.
    pub fn pop(&mut self) -> Option<(u16, Message)> {
        let id = self.next_expected;
        let message = self.buffer.remove(&id)?;
        self.next_expected = self.next_expected.wrapping_add(1);
        Some((id, message))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{ClientSyncedMessage, EntityRemoveMessage};
    use crate::net::NetworkId;

    const MIN: Duration = Duration::from_millis(50);
    const MAX: Duration = Duration::from_secs(1);

    fn remove(raw: u16) -> Message {
        EntityRemoveMessage::new(NetworkId::from_raw(raw)).into()
    }

    #[test]
    fn resend_delay_backs_off_to_the_cap() {
        let srtt = Duration::from_millis(100);
        assert_eq!(resend_delay(srtt, 1, MIN, MAX), Duration::from_millis(150));
        assert_eq!(resend_delay(srtt, 2, MIN, MAX), Duration::from_millis(300));
        assert_eq!(resend_delay(srtt, 3, MIN, MAX), Duration::from_millis(600));
        assert_eq!(resend_delay(srtt, 4, MIN, MAX), MAX);
        assert_eq!(resend_delay(srtt, 40, MIN, MAX), MAX);
        assert_eq!(resend_delay(Duration::ZERO, 1, MIN, MAX), MIN);
    }

    #[test]
    fn messages_resend_until_acked() {
        let mut pool = BufferPool::new(16, 8);
        let mut sender = ReliableSender::new();
        let start = Instant::now();
        let delay = |_| Duration::from_millis(100);

        let first = sender.push(MessageType::EntityRemove, vec![1, 0]);
        let second = sender.push(MessageType::ClientSynced, Vec::new());
        assert_eq!(sender.due(start), vec![first, second]);

        sender.mark_sent(0, vec![first, second], start, delay);
        assert!(sender.due(start + Duration::from_millis(50)).is_empty());

        let later = start + Duration::from_millis(100);
        assert_eq!(sender.due(later), vec![first, second]);
        sender.mark_sent(1, vec![first, second], later, delay);
        assert_eq!(sender.resent(), 2);

        assert_eq!(sender.on_packet_acked(0, &mut pool), 2);
        assert_eq!(sender.outstanding(), 0);
        assert!(sender.get(first).is_none());
        assert_eq!(sender.on_packet_acked(1, &mut pool), 0);
        assert!(sender.due(later + MAX).is_empty());
    }

    #[test]
    fn out_of_order_acks_keep_queue_consistent() {
        let mut pool = BufferPool::new(16, 8);
        let mut sender = ReliableSender::new();
        let now = Instant::now();
        let ids: Vec<_> = (0..3)
            .map(|_| sender.push(MessageType::EntityRemove, vec![0, 0]))
            .collect();
        for (sequence, id) in ids.iter().enumerate() {
            sender.mark_sent(sequence as u16, vec![*id], now, |_| MAX);
        }

        sender.on_packet_acked(2, &mut pool);
        assert_eq!(sender.outstanding(), 2);
        assert!(sender.get(ids[0]).is_some());
        assert!(sender.get(ids[2]).is_none());

        sender.on_packet_acked(0, &mut pool);
        sender.on_packet_acked(1, &mut pool);
        assert_eq!(sender.outstanding(), 0);
    }

    #[test]
    fn exhaustion_only_counts_due_messages() {
        let mut sender = ReliableSender::new();
        let now = Instant::now();
        let id = sender.push(MessageType::ClientSynced, Vec::new());
        for attempt in 0..3u16 {
            let at = now + Duration::from_millis(attempt as u64 * 10);
            sender.mark_sent(attempt, vec![id], at, |_| Duration::from_millis(10));
        }
        assert!(!sender.exhausted(now, 3));
        assert!(sender.exhausted(now + Duration::from_millis(30), 3));
        assert!(!sender.exhausted(now + Duration::from_millis(30), 4));
    }

    #[test]
    fn receiver_delivers_in_order_once() {
        let mut receiver = ReliableReceiver::new(1024);

        assert!(receiver.receive(1, remove(1)));
        assert!(receiver.pop().is_none());
        assert!(!receiver.receive(1, remove(1)));

        assert!(receiver.receive(0, ClientSyncedMessage.into()));
        assert_eq!(receiver.pop().map(|(id, _)| id), Some(0));
        assert_eq!(receiver.pop(), Some((1, remove(1))));
        assert!(receiver.pop().is_none());

        assert!(!receiver.receive(0, remove(0)));
        assert!(!receiver.receive(60000, remove(2)));
        assert!(!receiver.receive(2 + 1024, remove(2)));
        assert_eq!(receiver.buffered(), 0);
    }
}
