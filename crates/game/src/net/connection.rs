use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::codec::{BufferReader, BufferWriter, CodecError};
use crate::message::{BufferPool, Message, MessageType};

use super::identity::NetworkId;
use super::protocol::{
    DataHeader, MAX_PACKET_SIZE, PREFIX_LEN, Packet, PacketKind, WIRE_BYTE_ORDER,
    sequence_greater_than, write_prefix,
};
use super::reliable::{ReliableReceiver, ReliableSender, resend_delay};
use super::stats::NetworkStats;
use super::tracking::{AckTracker, ReceiveTracker};

/// Largest encoded payload of a single message. Messages are never split, so one must
/// fit in an otherwise empty data datagram.
pub const MAX_MESSAGE_SIZE: usize = MAX_PACKET_SIZE - PREFIX_LEN - DataHeader::LEN - 1 - 3;

const RELIABLE_COUNT_POSITION: usize = PREFIX_LEN + DataHeader::LEN;
const PACKET_BODY_START: usize = RELIABLE_COUNT_POSITION + 1;
const RELIABLE_WINDOW: u16 = 1024;
const TRACKED_PACKETS: usize = 256;
/// Per-type unreliable stamps older than this no longer order anything, so the
/// wrapping stamp comparison cannot misfire for a type that went quiet.
const STAMP_MEMORY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Connected,
    Disconnecting,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    Graceful = 0,
    Timeout = 1,
    Kicked = 2,
    ReliableFailure = 3,
    Overflow = 4,
    Corrupt = 5,
    ServerShutdown = 6,
}

impl DisconnectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "left",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::Kicked => "kicked",
            DisconnectReason::ReliableFailure => "stopped acknowledging",
            DisconnectReason::Overflow => "send backlog overflow",
            DisconnectReason::Corrupt => "sent corrupt data",
            DisconnectReason::ServerShutdown => "server shut down",
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for DisconnectReason {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => DisconnectReason::Graceful,
            1 => DisconnectReason::Timeout,
            2 => DisconnectReason::Kicked,
            3 => DisconnectReason::ReliableFailure,
            4 => DisconnectReason::Overflow,
            5 => DisconnectReason::Corrupt,
            6 => DisconnectReason::ServerShutdown,
            _ => return Err(CodecError::InvalidValue("disconnect reason")),
        })
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is closed")]
    Closed,
    #[error("reliable send backlog is full")]
    ReliableBacklogFull,
    #[error("message of {size} bytes exceeds maximum of {max}")]
    MessageTooLarge { size: usize, max: usize },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Silence after which the peer is considered gone.
    pub timeout: Duration,
    pub keep_alive_interval: Duration,
    pub min_resend_delay: Duration,
    pub max_resend_delay: Duration,
    pub max_resend_attempts: u32,
    pub max_reliable_backlog: usize,
    pub max_unreliable_backlog: usize,
    pub max_malformed_packets: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_millis(250),
            min_resend_delay: Duration::from_millis(50),
            max_resend_delay: Duration::from_secs(1),
            max_resend_attempts: 20,
            max_reliable_backlog: RELIABLE_WINDOW as usize,
            max_unreliable_backlog: 512,
            max_malformed_packets: 16,
        }
    }
}

#[derive(Debug)]
struct QueuedUnreliable {
    message_type: MessageType,
    payload: Vec<u8>,
}

/// Decoded contents of one data datagram.
#[derive(Debug)]
struct DataPacket {
    header: DataHeader,
    reliable: Vec<(u16, Message)>,
    unreliable: Vec<Message>,
}

impl DataPacket {
    fn decode(body: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BufferReader::new(body, WIRE_BYTE_ORDER);
        let header = DataHeader::read(&mut reader)?;

        let reliable_count = reader.read_u8()?;
        let mut reliable = Vec::with_capacity(reliable_count as usize);
        for _ in 0..reliable_count {
            let id = reader.read_u16()?;
            let message_type = MessageType::try_from(reader.read_u8()?)?;
            if !message_type.is_reliable() {
                return Err(CodecError::InvalidValue("unreliable message in reliable section"));
            }
            reliable.push((id, Message::deserialize(message_type, &mut reader)?));
        }

        let mut unreliable = Vec::new();
        while !reader.is_empty() {
            let message_type = MessageType::try_from(reader.read_u8()?)?;
            let count = reader.read_u8()?;
            if message_type.is_reliable() {
                return Err(CodecError::InvalidValue("reliable message in unreliable group"));
            }
            if count == 0 || (count > 1 && !message_type.is_batched()) {
                return Err(CodecError::InvalidValue("unreliable group count"));
            }
            for _ in 0..count {
                unreliable.push(Message::deserialize(message_type, &mut reader)?);
            }
        }

        Ok(Self {
            header,
            reliable,
            unreliable,
        })
    }
}

/// Fills data datagrams up to `MAX_PACKET_SIZE`, starting a new one whenever the next
/// message does not fit.
struct PacketBuilder<'a> {
    pool: &'a mut BufferPool,
    header: DataHeader,
    writer: BufferWriter,
    reliable_count: u8,
    reliable_ids: Vec<u16>,
    /// Count position, count and type of the unreliable group being filled.
    group: Option<(usize, u8, MessageType)>,
    finished: Vec<(u16, Vec<u8>, Vec<u16>)>,
}

impl<'a> PacketBuilder<'a> {
    fn new(pool: &'a mut BufferPool, header: DataHeader) -> Result<Self, CodecError> {
        let writer = Self::start(pool, &header)?;
        Ok(Self {
            pool,
            header,
            writer,
            reliable_count: 0,
            reliable_ids: Vec::new(),
            group: None,
            finished: Vec::new(),
        })
    }

    fn start(pool: &mut BufferPool, header: &DataHeader) -> Result<BufferWriter, CodecError> {
        let mut writer = BufferWriter::from_vec(pool.acquire(), MAX_PACKET_SIZE, WIRE_BYTE_ORDER);
        write_prefix(&mut writer, PacketKind::Data)?;
        header.write(&mut writer)?;
        writer.write_u8(0)?;
        Ok(writer)
    }

    fn is_blank(&self) -> bool {
        self.writer.position() == PACKET_BODY_START
    }

    fn close_group(&mut self) -> Result<(), CodecError> {
        if let Some((position, count, _)) = self.group.take() {
            self.writer.set_u8(position, count)?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CodecError> {
        self.close_group()?;
        self.writer.set_u8(RELIABLE_COUNT_POSITION, self.reliable_count)?;

        let sequence = self.header.sequence;
        self.header.sequence = sequence.wrapping_add(1);
        let next = Self::start(self.pool, &self.header)?;
        let datagram = std::mem::replace(&mut self.writer, next).into_inner();

        self.finished
            .push((sequence, datagram, std::mem::take(&mut self.reliable_ids)));
        self.reliable_count = 0;
        Ok(())
    }

    fn push_reliable(
        &mut self,
        id: u16,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<(), CodecError> {
        loop {
            let written = self.reliable_count < u8::MAX
                && self
                    .writer
                    .try_write(|w| {
                        w.write_u16(id)?;
                        w.write_u8(message_type as u8)?;
                        w.write_bytes(payload)
                    })
                    .is_ok();
            if written {
                self.reliable_count += 1;
                self.reliable_ids.push(id);
                return Ok(());
            }
            if self.is_blank() {
                return Err(CodecError::OutOfRange {
                    needed: payload.len() + 3,
                    remaining: self.writer.remaining(),
                });
            }
            self.finish()?;
        }
    }

    fn push_unreliable(&mut self, message_type: MessageType, payload: &[u8]) -> Result<(), CodecError> {
        loop {
            match self.group {
                Some((position, count, group_type))
                    if group_type == message_type && message_type.is_batched() && count < u8::MAX =>
                {
                    if self.writer.try_write(|w| w.write_bytes(payload)).is_ok() {
                        self.group = Some((position, count + 1, group_type));
                        return Ok(());
                    }
                }
                _ => {
                    self.close_group()?;
                    let position = self.writer.position() + 1;
                    let written = self.writer.try_write(|w| {
                        w.write_u8(message_type as u8)?;
                        w.write_u8(1)?;
                        w.write_bytes(payload)
                    });
                    if written.is_ok() {
                        self.group = Some((position, 1, message_type));
                        return Ok(());
                    }
                    if self.is_blank() {
                        return Err(CodecError::OutOfRange {
                            needed: payload.len() + 2,
                            remaining: self.writer.remaining(),
                        });
                    }
                }
            }
            self.finish()?;
        }
    }

    /// Finishes the open datagram if it has content, or if `force` and nothing else
    /// was produced. Returns every finished datagram with its reliable ids.
    fn into_packets(mut self, force: bool) -> Result<Vec<(u16, Vec<u8>, Vec<u16>)>, CodecError> {
        if !self.is_blank() || (force && self.finished.is_empty()) {
            self.finish()?;
        }
        let leftover = std::mem::replace(
            &mut self.writer,
            BufferWriter::with_capacity(0, WIRE_BYTE_ORDER),
        );
        self.pool.release(leftover.into_inner());
        Ok(self.finished)
    }
}

/// One peer's delivery state: reliable and unreliable queues, sequence tracking,
/// acknowledgment, retransmission and liveness.
///
/// The connection never touches a socket. Datagrams go in through
/// [`Connection::receive`] and come out of [`Connection::flush`], and every
/// time-dependent call takes the current `Instant`.
#[derive(Debug)]
pub struct Connection {
    addr: SocketAddr,
    state: ConnectionState,
    config: ConnectionConfig,
    close_reason: Option<DisconnectReason>,
    close_reported: bool,
    last_receive: Instant,
    last_send: Option<Instant>,
    send_sequence: u16,
    stamp: u16,
    acks_owed: bool,
    ack_tracker: AckTracker,
    receive_tracker: ReceiveTracker,
    reliable_sender: ReliableSender,
    reliable_receiver: ReliableReceiver,
    unreliable: VecDeque<QueuedUnreliable>,
    last_stamps: [Option<(u16, Instant)>; MessageType::COUNT],
    pool: BufferPool,
    stats: NetworkStats,
    malformed: u32,
}

impl Connection {
    pub fn new(addr: SocketAddr, config: ConnectionConfig, now: Instant) -> Self {
        let max_pooled = config.max_reliable_backlog + config.max_unreliable_backlog;
        Self {
            addr,
            state: ConnectionState::Handshaking,
            config,
            close_reason: None,
            close_reported: false,
            last_receive: now,
            last_send: None,
            send_sequence: 0,
            stamp: 0,
            acks_owed: false,
            ack_tracker: AckTracker::new(TRACKED_PACKETS),
            receive_tracker: ReceiveTracker::new(),
            reliable_sender: ReliableSender::new(),
            reliable_receiver: ReliableReceiver::new(RELIABLE_WINDOW),
            unreliable: VecDeque::new(),
            last_stamps: [None; MessageType::COUNT],
            pool: BufferPool::new(MAX_PACKET_SIZE, max_pooled),
            stats: NetworkStats::default(),
            malformed: 0,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn close_reason(&self) -> Option<DisconnectReason> {
        self.close_reason
    }

    pub fn last_receive(&self) -> Instant {
        self.last_receive
    }

    /// Smoothed round trip in milliseconds.
    pub fn rtt_ms(&self) -> f32 {
        self.ack_tracker.srtt()
    }

    pub fn reliable_backlog(&self) -> usize {
        self.reliable_sender.outstanding()
    }

    pub fn unreliable_backlog(&self) -> usize {
        self.unreliable.len()
    }

    pub fn stats(&self) -> NetworkStats {
        let mut stats = self.stats.clone();
        stats.rtt_ms = self.ack_tracker.srtt();
        stats.rtt_variance = self.ack_tracker.rtt_var();
        stats.packets_lost = self.ack_tracker.lost();
        stats.reliable_resent = self.reliable_sender.resent();
        stats.update_loss();
        stats
    }

    pub fn mark_connected(&mut self, now: Instant) {
        if self.state == ConnectionState::Handshaking {
            self.state = ConnectionState::Connected;
            self.last_receive = now;
        }
    }

    /// Any datagram from the peer proves it is alive.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_receive {
            self.last_receive = now;
        }
    }

    /// Queues `message` for the next flush.
    ///
    /// Reliable messages beyond the backlog cap are refused and close the connection
    /// with [`DisconnectReason::Overflow`]. A full unreliable queue drops its oldest entry.
    pub fn enqueue(&mut self, message: &Message) -> Result<(), ConnectionError> {
        if matches!(
            self.state,
            ConnectionState::Disconnecting | ConnectionState::Closed
        ) {
            return Err(ConnectionError::Closed);
        }

        let message_type = message.message_type();
        let mut writer = BufferWriter::from_vec(self.pool.acquire(), MAX_PACKET_SIZE, WIRE_BYTE_ORDER);
        match message.serialize(&mut writer) {
            Ok(()) => {}
            Err(CodecError::OutOfRange { .. }) => {
                return Err(ConnectionError::MessageTooLarge {
                    size: encoded_len(message)?,
                    max: MAX_MESSAGE_SIZE,
                });
            }
            Err(e) => return Err(e.into()),
        }
        if writer.position() > MAX_MESSAGE_SIZE {
            return Err(ConnectionError::MessageTooLarge {
                size: writer.position(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let payload = writer.into_inner();

        if message_type.is_reliable() {
            if self.reliable_sender.outstanding() >= self.config.max_reliable_backlog {
                log::warn!(
                    "{}: reliable backlog of {} messages is full, closing",
                    self.addr,
                    self.reliable_sender.outstanding()
                );
                self.pool.release(payload);
                self.close(DisconnectReason::Overflow);
                return Err(ConnectionError::ReliableBacklogFull);
            }
            self.reliable_sender.push(message_type, payload);
        } else {
            if self.unreliable.len() >= self.config.max_unreliable_backlog {
                if let Some(dropped) = self.unreliable.pop_front() {
                    log::trace!("{}: dropping queued {:?}", self.addr, dropped.message_type);
                    self.pool.release(dropped.payload);
                    self.stats.unreliable_dropped += 1;
                }
            }
            self.unreliable.push_back(QueuedUnreliable {
                message_type,
                payload,
            });
        }
        Ok(())
    }

    /// Processes the body of a data datagram (everything after the prefix) and returns
    /// the messages ready for delivery, each with its reliable id or unreliable stamp.
    ///
    /// Malformed datagrams are dropped whole and never acknowledged.
    pub fn receive(&mut self, body: &[u8], now: Instant) -> Vec<(Message, u16)> {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }

        let packet = match DataPacket::decode(body) {
            Ok(packet) => packet,
            Err(e) => {
                self.malformed += 1;
                self.stats.malformed += 1;
                log::warn!("{}: dropping malformed packet: {}", self.addr, e);
                if self.malformed > self.config.max_malformed_packets {
                    self.close(DisconnectReason::Corrupt);
                }
                return Vec::new();
            }
        };

        self.stats.record_received(PREFIX_LEN + body.len());
        self.touch(now);

        if !self.receive_tracker.record_received(packet.header.sequence) {
            log::trace!("{}: duplicate packet {}", self.addr, packet.header.sequence);
            return Vec::new();
        }

        for sequence in self
            .ack_tracker
            .process_ack(packet.header.ack, packet.header.ack_bits, now)
        {
            self.reliable_sender.on_packet_acked(sequence, &mut self.pool);
        }

        if !packet.reliable.is_empty() {
            self.acks_owed = true;
        }

        let mut delivered = Vec::new();
        for (id, message) in packet.reliable {
            self.reliable_receiver.receive(id, message);
        }
        while let Some((id, message)) = self.reliable_receiver.pop() {
            delivered.push((message, id));
        }

        let stamp = packet.header.stamp;
        for message in packet.unreliable {
            let slot = &mut self.last_stamps[message.message_type().index()];
            let stale = slot.is_some_and(|(last, at)| {
                now.duration_since(at) < STAMP_MEMORY && sequence_greater_than(last, stamp)
            });
            if stale {
                log::trace!("{}: discarding stale {:?}", self.addr, message.message_type());
                self.stats.stale_discarded += 1;
                continue;
            }
            *slot = Some((stamp, now));
            delivered.push((message, stamp));
        }

        delivered
    }

    /// Packs everything due into datagrams of at most `MAX_PACKET_SIZE` bytes.
    ///
    /// Sends a bare datagram carrying acks when the peer is owed some or nothing went
    /// out for the keep-alive interval. A disconnecting connection emits its
    /// `Disconnect` datagram here and becomes closed.
    pub fn flush(&mut self, now: Instant) -> Vec<Vec<u8>> {
        match self.state {
            ConnectionState::Connected => {}
            ConnectionState::Disconnecting => {
                self.state = ConnectionState::Closed;
                let reason = self.close_reason.unwrap_or(DisconnectReason::Graceful);
                return match (Packet::Disconnect { reason }).encode() {
                    Ok(datagram) => {
                        self.stats.record_sent(datagram.len());
                        vec![datagram]
                    }
                    Err(e) => {
                        log::error!("{}: cannot encode disconnect: {}", self.addr, e);
                        Vec::new()
                    }
                };
            }
            ConnectionState::Handshaking | ConnectionState::Closed => return Vec::new(),
        }

        if self.reliable_sender.exhausted(now, self.config.max_resend_attempts) {
            self.close(DisconnectReason::ReliableFailure);
            return Vec::new();
        }

        match self.pack(now) {
            Ok(datagrams) => datagrams,
            Err(e) => {
                log::error!("{}: failed to pack datagram: {}", self.addr, e);
                Vec::new()
            }
        }
    }

    fn keep_alive_due(&self, now: Instant) -> bool {
        self.acks_owed
            || self
                .last_send
                .is_none_or(|at| now.duration_since(at) >= self.config.keep_alive_interval)
    }

    fn pack(&mut self, now: Instant) -> Result<Vec<Vec<u8>>, CodecError> {
        let due = self.reliable_sender.due(now);
        let keep_alive = self.keep_alive_due(now);
        if due.is_empty() && self.unreliable.is_empty() && !keep_alive {
            return Ok(Vec::new());
        }

        let mut singles = Vec::new();
        let mut batches: Vec<(MessageType, Vec<Vec<u8>>)> = Vec::new();
        for queued in self.unreliable.drain(..) {
            if !queued.message_type.is_batched() {
                singles.push((queued.message_type, queued.payload));
            } else if let Some((_, batch)) =
                batches.iter_mut().find(|(t, _)| *t == queued.message_type)
            {
                batch.push(queued.payload);
            } else {
                batches.push((queued.message_type, vec![queued.payload]));
            }
        }

        let (ack, ack_bits) = self.receive_tracker.ack_data();
        let header = DataHeader {
            sequence: self.send_sequence,
            ack,
            ack_bits,
            stamp: self.stamp,
        };
        self.stamp = self.stamp.wrapping_add(1);

        let packets = {
            let mut builder = PacketBuilder::new(&mut self.pool, header)?;
            for id in due {
                if let Some((message_type, payload)) = self.reliable_sender.get(id) {
                    builder.push_reliable(id, message_type, payload)?;
                }
            }
            for (message_type, payload) in &singles {
                builder.push_unreliable(*message_type, payload)?;
            }
            for (message_type, batch) in &batches {
                for payload in batch {
                    builder.push_unreliable(*message_type, payload)?;
                }
            }
            builder.into_packets(keep_alive)?
        };

        for (_, payload) in singles {
            self.pool.release(payload);
        }
        for payload in batches.into_iter().flat_map(|(_, batch)| batch) {
            self.pool.release(payload);
        }

        let srtt = if self.ack_tracker.has_sample() {
            self.ack_tracker.srtt_duration()
        } else {
            Duration::ZERO
        };
        let (min, max) = (self.config.min_resend_delay, self.config.max_resend_delay);

        let mut datagrams = Vec::with_capacity(packets.len());
        for (sequence, datagram, reliable_ids) in packets {
            self.ack_tracker.track_packet(sequence, now);
            self.reliable_sender.mark_sent(sequence, reliable_ids, now, |attempts| {
                resend_delay(srtt, attempts, min, max)
            });
            self.stats.record_sent(datagram.len());
            self.send_sequence = sequence.wrapping_add(1);
            datagrams.push(datagram);
        }

        if !datagrams.is_empty() {
            self.last_send = Some(now);
            self.acks_owed = false;
        }
        Ok(datagrams)
    }

    /// Checks liveness and reliable delivery. Returns the close reason exactly once,
    /// on the first call after the connection closed.
    pub fn update(&mut self, now: Instant) -> Option<DisconnectReason> {
        match self.state {
            ConnectionState::Handshaking | ConnectionState::Connected => {
                if now.saturating_duration_since(self.last_receive) > self.config.timeout {
                    log::debug!("{}: no traffic for {:?}", self.addr, self.config.timeout);
                    self.close(DisconnectReason::Timeout);
                } else if self.reliable_sender.exhausted(now, self.config.max_resend_attempts) {
                    self.close(DisconnectReason::ReliableFailure);
                }
            }
            ConnectionState::Disconnecting | ConnectionState::Closed => {}
        }

        if self.state == ConnectionState::Closed && !self.close_reported {
            self.close_reported = true;
            return self.close_reason;
        }
        None
    }

    /// Starts a graceful close: queued content is dropped and the next flush sends a
    /// `Disconnect` datagram.
    pub fn disconnect(&mut self, reason: DisconnectReason) {
        if matches!(
            self.state,
            ConnectionState::Handshaking | ConnectionState::Connected
        ) {
            self.drop_queues();
            self.close_reason = Some(reason);
            self.state = ConnectionState::Disconnecting;
        }
    }

    /// Closes immediately, dropping anything still queued.
    pub fn close(&mut self, reason: DisconnectReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.drop_queues();
        self.close_reason.get_or_insert(reason);
        self.state = ConnectionState::Closed;
    }

    fn drop_queues(&mut self) {
        self.reliable_sender.clear(&mut self.pool);
        for queued in self.unreliable.drain(..) {
            self.pool.release(queued.payload);
        }
    }

    /// Returns a datagram from [`Connection::flush`] once it has been sent.
    pub fn recycle(&mut self, datagram: Vec<u8>) {
        self.pool.release(datagram);
    }

    pub fn release_pool(&mut self) {
        self.pool.clear();
    }
}

/// Size of `message` on the wire, however large.
fn encoded_len(message: &Message) -> Result<usize, CodecError> {
    let mut writer = BufferWriter::unbounded(WIRE_BYTE_ORDER);
    message.serialize(&mut writer)?;
    Ok(writer.position())
}

/// Live connections of a server, by player identity and by address.
#[derive(Debug)]
pub struct ConnectionManager {
    by_addr: HashMap<SocketAddr, NetworkId>,
    connections: BTreeMap<NetworkId, Connection>,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            by_addr: HashMap::new(),
            connections: BTreeMap::new(),
            max_connections,
        }
    }

    pub fn is_full(&self) -> bool {
        self.connections.len() >= self.max_connections
    }

    pub fn insert(&mut self, player: NetworkId, connection: Connection) {
        self.by_addr.insert(connection.addr(), player);
        self.connections.insert(player, connection);
    }

    pub fn get(&self, player: NetworkId) -> Option<&Connection> {
        self.connections.get(&player)
    }

    pub fn get_mut(&mut self, player: NetworkId) -> Option<&mut Connection> {
        self.connections.get_mut(&player)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<(NetworkId, &mut Connection)> {
        let player = *self.by_addr.get(addr)?;
        self.connections.get_mut(&player).map(|c| (player, c))
    }

    pub fn remove(&mut self, player: NetworkId) -> Option<Connection> {
        let connection = self.connections.remove(&player)?;
        self.by_addr.remove(&connection.addr());
        Some(connection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NetworkId, &Connection)> {
        self.connections.iter().map(|(id, c)| (*id, c))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (NetworkId, &mut Connection)> {
        self.connections.iter_mut().map(|(id, c)| (*id, c))
    }

    pub fn connected_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }

    pub fn total_count(&self) -> usize {
        self.connections.len()
    }

    pub fn clear(&mut self) {
        self.by_addr.clear();
        self.connections.clear();
    }
}
