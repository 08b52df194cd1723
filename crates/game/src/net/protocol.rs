use crate::codec::{BufferReader, BufferWriter, ByteOrder, CodecError};
use crate::message::{NetMessage, ServerInfoMessage};

use super::connection::DisconnectReason;
use super::identity::NetworkId;

pub const MAX_PACKET_SIZE: usize = 1200;
pub const PROTOCOL_VERSION: u16 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x4152_4E41;
pub const DEFAULT_PORT: u16 = 27015;
pub const DISCOVERY_PORT: u16 = 27016;
pub const DEFAULT_TICK_RATE: u32 = 60;
/// Input messages per second sent by a client, independent of its frame rate.
pub const INPUT_UPDATE_FREQUENCY: u32 = 30;
pub const PLAYER_NAME_LENGTH: usize = 16;
pub const CHAT_MESSAGE_LENGTH: usize = 128;
pub const SERVER_NAME_LENGTH: usize = 32;
pub const DENY_REASON_LENGTH: usize = 64;
pub const MAX_PLAYERS: usize = 16;
pub const WIRE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

/// Magic plus packet kind.
pub const PREFIX_LEN: usize = 5;

const SEQUENCE_WRAP_THRESHOLD: u16 = u16::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    ConnectRequest = 1,
    ConnectAccept = 2,
    ConnectDeny = 3,
    Disconnect = 4,
    Data = 5,
    Beacon = 6,
}

impl TryFrom<u8> for PacketKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(Self::ConnectRequest),
            2 => Ok(Self::ConnectAccept),
            3 => Ok(Self::ConnectDeny),
            4 => Ok(Self::Disconnect),
            5 => Ok(Self::Data),
            6 => Ok(Self::Beacon),
            other => Err(CodecError::UnknownPacketKind(other)),
        }
    }
}

pub fn write_prefix(writer: &mut BufferWriter, kind: PacketKind) -> Result<(), CodecError> {
    writer.write_u32(PROTOCOL_MAGIC)?;
    writer.write_u8(kind as u8)
}

/// Header of a data datagram, right after the prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    pub sequence: u16,
    pub ack: u16,
    pub ack_bits: u32,
    /// Send stamp shared by every datagram of one flush; unreliable messages are
    /// ordered by it.
    pub stamp: u16,
}

impl DataHeader {
    pub const LEN: usize = 10;

    pub fn write(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_u16(self.sequence)?;
        writer.write_u16(self.ack)?;
        writer.write_u32(self.ack_bits)?;
        writer.write_u16(self.stamp)
    }

    pub fn read(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            sequence: reader.read_u16()?,
            ack: reader.read_u16()?,
            ack_bits: reader.read_u32()?,
            stamp: reader.read_u16()?,
        })
    }
}

/// A decoded datagram. Data bodies are left undecoded for the owning connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet<'a> {
    ConnectRequest { version: u16, name: String },
    ConnectAccept { player_id: NetworkId },
    ConnectDeny { reason: String },
    Disconnect { reason: DisconnectReason },
    Beacon(ServerInfoMessage),
    Data(&'a [u8]),
}

impl<'a> Packet<'a> {
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::ConnectRequest { .. } => PacketKind::ConnectRequest,
            Packet::ConnectAccept { .. } => PacketKind::ConnectAccept,
            Packet::ConnectDeny { .. } => PacketKind::ConnectDeny,
            Packet::Disconnect { .. } => PacketKind::Disconnect,
            Packet::Beacon(_) => PacketKind::Beacon,
            Packet::Data(_) => PacketKind::Data,
        }
    }

    pub fn decode(bytes: &'a [u8]) -> Result<Self, CodecError> {
        let mut reader = BufferReader::new(bytes, WIRE_BYTE_ORDER);
        let magic = reader.read_u32()?;
        if magic != PROTOCOL_MAGIC {
            return Err(CodecError::BadMagic(magic));
        }

        let packet = match PacketKind::try_from(reader.read_u8()?)? {
            PacketKind::ConnectRequest => Packet::ConnectRequest {
                version: reader.read_u16()?,
                name: reader.read_string(PLAYER_NAME_LENGTH)?,
            },
            PacketKind::ConnectAccept => Packet::ConnectAccept {
                player_id: reader.read_network_id()?,
            },
            PacketKind::ConnectDeny => Packet::ConnectDeny {
                reason: reader.read_string(DENY_REASON_LENGTH)?,
            },
            PacketKind::Disconnect => Packet::Disconnect {
                reason: DisconnectReason::try_from(reader.read_u8()?)?,
            },
            PacketKind::Beacon => Packet::Beacon(ServerInfoMessage::deserialize(&mut reader)?),
            PacketKind::Data => return Ok(Packet::Data(reader.rest())),
        };

        if !reader.is_empty() {
            return Err(CodecError::InvalidValue("trailing bytes"));
        }
        Ok(packet)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = BufferWriter::with_capacity(MAX_PACKET_SIZE, WIRE_BYTE_ORDER);
        write_prefix(&mut writer, self.kind())?;
        match self {
            Packet::ConnectRequest { version, name } => {
                writer.write_u16(*version)?;
                writer.write_string(name, PLAYER_NAME_LENGTH)?;
            }
            Packet::ConnectAccept { player_id } => writer.write_network_id(*player_id)?,
            Packet::ConnectDeny { reason } => {
                writer.write_string(truncate_utf8(reason, DENY_REASON_LENGTH), DENY_REASON_LENGTH)?
            }
            Packet::Disconnect { reason } => writer.write_u8(*reason as u8)?,
            Packet::Beacon(info) => info.serialize(&mut writer)?,
            Packet::Data(body) => writer.write_bytes(body)?,
        }
        Ok(writer.into_inner())
    }
}

/// Longest prefix of `text` that fits in `max_len` bytes without splitting a character.
pub fn truncate_utf8(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(!sequence_greater_than(5, 5));
        assert!(sequence_greater_than(0, u16::MAX));
        assert!(!sequence_greater_than(u16::MAX, 0));
    }

    #[test]
    fn control_packets_roundtrip() {
        let packets = [
            Packet::ConnectRequest {
                version: PROTOCOL_VERSION,
                name: "x".repeat(PLAYER_NAME_LENGTH),
            },
            Packet::ConnectAccept {
                player_id: NetworkId::from_raw(7),
            },
            Packet::ConnectDeny {
                reason: "server full".into(),
            },
            Packet::Disconnect {
                reason: DisconnectReason::Kicked,
            },
            Packet::Beacon(ServerInfoMessage::new("lan party", 27015, 3, 16)),
        ];

        for packet in packets {
            let bytes = packet.encode().unwrap();
            assert_eq!(Packet::decode(&bytes).unwrap(), packet);
        }
    }

    #[test]
    fn data_packets_expose_their_body() {
        let bytes = Packet::Data(&[1, 2, 3]).encode().unwrap();
        assert_eq!(bytes.len(), PREFIX_LEN + 3);
        assert_eq!(Packet::decode(&bytes).unwrap(), Packet::Data(&[1, 2, 3]));
    }

    #[test]
    fn foreign_datagrams_are_rejected() {
        assert!(matches!(
            Packet::decode(&[0xde, 0xad, 0xbe, 0xef, 4]),
            Err(CodecError::BadMagic(_))
        ));

        let mut writer = BufferWriter::with_capacity(8, WIRE_BYTE_ORDER);
        writer.write_u32(PROTOCOL_MAGIC).unwrap();
        writer.write_u8(99).unwrap();
        assert_eq!(
            Packet::decode(writer.as_bytes()).unwrap_err(),
            CodecError::UnknownPacketKind(99)
        );

        assert!(matches!(
            Packet::decode(&[0x41]),
            Err(CodecError::OutOfRange { .. })
        ));
    }

    #[test]
    fn long_deny_reasons_are_cut_on_char_boundary() {
        let reason = "é".repeat(DENY_REASON_LENGTH);
        let bytes = Packet::ConnectDeny { reason }.encode().unwrap();
        match Packet::decode(&bytes).unwrap() {
            Packet::ConnectDeny { reason } => {
                assert!(reason.len() <= DENY_REASON_LENGTH);
                assert!(reason.chars().all(|c| c == 'é'));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn data_header_roundtrip() {
        let header = DataHeader {
            sequence: u16::MAX,
            ack: 0,
            ack_bits: u32::MAX,
            stamp: 12,
        };
        let mut writer = BufferWriter::with_capacity(DataHeader::LEN, WIRE_BYTE_ORDER);
        header.write(&mut writer).unwrap();
        assert_eq!(writer.position(), DataHeader::LEN);
        let mut reader = BufferReader::new(writer.as_bytes(), WIRE_BYTE_ORDER);
        assert_eq!(DataHeader::read(&mut reader).unwrap(), header);
    }
}
