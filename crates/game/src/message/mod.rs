mod handler;
mod pool;
mod types;

pub use handler::MessageHandler;
pub use pool::{BufferPool, PoolStats};
pub use types::{
    ClientSyncedMessage, EntityAddMessage, EntityRemoveMessage, INPUT_SLOTS, PlayerChatMessage,
    PlayerInputMessage, PlayerJoinMessage, PlayerKillMessage, PlayerLeaveMessage,
    PlayerNameMessage, PlayerStatsMessage, ServerInfoMessage, UpdateAvatarMessage,
    UpdateRayMessage, UpdateTransformMessage, quantize_byte,
};

use crate::codec::{BufferReader, BufferWriter, CodecError};

/// How a message type travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Exactly once, in order, retransmitted until acknowledged.
    Reliable,
    /// At most once; older arrivals of the same type are discarded.
    Unreliable,
    /// Unreliable, and several queued instances share one group in a datagram.
    UnreliableBatched,
}

/// Wire tag of a message. Values are part of the protocol and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageType {
    PlayerInput = 0,
    EntityAdd = 1,
    EntityRemove = 2,
    PlayerJoin = 3,
    PlayerLeave = 4,
    PlayerName = 5,
    PlayerStats = 6,
    PlayerKill = 7,
    PlayerChat = 8,
    UpdateTransform = 9,
    UpdateAvatar = 10,
    UpdateRay = 11,
    ClientSynced = 12,
    ServerInfo = 13,
}

impl MessageType {
    pub const COUNT: usize = 14;

    pub const ALL: [MessageType; Self::COUNT] = [
        MessageType::PlayerInput,
        MessageType::EntityAdd,
        MessageType::EntityRemove,
        MessageType::PlayerJoin,
        MessageType::PlayerLeave,
        MessageType::PlayerName,
        MessageType::PlayerStats,
        MessageType::PlayerKill,
        MessageType::PlayerChat,
        MessageType::UpdateTransform,
        MessageType::UpdateAvatar,
        MessageType::UpdateRay,
        MessageType::ClientSynced,
        MessageType::ServerInfo,
    ];

    pub const fn delivery(self) -> Delivery {
        match self {
            MessageType::EntityAdd
            | MessageType::EntityRemove
            | MessageType::PlayerJoin
            | MessageType::PlayerLeave
            | MessageType::PlayerName
            | MessageType::PlayerKill
            | MessageType::PlayerChat
            | MessageType::ClientSynced => Delivery::Reliable,
            MessageType::PlayerInput | MessageType::ServerInfo => Delivery::Unreliable,
            MessageType::PlayerStats
            | MessageType::UpdateTransform
            | MessageType::UpdateAvatar
            | MessageType::UpdateRay => Delivery::UnreliableBatched,
        }
    }

    pub const fn is_reliable(self) -> bool {
        matches!(self.delivery(), Delivery::Reliable)
    }

    pub const fn is_batched(self) -> bool {
        matches!(self.delivery(), Delivery::UnreliableBatched)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, CodecError> {
        Self::ALL
            .get(value as usize)
            .copied()
            .ok_or(CodecError::UnknownMessageType(value))
    }
}

/// A concrete message with a fixed wire tag and hand-written encoding.
pub trait NetMessage: Sized + Into<Message> {
    const TYPE: MessageType;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError>;

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError>;
}

macro_rules! messages {
    ($($variant:ident($ty:ident) => $handler:ident,)*) => {
        /// Any protocol message.
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($variant($ty),)*
        }

        $(
            impl From<$ty> for Message {
                fn from(message: $ty) -> Self {
                    Message::$variant(message)
                }
            }
        )*

        impl Message {
            pub fn message_type(&self) -> MessageType {
                match self {
                    $(Message::$variant(_) => <$ty as NetMessage>::TYPE,)*
                }
            }

            /// Writes the payload only; the tag is framed by the caller.
            pub fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
                match self {
                    $(Message::$variant(message) => message.serialize(writer),)*
                }
            }

            pub fn deserialize(
                message_type: MessageType,
                reader: &mut BufferReader<'_>,
            ) -> Result<Self, CodecError> {
                match message_type {
                    $(MessageType::$variant => Ok(Message::$variant($ty::deserialize(reader)?)),)*
                }
            }

            /// Hands the message to the matching `on_*` method of `handler`.
            /// `sequence` is the reliable message id or the unreliable send stamp.
            pub fn dispatch<H: MessageHandler + ?Sized>(self, handler: &mut H, sequence: u16) {
                match self {
                    $(Message::$variant(message) => handler.$handler(message, sequence),)*
                }
            }
        }
    };
}

messages! {
    PlayerInput(PlayerInputMessage) => on_player_input,
    EntityAdd(EntityAddMessage) => on_entity_add,
    EntityRemove(EntityRemoveMessage) => on_entity_remove,
    PlayerJoin(PlayerJoinMessage) => on_player_join,
    PlayerLeave(PlayerLeaveMessage) => on_player_leave,
    PlayerName(PlayerNameMessage) => on_player_name,
    PlayerStats(PlayerStatsMessage) => on_player_stats,
    PlayerKill(PlayerKillMessage) => on_player_kill,
    PlayerChat(PlayerChatMessage) => on_player_chat,
    UpdateTransform(UpdateTransformMessage) => on_update_transform,
    UpdateAvatar(UpdateAvatarMessage) => on_update_avatar,
    UpdateRay(UpdateRayMessage) => on_update_ray,
    ClientSynced(ClientSyncedMessage) => on_client_synced,
    ServerInfo(ServerInfoMessage) => on_server_info,
}

impl Message {
    pub fn delivery(&self) -> Delivery {
        self.message_type().delivery()
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};
    use proptest::prelude::*;

    use super::*;
    use crate::codec::ByteOrder;
    use crate::net::protocol::{CHAT_MESSAGE_LENGTH, PLAYER_NAME_LENGTH, SERVER_NAME_LENGTH};
    use crate::net::{DisconnectReason, NetworkId};

    fn roundtrip(message: Message) {
        let mut writer = BufferWriter::with_capacity(1024, ByteOrder::Little);
        message.serialize(&mut writer).unwrap();
        let mut reader = BufferReader::new(writer.as_bytes(), ByteOrder::Little);
        let decoded = Message::deserialize(message.message_type(), &mut reader).unwrap();
        assert!(reader.is_empty(), "{:?} left trailing bytes", message.message_type());
        assert_eq!(decoded, message);
    }

    #[test]
    fn tags_are_stable() {
        for (index, message_type) in MessageType::ALL.iter().enumerate() {
            assert_eq!(message_type.index(), index);
            assert_eq!(MessageType::try_from(index as u8).unwrap(), *message_type);
        }
        assert_eq!(MessageType::UpdateTransform as u8, 9);
        assert_eq!(
            MessageType::try_from(MessageType::COUNT as u8).unwrap_err(),
            CodecError::UnknownMessageType(14)
        );
    }

    #[test]
    fn delivery_classes() {
        assert!(MessageType::EntityAdd.is_reliable());
        assert!(MessageType::ClientSynced.is_reliable());
        assert!(!MessageType::PlayerInput.is_reliable());
        assert!(!MessageType::PlayerInput.is_batched());
        assert!(MessageType::UpdateTransform.is_batched());
        assert!(MessageType::PlayerStats.is_batched());
    }

    #[test]
    fn every_message_roundtrips_at_boundaries() {
        let max_id = NetworkId::from_raw(u16::MAX - 1);
        let min_id = NetworkId::from_raw(0);
        let name = "ü".repeat(PLAYER_NAME_LENGTH / 2);

        let messages: Vec<Message> = vec![
            PlayerInputMessage::new(1, [0; INPUT_SLOTS], Vec3::ZERO).into(),
            PlayerInputMessage::new(u32::MAX, [0xff; INPUT_SLOTS], Vec3::splat(f32::MAX)).into(),
            EntityAddMessage::new(min_id, 0, NetworkId::NONE, NetworkId::NONE, Vec3::ZERO, Quat::IDENTITY)
                .into(),
            EntityAddMessage::new(max_id, u8::MAX, min_id, min_id, Vec3::NEG_ONE, Quat::from_rotation_y(2.0))
                .into(),
            EntityRemoveMessage::new(max_id).into(),
            PlayerJoinMessage::new(min_id, "").into(),
            PlayerJoinMessage::new(max_id, &name).into(),
            PlayerLeaveMessage::new(max_id, DisconnectReason::ServerShutdown).into(),
            PlayerNameMessage::new(NetworkId::NONE, &"z".repeat(PLAYER_NAME_LENGTH)).into(),
            PlayerStatsMessage::new(max_id, 255.0, 0.0, u16::MAX, 0, 65535.0).into(),
            PlayerKillMessage::new(NetworkId::NONE, min_id).into(),
            PlayerChatMessage::new(max_id, &"c".repeat(CHAT_MESSAGE_LENGTH)).into(),
            PlayerChatMessage::new(min_id, "").into(),
            UpdateTransformMessage::new(max_id, Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY).into(),
            UpdateAvatarMessage::new(min_id, Vec3::X, Vec3::NEG_Z, 3, true).into(),
            UpdateRayMessage::new(max_id, Vec3::ZERO, Vec3::splat(-1e9)).into(),
            ClientSyncedMessage.into(),
            ServerInfoMessage::new(&"s".repeat(SERVER_NAME_LENGTH), u16::MAX, 0, 0).into(),
        ];

        for message in messages {
            roundtrip(message);
        }
    }

    #[test]
    fn invalid_discriminants_are_rejected() {
        let mut writer = BufferWriter::with_capacity(8, ByteOrder::Little);
        writer.write_network_id(NetworkId::from_raw(1)).unwrap();
        writer.write_u8(200).unwrap();
        let mut reader = BufferReader::new(writer.as_bytes(), ByteOrder::Little);
        assert!(matches!(
            Message::deserialize(MessageType::PlayerLeave, &mut reader),
            Err(CodecError::InvalidValue(_))
        ));

        let mut reader = BufferReader::new(&[0, 0, 0, 0], ByteOrder::Little);
        assert!(Message::deserialize(MessageType::PlayerInput, &mut reader).is_err());
    }

    #[derive(Default)]
    struct Recorder {
        seen: Vec<(MessageType, u16)>,
    }

    impl MessageHandler for Recorder {
        fn on_entity_add(&mut self, _message: EntityAddMessage, sequence: u16) {
            self.seen.push((MessageType::EntityAdd, sequence));
        }

        fn on_client_synced(&mut self, _message: ClientSyncedMessage, sequence: u16) {
            self.seen.push((MessageType::ClientSynced, sequence));
        }
    }

    #[test]
    fn dispatch_reaches_the_typed_handler() {
        let mut recorder = Recorder::default();
        let add: Message = EntityAddMessage::new(
            NetworkId::from_raw(3),
            1,
            NetworkId::NONE,
            NetworkId::NONE,
            Vec3::ZERO,
            Quat::IDENTITY,
        )
        .into();
        add.dispatch(&mut recorder, 7);
        Message::from(ClientSyncedMessage).dispatch(&mut recorder, 8);
        Message::from(EntityRemoveMessage::new(NetworkId::from_raw(3))).dispatch(&mut recorder, 9);

        assert_eq!(
            recorder.seen,
            vec![(MessageType::EntityAdd, 7), (MessageType::ClientSynced, 8)]
        );
    }

    fn vec3() -> impl Strategy<Value = Vec3> {
        (-1e6f32..1e6, -1e6f32..1e6, -1e6f32..1e6).prop_map(|(x, y, z)| Vec3::new(x, y, z))
    }

    proptest! {
        #[test]
        fn input_roundtrips(frame in 1u32..=u32::MAX, history in any::<[u8; INPUT_SLOTS]>(), aim in vec3()) {
            roundtrip(PlayerInputMessage::new(frame, history, aim).into());
        }

        #[test]
        fn chat_roundtrips(player in 0u16..u16::MAX, text in "\\PC{0,32}") {
            prop_assume!(text.len() <= CHAT_MESSAGE_LENGTH);
            roundtrip(PlayerChatMessage::new(NetworkId::from_raw(player), &text).into());
        }

        #[test]
        fn transform_roundtrips(entity in 0u16..u16::MAX, position in vec3(), angle in -6.0f32..6.0) {
            let message = UpdateTransformMessage::new(
                NetworkId::from_raw(entity),
                position,
                Quat::from_rotation_x(angle),
            );
            roundtrip(message.into());
        }
    }
}
