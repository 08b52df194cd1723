use glam::{Quat, Vec3};

use crate::codec::{BufferReader, BufferWriter, CodecError};
use crate::net::protocol::{
    CHAT_MESSAGE_LENGTH, PLAYER_NAME_LENGTH, SERVER_NAME_LENGTH,
};
use crate::net::{DisconnectReason, NetworkId};

use super::{MessageType, NetMessage};

/// Rounds a non-negative quantity (health, seconds left on a power-up) into one byte.
pub fn quantize_byte(value: f32) -> u8 {
    assert!(value.is_finite(), "cannot quantize non-finite value {value}");
    value.round().clamp(0.0, u8::MAX as f32) as u8
}

/// Number of discrete input slots carried by a [`PlayerInputMessage`].
pub const INPUT_SLOTS: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInputMessage {
    /// Starts at 1 and increases by one per send for the whole session.
    pub frame: u32,
    /// Per-slot trigger history, most recent sample in the least significant bit.
    pub history: [u8; INPUT_SLOTS],
    pub aim: Vec3,
}

impl PlayerInputMessage {
    pub fn new(frame: u32, history: [u8; INPUT_SLOTS], aim: Vec3) -> Self {
        assert!(frame >= 1, "input frames start at 1");
        Self {
            frame,
            history,
            aim,
        }
    }

    /// Whether `slot` was triggered during the most recent sample.
    pub fn is_down(&self, slot: usize) -> bool {
        self.history[slot] & 1 != 0
    }
}

impl NetMessage for PlayerInputMessage {
    const TYPE: MessageType = MessageType::PlayerInput;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_u32(self.frame)?;
        writer.write_bytes(&self.history)?;
        writer.write_vec3(self.aim)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let frame = reader.read_u32()?;
        if frame == 0 {
            return Err(CodecError::InvalidValue("input frame"));
        }
        let mut history = [0u8; INPUT_SLOTS];
        history.copy_from_slice(reader.take(INPUT_SLOTS)?);
        Ok(Self {
            frame,
            history,
            aim: reader.read_vec3()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityAddMessage {
    pub entity: NetworkId,
    /// Gameplay-defined type tag.
    pub entity_type: u8,
    pub owner: NetworkId,
    pub parent: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
}

impl EntityAddMessage {
    pub fn new(
        entity: NetworkId,
        entity_type: u8,
        owner: NetworkId,
        parent: NetworkId,
        position: Vec3,
        rotation: Quat,
    ) -> Self {
        assert!(entity.is_some(), "entity add needs an allocated identity");
        assert_ne!(entity, parent, "entity {entity} cannot be its own parent");
        Self {
            entity,
            entity_type,
            owner,
            parent,
            position,
            rotation,
        }
    }
}

impl NetMessage for EntityAddMessage {
    const TYPE: MessageType = MessageType::EntityAdd;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.entity)?;
        writer.write_u8(self.entity_type)?;
        writer.write_network_id(self.owner)?;
        writer.write_network_id(self.parent)?;
        writer.write_vec3(self.position)?;
        writer.write_quat(self.rotation)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        let entity = reader.read_network_id()?;
        if entity.is_none() {
            return Err(CodecError::InvalidValue("entity identity"));
        }
        let entity_type = reader.read_u8()?;
        let owner = reader.read_network_id()?;
        let parent = reader.read_network_id()?;
        if parent == entity {
            return Err(CodecError::InvalidValue("entity parent"));
        }
        Ok(Self {
            entity,
            entity_type,
            owner,
            parent,
            position: reader.read_vec3()?,
            rotation: reader.read_quat()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRemoveMessage {
    pub entity: NetworkId,
}

impl EntityRemoveMessage {
    pub fn new(entity: NetworkId) -> Self {
        assert!(entity.is_some(), "entity remove needs an allocated identity");
        Self { entity }
    }
}

impl NetMessage for EntityRemoveMessage {
    const TYPE: MessageType = MessageType::EntityRemove;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.entity)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity: reader.read_network_id()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerJoinMessage {
    pub player: NetworkId,
    pub name: String,
}

impl PlayerJoinMessage {
    pub fn new(player: NetworkId, name: &str) -> Self {
        assert!(player.is_some(), "player join needs an allocated identity");
        assert!(
            name.len() <= PLAYER_NAME_LENGTH,
            "player name is {} bytes, limit is {PLAYER_NAME_LENGTH}",
            name.len()
        );
        Self {
            player,
            name: name.to_owned(),
        }
    }
}

impl NetMessage for PlayerJoinMessage {
    const TYPE: MessageType = MessageType::PlayerJoin;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.player)?;
        writer.write_string(&self.name, PLAYER_NAME_LENGTH)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player: reader.read_network_id()?,
            name: reader.read_string(PLAYER_NAME_LENGTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLeaveMessage {
    pub player: NetworkId,
    pub reason: DisconnectReason,
}

impl PlayerLeaveMessage {
    pub fn new(player: NetworkId, reason: DisconnectReason) -> Self {
        assert!(player.is_some(), "player leave needs an allocated identity");
        Self { player, reason }
    }
}

impl NetMessage for PlayerLeaveMessage {
    const TYPE: MessageType = MessageType::PlayerLeave;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.player)?;
        writer.write_u8(self.reason as u8)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player: reader.read_network_id()?,
            reason: DisconnectReason::try_from(reader.read_u8()?)?,
        })
    }
}

/// Sent by a client to request a rename, and by the server to announce one.
/// The server overwrites `player` with the sender's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerNameMessage {
    pub player: NetworkId,
    pub name: String,
}

impl PlayerNameMessage {
    pub fn new(player: NetworkId, name: &str) -> Self {
        assert!(
            name.len() <= PLAYER_NAME_LENGTH,
            "player name is {} bytes, limit is {PLAYER_NAME_LENGTH}",
            name.len()
        );
        Self {
            player,
            name: name.to_owned(),
        }
    }
}

impl NetMessage for PlayerNameMessage {
    const TYPE: MessageType = MessageType::PlayerName;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.player)?;
        writer.write_string(&self.name, PLAYER_NAME_LENGTH)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player: reader.read_network_id()?,
            name: reader.read_string(PLAYER_NAME_LENGTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerStatsMessage {
    pub player: NetworkId,
    pub health: u8,
    /// Whole seconds left on the active power-up.
    pub power_up: u8,
    pub kills: u16,
    pub deaths: u16,
    pub ping: u16,
}

impl PlayerStatsMessage {
    pub fn new(
        player: NetworkId,
        health: f32,
        power_up_secs: f32,
        kills: u16,
        deaths: u16,
        ping_ms: f32,
    ) -> Self {
        assert!(player.is_some(), "player stats need an allocated identity");
        assert!(ping_ms.is_finite(), "ping must be finite");
        Self {
            player,
            health: quantize_byte(health),
            power_up: quantize_byte(power_up_secs),
            kills,
            deaths,
            ping: ping_ms.round().clamp(0.0, u16::MAX as f32) as u16,
        }
    }
}

impl NetMessage for PlayerStatsMessage {
    const TYPE: MessageType = MessageType::PlayerStats;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.player)?;
        writer.write_u8(self.health)?;
        writer.write_u8(self.power_up)?;
        writer.write_u16(self.kills)?;
        writer.write_u16(self.deaths)?;
        writer.write_u16(self.ping)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player: reader.read_network_id()?,
            health: reader.read_u8()?,
            power_up: reader.read_u8()?,
            kills: reader.read_u16()?,
            deaths: reader.read_u16()?,
            ping: reader.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerKillMessage {
    pub killer: NetworkId,
    pub victim: NetworkId,
}

impl PlayerKillMessage {
    /// `killer` is `NetworkId::NONE` for deaths without a killer.
    pub fn new(killer: NetworkId, victim: NetworkId) -> Self {
        assert!(victim.is_some(), "kill needs a victim");
        Self { killer, victim }
    }
}

impl NetMessage for PlayerKillMessage {
    const TYPE: MessageType = MessageType::PlayerKill;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.killer)?;
        writer.write_network_id(self.victim)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            killer: reader.read_network_id()?,
            victim: reader.read_network_id()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerChatMessage {
    pub player: NetworkId,
    pub text: String,
}

impl PlayerChatMessage {
    pub fn new(player: NetworkId, text: &str) -> Self {
        assert!(
            text.len() <= CHAT_MESSAGE_LENGTH,
            "chat message is {} bytes, limit is {CHAT_MESSAGE_LENGTH}",
            text.len()
        );
        Self {
            player,
            text: text.to_owned(),
        }
    }
}

impl NetMessage for PlayerChatMessage {
    const TYPE: MessageType = MessageType::PlayerChat;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.player)?;
        writer.write_string(&self.text, CHAT_MESSAGE_LENGTH)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            player: reader.read_network_id()?,
            text: reader.read_string(CHAT_MESSAGE_LENGTH)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTransformMessage {
    pub entity: NetworkId,
    pub position: Vec3,
    pub rotation: Quat,
}

impl UpdateTransformMessage {
    pub fn new(entity: NetworkId, position: Vec3, rotation: Quat) -> Self {
        assert!(entity.is_some(), "transform update needs an entity");
        Self {
            entity,
            position,
            rotation,
        }
    }
}

impl NetMessage for UpdateTransformMessage {
    const TYPE: MessageType = MessageType::UpdateTransform;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.entity)?;
        writer.write_vec3(self.position)?;
        writer.write_quat(self.rotation)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity: reader.read_network_id()?,
            position: reader.read_vec3()?,
            rotation: reader.read_quat()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateAvatarMessage {
    pub entity: NetworkId,
    pub velocity: Vec3,
    pub aim: Vec3,
    pub weapon: u8,
    pub firing: bool,
}

impl UpdateAvatarMessage {
    pub fn new(entity: NetworkId, velocity: Vec3, aim: Vec3, weapon: u8, firing: bool) -> Self {
        assert!(entity.is_some(), "avatar update needs an entity");
        Self {
            entity,
            velocity,
            aim,
            weapon,
            firing,
        }
    }
}

impl NetMessage for UpdateAvatarMessage {
    const TYPE: MessageType = MessageType::UpdateAvatar;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.entity)?;
        writer.write_vec3(self.velocity)?;
        writer.write_vec3(self.aim)?;
        writer.write_u8(self.weapon)?;
        writer.write_bool(self.firing)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity: reader.read_network_id()?,
            velocity: reader.read_vec3()?,
            aim: reader.read_vec3()?,
            weapon: reader.read_u8()?,
            firing: reader.read_bool()?,
        })
    }
}

/// Endpoints of a beam or hitscan ray owned by an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRayMessage {
    pub entity: NetworkId,
    pub start: Vec3,
    pub end: Vec3,
}

impl UpdateRayMessage {
    pub fn new(entity: NetworkId, start: Vec3, end: Vec3) -> Self {
        assert!(entity.is_some(), "ray update needs an entity");
        Self { entity, start, end }
    }
}

impl NetMessage for UpdateRayMessage {
    const TYPE: MessageType = MessageType::UpdateRay;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_network_id(self.entity)?;
        writer.write_vec3(self.start)?;
        writer.write_vec3(self.end)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            entity: reader.read_network_id()?,
            start: reader.read_vec3()?,
            end: reader.read_vec3()?,
        })
    }
}

/// Ends the join snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientSyncedMessage;

impl NetMessage for ClientSyncedMessage {
    const TYPE: MessageType = MessageType::ClientSynced;

    fn serialize(&self, _writer: &mut BufferWriter) -> Result<(), CodecError> {
        Ok(())
    }

    fn deserialize(_reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self)
    }
}

/// Discovery beacon payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfoMessage {
    pub name: String,
    pub port: u16,
    pub players: u8,
    pub max_players: u8,
}

impl ServerInfoMessage {
    pub fn new(name: &str, port: u16, players: u8, max_players: u8) -> Self {
        assert!(
            name.len() <= SERVER_NAME_LENGTH,
            "server name is {} bytes, limit is {SERVER_NAME_LENGTH}",
            name.len()
        );
        assert!(players <= max_players, "{players} players over limit {max_players}");
        Self {
            name: name.to_owned(),
            port,
            players,
            max_players,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players >= self.max_players
    }
}

impl NetMessage for ServerInfoMessage {
    const TYPE: MessageType = MessageType::ServerInfo;

    fn serialize(&self, writer: &mut BufferWriter) -> Result<(), CodecError> {
        writer.write_string(&self.name, SERVER_NAME_LENGTH)?;
        writer.write_u16(self.port)?;
        writer.write_u8(self.players)?;
        writer.write_u8(self.max_players)
    }

    fn deserialize(reader: &mut BufferReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            name: reader.read_string(SERVER_NAME_LENGTH)?,
            port: reader.read_u16()?,
            players: reader.read_u8()?,
            max_players: reader.read_u8()?,
        })
    }
}
