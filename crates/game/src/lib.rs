pub mod codec;
pub mod input;
pub mod message;
pub mod net;
pub mod simulation;
pub mod sync;

pub use codec::{BufferReader, BufferWriter, ByteOrder, CodecError};
pub use input::{InputKeys, InputSampler, InputSlot, InputSource, InputState, keys_down};
pub use message::{Delivery, Message, MessageHandler, MessageType, NetMessage};
pub use net::{
    Connection, ConnectionConfig, ConnectionError, ConnectionState, DEFAULT_PORT,
    DEFAULT_TICK_RATE, DisconnectReason, IdentityAllocator, MAX_PACKET_SIZE, NetworkEndpoint,
    NetworkId, NetworkStats, Packet, PacketLossSimulation, ServerBrowser,
};
pub use simulation::{FixedTimestep, SimulationLoop};
pub use sync::{
    ClientEvent, ClientSession, ClientSessionConfig, ClientState, EntitySpawn, GameWorld,
    Outbox, ServerEvent, ServerSession, SessionConfig,
};
