mod connection;
pub mod discovery;
mod endpoint;
mod identity;
pub mod protocol;
mod reliable;
mod simulator;
mod stats;
mod tracking;

pub use connection::{
    Connection, ConnectionConfig, ConnectionError, ConnectionManager, ConnectionState,
    DisconnectReason, MAX_MESSAGE_SIZE,
};
pub use discovery::{BeaconTimer, DiscoveredServer, ServerBrowser};
pub use endpoint::NetworkEndpoint;
pub use identity::{IdentityAllocator, NetworkId};
pub use protocol::{
    DEFAULT_PORT, DEFAULT_TICK_RATE, DISCOVERY_PORT, INPUT_UPDATE_FREQUENCY, MAX_PACKET_SIZE,
    MAX_PLAYERS, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketKind, sequence_greater_than,
};
pub use reliable::{ReliableReceiver, ReliableSender, resend_delay};
pub use simulator::LinkSimulator;
pub use stats::{NetworkStats, PacketLossSimulation};
pub use tracking::{AckTracker, PendingPacket, ReceiveTracker};
