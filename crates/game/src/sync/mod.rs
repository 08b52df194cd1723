mod client;
mod entity;
mod events;
mod server;

pub use client::{
    ClientSession, ClientSessionConfig, ClientState, ClientWorld, ReplicatedEntity,
    ReplicatedPlayer,
};
pub use entity::{EntityRecord, EntityRegistry, EntitySpawn, GameWorld, Outbox};
pub use events::{ClientEvent, ServerEvent};
pub use server::{PlayerRecord, ServerSession, SessionConfig};
