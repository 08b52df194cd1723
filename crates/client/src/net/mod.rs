mod client;
mod config;
mod input;

pub use client::NetworkClient;
pub use config::ClientConfig;
