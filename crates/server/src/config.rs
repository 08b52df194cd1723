use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use arena::{DEFAULT_PORT, DEFAULT_TICK_RATE, PacketLossSimulation, SessionConfig};
use arena::net::MAX_PLAYERS;

/// Server settings as read from an optional TOML file; command-line flags win.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub bind: String,
    pub port: u16,
    pub tick_rate: u32,
    pub max_players: usize,
    pub stats_interval_ms: u64,
    /// Send discovery beacons to the LAN broadcast address.
    pub discovery: bool,
    pub packet_loss: Option<PacketLossConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "arena".to_string(),
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            tick_rate: DEFAULT_TICK_RATE,
            max_players: MAX_PLAYERS,
            stats_interval_ms: 1000,
            discovery: true,
            packet_loss: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacketLossConfig {
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl From<&PacketLossConfig> for PacketLossSimulation {
    fn from(config: &PacketLossConfig) -> Self {
        Self {
            enabled: true,
            loss_percent: config.loss_percent.clamp(0.0, 100.0),
            min_latency_ms: config.min_latency_ms,
            max_latency_ms: config.max_latency_ms.max(config.min_latency_ms),
            jitter_ms: config.jitter_ms,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.tick_rate > 0, "tick_rate must be positive");
        anyhow::ensure!(
            (1..=MAX_PLAYERS).contains(&self.max_players),
            "max_players must be between 1 and {}",
            MAX_PLAYERS
        );
        anyhow::ensure!(!self.name.trim().is_empty(), "server name must not be empty");
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            server_name: self.name.clone(),
            port: self.port,
            max_players: self.max_players,
            stats_interval: Duration::from_millis(self.stats_interval_ms),
            ..SessionConfig::default()
        }
    }

    pub fn simulation(&self) -> Option<PacketLossSimulation> {
        self.packet_loss.as_ref().map(PacketLossSimulation::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ServerConfig::parse("").unwrap();
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.max_players, MAX_PLAYERS);
        assert!(config.simulation().is_none());
    }

    #[test]
    fn file_fields_override_defaults() {
        let config = ServerConfig::parse(
            r#"
            name = "friday night"
            port = 30000
            max_players = 4

            [packet_loss]
            loss_percent = 150.0
            min_latency_ms = 40
            max_latency_ms = 20
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:30000");
        let session = config.session();
        assert_eq!(session.server_name, "friday night");
        assert_eq!(session.max_players, 4);

        let sim = config.simulation().unwrap();
        assert!(sim.enabled);
        assert_eq!(sim.loss_percent, 100.0);
        assert_eq!(sim.max_latency_ms, 40);
    }

    #[test]
    fn rejects_out_of_range_player_count() {
        assert!(ServerConfig::parse("max_players = 0").is_err());
        assert!(ServerConfig::parse("max_players = 1000").is_err());
        assert!(ServerConfig::parse("tick_rate = 0").is_err());
    }
}
