use std::time::Duration;

use arena::ClientSessionConfig;
use arena::net::INPUT_UPDATE_FREQUENCY;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub name: String,
    /// Local frames per second; input is sampled once per frame.
    pub frame_rate: u32,
    pub input_frequency: u32,
    pub connect_timeout_secs: u64,
    /// How long to listen for discovery beacons.
    pub discovery_wait_secs: u64,
    pub seed: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "bot".to_string(),
            frame_rate: 60,
            input_frequency: INPUT_UPDATE_FREQUENCY,
            connect_timeout_secs: 10,
            discovery_wait_secs: 3,
            seed: 0,
        }
    }
}

impl ClientConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.frame_rate.max(1)))
    }

    pub fn session(&self) -> ClientSessionConfig {
        ClientSessionConfig {
            player_name: self.name.clone(),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            input_frequency: self.input_frequency,
            ..ClientSessionConfig::default()
        }
    }
}
