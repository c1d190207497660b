use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Layered: defaults -> optional TOML file -> CHAT_* env vars.
//
//   chat.toml:   socket_url = "ws://chat.example.com/ws"
//   env var:     CHAT_SOCKET_URL=ws://chat.example.com/ws

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    /// Where the credential token is persisted.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_typing_idle_ms")]
    pub typing_idle_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            socket_url: default_socket_url(),
            data_dir: default_data_dir(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            typing_idle_ms: default_typing_idle_ms(),
        }
    }
}

impl ClientConfig {
    pub fn load(config_file: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        figment(config_file).extract().map_err(Box::new)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }
}

pub fn figment(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        providers::{Env, Format, Serialized, Toml},
        Figment,
    };

    let mut figment = Figment::from(Serialized::defaults(ClientConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed("CHAT_"))
}

/// Fixed-delay, bounded reconnection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ClientConfig::default().reconnect_policy()
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_socket_url() -> String {
    "ws://localhost:8000/ws".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("chat_data")
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

fn default_typing_idle_ms() -> u64 {
    2000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reconnect_policy() {
        let config = ClientConfig::default();
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay, Duration::from_secs(1));
        assert_eq!(config.typing_idle(), Duration::from_secs(2));
    }

    #[test]
    fn toml_and_env_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("chat.toml", "socket_url = \"ws://file/ws\"\nreconnect_attempts = 2\n")?;
            jail.set_env("CHAT_RECONNECT_ATTEMPTS", "9");

            let config: ClientConfig = figment(Some(Path::new("chat.toml"))).extract()?;
            assert_eq!(config.socket_url, "ws://file/ws");
            assert_eq!(config.reconnect_attempts, 9);
            assert_eq!(config.api_base_url, default_api_base_url());
            Ok(())
        });
    }
}
