use anyhow::Context;
use config::{Config, Environment, File};
use roomcall_signaling::config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub call: CallConfig,
}

impl AppConfig {
    pub fn parse() -> anyhow::Result<Self> {
        let config = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(config_file_path("config.toml")?.as_str()).required(false))
            .add_source(File::with_name("config.toml").required(false))
            .add_source(
                Environment::with_prefix("roomcall")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build config")?
            .try_deserialize::<Self>()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.session.admission.max_attempts == 0 {
            anyhow::bail!("Admission max attempts must be at least 1");
        } else if self.session.ice.ice_servers.iter().any(|server| server.urls.is_empty()) {
            anyhow::bail!("ICE server without URLs configured");
        } else if self.call.connect_timeout_secs == 0 {
            anyhow::bail!("Connect timeout is zero");
        }
        Ok(())
    }
}

pub fn config_file_path(file_name: impl AsRef<Path>) -> anyhow::Result<String> {
    Ok(Path::new("/etc")
        .join("roomcall")
        .join(file_name)
        .to_str()
        .context("Failed to build config file path")?
        .to_string())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CallConfig {
    pub connect_timeout_secs: u64,
}

impl CallConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
        }
    }
}
