//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `NOTECAL__SECTION__KEY` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use notecal_core::constants::{DEFAULT_CALENDAR_COLOR, DEFAULT_CALENDAR_NAME};
use serde::{Deserialize, Deserializer};

const DEFAULT_BIND: &str = "127.0.0.1:8787";
const DEFAULT_TICK_EVERY: &str = "1m";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub notion: NotionConfig,
    #[serde(default)]
    pub icloud: ICloudConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Clone, Default, Deserialize)]
pub struct NotionConfig {
    #[serde(default)]
    pub token: String,
    pub api_version: Option<String>,
    /// Database ids to mirror. Empty means every shared task database.
    #[serde(default, deserialize_with = "string_or_list")]
    pub databases: Vec<String>,
    pub base_url: Option<String>,
}

impl std::fmt::Debug for NotionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotionConfig")
            .field("api_version", &self.api_version)
            .field("databases", &self.databases)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct ICloudConfig {
    #[serde(default)]
    pub apple_id: String,
    #[serde(default)]
    pub app_password: String,
    pub caldav_url: Option<String>,
}

impl std::fmt::Debug for ICloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ICloudConfig")
            .field("apple_id", &self.apple_id)
            .field("caldav_url", &self.caldav_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarConfig {
    #[serde(default = "default_calendar_name")]
    pub name: String,
    #[serde(default = "default_calendar_color")]
    pub color: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        CalendarConfig {
            name: default_calendar_name(),
            color: default_calendar_color(),
        }
    }
}

#[derive(Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    pub admin_token: Option<String>,
    /// Used when Notion's handshake never reached this server.
    pub webhook_verification_token: Option<String>,
    /// How often the cron loop wakes up, e.g. "1m" or "30s".
    #[serde(default = "default_tick_every")]
    pub tick_every: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("tick_every", &self.tick_every)
            .finish_non_exhaustive()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: default_bind(),
            admin_token: None,
            webhook_verification_token: None,
            tick_every: default_tick_every(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateConfig {
    pub dir: Option<PathBuf>,
}

fn default_calendar_name() -> String {
    DEFAULT_CALENDAR_NAME.to_string()
}

fn default_calendar_color() -> String {
    DEFAULT_CALENDAR_COLOR.to_string()
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_tick_every() -> String {
    DEFAULT_TICK_EVERY.to_string()
}

/// Accepts `["a", "b"]` from TOML or `"a,b"` from the environment.
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    let items = match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s.split(',').map(str::to_string).collect(),
        OneOrMany::Many(v) => v,
    };
    Ok(items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

impl AppConfig {
    /// Default location: `~/.config/notecal/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine config directory")?;
        Ok(dir.join("notecal").join("config.toml"))
    }

    /// Load configuration. An explicitly given file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        let config: AppConfig = Config::builder()
            .add_source(File::from(path.clone()).required(required))
            .add_source(
                Environment::with_prefix("NOTECAL")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("Invalid configuration")?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Directory of the file-backed state store.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state.dir {
            Some(dir) => Ok(PathBuf::from(
                shellexpand::tilde(&dir.to_string_lossy()).into_owned(),
            )),
            None => {
                let data = dirs::data_dir().context("Could not determine data directory")?;
                Ok(data.join("notecal").join("state"))
            }
        }
    }

    pub fn tick_every(&self) -> Result<Duration> {
        let every = humantime::parse_duration(self.server.tick_every.trim())
            .with_context(|| format!("Invalid server.tick_every '{}'", self.server.tick_every))?;
        if every.is_zero() {
            bail!("server.tick_every must be greater than zero");
        }
        Ok(every)
    }

    pub fn admin_token(&self) -> Option<String> {
        non_blank(self.server.admin_token.as_deref())
    }

    pub fn webhook_seed(&self) -> Option<String> {
        non_blank(self.server.webhook_verification_token.as_deref())
    }

    /// Credentials needed to talk to Notion and iCloud.
    pub fn require_credentials(&self) -> Result<()> {
        if self.notion.token.trim().is_empty() {
            bail!("notion.token is not set (config file or NOTECAL__NOTION__TOKEN)");
        }
        if self.icloud.apple_id.trim().is_empty() || self.icloud.app_password.trim().is_empty() {
            bail!(
                "icloud.apple_id and icloud.app_password are required \
                 (use an app-specific password from appleid.apple.com)"
            );
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
