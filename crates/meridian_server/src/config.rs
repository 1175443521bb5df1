//! Service configuration.
//!
//! Sources, later ones winning:
//! - bundled defaults (`meridian.toml` shipped with the crate)
//! - `~/.config/meridian/meridian.toml`
//! - `./meridian.toml`
//! - `MERIDIAN__SECTION__KEY` environment variables

use config::{Config, Environment, File, FileFormat};
use derive_getters::Getters;
use meridian_browser::BrowserConfig;
use meridian_error::{ConfigError, MeridianResult};
use meridian_moderation::ModerationConfig;
use meridian_quota::QuotaConfig;
use meridian_render::RenderConfig;
use meridian_storage::ObjectCacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../meridian.toml");

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct MeridianConfig {
    /// HTTP listener
    #[serde(default)]
    server: ServerConfig,
    /// Key-value store
    #[serde(default)]
    kv: KvConfig,
    /// Postgres
    #[serde(default)]
    database: DatabaseConfig,
    /// Object cache and render pipeline
    #[serde(default)]
    media: MediaConfig,
    /// Browser context pool
    #[serde(default)]
    browser: BrowserConfig,
    /// Accounts and limits
    #[serde(default)]
    quota: QuotaConfig,
    /// Moderation core
    #[serde(default)]
    moderation: ModerationConfig,
    /// Spotify OAuth client
    #[serde(default)]
    spotify: SpotifyConfig,
    /// Discord bot credentials
    #[serde(default)]
    discord: DiscordConfig,
    /// Log output
    #[serde(default)]
    logging: LoggingConfig,
}

impl MeridianConfig {
    /// Load configuration from a single file, without the layered sources.
    pub fn from_file(path: impl AsRef<Path>) -> MeridianResult<Self> {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from(path.as_ref()))
            .build()
            .map_err(|e| {
                ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    path.as_ref().display(),
                    e
                ))
            })?
            .try_deserialize()
            .map_err(|e| ConfigError::new(format!("Failed to parse configuration: {}", e)).into())
    }

    /// Load the layered configuration.
    ///
    /// ```no_run
    /// use meridian_server::MeridianConfig;
    ///
    /// # fn main() -> meridian_error::MeridianResult<()> {
    /// let config = MeridianConfig::load()?;
    /// println!("listening on {}", config.server().bind());
    /// # Ok(())
    /// # }
    /// ```
    pub fn load() -> MeridianResult<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(dir) = dirs::config_dir() {
            let user_config = dir.join("meridian").join("meridian.toml");
            builder = builder.add_source(File::from(user_config).required(false));
        }

        builder = builder
            .add_source(File::with_name("meridian").required(false))
            .add_source(
                Environment::with_prefix("MERIDIAN")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("browser.proxies")
                    .with_list_parse_key("quota.admins"),
            );

        builder
            .build()
            .map_err(|e| ConfigError::new(format!("Failed to build configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| ConfigError::new(format!("Failed to parse configuration: {}", e)).into())
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    bind: String,
    /// Include error details in responses
    #[serde(default)]
    debug: bool,
}

fn default_bind() -> String {
    "0.0.0.0:8091".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            debug: false,
        }
    }
}

/// Key-value store location.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct KvConfig {
    /// Redis URL; the in-memory store is used when absent
    #[serde(default)]
    url: Option<String>,
}

/// Postgres location.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct DatabaseConfig {
    /// Connection URL; cases stay in memory and message lookups 404 when absent
    #[serde(default)]
    url: Option<String>,
    /// Pooled connections
    #[serde(default = "default_pool_size")]
    pool_size: u32,
}

fn default_pool_size() -> u32 {
    8
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
        }
    }
}

/// Object cache and render pipeline settings.
///
/// Cache and render keys sit directly under `[media]`.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct MediaConfig {
    /// Directory artifacts are written to
    #[serde(default = "default_cache_dir")]
    cache_dir: PathBuf,
    /// Period of the expired-artifact sweep (seconds)
    #[serde(default = "default_sweep_interval_secs")]
    sweep_interval_secs: u64,
    /// Object cache settings
    #[serde(flatten)]
    cache: ObjectCacheConfig,
    /// Render pipeline settings
    #[serde(flatten)]
    render: RenderConfig,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("api-cache")
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            sweep_interval_secs: default_sweep_interval_secs(),
            cache: ObjectCacheConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl MediaConfig {
    /// Sweep period.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

/// Spotify OAuth client.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct SpotifyConfig {
    /// Application client id
    #[serde(default)]
    client_id: Option<String>,
    /// Application client secret
    #[serde(default)]
    client_secret: Option<String>,
    /// Registered callback, normally `{public origin}/sp_callback`
    #[serde(default = "default_redirect_uri")]
    redirect_uri: String,
}

fn default_redirect_uri() -> String {
    "http://localhost:8091/sp_callback".to_string()
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            redirect_uri: default_redirect_uri(),
        }
    }
}

/// Discord bot credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct DiscordConfig {
    /// Bot token for the users API and the moderation service
    #[serde(default)]
    bot_token: Option<String>,
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, derive_setters::Setters)]
#[setters(prefix = "with_")]
pub struct LoggingConfig {
    /// Output format
    #[serde(default)]
    format: LogFormat,
    /// Filter directives used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_defaults_parse() {
        let config: MeridianConfig = Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.server().bind(), "0.0.0.0:8091");
        assert!(config.kv().url().is_none());
        assert_eq!(*config.database().pool_size(), 8);
        assert_eq!(config.media().cache_dir(), &PathBuf::from("api-cache"));
        assert_eq!(*config.media().cache().default_ttl_secs(), 691_200);
        assert_eq!(*config.media().render().render_concurrency(), 34);
        assert_eq!(*config.browser().per_account(), 2);
        assert_eq!(*config.quota().max_prefix_length(), 20);
        assert_eq!(*config.moderation().queue_limit(), 10_000);
        assert_eq!(*config.moderation().default_case_ttl_secs(), 12 * 86_400);
        assert_eq!(*config.logging().format(), LogFormat::Pretty);
    }

    #[test]
    fn test_struct_defaults_match_bundle() {
        let config = MeridianConfig::default();
        assert_eq!(config.server().bind(), "0.0.0.0:8091");
        assert_eq!(*config.media().sweep_interval_secs(), 300);
        assert_eq!(config.spotify().redirect_uri(), "http://localhost:8091/sp_callback");
    }
}
