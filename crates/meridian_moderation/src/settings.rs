//! Per-guild moderation settings and process-wide moderation configuration.

use crate::Level;
use derive_getters::Getters;
use meridian_error::MeridianResult;
use meridian_kv::{KvJsonExt, SharedKv};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// KV key holding a guild's settings document.
pub fn settings_key(guild_id: u64) -> String {
    format!("modsystem:settings:{}", guild_id)
}

/// Process-wide moderation configuration.
///
/// ```toml
/// [moderation]
/// timer_interval_secs = 5
/// regex_timeout_ms = 100
///
/// [moderation.antispam]
/// max_messages = 5
/// window_secs = 2
/// delay_before_action_secs = 60
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
pub struct ModerationConfig {
    /// TTL of the latest-case document (seconds)
    #[serde(default = "default_case_ttl_secs")]
    #[builder(default = "default_case_ttl_secs()")]
    default_case_ttl_secs: u64,

    /// Most warns the automod queue holds at once
    #[serde(default = "default_queue_limit")]
    #[builder(default = "default_queue_limit()")]
    queue_limit: usize,

    /// Antispam defaults for guilds without their own values
    #[serde(default)]
    #[builder(default)]
    antispam: AntispamDefaults,

    /// Budget for one regex trigger against one message (milliseconds)
    #[serde(default = "default_regex_timeout_ms")]
    #[builder(default = "default_regex_timeout_ms()")]
    regex_timeout_ms: u64,

    /// Period of the temporary action loop (seconds)
    #[serde(default = "default_timer_interval_secs")]
    #[builder(default = "default_timer_interval_secs()")]
    timer_interval_secs: u64,

    /// Bot owners, exempt from hierarchy checks
    #[serde(default)]
    #[builder(default)]
    owners: Vec<u64>,
}

fn default_case_ttl_secs() -> u64 {
    12 * 86_400
}

fn default_queue_limit() -> usize {
    10_000
}

fn default_regex_timeout_ms() -> u64 {
    100
}

fn default_timer_interval_secs() -> u64 {
    5
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            default_case_ttl_secs: default_case_ttl_secs(),
            queue_limit: default_queue_limit(),
            antispam: AntispamDefaults::default(),
            regex_timeout_ms: default_regex_timeout_ms(),
            timer_interval_secs: default_timer_interval_secs(),
            owners: Vec::new(),
        }
    }
}

impl ModerationConfig {
    /// Regex trigger budget.
    pub fn regex_timeout(&self) -> Duration {
        Duration::from_millis(self.regex_timeout_ms)
    }

    /// Temporary action loop period.
    pub fn timer_interval(&self) -> Duration {
        Duration::from_secs(self.timer_interval_secs)
    }

    /// Settings a guild starts with.
    pub fn guild_defaults(&self) -> GuildModSettings {
        let mut settings = GuildModSettings::default();
        settings.automod.antispam.max_messages = self.antispam.max_messages;
        settings.automod.antispam.delay = self.antispam.window_secs;
        settings.automod.antispam.delay_before_action = self.antispam.delay_before_action_secs;
        settings
    }
}

/// Antispam thresholds applied to guilds that never changed them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Getters)]
pub struct AntispamDefaults {
    /// Messages allowed inside the window
    #[serde(default = "default_max_messages")]
    max_messages: usize,
    /// Window length (seconds)
    #[serde(default = "default_window_secs")]
    window_secs: u64,
    /// Re-trigger delay that escalates to a warn (seconds)
    #[serde(default = "default_delay_before_action")]
    delay_before_action_secs: u64,
}

fn default_max_messages() -> usize {
    5
}

fn default_window_secs() -> u64 {
    2
}

fn default_delay_before_action() -> u64 {
    60
}

impl Default for AntispamDefaults {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            window_secs: default_window_secs(),
            delay_before_action_secs: default_delay_before_action(),
        }
    }
}

/// Modlog channels: a default one plus optional per-level overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModlogChannels {
    /// Default modlog channel
    #[serde(default)]
    pub main: Option<u64>,
    /// Per-level channels keyed by level number
    #[serde(default = "default_level_channels")]
    pub levels: BTreeMap<u8, Option<u64>>,
}

fn default_level_channels() -> BTreeMap<u8, Option<u64>> {
    (1..=5).map(|level| (level, None)).collect()
}

impl Default for ModlogChannels {
    fn default() -> Self {
        Self {
            main: None,
            levels: default_level_channels(),
        }
    }
}

impl ModlogChannels {
    /// Channel for a level: its own override, else the main channel.
    pub fn for_level(&self, level: Level) -> Option<u64> {
        self.levels
            .get(&level.as_u8())
            .copied()
            .flatten()
            .or(self.main)
    }
}

/// Days of messages purged by bans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanDays {
    /// Softban purge
    pub softban: u8,
    /// Ban purge
    pub ban: u8,
}

impl Default for BanDays {
    fn default() -> Self {
        Self { softban: 7, ban: 7 }
    }
}

/// A warn issued automatically by automod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescribedWarn {
    /// Warning level
    pub level: Level,
    /// Reason shown in the modlog
    pub reason: String,
    /// Temporary action length (seconds)
    #[serde(default, alias = "time")]
    pub duration: Option<u64>,
}

/// Antispam parameters of a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AntispamSettings {
    /// Whether antispam runs
    #[serde(default)]
    pub enabled: bool,
    /// Messages allowed inside the window
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Window length (seconds)
    #[serde(default = "default_window_secs")]
    pub delay: u64,
    /// A re-trigger within this many seconds escalates to a warn
    #[serde(default = "default_delay_before_action")]
    pub delay_before_action: u64,
    /// Warn issued on escalation
    #[serde(default = "default_antispam_warn")]
    pub warn: PrescribedWarn,
}

fn default_antispam_warn() -> PrescribedWarn {
    PrescribedWarn {
        level: Level::Warn,
        reason: "Sending messages too fast!".to_string(),
        duration: None,
    }
}

impl Default for AntispamSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_messages: default_max_messages(),
            delay: default_window_secs(),
            delay_before_action: default_delay_before_action(),
            warn: default_antispam_warn(),
        }
    }
}

/// A regex trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegexRule {
    /// Pattern matched against message content
    pub regex: String,
    /// Warning level on match
    pub level: Level,
    /// Temporary action length (seconds)
    #[serde(default)]
    pub time: Option<u64>,
    /// Reason template; `{member}`, `{channel}` and `{guild}` are substituted
    pub reason: String,
}

/// An automatic warn driven by the member's modlog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutowarnRule {
    /// Matching warnings needed to fire
    pub number: usize,
    /// Only warnings newer than this many seconds count
    #[serde(default)]
    pub time: Option<u64>,
    /// Level the triggering warn must have; 0 matches any level
    #[serde(default)]
    pub level: u8,
    /// Only warns issued by the bot trigger this rule
    #[serde(default)]
    pub automod_only: bool,
    /// Warn issued when the rule fires
    pub warn: PrescribedWarn,
}

/// Automod configuration of a guild.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutomodSettings {
    /// Master switch
    #[serde(default)]
    pub enabled: bool,
    /// Message rate limiting
    #[serde(default)]
    pub antispam: AntispamSettings,
    /// Regex triggers by name
    #[serde(default)]
    pub regex: BTreeMap<String, RegexRule>,
    /// Modlog-driven automatic warns
    #[serde(default)]
    pub warnings: Vec<AutowarnRule>,
}

/// Moderation settings of one guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildModSettings {
    /// Moderators must give a reason
    #[serde(default)]
    pub force_reason: bool,
    /// Delete the command message after a warn
    #[serde(default)]
    pub delete_message: bool,
    /// Name the moderator in the member's DM
    #[serde(default = "yes")]
    pub show_mod: bool,
    /// Role given to muted members
    #[serde(default)]
    pub mute_role: Option<u64>,
    /// Deny the mute role in newly created channels
    #[serde(default = "yes")]
    pub update_mute: bool,
    /// Strip roles when muting
    #[serde(default)]
    pub remove_roles: bool,
    /// Moderators may only warn members below them
    #[serde(default = "yes")]
    pub respect_hierarchy: bool,
    /// DM an invite when a temporary ban ends
    #[serde(default = "yes")]
    pub reinvite: bool,
    /// Record manual bans as cases
    #[serde(default = "yes")]
    pub log_manual: bool,
    /// Modlog channels
    #[serde(default)]
    pub channels: ModlogChannels,
    /// Message purge lengths
    #[serde(default)]
    pub bandays: BanDays,
    /// `[key]` replacements applied to reasons
    #[serde(default)]
    pub substitutions: BTreeMap<String, String>,
    /// Embed colour per level
    #[serde(default = "default_colours")]
    pub colors: BTreeMap<u8, u32>,
    /// Automod
    #[serde(default)]
    pub automod: AutomodSettings,
}

fn yes() -> bool {
    true
}

fn default_colours() -> BTreeMap<u8, u32> {
    BTreeMap::from([
        (1, 0xF4AA42),
        (2, 0xD1ED35),
        (3, 0xED9735),
        (4, 0xED6F35),
        (5, 0xFF4C4C),
    ])
}

impl Default for GuildModSettings {
    fn default() -> Self {
        Self {
            force_reason: false,
            delete_message: false,
            show_mod: true,
            mute_role: None,
            update_mute: true,
            remove_roles: false,
            respect_hierarchy: true,
            reinvite: true,
            log_manual: true,
            channels: ModlogChannels::default(),
            bandays: BanDays::default(),
            substitutions: BTreeMap::new(),
            colors: default_colours(),
            automod: AutomodSettings::default(),
        }
    }
}

impl GuildModSettings {
    /// Embed colour for a level.
    pub fn colour(&self, level: Level) -> u32 {
        self.colors
            .get(&level.as_u8())
            .copied()
            .unwrap_or_else(|| default_colours()[&level.as_u8()])
    }

    /// Apply the `[key]` substitutions to a reason.
    pub fn format_reason(&self, reason: &str) -> String {
        self.substitutions
            .iter()
            .fold(reason.to_string(), |acc, (key, value)| {
                acc.replace(&format!("[{}]", key), value)
            })
    }

    /// Whether antispam should inspect messages.
    pub fn antispam_active(&self) -> bool {
        self.automod.enabled && self.automod.antispam.enabled
    }
}

/// Reads and writes guild settings in the KV store.
#[derive(Clone)]
pub struct SettingsStore {
    kv: SharedKv,
    config: ModerationConfig,
}

impl std::fmt::Debug for SettingsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsStore").finish_non_exhaustive()
    }
}

impl SettingsStore {
    /// Create a store over the KV.
    pub fn new(kv: SharedKv, config: ModerationConfig) -> Self {
        Self { kv, config }
    }

    /// Settings of a guild, or the configured defaults.
    pub async fn get(&self, guild_id: u64) -> MeridianResult<GuildModSettings> {
        Ok(self
            .kv
            .get_json::<GuildModSettings>(&settings_key(guild_id))
            .await?
            .unwrap_or_else(|| self.config.guild_defaults()))
    }

    /// Replace a guild's settings.
    #[tracing::instrument(skip(self, settings))]
    pub async fn save(&self, guild_id: u64, settings: &GuildModSettings) -> MeridianResult<()> {
        self.kv
            .set_json(&settings_key(guild_id), settings, None)
            .await?;
        tracing::debug!("Saved moderation settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = GuildModSettings::default();
        assert!(settings.show_mod);
        assert!(settings.respect_hierarchy);
        assert!(!settings.remove_roles);
        assert_eq!(settings.bandays, BanDays { softban: 7, ban: 7 });
        assert_eq!(settings.colour(Level::Ban), 0xFF4C4C);
        assert_eq!(settings.automod.antispam.max_messages, 5);
        assert_eq!(settings.automod.antispam.delay, 2);
        assert_eq!(settings.automod.antispam.delay_before_action, 60);
        assert_eq!(settings.automod.antispam.warn.reason, "Sending messages too fast!");
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let settings: GuildModSettings =
            serde_json::from_str(r#"{"mute_role": 77, "channels": {"main": 5}}"#).unwrap();
        assert_eq!(settings.mute_role, Some(77));
        assert!(settings.reinvite);
        assert_eq!(settings.channels.for_level(Level::Kick), Some(5));
        assert_eq!(settings.colour(Level::Warn), 0xF4AA42);
    }

    #[test]
    fn test_level_channel_overrides_main() {
        let mut channels = ModlogChannels {
            main: Some(1),
            ..Default::default()
        };
        channels.levels.insert(5, Some(9));
        assert_eq!(channels.for_level(Level::Ban), Some(9));
        assert_eq!(channels.for_level(Level::Mute), Some(1));
    }

    #[test]
    fn test_substitutions() {
        let mut settings = GuildModSettings::default();
        settings
            .substitutions
            .insert("spam".into(), "Spamming in chat".into());
        assert_eq!(
            settings.format_reason("[spam] again, see [rules]"),
            "Spamming in chat again, see [rules]"
        );
    }

    #[test]
    fn test_config_feeds_guild_defaults() {
        let config: ModerationConfig =
            serde_json::from_str(r#"{"antispam": {"max_messages": 8}}"#).unwrap();
        assert_eq!(*config.timer_interval_secs(), 5);
        assert_eq!(config.guild_defaults().automod.antispam.max_messages, 8);
        assert_eq!(config.guild_defaults().automod.antispam.delay, 2);
    }
}
