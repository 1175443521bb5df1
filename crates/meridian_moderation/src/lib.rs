//! Moderation core for Meridian.
//!
//! A [`ModerationService`] issues warnings at five levels (warn, mute, kick,
//! softban, ban), records each one as a [`Case`] in a per-member log, posts
//! modlog embeds and DMs the member. Timed mutes and bans are tracked in a
//! [`TempActionIndex`] and lifted by a background timer. Automod adds regex
//! triggers, antispam and autowarn escalation on top.
//!
//! Discord is reached through the [`DiscordActions`] trait. The `discord`
//! feature provides a serenity implementation; [`ScriptedDiscord`] models a
//! guild in memory for tests.
//!
//! # Example
//!
//! ```
//! use meridian_kv::MemoryKv;
//! use meridian_moderation::{
//!     BotPermissions, MemoryCaseStore, ModerationConfig, ModerationService, ScriptedDiscord,
//!     WarnRequest,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> meridian_error::MeridianResult<()> {
//! let discord = ScriptedDiscord::new(1)
//!     .with_guild(10, "Guild", 2, 50, BotPermissions::all())
//!     .with_member(10, 2, "owner", &[])
//!     .with_member(10, 3, "kat", &[]);
//! let service = ModerationService::new(
//!     Arc::new(discord),
//!     Arc::new(MemoryCaseStore::new()),
//!     Arc::new(MemoryKv::new()),
//!     ModerationConfig::default(),
//! );
//! let failures = service
//!     .warn(WarnRequest::new(10, vec![3], 2, 1).with_reason("be nice".to_string()))
//!     .await?;
//! assert!(failures.is_empty());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod actions;
mod automod;
mod case;
#[cfg(feature = "discord")]
mod discord;
pub mod format;
mod queue;
mod scripted;
mod service;
mod settings;
mod store;
mod temp;
mod timer;

pub use actions::{
    BotPermissions, ChannelInfo, DiscordActions, Embed, EmbedField, GuildInfo, MemberInfo,
    RoleInfo, SharedDiscord, mention,
};
pub use automod::{
    AntispamTracker, AutomodMessage, RegexCache, RegexOutcome, SpamVerdict, triggered_rules,
};
pub use case::{Case, CaseAuthor, GuildCase, Level, ModlogMessageRef, sort_cases};
#[cfg(feature = "discord")]
pub use discord::SerenityActions;
pub use queue::{QueuedWarn, WarnQueue};
pub use scripted::{DirectMessage, DiscordCall, PostedMessage, ScriptedDiscord};
pub use service::{
    LatestCase, ModerationService, MuteRoleSetup, WarnFailure, WarnRequest, ban_key,
};
pub use settings::{
    AntispamDefaults, AntispamSettings, AutomodSettings, AutowarnRule, BanDays, GuildModSettings,
    ModerationConfig, ModlogChannels, PrescribedWarn, RegexRule, SettingsStore, settings_key,
};
#[cfg(feature = "database")]
pub use store::PgCaseStore;
pub use store::{CaseStore, MemoryCaseStore, SharedCaseStore};
pub use temp::{CorruptEntry, TempAction, TempActionIndex};
pub use timer::TimerReport;
