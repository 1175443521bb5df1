//! The Discord operations the moderation core performs.
//!
//! [`DiscordActions`] is the seam between the moderation logic and Discord.
//! The serenity adapter implements it over the REST client; [`ScriptedDiscord`]
//! implements it over an in-memory guild model for tests.
//!
//! [`ScriptedDiscord`]: crate::ScriptedDiscord

use async_trait::async_trait;
use meridian_error::MeridianResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Guild facts needed before acting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildInfo {
    /// Guild id
    pub id: u64,
    /// Guild name
    pub name: String,
    /// Owner user id
    pub owner_id: u64,
    /// Position of the bot's highest role
    pub bot_top_role_position: i64,
    /// Guild-level permissions of the bot
    pub bot_permissions: BotPermissions,
}

/// Guild-level permissions the moderation core checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotPermissions {
    /// Manage roles
    pub manage_roles: bool,
    /// Kick members
    pub kick_members: bool,
    /// Ban members
    pub ban_members: bool,
}

impl BotPermissions {
    /// Every permission granted.
    pub fn all() -> Self {
        Self {
            manage_roles: true,
            kick_members: true,
            ban_members: true,
        }
    }
}

/// A guild role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleInfo {
    /// Role id
    pub id: u64,
    /// Role name
    pub name: String,
    /// Hierarchy position; higher outranks lower
    pub position: i64,
    /// Managed by an integration, cannot be assigned
    pub managed: bool,
}

/// A guild member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    /// User id
    pub id: u64,
    /// Username
    pub name: String,
    /// Avatar URL
    pub avatar_url: Option<String>,
    /// Roles, excluding `@everyone`
    pub roles: Vec<RoleInfo>,
}

impl MemberInfo {
    /// Position of the member's highest role, 0 for `@everyone` only.
    pub fn top_role_position(&self) -> i64 {
        self.roles.iter().map(|r| r.position).max().unwrap_or(0)
    }

    /// Whether the member has a role.
    pub fn has_role(&self, role_id: u64) -> bool {
        self.roles.iter().any(|r| r.id == role_id)
    }

    /// Mention markup.
    pub fn mention(&self) -> String {
        mention(self.id)
    }
}

/// Mention markup for a user id.
pub fn mention(user_id: u64) -> String {
    format!("<@{}>", user_id)
}

/// A guild channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel id
    pub id: u64,
    /// Channel name
    pub name: String,
    /// Whether it is a text channel
    pub text: bool,
}

/// A field of an [`Embed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    /// Field title
    pub name: String,
    /// Field body
    pub value: String,
    /// Render beside the previous field
    pub inline: bool,
}

impl EmbedField {
    /// Create a field.
    pub fn new(name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            inline,
        }
    }
}

/// Platform-neutral rich embed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    /// Author line
    pub author: Option<String>,
    /// Author icon
    pub author_icon: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Description
    pub description: String,
    /// Fields in display order
    pub fields: Vec<EmbedField>,
    /// Colour as 0xRRGGBB
    pub colour: Option<u32>,
    /// Footer text
    pub footer: Option<String>,
    /// Unix timestamp shown in the footer
    pub timestamp: Option<i64>,
    /// Large image URL
    pub image: Option<String>,
}

impl Embed {
    /// First field with this name.
    pub fn field(&self, name: &str) -> Option<&EmbedField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Replace the value of the named field. Returns whether it existed.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => {
                field.value = value.into();
                true
            }
            None => false,
        }
    }
}

/// Discord operations used by the moderation core.
///
/// Every call maps onto one REST request (or a small fixed sequence) and
/// reports failures as `ModerationErrorKind::Discord`.
#[async_trait]
pub trait DiscordActions: Send + Sync {
    /// The bot's own user id.
    async fn bot_user_id(&self) -> MeridianResult<u64>;

    /// Guild facts, including the bot's standing in it.
    async fn guild(&self, guild_id: u64) -> MeridianResult<GuildInfo>;

    /// A member, `None` when the user is not in the guild.
    async fn member(&self, guild_id: u64, user_id: u64) -> MeridianResult<Option<MemberInfo>>;

    /// Username of any user.
    async fn user_name(&self, user_id: u64) -> MeridianResult<String>;

    /// A role, `None` when it was deleted.
    async fn role(&self, guild_id: u64, role_id: u64) -> MeridianResult<Option<RoleInfo>>;

    /// Whether automod ignores this member (administrators and moderators).
    async fn is_automod_immune(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool>;

    /// Add a role to a member.
    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str)
    -> MeridianResult<()>;

    /// Remove a role from a member.
    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> MeridianResult<()>;

    /// Kick a member.
    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> MeridianResult<()>;

    /// Ban a user, purging `delete_message_days` of messages.
    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        delete_message_days: u8,
        reason: &str,
    ) -> MeridianResult<()>;

    /// Lift a ban.
    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> MeridianResult<()>;

    /// DM an embed to a user.
    async fn send_dm_embed(&self, user_id: u64, embed: &Embed) -> MeridianResult<()>;

    /// DM plain text to a user.
    async fn send_dm_text(&self, user_id: u64, text: &str) -> MeridianResult<()>;

    /// Post an embed, returning the message id.
    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> MeridianResult<u64>;

    /// Post plain text, returning the message id.
    async fn send_text(&self, channel_id: u64, text: &str) -> MeridianResult<u64>;

    /// First embed of a posted message.
    async fn fetch_embed(&self, channel_id: u64, message_id: u64) -> MeridianResult<Option<Embed>>;

    /// Replace the embed of a posted message.
    async fn edit_embed(&self, channel_id: u64, message_id: u64, embed: &Embed)
    -> MeridianResult<()>;

    /// Delete a message.
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> MeridianResult<()>;

    /// Single-use invite from the first channel that allows one.
    async fn create_invite(&self, guild_id: u64) -> MeridianResult<Option<String>>;

    /// Create a role.
    async fn create_role(&self, guild_id: u64, name: &str, reason: &str) -> MeridianResult<RoleInfo>;

    /// Move a role in the hierarchy.
    async fn move_role(
        &self,
        guild_id: u64,
        role_id: u64,
        position: i64,
        reason: &str,
    ) -> MeridianResult<()>;

    /// Channels of a guild in display order.
    async fn channels(&self, guild_id: u64) -> MeridianResult<Vec<ChannelInfo>>;

    /// Deny a role send, react and speak in a channel.
    async fn deny_send(&self, channel_id: u64, role_id: u64, reason: &str) -> MeridianResult<()>;
}

/// Shared handle to the Discord adapter.
pub type SharedDiscord = Arc<dyn DiscordActions>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_role_position() {
        let role = |id, position| RoleInfo {
            id,
            name: format!("r{}", id),
            position,
            managed: false,
        };
        let member = MemberInfo {
            id: 5,
            name: "kat".into(),
            avatar_url: None,
            roles: vec![role(1, 3), role(2, 8), role(3, 1)],
        };
        assert_eq!(member.top_role_position(), 8);
        assert!(member.has_role(3));
        assert_eq!(member.mention(), "<@5>");

        let bare = MemberInfo {
            roles: Vec::new(),
            ..member
        };
        assert_eq!(bare.top_role_position(), 0);
    }

    #[test]
    fn test_set_field() {
        let mut embed = Embed {
            fields: vec![EmbedField::new("Reason", "old", false)],
            ..Default::default()
        };
        assert!(embed.set_field("Reason", "new"));
        assert!(!embed.set_field("Duration", "1 day"));
        assert_eq!(embed.field("Reason").unwrap().value, "new");
    }
}
