//! In-memory Discord double.

use crate::{
    BotPermissions, ChannelInfo, DiscordActions, Embed, GuildInfo, MemberInfo, RoleInfo,
};
use async_trait::async_trait;
use meridian_error::{MeridianResult, ModerationError, ModerationErrorKind};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A call made against [`ScriptedDiscord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscordCall {
    /// Role added
    AddRole {
        /// Member
        user_id: u64,
        /// Role
        role_id: u64,
        /// Audit reason
        reason: String,
    },
    /// Role removed
    RemoveRole {
        /// Member
        user_id: u64,
        /// Role
        role_id: u64,
        /// Audit reason
        reason: String,
    },
    /// Member kicked
    Kick {
        /// Member
        user_id: u64,
        /// Audit reason
        reason: String,
    },
    /// User banned
    Ban {
        /// User
        user_id: u64,
        /// Days of messages purged
        delete_message_days: u8,
        /// Audit reason
        reason: String,
    },
    /// Ban lifted
    Unban {
        /// User
        user_id: u64,
        /// Audit reason
        reason: String,
    },
    /// Message deleted
    DeleteMessage {
        /// Channel
        channel_id: u64,
        /// Message
        message_id: u64,
    },
}

/// A direct message delivered to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectMessage {
    /// Rich embed
    Embed(Embed),
    /// Plain text
    Text(String),
}

/// A message posted in a guild channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    /// Channel
    pub channel_id: u64,
    /// Plain text content
    pub text: Option<String>,
    /// Embed content
    pub embed: Option<Embed>,
}

#[derive(Debug, Default)]
struct ScriptedGuild {
    info: Option<GuildInfo>,
    roles: BTreeMap<u64, RoleInfo>,
    members: BTreeMap<u64, Vec<u64>>,
    bans: HashSet<u64>,
    immune: HashSet<u64>,
    channels: Vec<ChannelInfo>,
    denied: Vec<(u64, u64)>,
}

#[derive(Debug, Default)]
struct ScriptedState {
    guilds: HashMap<u64, ScriptedGuild>,
    channel_guild: HashMap<u64, u64>,
    users: HashMap<u64, String>,
    messages: BTreeMap<u64, PostedMessage>,
    dms: Vec<(u64, DirectMessage)>,
    calls: Vec<DiscordCall>,
    failing: HashSet<&'static str>,
    closed_dms: HashSet<u64>,
    next_id: u64,
}

impl ScriptedState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        900_000 + self.next_id
    }

    fn guild_mut(&mut self, guild_id: u64) -> MeridianResult<&mut ScriptedGuild> {
        self.guilds
            .get_mut(&guild_id)
            .ok_or_else(|| discord_error(format!("Unknown Guild {}", guild_id)))
    }
}

#[track_caller]
fn discord_error(message: impl Into<String>) -> meridian_error::MeridianError {
    ModerationError::new(ModerationErrorKind::Discord(message.into())).into()
}

/// Discord double over an in-memory guild model.
///
/// Guilds, roles and members are declared up front; every mutating call is
/// applied to the model and recorded, so tests can assert on both the end
/// state and the calls made. Operations can be made to fail by name.
///
/// ```
/// use meridian_moderation::{BotPermissions, ScriptedDiscord};
///
/// let discord = ScriptedDiscord::new(1)
///     .with_guild(100, "Lounge", 2, 50, BotPermissions::all())
///     .with_role(100, 30, "Muted", 10)
///     .with_member(100, 42, "kat", &[]);
/// assert!(discord.member_roles(100, 42).is_empty());
/// ```
#[derive(Debug)]
pub struct ScriptedDiscord {
    bot_id: u64,
    state: Mutex<ScriptedState>,
}

impl ScriptedDiscord {
    /// Create a double whose bot user has `bot_id`.
    pub fn new(bot_id: u64) -> Self {
        let mut state = ScriptedState::default();
        state.users.insert(bot_id, "Meridian".to_string());
        Self {
            bot_id,
            state: Mutex::new(state),
        }
    }

    /// Declare a guild and the bot's standing in it.
    pub fn with_guild(
        self,
        guild_id: u64,
        name: &str,
        owner_id: u64,
        bot_top_role_position: i64,
        bot_permissions: BotPermissions,
    ) -> Self {
        self.state.lock().guilds.entry(guild_id).or_default().info = Some(GuildInfo {
            id: guild_id,
            name: name.to_string(),
            owner_id,
            bot_top_role_position,
            bot_permissions,
        });
        self
    }

    /// Declare a role.
    pub fn with_role(self, guild_id: u64, role_id: u64, name: &str, position: i64) -> Self {
        self.insert_role(guild_id, role_id, name, position, false);
        self
    }

    /// Declare a role managed by an integration.
    pub fn with_managed_role(self, guild_id: u64, role_id: u64, name: &str, position: i64) -> Self {
        self.insert_role(guild_id, role_id, name, position, true);
        self
    }

    fn insert_role(&self, guild_id: u64, role_id: u64, name: &str, position: i64, managed: bool) {
        self.state.lock().guilds.entry(guild_id).or_default().roles.insert(
            role_id,
            RoleInfo {
                id: role_id,
                name: name.to_string(),
                position,
                managed,
            },
        );
    }

    /// Declare a member and the roles they hold.
    pub fn with_member(self, guild_id: u64, user_id: u64, name: &str, roles: &[u64]) -> Self {
        {
            let mut state = self.state.lock();
            state.users.insert(user_id, name.to_string());
            state
                .guilds
                .entry(guild_id)
                .or_default()
                .members
                .insert(user_id, roles.to_vec());
        }
        self
    }

    /// Declare a user who is not in any guild.
    pub fn with_user(self, user_id: u64, name: &str) -> Self {
        self.state.lock().users.insert(user_id, name.to_string());
        self
    }

    /// Mark a member as automod-immune.
    pub fn with_immune(self, guild_id: u64, user_id: u64) -> Self {
        self.state
            .lock()
            .guilds
            .entry(guild_id)
            .or_default()
            .immune
            .insert(user_id);
        self
    }

    /// Declare a channel.
    pub fn with_channel(self, guild_id: u64, channel_id: u64, name: &str) -> Self {
        self.add_channel(guild_id, channel_id, name);
        self
    }

    /// Create a text channel, as if a moderator just added it.
    pub fn add_channel(&self, guild_id: u64, channel_id: u64, name: &str) {
        let mut state = self.state.lock();
        state.channel_guild.insert(channel_id, guild_id);
        state.guilds.entry(guild_id).or_default().channels.push(ChannelInfo {
            id: channel_id,
            name: name.to_string(),
            text: true,
        });
    }

    /// Make every call of the named operation fail (`"ban"`, `"send_dm"`, ...).
    pub fn fail(&self, operation: &'static str) {
        self.state.lock().failing.insert(operation);
    }

    /// Undo [`ScriptedDiscord::fail`].
    pub fn recover(&self, operation: &'static str) {
        self.state.lock().failing.remove(operation);
    }

    /// Refuse DMs from the bot for a user.
    pub fn close_dms(&self, user_id: u64) {
        self.state.lock().closed_dms.insert(user_id);
    }

    /// Remove a member from a guild, as if they left.
    pub fn remove_member(&self, guild_id: u64, user_id: u64) {
        if let Some(guild) = self.state.lock().guilds.get_mut(&guild_id) {
            guild.members.remove(&user_id);
        }
    }

    /// Calls recorded so far.
    pub fn calls(&self) -> Vec<DiscordCall> {
        self.state.lock().calls.clone()
    }

    /// Role ids a member currently holds.
    pub fn member_roles(&self, guild_id: u64, user_id: u64) -> Vec<u64> {
        self.state
            .lock()
            .guilds
            .get(&guild_id)
            .and_then(|g| g.members.get(&user_id).cloned())
            .unwrap_or_default()
    }

    /// Whether a user is banned.
    pub fn is_banned(&self, guild_id: u64, user_id: u64) -> bool {
        self.state
            .lock()
            .guilds
            .get(&guild_id)
            .is_some_and(|g| g.bans.contains(&user_id))
    }

    /// Whether a user is a member.
    pub fn is_member(&self, guild_id: u64, user_id: u64) -> bool {
        self.state
            .lock()
            .guilds
            .get(&guild_id)
            .is_some_and(|g| g.members.contains_key(&user_id))
    }

    /// DMs delivered to a user.
    pub fn dms(&self, user_id: u64) -> Vec<DirectMessage> {
        self.state
            .lock()
            .dms
            .iter()
            .filter(|(to, _)| *to == user_id)
            .map(|(_, dm)| dm.clone())
            .collect()
    }

    /// A posted message that was not deleted.
    pub fn message(&self, message_id: u64) -> Option<PostedMessage> {
        self.state.lock().messages.get(&message_id).cloned()
    }

    /// Messages still present in a channel, oldest first.
    pub fn messages_in(&self, channel_id: u64) -> Vec<PostedMessage> {
        self.state
            .lock()
            .messages
            .values()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect()
    }

    /// Channels the role was denied in.
    pub fn denied_channels(&self, guild_id: u64, role_id: u64) -> Vec<u64> {
        self.state
            .lock()
            .guilds
            .get(&guild_id)
            .map(|g| {
                g.denied
                    .iter()
                    .filter(|(_, role)| *role == role_id)
                    .map(|(channel, _)| *channel)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check(&self, operation: &'static str) -> MeridianResult<()> {
        if self.state.lock().failing.contains(operation) {
            return Err(discord_error(format!("{} failed: Missing Permissions", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl DiscordActions for ScriptedDiscord {
    async fn bot_user_id(&self) -> MeridianResult<u64> {
        Ok(self.bot_id)
    }

    async fn guild(&self, guild_id: u64) -> MeridianResult<GuildInfo> {
        self.check("guild")?;
        let mut state = self.state.lock();
        state
            .guild_mut(guild_id)?
            .info
            .clone()
            .ok_or_else(|| discord_error(format!("Unknown Guild {}", guild_id)))
    }

    async fn member(&self, guild_id: u64, user_id: u64) -> MeridianResult<Option<MemberInfo>> {
        self.check("member")?;
        let state = self.state.lock();
        let Some(guild) = state.guilds.get(&guild_id) else {
            return Ok(None);
        };
        let Some(role_ids) = guild.members.get(&user_id) else {
            return Ok(None);
        };
        let roles = role_ids
            .iter()
            .filter_map(|id| guild.roles.get(id).cloned())
            .collect();
        Ok(Some(MemberInfo {
            id: user_id,
            name: state.users.get(&user_id).cloned().unwrap_or_default(),
            avatar_url: None,
            roles,
        }))
    }

    async fn user_name(&self, user_id: u64) -> MeridianResult<String> {
        self.state
            .lock()
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| discord_error(format!("Unknown User {}", user_id)))
    }

    async fn role(&self, guild_id: u64, role_id: u64) -> MeridianResult<Option<RoleInfo>> {
        Ok(self
            .state
            .lock()
            .guilds
            .get(&guild_id)
            .and_then(|g| g.roles.get(&role_id).cloned()))
    }

    async fn is_automod_immune(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool> {
        Ok(self
            .state
            .lock()
            .guilds
            .get(&guild_id)
            .is_some_and(|g| g.immune.contains(&user_id)))
    }

    async fn add_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> MeridianResult<()> {
        self.check("add_role")?;
        let mut state = self.state.lock();
        let guild = state.guild_mut(guild_id)?;
        let roles = guild
            .members
            .get_mut(&user_id)
            .ok_or_else(|| discord_error(format!("Unknown Member {}", user_id)))?;
        if !roles.contains(&role_id) {
            roles.push(role_id);
        }
        state.calls.push(DiscordCall::AddRole {
            user_id,
            role_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> MeridianResult<()> {
        self.check("remove_role")?;
        let mut state = self.state.lock();
        let guild = state.guild_mut(guild_id)?;
        let roles = guild
            .members
            .get_mut(&user_id)
            .ok_or_else(|| discord_error(format!("Unknown Member {}", user_id)))?;
        roles.retain(|r| *r != role_id);
        state.calls.push(DiscordCall::RemoveRole {
            user_id,
            role_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> MeridianResult<()> {
        self.check("kick")?;
        let mut state = self.state.lock();
        state.guild_mut(guild_id)?.members.remove(&user_id);
        state.calls.push(DiscordCall::Kick {
            user_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        delete_message_days: u8,
        reason: &str,
    ) -> MeridianResult<()> {
        self.check("ban")?;
        let mut state = self.state.lock();
        let guild = state.guild_mut(guild_id)?;
        guild.members.remove(&user_id);
        guild.bans.insert(user_id);
        state.calls.push(DiscordCall::Ban {
            user_id,
            delete_message_days,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> MeridianResult<()> {
        self.check("unban")?;
        let mut state = self.state.lock();
        if !state.guild_mut(guild_id)?.bans.remove(&user_id) {
            return Err(discord_error(format!("Unknown Ban {}", user_id)));
        }
        state.calls.push(DiscordCall::Unban {
            user_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn send_dm_embed(&self, user_id: u64, embed: &Embed) -> MeridianResult<()> {
        self.check("send_dm")?;
        let mut state = self.state.lock();
        if state.closed_dms.contains(&user_id) {
            return Err(discord_error("Cannot send messages to this user"));
        }
        state.dms.push((user_id, DirectMessage::Embed(embed.clone())));
        Ok(())
    }

    async fn send_dm_text(&self, user_id: u64, text: &str) -> MeridianResult<()> {
        self.check("send_dm")?;
        let mut state = self.state.lock();
        if state.closed_dms.contains(&user_id) {
            return Err(discord_error("Cannot send messages to this user"));
        }
        state.dms.push((user_id, DirectMessage::Text(text.to_string())));
        Ok(())
    }

    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> MeridianResult<u64> {
        self.check("send_message")?;
        let mut state = self.state.lock();
        let id = state.next_id();
        state.messages.insert(
            id,
            PostedMessage {
                channel_id,
                text: None,
                embed: Some(embed.clone()),
            },
        );
        Ok(id)
    }

    async fn send_text(&self, channel_id: u64, text: &str) -> MeridianResult<u64> {
        self.check("send_message")?;
        let mut state = self.state.lock();
        let id = state.next_id();
        state.messages.insert(
            id,
            PostedMessage {
                channel_id,
                text: Some(text.to_string()),
                embed: None,
            },
        );
        Ok(id)
    }

    async fn fetch_embed(&self, channel_id: u64, message_id: u64) -> MeridianResult<Option<Embed>> {
        let state = self.state.lock();
        match state.messages.get(&message_id) {
            Some(message) if message.channel_id == channel_id => Ok(message.embed.clone()),
            _ => Err(discord_error(format!("Unknown Message {}", message_id))),
        }
    }

    async fn edit_embed(
        &self,
        channel_id: u64,
        message_id: u64,
        embed: &Embed,
    ) -> MeridianResult<()> {
        self.check("edit_message")?;
        let mut state = self.state.lock();
        match state.messages.get_mut(&message_id) {
            Some(message) if message.channel_id == channel_id => {
                message.embed = Some(embed.clone());
                Ok(())
            }
            _ => Err(discord_error(format!("Unknown Message {}", message_id))),
        }
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> MeridianResult<()> {
        self.check("delete_message")?;
        let mut state = self.state.lock();
        if state.messages.remove(&message_id).is_none() {
            return Err(discord_error(format!("Unknown Message {}", message_id)));
        }
        state.calls.push(DiscordCall::DeleteMessage {
            channel_id,
            message_id,
        });
        Ok(())
    }

    async fn create_invite(&self, guild_id: u64) -> MeridianResult<Option<String>> {
        self.check("create_invite")?;
        let mut state = self.state.lock();
        let has_channel = state
            .guilds
            .get(&guild_id)
            .is_some_and(|g| g.channels.iter().any(|c| c.text));
        if !has_channel {
            return Ok(None);
        }
        let code = state.next_id();
        Ok(Some(format!("https://discord.gg/{:x}", code)))
    }

    async fn create_role(&self, guild_id: u64, name: &str, _reason: &str) -> MeridianResult<RoleInfo> {
        self.check("create_role")?;
        let mut state = self.state.lock();
        let id = state.next_id();
        let role = RoleInfo {
            id,
            name: name.to_string(),
            position: 1,
            managed: false,
        };
        state.guild_mut(guild_id)?.roles.insert(id, role.clone());
        Ok(role)
    }

    async fn move_role(
        &self,
        guild_id: u64,
        role_id: u64,
        position: i64,
        _reason: &str,
    ) -> MeridianResult<()> {
        self.check("move_role")?;
        let mut state = self.state.lock();
        let role = state
            .guild_mut(guild_id)?
            .roles
            .get_mut(&role_id)
            .ok_or_else(|| discord_error(format!("Unknown Role {}", role_id)))?;
        role.position = position;
        Ok(())
    }

    async fn channels(&self, guild_id: u64) -> MeridianResult<Vec<ChannelInfo>> {
        Ok(self
            .state
            .lock()
            .guilds
            .get(&guild_id)
            .map(|g| g.channels.clone())
            .unwrap_or_default())
    }

    async fn deny_send(&self, channel_id: u64, role_id: u64, _reason: &str) -> MeridianResult<()> {
        self.check("deny_send")?;
        let mut state = self.state.lock();
        let guild_id = *state
            .channel_guild
            .get(&channel_id)
            .ok_or_else(|| discord_error(format!("Unknown Channel {}", channel_id)))?;
        state.guild_mut(guild_id)?.denied.push((channel_id, role_id));
        Ok(())
    }
}
