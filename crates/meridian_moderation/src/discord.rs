//! [`DiscordActions`] over serenity's REST client.

use crate::{
    BotPermissions, ChannelInfo, DiscordActions, Embed, EmbedField, GuildInfo, MemberInfo,
    RoleInfo,
};
use async_trait::async_trait;
use meridian_error::{MeridianResult, ModerationError};
use serenity::all::{
    ChannelId, ChannelType, CreateEmbed, CreateEmbedAuthor, CreateEmbedFooter, CreateInvite,
    CreateMessage, EditMessage, EditRole, GuildId, MessageId, PermissionOverwrite,
    PermissionOverwriteType, Permissions, Role, RoleId, Timestamp, UserId,
};
use serenity::http::{Http, HttpError};
use std::sync::Arc;
use tracing::{debug, error};

fn is_not_found(err: &serenity::Error) -> bool {
    matches!(
        err,
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response))
            if response.status_code.as_u16() == 404
    )
}

#[track_caller]
fn discord_error(operation: &str, err: serenity::Error) -> meridian_error::MeridianError {
    error!(operation, error = %err, "Discord request failed");
    ModerationError::from(err).into()
}

fn role_info(role: &Role) -> RoleInfo {
    RoleInfo {
        id: role.id.get(),
        name: role.name.clone(),
        position: i64::from(role.position),
        managed: role.managed,
    }
}

fn to_serenity_embed(embed: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new().description(embed.description.clone());
    if let Some(title) = &embed.title {
        builder = builder.title(title.clone());
    }
    if let Some(author) = &embed.author {
        let mut author_builder = CreateEmbedAuthor::new(author.clone());
        if let Some(icon) = &embed.author_icon {
            author_builder = author_builder.icon_url(icon.clone());
        }
        builder = builder.author(author_builder);
    }
    for field in &embed.fields {
        builder = builder.field(field.name.clone(), field.value.clone(), field.inline);
    }
    if let Some(colour) = embed.colour {
        builder = builder.colour(colour);
    }
    if let Some(footer) = &embed.footer {
        builder = builder.footer(CreateEmbedFooter::new(footer.clone()));
    }
    if let Some(timestamp) = embed.timestamp.and_then(|t| Timestamp::from_unix_timestamp(t).ok()) {
        builder = builder.timestamp(timestamp);
    }
    if let Some(image) = &embed.image {
        builder = builder.image(image.clone());
    }
    builder
}

fn from_serenity_embed(embed: &serenity::all::Embed) -> Embed {
    Embed {
        author: embed.author.as_ref().map(|a| a.name.clone()),
        author_icon: embed.author.as_ref().and_then(|a| a.icon_url.clone()),
        title: embed.title.clone(),
        description: embed.description.clone().unwrap_or_default(),
        fields: embed
            .fields
            .iter()
            .map(|f| EmbedField::new(f.name.clone(), f.value.clone(), f.inline))
            .collect(),
        colour: embed.colour.map(|c| c.0),
        footer: embed.footer.as_ref().map(|f| f.text.clone()),
        timestamp: embed.timestamp.map(|t| t.unix_timestamp()),
        image: embed.image.as_ref().map(|i| i.url.clone()),
    }
}

/// Discord adapter over a serenity [`Http`] client.
#[derive(Clone)]
pub struct SerenityActions {
    http: Arc<Http>,
}

impl std::fmt::Debug for SerenityActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerenityActions").finish_non_exhaustive()
    }
}

impl SerenityActions {
    /// Wrap an authenticated client.
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    async fn roles(&self, guild_id: u64) -> MeridianResult<Vec<Role>> {
        self.http
            .get_guild_roles(GuildId::new(guild_id))
            .await
            .map_err(|e| discord_error("get_guild_roles", e))
    }

    async fn permissions_of(&self, guild_id: u64, user_id: u64) -> MeridianResult<(Permissions, i64)> {
        let member = self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
            .map_err(|e| discord_error("get_member", e))?;
        let roles = self.roles(guild_id).await?;
        let mut permissions = Permissions::empty();
        let mut top = 0;
        for role in &roles {
            let everyone = role.id.get() == guild_id;
            if everyone || member.roles.contains(&role.id) {
                permissions |= role.permissions;
            }
            if member.roles.contains(&role.id) {
                top = top.max(i64::from(role.position));
            }
        }
        Ok((permissions, top))
    }
}

#[async_trait]
impl DiscordActions for SerenityActions {
    async fn bot_user_id(&self) -> MeridianResult<u64> {
        let user = self
            .http
            .get_current_user()
            .await
            .map_err(|e| discord_error("get_current_user", e))?;
        Ok(user.id.get())
    }

    async fn guild(&self, guild_id: u64) -> MeridianResult<GuildInfo> {
        let guild = self
            .http
            .get_guild(GuildId::new(guild_id))
            .await
            .map_err(|e| discord_error("get_guild", e))?;
        let bot_id = self.bot_user_id().await?;
        let (permissions, bot_top) = self.permissions_of(guild_id, bot_id).await?;
        let admin = permissions.administrator();
        debug!(guild_id, bot_top, "Fetched guild standing");
        Ok(GuildInfo {
            id: guild_id,
            name: guild.name,
            owner_id: guild.owner_id.get(),
            bot_top_role_position: bot_top,
            bot_permissions: BotPermissions {
                manage_roles: admin || permissions.manage_roles(),
                kick_members: admin || permissions.kick_members(),
                ban_members: admin || permissions.ban_members(),
            },
        })
    }

    async fn member(&self, guild_id: u64, user_id: u64) -> MeridianResult<Option<MemberInfo>> {
        let member = match self
            .http
            .get_member(GuildId::new(guild_id), UserId::new(user_id))
            .await
        {
            Ok(member) => member,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(discord_error("get_member", e)),
        };
        let roles = self
            .roles(guild_id)
            .await?
            .iter()
            .filter(|role| member.roles.contains(&role.id))
            .map(role_info)
            .collect();
        Ok(Some(MemberInfo {
            id: user_id,
            name: member.user.name.clone(),
            avatar_url: member.user.avatar_url(),
            roles,
        }))
    }

    async fn user_name(&self, user_id: u64) -> MeridianResult<String> {
        let user = self
            .http
            .get_user(UserId::new(user_id))
            .await
            .map_err(|e| discord_error("get_user", e))?;
        Ok(user.name)
    }

    async fn role(&self, guild_id: u64, role_id: u64) -> MeridianResult<Option<RoleInfo>> {
        Ok(self
            .roles(guild_id)
            .await?
            .iter()
            .find(|role| role.id.get() == role_id)
            .map(role_info))
    }

    async fn is_automod_immune(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool> {
        let (permissions, _) = self.permissions_of(guild_id, user_id).await?;
        Ok(permissions.administrator() || permissions.manage_messages())
    }

    async fn add_role(&self, guild_id: u64, user_id: u64, role_id: u64, reason: &str) -> MeridianResult<()> {
        self.http
            .add_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(|e| discord_error("add_member_role", e))
    }

    async fn remove_role(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
        reason: &str,
    ) -> MeridianResult<()> {
        self.http
            .remove_member_role(
                GuildId::new(guild_id),
                UserId::new(user_id),
                RoleId::new(role_id),
                Some(reason),
            )
            .await
            .map_err(|e| discord_error("remove_member_role", e))
    }

    async fn kick(&self, guild_id: u64, user_id: u64, reason: &str) -> MeridianResult<()> {
        self.http
            .kick_member(GuildId::new(guild_id), UserId::new(user_id), Some(reason))
            .await
            .map_err(|e| discord_error("kick_member", e))
    }

    async fn ban(
        &self,
        guild_id: u64,
        user_id: u64,
        delete_message_days: u8,
        reason: &str,
    ) -> MeridianResult<()> {
        self.http
            .ban_user(
                GuildId::new(guild_id),
                UserId::new(user_id),
                delete_message_days,
                Some(reason),
            )
            .await
            .map_err(|e| discord_error("ban_user", e))
    }

    async fn unban(&self, guild_id: u64, user_id: u64, reason: &str) -> MeridianResult<()> {
        self.http
            .remove_ban(GuildId::new(guild_id), UserId::new(user_id), Some(reason))
            .await
            .map_err(|e| discord_error("remove_ban", e))
    }

    async fn send_dm_embed(&self, user_id: u64, embed: &Embed) -> MeridianResult<()> {
        UserId::new(user_id)
            .direct_message(&self.http, CreateMessage::new().embed(to_serenity_embed(embed)))
            .await
            .map_err(|e| discord_error("direct_message", e))?;
        Ok(())
    }

    async fn send_dm_text(&self, user_id: u64, text: &str) -> MeridianResult<()> {
        UserId::new(user_id)
            .direct_message(&self.http, CreateMessage::new().content(text))
            .await
            .map_err(|e| discord_error("direct_message", e))?;
        Ok(())
    }

    async fn send_embed(&self, channel_id: u64, embed: &Embed) -> MeridianResult<u64> {
        let message = ChannelId::new(channel_id)
            .send_message(&self.http, CreateMessage::new().embed(to_serenity_embed(embed)))
            .await
            .map_err(|e| discord_error("send_message", e))?;
        Ok(message.id.get())
    }

    async fn send_text(&self, channel_id: u64, text: &str) -> MeridianResult<u64> {
        let message = ChannelId::new(channel_id)
            .say(&self.http, text)
            .await
            .map_err(|e| discord_error("send_message", e))?;
        Ok(message.id.get())
    }

    async fn fetch_embed(&self, channel_id: u64, message_id: u64) -> MeridianResult<Option<Embed>> {
        let message = self
            .http
            .get_message(ChannelId::new(channel_id), MessageId::new(message_id))
            .await
            .map_err(|e| discord_error("get_message", e))?;
        Ok(message.embeds.first().map(from_serenity_embed))
    }

    async fn edit_embed(&self, channel_id: u64, message_id: u64, embed: &Embed) -> MeridianResult<()> {
        ChannelId::new(channel_id)
            .edit_message(
                &self.http,
                MessageId::new(message_id),
                EditMessage::new().embed(to_serenity_embed(embed)),
            )
            .await
            .map_err(|e| discord_error("edit_message", e))?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: u64, message_id: u64) -> MeridianResult<()> {
        self.http
            .delete_message(ChannelId::new(channel_id), MessageId::new(message_id), None)
            .await
            .map_err(|e| discord_error("delete_message", e))
    }

    async fn create_invite(&self, guild_id: u64) -> MeridianResult<Option<String>> {
        for channel in self.channels(guild_id).await?.into_iter().filter(|c| c.text) {
            match ChannelId::new(channel.id)
                .create_invite(&self.http, CreateInvite::new().max_uses(1))
                .await
            {
                Ok(invite) => return Ok(Some(invite.url())),
                Err(e) => debug!(channel_id = channel.id, error = %e, "Cannot create invite here"),
            }
        }
        Ok(None)
    }

    async fn create_role(&self, guild_id: u64, name: &str, reason: &str) -> MeridianResult<RoleInfo> {
        let role = GuildId::new(guild_id)
            .create_role(&self.http, EditRole::new().name(name).audit_log_reason(reason))
            .await
            .map_err(|e| discord_error("create_role", e))?;
        Ok(role_info(&role))
    }

    async fn move_role(
        &self,
        guild_id: u64,
        role_id: u64,
        position: i64,
        reason: &str,
    ) -> MeridianResult<()> {
        debug!(guild_id, role_id, position, reason, "Moving role");
        GuildId::new(guild_id)
            .edit_role_position(
                &self.http,
                RoleId::new(role_id),
                u16::try_from(position.max(1)).unwrap_or(u16::MAX),
            )
            .await
            .map_err(|e| discord_error("edit_role_position", e))?;
        Ok(())
    }

    async fn channels(&self, guild_id: u64) -> MeridianResult<Vec<ChannelInfo>> {
        let mut channels = self
            .http
            .get_channels(GuildId::new(guild_id))
            .await
            .map_err(|e| discord_error("get_channels", e))?;
        channels.sort_by_key(|c| c.position);
        Ok(channels
            .into_iter()
            .map(|c| ChannelInfo {
                id: c.id.get(),
                name: c.name,
                text: c.kind == ChannelType::Text,
            })
            .collect())
    }

    async fn deny_send(&self, channel_id: u64, role_id: u64, reason: &str) -> MeridianResult<()> {
        debug!(channel_id, role_id, reason, "Denying role in channel");
        ChannelId::new(channel_id)
            .create_permission(
                &self.http,
                PermissionOverwrite {
                    allow: Permissions::empty(),
                    deny: Permissions::SEND_MESSAGES | Permissions::ADD_REACTIONS | Permissions::SPEAK,
                    kind: PermissionOverwriteType::Role(RoleId::new(role_id)),
                },
            )
            .await
            .map_err(|e| discord_error("create_permission", e))
    }
}
