//! Discord gateway bridge.
//!
//! Forwards guild events to the moderation service and records guild
//! messages for the message-cache route.

use chrono::DateTime;
use meridian_database::{Database, GuildMessageRow, to_db_id};
use meridian_moderation::{AutomodMessage, ModerationService};
use parking_lot::Mutex;
use serenity::all::{
    Client, Context, EventHandler, GatewayIntents, Guild, GuildChannel, GuildId,
    GuildMemberUpdateEvent, Member, Message, Ready, User,
};
use serenity::async_trait;
use serenity::model::guild::audit_log::{Action, MemberAction};
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Serenity handler feeding the moderation service.
pub struct ModerationHandler {
    service: ModerationService,
    db: Option<Database>,
    guild_names: Mutex<HashMap<u64, String>>,
    channel_names: Mutex<HashMap<u64, String>>,
}

impl ModerationHandler {
    /// Handler over a service and an optional message store.
    pub fn new(service: ModerationService, db: Option<Database>) -> Self {
        Self {
            service,
            db,
            guild_names: Mutex::new(HashMap::new()),
            channel_names: Mutex::new(HashMap::new()),
        }
    }

    /// Gateway intents the handler relies on.
    pub fn intents() -> GatewayIntents {
        GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MEMBERS
            | GatewayIntents::GUILD_MODERATION
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
    }

    async fn record_message(&self, guild_id: u64, msg: &Message) {
        let Some(db) = &self.db else {
            return;
        };
        let row = GuildMessageRow {
            message_id: to_db_id(msg.id.get()),
            guild_id: to_db_id(guild_id),
            channel_id: to_db_id(msg.channel_id.get()),
            user_id: to_db_id(msg.author.id.get()),
            user_name: msg.author.name.clone(),
            guild_name: self.guild_names.lock().get(&guild_id).cloned().unwrap_or_default(),
            user_avatar: msg.author.avatar_url(),
            channel_name: self
                .channel_names
                .lock()
                .get(&msg.channel_id.get())
                .cloned()
                .unwrap_or_default(),
            content: Some(msg.content.clone()),
            created_at: DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0)
                .unwrap_or_default(),
        };
        if let Err(e) = db.insert_message(row).await {
            tracing::warn!(message_id = %msg.id, error = %e, "Failed to record message");
        }
    }

    async fn ban_author(&self, ctx: &Context, guild_id: GuildId, user_id: u64) -> Option<(u64, Option<String>)> {
        let logs = ctx
            .http
            .get_audit_logs(guild_id, Some(Action::Member(MemberAction::BanAdd)), None, None, Some(5))
            .await
            .map_err(|e| tracing::warn!(guild_id = %guild_id, error = %e, "Audit log unavailable"))
            .ok()?;
        logs.entries
            .into_iter()
            .find(|entry| entry.target_id.is_some_and(|target| target.get() == user_id))
            .map(|entry| (entry.user_id.get(), entry.reason))
    }
}

#[async_trait]
impl EventHandler for ModerationHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!(bot_user = %ready.user.name, guilds = ready.guilds.len(), "Gateway ready");
    }

    async fn guild_create(&self, _ctx: Context, guild: Guild, _is_new: Option<bool>) {
        self.guild_names.lock().insert(guild.id.get(), guild.name.clone());
        let mut channels = self.channel_names.lock();
        for channel in guild.channels.values() {
            channels.insert(channel.id.get(), channel.name.clone());
        }
        tracing::debug!(guild_id = %guild.id, channels = guild.channels.len(), "Guild available");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let created_at = DateTime::from_timestamp(msg.timestamp.unix_timestamp(), 0).unwrap_or_default();
        self.service
            .on_message(&AutomodMessage {
                guild_id: guild_id.get(),
                channel_id: msg.channel_id.get(),
                author_id: msg.author.id.get(),
                author_bot: msg.author.bot,
                content: msg.content.clone(),
                created_at,
            })
            .await;
        self.record_message(guild_id.get(), &msg).await;
    }

    async fn channel_create(&self, _ctx: Context, channel: GuildChannel) {
        self.channel_names.lock().insert(channel.id.get(), channel.name.clone());
        if let Err(e) = self
            .service
            .on_channel_create(channel.guild_id.get(), channel.id.get())
            .await
        {
            tracing::warn!(channel_id = %channel.id, error = %e, "Failed to deny mute role in new channel");
        }
    }

    async fn guild_member_update(
        &self,
        _ctx: Context,
        _old: Option<Member>,
        _new: Option<Member>,
        event: GuildMemberUpdateEvent,
    ) {
        let roles: Vec<u64> = event.roles.iter().map(|r| r.get()).collect();
        if let Err(e) = self
            .service
            .on_member_update(event.guild_id.get(), event.user.id.get(), &roles)
            .await
        {
            tracing::warn!(user_id = %event.user.id, error = %e, "Member update not applied");
        }
    }

    async fn guild_ban_addition(&self, ctx: Context, guild_id: GuildId, banned_user: User) {
        let Some((moderator, reason)) = self.ban_author(&ctx, guild_id, banned_user.id.get()).await else {
            tracing::debug!(user_id = %banned_user.id, "No audit entry for ban");
            return;
        };
        if let Err(e) = self
            .service
            .on_member_ban(guild_id.get(), banned_user.id.get(), moderator, reason)
            .await
        {
            tracing::warn!(user_id = %banned_user.id, error = %e, "Manual ban not recorded");
        }
    }

    async fn guild_ban_removal(&self, _ctx: Context, guild_id: GuildId, unbanned_user: User) {
        if let Err(e) = self
            .service
            .on_member_unban(guild_id.get(), unbanned_user.id.get())
            .await
        {
            tracing::warn!(user_id = %unbanned_user.id, error = %e, "Unban not applied");
        }
    }
}

/// Connect to the gateway and run until `cancel` fires.
pub fn spawn_gateway(
    token: String,
    handler: ModerationHandler,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut client = match Client::builder(&token, ModerationHandler::intents())
            .event_handler(handler)
            .await
        {
            Ok(client) => client,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build gateway client");
                return;
            }
        };
        let shards = client.shard_manager.clone();
        tokio::select! {
            result = client.start() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Gateway stopped");
                }
            }
            _ = cancel.cancelled() => {
                shards.shutdown_all().await;
                tracing::info!("Gateway shut down");
            }
        }
    })
}
