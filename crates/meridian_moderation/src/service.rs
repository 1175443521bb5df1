//! The moderation service: warns, cases and the events that reverse them.

use crate::automod::{AntispamTracker, RegexCache};
use crate::format::{self, CaseEmbedInput, MAX_REASON_LEN};
use crate::{
    Case, CaseAuthor, GuildCase, GuildInfo, GuildModSettings, Level, MemberInfo, ModerationConfig,
    ModlogMessageRef, RoleInfo, SettingsStore, SharedCaseStore, SharedDiscord, TempAction,
    TempActionIndex, WarnQueue, sort_cases,
};
use meridian_error::{MeridianError, MeridianResult, ModerationError, ModerationErrorKind};
use meridian_kv::{KeyedLocks, KvJsonExt, SharedKv};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const BAN_KEY_TTL: Duration = Duration::from_secs(15);
const MEMBER_DM_LIMIT: u64 = 2;
const MEMBER_DM_WINDOW: Duration = Duration::from_secs(6 * 3_600);
const MUTE_ROLE_NAME: &str = "Muted";

/// KV key marking a ban issued by the bot, so ban listeners skip it.
pub fn ban_key(user_id: u64) -> String {
    format!("warnban:{}", user_id)
}

fn latest_user_key(guild_id: u64) -> String {
    format!("mod:latest{}", guild_id)
}

fn latest_case_key(guild_id: u64) -> String {
    format!("modsystem:latest:{}", guild_id)
}

fn log_lock_key(guild_id: u64, user_id: u64) -> String {
    format!("modlog:{}:{}", guild_id, user_id)
}

#[track_caller]
fn moderation(kind: ModerationErrorKind) -> MeridianError {
    ModerationError::new(kind).into()
}

/// Pointer to the member whose case was recorded last in a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestCase {
    /// Guild id
    pub guild_id: u64,
    /// Member id
    pub user_id: u64,
}

/// Parameters of a warn.
///
/// ```
/// use meridian_moderation::WarnRequest;
/// use std::time::Duration;
///
/// let request = WarnRequest::new(100, vec![42], 7, 2)
///     .with_reason("Spamming".to_string())
///     .with_duration(Duration::from_secs(600))
///     .with_log_dm(false);
/// assert_eq!(request.members(), &[42]);
/// ```
#[derive(Debug, Clone, derive_getters::Getters, derive_setters::Setters)]
#[setters(prefix = "with_", strip_option)]
pub struct WarnRequest {
    /// Guild id
    #[setters(skip)]
    guild_id: u64,
    /// Members to warn
    #[setters(skip)]
    members: Vec<u64>,
    /// Moderator issuing the warn
    #[setters(skip)]
    author_id: u64,
    /// Warning level, 1 to 5
    #[setters(skip)]
    level: u8,
    /// Reason, before substitutions
    reason: Option<String>,
    /// Length of a temporary mute or ban
    duration: Option<Duration>,
    /// Unix timestamp recorded on the case, defaults to now
    timestamp: Option<i64>,
    /// Post the case to the modlog channel
    log_modlog: bool,
    /// DM the member
    log_dm: bool,
    /// Mute, kick or ban; off to only record the case
    take_action: bool,
    /// Evaluate autowarn rules afterwards
    automod: bool,
}

impl WarnRequest {
    /// A warn with every side effect enabled.
    pub fn new(guild_id: u64, members: Vec<u64>, author_id: u64, level: u8) -> Self {
        Self {
            guild_id,
            members,
            author_id,
            level,
            reason: None,
            duration: None,
            timestamp: None,
            log_modlog: true,
            log_dm: true,
            take_action: true,
            automod: true,
        }
    }
}

/// A member the warn could not be applied to.
#[derive(Debug)]
pub struct WarnFailure {
    /// Member id
    pub user_id: u64,
    /// Why it failed
    pub error: MeridianError,
}

/// Result of [`ModerationService::ensure_mute_role`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuteRoleSetup {
    /// The configured role still exists
    Existing(u64),
    /// A role was created; channels that could not be updated are listed
    Created {
        /// New role id
        role_id: u64,
        /// One message per channel that failed
        channel_errors: Vec<String>,
    },
}

struct WarnContext {
    guild: GuildInfo,
    settings: GuildModSettings,
    level: Level,
    author_id: u64,
    author: Option<MemberInfo>,
    author_name: String,
    bot_id: u64,
    mute_role: Option<RoleInfo>,
    reason: Option<String>,
    duration: Option<Duration>,
    timestamp: i64,
    log_modlog: bool,
    log_dm: bool,
    take_action: bool,
    automod: bool,
}

/// Moderation core of one bot process.
///
/// Cheap to clone; clones share the case store, the KV and the automod state.
#[derive(Clone)]
pub struct ModerationService {
    pub(crate) discord: SharedDiscord,
    pub(crate) cases: SharedCaseStore,
    pub(crate) kv: SharedKv,
    pub(crate) settings: SettingsStore,
    pub(crate) temp: TempActionIndex,
    pub(crate) config: Arc<ModerationConfig>,
    pub(crate) locks: KeyedLocks,
    pub(crate) queue: WarnQueue,
    pub(crate) antispam: Arc<AntispamTracker>,
    pub(crate) patterns: Arc<RegexCache>,
}

impl std::fmt::Debug for ModerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModerationService")
            .field("config", &self.config)
            .field("queued_warns", &self.queue.len())
            .finish_non_exhaustive()
    }
}

impl ModerationService {
    /// Wire the service to Discord, a case store and the KV.
    pub fn new(
        discord: SharedDiscord,
        cases: SharedCaseStore,
        kv: SharedKv,
        config: ModerationConfig,
    ) -> Self {
        tracing::info!(
            timer_interval_secs = config.timer_interval_secs(),
            queue_limit = config.queue_limit(),
            "Creating moderation service"
        );
        Self {
            settings: SettingsStore::new(kv.clone(), config.clone()),
            temp: TempActionIndex::new(kv.clone()),
            queue: WarnQueue::new(*config.queue_limit()),
            discord,
            cases,
            kv,
            config: Arc::new(config),
            locks: KeyedLocks::new(),
            antispam: Arc::new(AntispamTracker::new()),
            patterns: Arc::new(RegexCache::new()),
        }
    }

    /// Guild settings store.
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Pending temporary actions.
    pub fn temp_actions(&self) -> &TempActionIndex {
        &self.temp
    }

    /// Pending automatic warns.
    pub fn queue(&self) -> &WarnQueue {
        &self.queue
    }

    /// Process-wide configuration.
    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    /// Warn one or more members.
    ///
    /// Problems that concern the whole request (invalid level, missing mute
    /// role, missing bot permissions) fail the call before anything happens.
    /// Problems with individual members are returned as [`WarnFailure`]s;
    /// no case is recorded for them.
    #[tracing::instrument(
        skip(self, request),
        fields(guild_id = request.guild_id, level = request.level, members = request.members.len())
    )]
    pub async fn warn(&self, request: WarnRequest) -> MeridianResult<Vec<WarnFailure>> {
        let level = Level::try_from(request.level)?;
        let guild_id = request.guild_id;
        let settings = self.settings.get(guild_id).await?;
        let guild = self.discord.guild(guild_id).await?;

        let mute_role = match settings.mute_role {
            Some(role_id) => self.discord.role(guild_id, role_id).await?,
            None => None,
        };
        self.check_bot_permissions(&guild, level, mute_role.as_ref(), request.take_action)?;

        let bot_id = self.discord.bot_user_id().await?;
        let author = self.discord.member(guild_id, request.author_id).await?;
        let author_name = match &author {
            Some(member) => member.name.clone(),
            None => self.discord.user_name(request.author_id).await?,
        };
        let reason = request
            .reason
            .as_deref()
            .map(|r| settings.format_reason(r))
            .filter(|r| !r.is_empty());

        let ctx = WarnContext {
            guild,
            settings,
            level,
            author_id: request.author_id,
            author,
            author_name,
            bot_id,
            mute_role,
            reason,
            duration: request.duration.filter(|d| !d.is_zero()),
            timestamp: request
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            log_modlog: request.log_modlog,
            log_dm: request.log_dm,
            take_action: request.take_action,
            automod: request.automod,
        };

        let mut failures = Vec::new();
        for &user_id in &request.members {
            if let Err(error) = self.warn_member(&ctx, user_id).await {
                tracing::warn!(user_id, error = %error, "Warn failed for member");
                failures.push(WarnFailure { user_id, error });
            }
        }
        Ok(failures)
    }

    fn check_bot_permissions(
        &self,
        guild: &GuildInfo,
        level: Level,
        mute_role: Option<&RoleInfo>,
        take_action: bool,
    ) -> MeridianResult<()> {
        let permissions = &guild.bot_permissions;
        match level {
            Level::Warn => {}
            Level::Mute => {
                let Some(role) = mute_role else {
                    return Err(moderation(ModerationErrorKind::MissingMuteRole));
                };
                if take_action && !permissions.manage_roles {
                    return Err(moderation(ModerationErrorKind::MissingPermissions(
                        "I can't manage roles, please give me this permission to continue."
                            .to_string(),
                    )));
                }
                if take_action && role.position >= guild.bot_top_role_position {
                    return Err(moderation(ModerationErrorKind::LostPermissions(format!(
                        "move my top role above `{}` so I can assign it",
                        role.name
                    ))));
                }
            }
            Level::Kick => {
                if take_action && !permissions.kick_members {
                    return Err(moderation(ModerationErrorKind::MissingPermissions(
                        "I can't kick members, please give me this permission to continue."
                            .to_string(),
                    )));
                }
            }
            Level::Softban | Level::Ban => {
                if take_action && !permissions.ban_members {
                    return Err(moderation(ModerationErrorKind::MissingPermissions(
                        "I can't ban members, please give me this permission to continue."
                            .to_string(),
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_member(
        &self,
        ctx: &WarnContext,
        user_id: u64,
        member: Option<&MemberInfo>,
    ) -> MeridianResult<()> {
        if user_id == ctx.bot_id {
            return Err(moderation(ModerationErrorKind::SuicidePrevention));
        }
        let Some(member) = member else {
            if ctx.level == Level::Ban {
                return Ok(());
            }
            return Err(moderation(ModerationErrorKind::MemberNotFound(user_id)));
        };
        let member_top = member.top_role_position();
        if ctx.level > Level::Warn && ctx.guild.bot_top_role_position <= member_top {
            return Err(moderation(ModerationErrorKind::MemberTooHigh(user_id)));
        }
        let author_top = if ctx.author_id == ctx.bot_id {
            ctx.guild.bot_top_role_position
        } else {
            ctx.author.as_ref().map_or(0, MemberInfo::top_role_position)
        };
        if ctx.settings.respect_hierarchy
            && !self.config.owners().contains(&ctx.author_id)
            && ctx.author_id != ctx.guild.owner_id
            && member_top >= author_top
        {
            return Err(moderation(ModerationErrorKind::NotAllowedByHierarchy(user_id)));
        }
        if ctx.level > Level::Mute && user_id == ctx.guild.owner_id {
            return Err(moderation(ModerationErrorKind::MissingPermissions(
                "I can't take actions on the owner of the guild.".to_string(),
            )));
        }
        Ok(())
    }

    async fn warn_member(&self, ctx: &WarnContext, user_id: u64) -> MeridianResult<Case> {
        let guild_id = ctx.guild.id;
        let member = if user_id == ctx.bot_id {
            None
        } else {
            self.discord.member(guild_id, user_id).await?
        };
        self.check_member(ctx, user_id, member.as_ref())?;

        let member_name = match &member {
            Some(member) => member.name.clone(),
            None => self.discord.user_name(user_id).await?,
        };

        let previous = self.cases.load(guild_id, user_id).await?;
        let of_level = previous.iter().filter(|c| c.level == ctx.level).count() + 1;
        let (mut modlog_embed, user_embed) = format::case_embeds(&CaseEmbedInput {
            guild_name: &ctx.guild.name,
            member_id: user_id,
            member_name: &member_name,
            member_avatar: member.as_ref().and_then(|m| m.avatar_url.as_deref()),
            author_id: ctx.author_id,
            level: ctx.level,
            reason: ctx.reason.as_deref(),
            duration: ctx.duration,
            timestamp: ctx.timestamp,
            total: previous.len() + 1,
            of_level,
            colour: ctx.settings.colour(ctx.level),
            show_mod: ctx.settings.show_mod,
        });

        if ctx.log_dm && member.is_some() {
            let dm_key = format!("modsystem_userdms:{}{}", user_id, guild_id);
            if self
                .kv
                .rate_limit(&dm_key, MEMBER_DM_LIMIT, MEMBER_DM_WINDOW)
                .await?
            {
                if let Err(e) = self.discord.send_dm_embed(user_id, &user_embed).await {
                    tracing::info!(user_id, error = %e, "Could not DM warned member");
                    format::mark_dm_failed(&mut modlog_embed);
                }
            } else {
                tracing::warn!(user_id, "Suppressing member DM, rate limit exceeded");
            }
        }

        let roles = if ctx.take_action {
            self.take_action(ctx, user_id, member.as_ref(), &member_name)
                .await?
        } else {
            Vec::new()
        };

        let modlog_message = if ctx.log_modlog {
            self.post_modlog(ctx, &modlog_embed).await
        } else {
            None
        };

        let case = Case {
            level: ctx.level,
            author: CaseAuthor::Id(ctx.author_id),
            reason: ctx.reason.clone(),
            time: ctx.timestamp,
            duration: ctx.duration.map(|d| d.as_secs()),
            roles,
            modlog_message,
        };
        self.create_case(guild_id, user_id, case.clone()).await?;

        match TempAction::from_case(guild_id, user_id, &case) {
            Some(action) => self.temp.add(&action).await?,
            None if ctx.take_action && case.level.is_reversible() => {
                if self.temp.remove(guild_id, user_id).await? {
                    tracing::debug!(user_id, "Permanent action replaced a timed one");
                }
            }
            None => {}
        }
        if ctx.automod {
            let service = self.clone();
            let (level, by_bot) = (ctx.level, ctx.author_id == ctx.bot_id);
            tokio::spawn(async move {
                if let Err(e) = service.check_autowarn(guild_id, user_id, level, by_bot).await {
                    tracing::error!(guild_id, user_id, error = %e, "Autowarn check failed");
                }
            });
        }
        tracing::info!(user_id, level = ctx.level.as_u8(), "Member warned");
        Ok(case)
    }

    /// Apply the level's action. Returns the roles stripped by a mute.
    async fn take_action(
        &self,
        ctx: &WarnContext,
        user_id: u64,
        member: Option<&MemberInfo>,
        member_name: &str,
    ) -> MeridianResult<Vec<u64>> {
        let guild_id = ctx.guild.id;
        let audit = format::audit_reason(
            ctx.level,
            &ctx.author_name,
            ctx.author_id,
            member_name,
            ctx.duration,
            ctx.reason.as_deref(),
        );
        let owners = self.config.owners();
        let owner_vs_owner = owners.contains(&ctx.author_id) && owners.contains(&user_id);
        match ctx.level {
            Level::Warn => Ok(Vec::new()),
            Level::Mute => {
                let mute_role = ctx
                    .mute_role
                    .as_ref()
                    .ok_or_else(|| moderation(ModerationErrorKind::MissingMuteRole))?;
                let mut stripped = Vec::new();
                if let (true, Some(member)) = (ctx.settings.remove_roles, member) {
                    let removable = member.roles.iter().filter(|r| {
                        r.position < ctx.guild.bot_top_role_position
                            && !r.managed
                            && r.id != mute_role.id
                    });
                    for role in removable {
                        match self
                            .discord
                            .remove_role(guild_id, user_id, role.id, &audit)
                            .await
                        {
                            Ok(()) => stripped.push(role.id),
                            Err(e) => tracing::warn!(
                                user_id,
                                role_id = role.id,
                                error = %e,
                                "Failed to remove role while muting"
                            ),
                        }
                    }
                }
                self.discord
                    .add_role(guild_id, user_id, mute_role.id, &audit)
                    .await?;
                Ok(stripped)
            }
            Level::Kick => {
                self.discord.kick(guild_id, user_id, &audit).await?;
                Ok(Vec::new())
            }
            Level::Softban => {
                let days = if owner_vs_owner {
                    0
                } else {
                    ctx.settings.bandays.softban
                };
                self.set_ban_key(user_id).await?;
                self.discord.ban(guild_id, user_id, days, &audit).await?;
                self.discord
                    .unban(
                        guild_id,
                        user_id,
                        "Unbanning the softbanned member after cleaning up the messages.",
                    )
                    .await?;
                Ok(Vec::new())
            }
            Level::Ban => {
                let days = if owner_vs_owner {
                    0
                } else {
                    ctx.settings.bandays.ban
                };
                self.set_ban_key(user_id).await?;
                self.discord.ban(guild_id, user_id, days, &audit).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn set_ban_key(&self, user_id: u64) -> MeridianResult<()> {
        self.kv
            .set(&ban_key(user_id), "1", Some(BAN_KEY_TTL))
            .await?;
        Ok(())
    }

    async fn post_modlog(
        &self,
        ctx: &WarnContext,
        embed: &crate::Embed,
    ) -> Option<ModlogMessageRef> {
        let Some(channel_id) = ctx.settings.channels.for_level(ctx.level) else {
            tracing::debug!(guild_id = ctx.guild.id, "No modlog channel configured");
            return None;
        };
        match self.discord.send_embed(channel_id, embed).await {
            Ok(message_id) => Some(ModlogMessageRef {
                channel_id,
                message_id,
            }),
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "Failed to post modlog embed");
                None
            }
        }
    }

    /// Append a case to a member's log and point the guild's latest case at it.
    #[tracing::instrument(skip(self, case), fields(level = case.level.as_u8()))]
    pub async fn create_case(&self, guild_id: u64, user_id: u64, case: Case) -> MeridianResult<()> {
        {
            let _guard = self.locks.lock(&log_lock_key(guild_id, user_id)).await;
            let mut cases = self.cases.load(guild_id, user_id).await?;
            cases.push(case);
            sort_cases(&mut cases);
            self.cases.save(guild_id, user_id, &cases).await?;
        }
        self.kv
            .set(&latest_user_key(guild_id), &user_id.to_string(), None)
            .await?;
        let ttl = Duration::from_secs(*self.config.default_case_ttl_secs());
        self.kv
            .set_json(
                &latest_case_key(guild_id),
                &LatestCase { guild_id, user_id },
                Some(ttl),
            )
            .await?;
        Ok(())
    }

    /// Member whose case was recorded last in a guild.
    pub async fn latest_case_user(&self, guild_id: u64) -> MeridianResult<Option<u64>> {
        Ok(self
            .kv
            .get(&latest_user_key(guild_id))
            .await?
            .and_then(|raw| raw.parse().ok()))
    }

    /// Latest case pointer, while it has not expired.
    pub async fn latest_case(&self, guild_id: u64) -> MeridianResult<Option<LatestCase>> {
        Ok(self.kv.get_json(&latest_case_key(guild_id)).await?)
    }

    async fn sorted_cases(&self, guild_id: u64, user_id: u64) -> MeridianResult<Vec<Case>> {
        let mut cases = self.cases.load(guild_id, user_id).await?;
        sort_cases(&mut cases);
        Ok(cases)
    }

    fn case_index(cases: &[Case], user_id: u64, index: usize) -> MeridianResult<usize> {
        if index == 0 || index > cases.len() {
            return Err(moderation(ModerationErrorKind::CaseNotFound(format!(
                "member {} has no case #{}",
                user_id, index
            ))));
        }
        Ok(index - 1)
    }

    /// A member's case by its 1-based position, oldest first.
    pub async fn get_case(&self, guild_id: u64, user_id: u64, index: usize) -> MeridianResult<Case> {
        let mut cases = self.sorted_cases(guild_id, user_id).await?;
        let position = Self::case_index(&cases, user_id, index)?;
        Ok(cases.swap_remove(position))
    }

    /// Cases of one member, or of the whole guild, oldest first.
    pub async fn get_all_cases(
        &self,
        guild_id: u64,
        user_id: Option<u64>,
    ) -> MeridianResult<Vec<GuildCase>> {
        let logs = match user_id {
            Some(user_id) => vec![(user_id, self.cases.load(guild_id, user_id).await?)],
            None => self.cases.guild(guild_id).await?,
        };
        let mut all: Vec<GuildCase> = logs
            .into_iter()
            .flat_map(|(user_id, cases)| {
                cases
                    .into_iter()
                    .map(move |case| GuildCase { user_id, case })
            })
            .collect();
        all.sort_by_key(|entry| entry.case.time);
        Ok(all)
    }

    /// Replace the reason of a case and patch its modlog embed.
    #[tracing::instrument(skip(self, reason))]
    pub async fn edit_case(
        &self,
        guild_id: u64,
        user_id: u64,
        index: usize,
        reason: &str,
    ) -> MeridianResult<Case> {
        let length = reason.chars().count();
        if length > MAX_REASON_LEN {
            return Err(moderation(ModerationErrorKind::ReasonTooLong(length)));
        }
        let edited = {
            let _guard = self.locks.lock(&log_lock_key(guild_id, user_id)).await;
            let mut cases = self.sorted_cases(guild_id, user_id).await?;
            let position = Self::case_index(&cases, user_id, index)?;
            cases[position].reason = Some(reason.to_string());
            self.cases.save(guild_id, user_id, &cases).await?;
            cases.swap_remove(position)
        };

        if let Some(message) = edited.modlog_message {
            if let Err(e) = self.patch_modlog_reason(message, reason).await {
                tracing::warn!(
                    channel_id = message.channel_id,
                    message_id = message.message_id,
                    error = %e,
                    "Failed to patch modlog embed"
                );
            }
        }
        tracing::info!("Case reason edited");
        Ok(edited)
    }

    async fn patch_modlog_reason(&self, message: ModlogMessageRef, reason: &str) -> MeridianResult<()> {
        let Some(mut embed) = self
            .discord
            .fetch_embed(message.channel_id, message.message_id)
            .await?
        else {
            return Ok(());
        };
        if embed.set_field("Reason", reason) {
            self.discord
                .edit_embed(message.channel_id, message.message_id, &embed)
                .await?;
        }
        Ok(())
    }

    /// Remove a case, its modlog message and any mute or ban it still holds.
    #[tracing::instrument(skip(self))]
    pub async fn delete_case(&self, guild_id: u64, user_id: u64, index: usize) -> MeridianResult<Case> {
        let removed = {
            let _guard = self.locks.lock(&log_lock_key(guild_id, user_id)).await;
            let mut cases = self.sorted_cases(guild_id, user_id).await?;
            let position = Self::case_index(&cases, user_id, index)?;
            let removed = cases.remove(position);
            self.cases.save(guild_id, user_id, &cases).await?;
            removed
        };

        if let Some(message) = removed.modlog_message {
            if let Err(e) = self
                .discord
                .delete_message(message.channel_id, message.message_id)
                .await
            {
                tracing::warn!(message_id = message.message_id, error = %e, "Failed to delete modlog message");
            }
        }

        let audit = format!("Deleted {} case of member {}", removed.level.action(), user_id);
        match removed.level {
            Level::Mute => self.lift_mute(guild_id, user_id, &removed.roles, &audit).await?,
            Level::Ban => {
                let pending = self.temp.get(guild_id, user_id).await?;
                if pending.is_some_and(|action| action.level == Level::Ban) {
                    if let Err(e) = self.discord.unban(guild_id, user_id, &audit).await {
                        tracing::warn!(user_id, error = %e, "Failed to lift ban of deleted case");
                    }
                    self.temp.remove(guild_id, user_id).await?;
                }
            }
            _ => {}
        }
        tracing::info!(level = removed.level.as_u8(), "Case deleted");
        Ok(removed)
    }

    async fn lift_mute(&self, guild_id: u64, user_id: u64, roles: &[u64], audit: &str) -> MeridianResult<()> {
        let settings = self.settings.get(guild_id).await?;
        let member = self.discord.member(guild_id, user_id).await?;
        if let (Some(role_id), Some(member)) = (settings.mute_role, member) {
            if member.has_role(role_id) {
                if let Err(e) = self.restore_member(guild_id, user_id, role_id, roles, audit).await {
                    tracing::warn!(user_id, error = %e, "Failed to lift mute of deleted case");
                }
            }
        }
        let pending = self.temp.get(guild_id, user_id).await?;
        if pending.is_some_and(|action| action.level == Level::Mute) {
            self.temp.remove(guild_id, user_id).await?;
        }
        Ok(())
    }

    /// Remove the mute role and give back the roles stripped by the mute.
    pub(crate) async fn restore_member(
        &self,
        guild_id: u64,
        user_id: u64,
        mute_role: u64,
        roles: &[u64],
        audit: &str,
    ) -> MeridianResult<()> {
        self.discord
            .remove_role(guild_id, user_id, mute_role, audit)
            .await?;
        for &role_id in roles {
            if self.discord.role(guild_id, role_id).await?.is_none() {
                continue;
            }
            if let Err(e) = self.discord.add_role(guild_id, user_id, role_id, audit).await {
                tracing::warn!(user_id, role_id, error = %e, "Failed to restore role after mute");
            }
        }
        Ok(())
    }

    /// Drop a member's whole log. Returns whether one existed.
    #[tracing::instrument(skip(self))]
    pub async fn clear_cases(&self, guild_id: u64, user_id: u64) -> MeridianResult<bool> {
        let _guard = self.locks.lock(&log_lock_key(guild_id, user_id)).await;
        let removed = self.cases.remove(guild_id, user_id).await?;
        tracing::info!(removed, "Cleared member cases");
        Ok(removed)
    }

    /// A user was unbanned: forget their pending temporary ban.
    pub async fn on_member_unban(&self, guild_id: u64, user_id: u64) -> MeridianResult<()> {
        let pending = self.temp.get(guild_id, user_id).await?;
        if pending.is_some_and(|action| action.level == Level::Ban) {
            self.temp.remove(guild_id, user_id).await?;
            tracing::info!(guild_id, user_id, "Temporary ban cancelled by manual unban");
        }
        Ok(())
    }

    /// A member's roles changed: forget their pending mute once the mute role
    /// is gone.
    pub async fn on_member_update(&self, guild_id: u64, user_id: u64, roles: &[u64]) -> MeridianResult<()> {
        let settings = self.settings.get(guild_id).await?;
        let Some(mute_role) = settings.mute_role else {
            return Ok(());
        };
        if roles.contains(&mute_role) {
            return Ok(());
        }
        let pending = self.temp.get(guild_id, user_id).await?;
        if pending.is_some_and(|action| action.level == Level::Mute) {
            self.temp.remove(guild_id, user_id).await?;
            tracing::info!(guild_id, user_id, "Temporary mute cancelled by manual role removal");
        }
        Ok(())
    }

    /// A user was banned by someone else: record the ban as a case.
    ///
    /// Bans issued by the bot carry a short-lived [`ban_key`] and are skipped.
    /// Returns whether a case was recorded.
    #[tracing::instrument(skip(self, reason))]
    pub async fn on_member_ban(
        &self,
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        reason: Option<String>,
    ) -> MeridianResult<bool> {
        if self.kv.exists(&ban_key(user_id)).await? {
            return Ok(false);
        }
        if moderator_id == self.discord.bot_user_id().await? {
            return Ok(false);
        }
        if !self.settings.get(guild_id).await?.log_manual {
            return Ok(false);
        }
        let mut request = WarnRequest::new(guild_id, vec![user_id], moderator_id, Level::Ban.as_u8())
            .with_log_dm(false)
            .with_log_modlog(false)
            .with_take_action(false);
        request.reason = reason;
        let failures = self.warn(request).await?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(failure.error);
        }
        Ok(true)
    }

    /// Create the mute role if the configured one is missing, deny it in
    /// every channel and store it in the guild settings.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_mute_role(&self, guild_id: u64) -> MeridianResult<MuteRoleSetup> {
        let mut settings = self.settings.get(guild_id).await?;
        if let Some(role_id) = settings.mute_role {
            if self.discord.role(guild_id, role_id).await?.is_some() {
                return Ok(MuteRoleSetup::Existing(role_id));
            }
        }
        let guild = self.discord.guild(guild_id).await?;
        if !guild.bot_permissions.manage_roles {
            return Err(moderation(ModerationErrorKind::MissingPermissions(
                "I can't manage roles, please give me this permission to continue.".to_string(),
            )));
        }
        let role = self
            .discord
            .create_role(
                guild_id,
                MUTE_ROLE_NAME,
                "Mute role. Assigned to muted members, feel free to move it or edit its channel permissions.",
            )
            .await?;
        self.discord
            .move_role(
                guild_id,
                role.id,
                guild.bot_top_role_position - 1,
                "Keeping the mute role under my top role so I can assign it.",
            )
            .await?;

        let mut channel_errors = Vec::new();
        for channel in self.discord.channels(guild_id).await? {
            if let Err(e) = self
                .discord
                .deny_send(
                    channel.id,
                    role.id,
                    "Setting up the mute role. Muted members cannot talk here.",
                )
                .await
            {
                tracing::warn!(channel_id = channel.id, error = %e, "Failed to deny mute role");
                channel_errors.push(format!("Cannot edit permissions of <#{}>: {}", channel.id, e));
            }
        }
        settings.mute_role = Some(role.id);
        self.settings.save(guild_id, &settings).await?;
        tracing::info!(role_id = role.id, failed_channels = channel_errors.len(), "Created mute role");
        Ok(MuteRoleSetup::Created {
            role_id: role.id,
            channel_errors,
        })
    }

    /// A channel was created: deny the mute role in it.
    pub async fn on_channel_create(&self, guild_id: u64, channel_id: u64) -> MeridianResult<()> {
        let settings = self.settings.get(guild_id).await?;
        if !settings.update_mute {
            return Ok(());
        }
        let Some(role_id) = settings.mute_role else {
            return Ok(());
        };
        if self.discord.role(guild_id, role_id).await?.is_none() {
            return Ok(());
        }
        if let Err(e) = self
            .discord
            .deny_send(
                channel_id,
                role_id,
                "Updating channel settings so the mute role works here.",
            )
            .await
        {
            tracing::warn!(channel_id, error = %e, "Could not deny mute role in new channel");
        }
        Ok(())
    }
}
