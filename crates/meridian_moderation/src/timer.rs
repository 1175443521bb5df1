//! Expiry of temporary mutes and bans.

use crate::format;
use crate::{Level, ModerationService, TempAction};
use meridian_error::{MeridianResult, ModerationError, ModerationErrorKind};
use tokio_util::sync::CancellationToken;

const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// What one pass of the timer did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerReport {
    /// Mutes lifted
    pub unmuted: usize,
    /// Bans lifted
    pub unbanned: usize,
    /// Entries removed without acting (member left, undecodable)
    pub dropped: usize,
    /// Reversals Discord refused; their entries were removed anyway
    pub failed: usize,
}

impl ModerationService {
    /// End every temporary action that expired before `now` (Unix seconds).
    #[tracing::instrument(skip(self))]
    pub async fn check_expired_at(&self, now: i64) -> MeridianResult<TimerReport> {
        let mut report = TimerReport::default();
        for guild_id in self.temp.guilds().await? {
            let (actions, corrupt) = self.temp.list(guild_id).await?;
            for entry in corrupt {
                tracing::error!(
                    guild_id,
                    field = %entry.field,
                    raw = %entry.raw,
                    "Removing undecodable temporary action"
                );
                self.temp.remove_field(guild_id, &entry.field).await?;
                report.dropped += 1;
            }
            for action in actions.into_iter().filter(|a| a.is_expired(now)) {
                self.end_action(&action, &mut report).await;
                if let Err(e) = self.temp.remove(guild_id, action.user_id).await {
                    tracing::error!(
                        guild_id,
                        user_id = action.user_id,
                        error = %e,
                        "Couldn't remove ended temporary action"
                    );
                }
            }
        }
        if report != TimerReport::default() {
            tracing::debug!(?report, "Temporary actions processed");
        }
        Ok(report)
    }

    async fn end_action(&self, action: &TempAction, report: &mut TimerReport) {
        let (guild_id, user_id) = (action.guild_id, action.user_id);
        let member = match self.discord.member(guild_id, user_id).await {
            Ok(member) => member,
            Err(e) if action.level == Level::Mute => {
                report.failed += 1;
                tracing::warn!(
                    guild_id,
                    user_id,
                    error = %e,
                    "Couldn't look up muted member, dropping timed mute"
                );
                return;
            }
            Err(e) => {
                tracing::debug!(
                    guild_id,
                    user_id,
                    error = %e,
                    "Member lookup failed, lifting ban by id"
                );
                None
            }
        };
        if action.level == Level::Mute && member.is_none() {
            tracing::info!(guild_id, user_id, "Muted member left, dropping timed mute");
            report.dropped += 1;
            return;
        }
        let member_name = match &member {
            Some(member) => member.name.clone(),
            None => self
                .discord
                .user_name(user_id)
                .await
                .unwrap_or_else(|_| user_id.to_string()),
        };
        let author = match action.author.id() {
            Some(id) => self
                .discord
                .user_name(id)
                .await
                .unwrap_or_else(|_| id.to_string()),
            None => action.author.to_string(),
        };
        let audit = format::timed_end_reason(
            action.level,
            &member_name,
            &author,
            action.length(),
            action.reason.as_deref(),
        );

        let result = match action.level {
            Level::Mute => self.end_mute(action, &audit).await,
            _ => self.end_ban(action, &audit).await,
        };
        match result {
            Ok(()) => {
                match action.level {
                    Level::Mute => report.unmuted += 1,
                    _ => report.unbanned += 1,
                }
                tracing::info!(
                    guild_id,
                    user_id,
                    level = action.level.as_u8(),
                    ends_at = action.ends_at(),
                    "Ended timed action"
                );
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(
                    guild_id,
                    user_id,
                    error = %e,
                    "Couldn't end timed {}, the member will stay as is",
                    action.level.action()
                );
            }
        }
    }

    async fn end_mute(&self, action: &TempAction, audit: &str) -> MeridianResult<()> {
        let settings = self.settings.get(action.guild_id).await?;
        let Some(mute_role) = settings.mute_role else {
            return Err(ModerationError::new(ModerationErrorKind::MissingMuteRole).into());
        };
        self.restore_member(action.guild_id, action.user_id, mute_role, &action.roles, audit)
            .await
    }

    async fn end_ban(&self, action: &TempAction, audit: &str) -> MeridianResult<()> {
        self.discord
            .unban(action.guild_id, action.user_id, audit)
            .await?;
        if !self.settings.get(action.guild_id).await?.reinvite {
            return Ok(());
        }
        let guild = self.discord.guild(action.guild_id).await?;
        match self.discord.create_invite(action.guild_id).await {
            Ok(Some(invite)) => {
                let text = format::reinvite_text(
                    &guild.name,
                    action.reason.as_deref().unwrap_or("None"),
                    &format::format_duration(action.length()),
                    &invite,
                );
                if let Err(e) = self.discord.send_dm_text(action.user_id, &text).await {
                    tracing::info!(user_id = action.user_id, error = %e, "Couldn't reinvite member");
                }
            }
            Ok(None) => tracing::info!(
                guild_id = action.guild_id,
                "No channel allows creating an invite, skipping reinvite"
            ),
            Err(e) => tracing::warn!(
                guild_id = action.guild_id,
                error = %e,
                "Couldn't create a reinvite"
            ),
        }
        Ok(())
    }

    /// Run [`ModerationService::check_expired_at`] every configured interval
    /// until `cancel` fires or three passes in a row fail.
    pub fn spawn_timer(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(service.config.timer_interval());
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut errors = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Temporary action loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match service.check_expired_at(chrono::Utc::now().timestamp()).await {
                            Ok(_) => errors = 0,
                            Err(e) => {
                                errors += 1;
                                if errors >= MAX_CONSECUTIVE_ERRORS {
                                    tracing::error!(
                                        error = %e,
                                        "critical: temporary action loop failed three times in a row, timed mutes and bans are stopped until restart"
                                    );
                                    break;
                                }
                                tracing::error!(error = %e, "Temporary action loop failed, resuming");
                            }
                        }
                    }
                }
            }
        })
    }
}
