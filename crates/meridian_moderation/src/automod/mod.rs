//! Automatic moderation: regex triggers, antispam and autowarn rules.
//!
//! Every guild message goes through [`ModerationService::on_message`]. Regex
//! matches are warned immediately; antispam escalations and autowarn rules
//! go through the [`WarnQueue`](crate::WarnQueue), which a background task
//! drains once per second.

mod antispam;
mod autowarn;
mod pattern;

pub use antispam::{AntispamTracker, SpamVerdict};
pub use autowarn::triggered_rules;
pub use pattern::{RegexCache, RegexOutcome};

use crate::format;
use crate::{GuildModSettings, Level, ModerationService, QueuedWarn, WarnRequest, mention};
use chrono::{DateTime, Utc};
use meridian_error::MeridianResult;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TEXT_WARNING_LIFETIME: Duration = Duration::from_secs(5);
const QUEUE_PERIOD: Duration = Duration::from_secs(1);
const MAX_CONSECUTIVE_ERRORS: u32 = 3;

/// A guild message as seen by automod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomodMessage {
    /// Guild id
    pub guild_id: u64,
    /// Channel id
    pub channel_id: u64,
    /// Author id
    pub author_id: u64,
    /// Whether the author is a bot
    pub author_bot: bool,
    /// Text content
    pub content: String,
    /// When it was sent
    pub created_at: DateTime<Utc>,
}

impl ModerationService {
    /// Run the regex and antispam pipelines on a message.
    ///
    /// Bots, the guild owner and automod-immune members are skipped.
    /// Failures are logged, never returned.
    #[tracing::instrument(
        skip(self, message),
        fields(guild_id = message.guild_id, channel_id = message.channel_id, author_id = message.author_id)
    )]
    pub async fn on_message(&self, message: &AutomodMessage) {
        if message.author_bot {
            return;
        }
        let settings = match self.settings.get(message.guild_id).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, "Could not load automod settings");
                return;
            }
        };
        if !settings.automod.enabled {
            return;
        }
        match self.discord.guild(message.guild_id).await {
            Ok(guild) if guild.owner_id == message.author_id => return,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(error = %e, "Could not load guild for automod");
                return;
            }
        }
        match self
            .discord
            .is_automod_immune(message.guild_id, message.author_id)
            .await
        {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::error!(error = %e, "Could not check automod immunity");
                return;
            }
        }

        let (regex, antispam) = futures::join!(
            self.process_regex(message, settings.clone()),
            self.process_antispam(message, &settings)
        );
        if let Err(e) = regex {
            tracing::error!(error = %e, "Error while processing message for regex automod");
        }
        if let Err(e) = antispam {
            tracing::error!(error = %e, "Error while processing message for antispam");
        }
    }

    async fn process_regex(
        &self,
        message: &AutomodMessage,
        mut settings: GuildModSettings,
    ) -> MeridianResult<()> {
        if settings.automod.regex.is_empty() {
            return Ok(());
        }
        let budget = self.config.regex_timeout();
        let mut disabled = Vec::new();
        let mut matched = Vec::new();
        for (name, rule) in &settings.automod.regex {
            match self.patterns.evaluate(&rule.regex, &message.content, budget).await {
                RegexOutcome::Matched => matched.push(rule.clone()),
                RegexOutcome::NoMatch | RegexOutcome::Invalid => {}
                RegexOutcome::TimedOut => {
                    tracing::warn!(
                        rule = %name,
                        budget_ms = budget.as_millis() as u64,
                        "Automod pattern took too long, disabling it"
                    );
                    disabled.push(name.clone());
                }
            }
        }
        if !disabled.is_empty() {
            for name in &disabled {
                if let Some(rule) = settings.automod.regex.remove(name) {
                    self.patterns.evict(&rule.regex);
                }
            }
            self.settings.save(message.guild_id, &settings).await?;
        }
        if matched.is_empty() {
            return Ok(());
        }

        let guild = self.discord.guild(message.guild_id).await?;
        let bot_id = self.discord.bot_user_id().await?;
        for rule in matched {
            let reason = format::fill_reason_template(
                &rule.reason,
                message.author_id,
                message.channel_id,
                &guild.name,
            );
            let mut request =
                WarnRequest::new(message.guild_id, vec![message.author_id], bot_id, rule.level.as_u8())
                    .with_reason(reason.clone());
            if let Some(secs) = rule.time {
                request = request.with_duration(Duration::from_secs(secs));
            }
            let failures = self.warn(request).await?;
            match failures.first() {
                Some(failure) => tracing::warn!(
                    level = rule.level.as_u8(),
                    reason = %reason,
                    content = %message.content,
                    error = %failure.error,
                    "Regex automod warn failed"
                ),
                None => tracing::info!(
                    level = rule.level.as_u8(),
                    reason = %reason,
                    content = %message.content,
                    "Regex automod warn"
                ),
            }
        }
        Ok(())
    }

    async fn process_antispam(
        &self,
        message: &AutomodMessage,
        settings: &GuildModSettings,
    ) -> MeridianResult<()> {
        if !settings.antispam_active() {
            return Ok(());
        }
        let antispam = &settings.automod.antispam;
        let verdict = self.antispam.record(
            message.guild_id,
            message.channel_id,
            message.author_id,
            message.created_at,
            antispam,
        );
        match verdict {
            SpamVerdict::Clean => {}
            SpamVerdict::TextWarning => {
                let text = format!(
                    "{} you're sending messages too fast!",
                    mention(message.author_id)
                );
                let message_id = self.discord.send_text(message.channel_id, &text).await?;
                let discord = self.discord.clone();
                let channel_id = message.channel_id;
                tokio::spawn(async move {
                    tokio::time::sleep(TEXT_WARNING_LIFETIME).await;
                    if let Err(e) = discord.delete_message(channel_id, message_id).await {
                        tracing::debug!(error = %e, "Antispam text warning already gone");
                    }
                });
            }
            SpamVerdict::Escalate => {
                let queued = self.queue.push(QueuedWarn::prescribed(
                    message.guild_id,
                    message.author_id,
                    &antispam.warn,
                ));
                tracing::info!(queued, "Antispam escalated to a warn");
            }
        }
        Ok(())
    }

    /// Queue the autowarn rules a new case of `level` fires.
    ///
    /// Returns how many warns were queued.
    #[tracing::instrument(skip(self))]
    pub async fn check_autowarn(
        &self,
        guild_id: u64,
        user_id: u64,
        level: Level,
        issued_by_bot: bool,
    ) -> MeridianResult<usize> {
        let settings = self.settings.get(guild_id).await?;
        if !settings.automod.enabled || settings.automod.warnings.is_empty() {
            return Ok(0);
        }
        if self.discord.is_automod_immune(guild_id, user_id).await? {
            return Ok(0);
        }
        let mut cases = self.cases.load(guild_id, user_id).await?;
        crate::sort_cases(&mut cases);
        let now = cases
            .last()
            .map_or_else(|| Utc::now().timestamp(), |newest| newest.time);
        let fired = triggered_rules(&settings.automod.warnings, &cases, level, issued_by_bot, now);
        let mut queued = 0;
        for rule in fired {
            if self
                .queue
                .push(QueuedWarn::prescribed(guild_id, user_id, &rule.warn))
            {
                queued += 1;
            }
        }
        if queued > 0 {
            tracing::info!(queued, "Autowarn rules fired");
        }
        Ok(queued)
    }

    /// Issue every queued automatic warn. Returns how many succeeded.
    pub async fn drain_warn_queue(&self) -> MeridianResult<usize> {
        let pending = self.queue.drain();
        if pending.is_empty() {
            return Ok(0);
        }
        let bot_id = match self.discord.bot_user_id().await {
            Ok(id) => id,
            Err(e) => {
                for warn in &pending {
                    self.queue.finish(warn.guild_id, warn.member_id);
                }
                return Err(e);
            }
        };
        let mut issued = 0;
        for warn in pending {
            let mut request =
                WarnRequest::new(warn.guild_id, vec![warn.member_id], bot_id, warn.level.as_u8())
                    .with_reason(warn.reason.clone());
            if let Some(secs) = warn.duration {
                request = request.with_duration(Duration::from_secs(secs));
            }
            match self.warn(request).await {
                Ok(failures) if failures.is_empty() => issued += 1,
                Ok(failures) => {
                    for failure in failures {
                        tracing::error!(
                            guild_id = warn.guild_id,
                            user_id = failure.user_id,
                            error = %failure.error,
                            "Cannot perform automatic warn"
                        );
                    }
                }
                Err(e) => tracing::error!(
                    guild_id = warn.guild_id,
                    user_id = warn.member_id,
                    error = %e,
                    "Cannot perform automatic warn"
                ),
            }
            self.queue.finish(warn.guild_id, warn.member_id);
        }
        Ok(issued)
    }

    /// Drain the warn queue every second until `cancel` fires or three
    /// drains in a row fail.
    pub fn spawn_warn_queue(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(QUEUE_PERIOD);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut errors = 0;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Automod warn queue stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match service.drain_warn_queue().await {
                            Ok(_) => errors = 0,
                            Err(e) => {
                                errors += 1;
                                if errors >= MAX_CONSECUTIVE_ERRORS {
                                    tracing::error!(
                                        error = %e,
                                        "critical: automod warn queue failed three times in a row, automatic warns are stopped until restart"
                                    );
                                    break;
                                }
                                tracing::error!(error = %e, "Automod warn queue failed, resuming");
                            }
                        }
                    }
                }
            }
        })
    }
}
